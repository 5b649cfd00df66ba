//! Enumerate the instruments visible to a resource manager and check that every GPIB instrument
//! answers an identification query.
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use benchctl_protocol::{Error, TransportError};
use serde::{Deserialize, Serialize};

use crate::address;
use crate::scpi::IDENTIFY;
use crate::transport::{ResourceManager, Session, ALL_INSTRUMENTS};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// The instrument answered `*IDN?`.
    Responded { identity: String },
    /// The session opened but the instrument did not identify itself.
    NoIdentity(TransportError),
    OpenFailed(TransportError),
}

impl DeviceStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, DeviceStatus::Responded { .. })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceCheck {
    pub address: String,
    pub status: DeviceStatus,
}

impl Display for DeviceCheck {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- [{}] ---", self.address)?;
        match &self.status {
            DeviceStatus::Responded { identity } => {
                writeln!(f, "Connected, instrument replied:")?;
                writeln!(f, "  {}", identity)
            }
            DeviceStatus::NoIdentity(err) => {
                writeln!(f, "Connected, but the instrument did not answer {}.", IDENTIFY)?;
                writeln!(f, " - It may not support SCPI or the {} query.", IDENTIFY)?;
                writeln!(f, "Error: {}", err)
            }
            DeviceStatus::OpenFailed(err) => {
                writeln!(f, "Cannot open an instrument at this address.")?;
                writeln!(f, " - Check the GPIB address and that the instrument is powered.")?;
                writeln!(f, "Error: {}", err)
            }
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiscoveryReport {
    /// Every resource reported by the resource manager, in enumeration order.
    pub resources: Vec<String>,
    /// One check per GPIB resource.
    pub devices: Vec<DeviceCheck>,
}

impl DiscoveryReport {
    pub fn responding(&self) -> usize {
        self.devices.iter().filter(|x| x.status.is_ok()).count()
    }

    pub fn all_responded(&self) -> bool {
        !self.devices.is_empty() && self.devices.iter().all(|x| x.status.is_ok())
    }
}

impl Display for DiscoveryReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.resources.is_empty() {
            writeln!(f, "No instruments detected.")?;
            return writeln!(f, " - Check that the instruments are visible to the VISA installation.");
        }
        writeln!(f, "=== VISA resources ===")?;
        for (idx, res) in self.resources.iter().enumerate() {
            writeln!(f, "{}. {}", idx + 1, res)?;
        }
        writeln!(f, "======================")?;
        writeln!(f)?;
        if self.devices.is_empty() {
            writeln!(f, "No GPIB instruments detected.")?;
            return writeln!(f, " - Check the GPIB cabling and that the instruments are powered.");
        }
        writeln!(f, "Checking GPIB instruments...")?;
        writeln!(f)?;
        for dev in &self.devices {
            write!(f, "{}", dev)?;
        }
        writeln!(f)?;
        write!(f, "{} of {} instruments responded.", self.responding(), self.devices.len())
    }
}

/// Open `address`, clear it and ask for its identity. The session is always closed again.
pub async fn check_device(manager: &dyn ResourceManager, address: &str, timeout: Duration) -> DeviceCheck {
    let status = match open(manager, address, timeout).await {
        Ok(mut session) => {
            if let Err(err) = session.clear().await {
                log::debug!("Device clear on {} failed: {}", address, err);
            }
            let ret = session.query(IDENTIFY).await;
            if let Err(err) = session.close().await {
                log::warn!("Error closing {}: {}", address, err);
            }
            match ret {
                Ok(identity) => DeviceStatus::Responded {
                    identity: identity.trim().to_string(),
                },
                Err(err) => {
                    log::warn!("{} did not answer {}: {}", address, IDENTIFY, err);
                    DeviceStatus::NoIdentity(err)
                }
            }
        }
        Err(err) => {
            log::warn!("Cannot open {}: {}", address, err);
            DeviceStatus::OpenFailed(err)
        }
    };
    DeviceCheck {
        address: address.to_string(),
        status,
    }
}

async fn open(manager: &dyn ResourceManager, address: &str, timeout: Duration) -> Result<Box<dyn Session>, TransportError> {
    let mut session = manager.open(address).await?;
    session.set_timeout(timeout).await?;
    Ok(session)
}

/// Enumerate all instruments and check each GPIB instrument in turn.
///
/// Only a failing enumeration is an error; problems with individual devices are part of the report.
pub async fn discover(manager: &dyn ResourceManager, timeout: Duration) -> crate::Result<DiscoveryReport> {
    let resources = manager
        .list_resources()
        .await
        .map_err(|err| Error::session_open(ALL_INSTRUMENTS, err))?;
    log::info!("Found {} resources", resources.len());
    let mut devices = Vec::new();
    for res in resources.iter().filter(|x| address::is_gpib(x)) {
        devices.push(check_device(manager, res, timeout).await);
    }
    Ok(DiscoveryReport { resources, devices })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::DEFAULT_TIMEOUT;
    use crate::transport::sim::{Event, SimBench};
    use async_trait::async_trait;
    use benchctl_protocol::{ErrorKind, TransportResult};

    fn bench() -> SimBench {
        let bench = SimBench::new();
        bench.add_device("ASRL1::INSTR", None, Some("serial thing"));
        bench.add_device("GPIB0::5::INSTR", None, Some("Agilent Technologies,6674A,0,A.00.01\n"));
        bench.add_device("gpib0::7::INSTR", None, None);
        bench.add_device("GPIB0::9::INSTR", None, Some("never seen"));
        bench.add_device("TCPIP0::192.168.1.2::inst0::INSTR", None, Some("LAN"));
        bench.fail_open("GPIB0::9::INSTR", TransportError::Timeout);
        bench
    }

    #[tokio::test]
    async fn test_discover() {
        let bench = bench();
        bench.reject_clear("GPIB0::5::INSTR");
        let report = discover(&bench, DEFAULT_TIMEOUT).await.unwrap();

        assert_eq!(report.resources.len(), 5);
        let addresses: Vec<_> = report.devices.iter().map(|x| x.address.as_str()).collect();
        assert_eq!(addresses, vec!["GPIB0::5::INSTR", "gpib0::7::INSTR", "GPIB0::9::INSTR"]);

        match &report.devices[0].status {
            DeviceStatus::Responded { identity } => {
                assert_eq!(identity, "Agilent Technologies,6674A,0,A.00.01")
            }
            x => panic!("unexpected status {:?}", x),
        }
        assert!(matches!(
            report.devices[1].status,
            DeviceStatus::NoIdentity(TransportError::Timeout)
        ));
        assert!(matches!(
            report.devices[2].status,
            DeviceStatus::OpenFailed(TransportError::Timeout)
        ));
        assert_eq!(report.responding(), 1);
        assert!(!report.all_responded());

        // every opened session was closed again and non-GPIB resources were not touched
        assert!(!bench.is_open("GPIB0::5::INSTR"));
        assert!(!bench.is_open("gpib0::7::INSTR"));
        assert!(bench.commands("ASRL1::INSTR").is_empty());
        assert!(bench.events().contains(&Event::SetTimeout {
            address: "GPIB0::5::INSTR".to_string(),
            timeout: Duration::from_millis(5000),
        }));
        assert_eq!(bench.commands("GPIB0::5::INSTR"), vec!["*IDN?"]);
    }

    #[tokio::test]
    async fn test_report_text() {
        let report = discover(&bench(), DEFAULT_TIMEOUT).await.unwrap();
        let text = report.to_string();
        assert!(text.starts_with("=== VISA resources ===\n1. ASRL1::INSTR\n2. GPIB0::5::INSTR\n"));
        assert!(text.contains("--- [GPIB0::5::INSTR] ---\nConnected, instrument replied:\n  Agilent"));
        assert!(text.contains("--- [gpib0::7::INSTR] ---\nConnected, but the instrument did not answer *IDN?."));
        assert!(text.contains("--- [GPIB0::9::INSTR] ---\nCannot open an instrument at this address."));
        assert!(text.ends_with("1 of 3 instruments responded."));
    }

    #[tokio::test]
    async fn test_nothing_found() {
        let report = discover(&SimBench::new(), DEFAULT_TIMEOUT).await.unwrap();
        assert!(report.resources.is_empty());
        assert!(report.to_string().starts_with("No instruments detected."));

        let bench = SimBench::new();
        bench.add_device("ASRL1::INSTR", None, Some("serial thing"));
        let report = discover(&bench, DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(report.resources.len(), 1);
        assert!(report.devices.is_empty());
        assert!(report.to_string().contains("No GPIB instruments detected."));
    }

    struct Unavailable;

    #[async_trait]
    impl ResourceManager for Unavailable {
        async fn list_resources(&self) -> TransportResult<Vec<String>> {
            Err(TransportError::LibraryLoad {
                path: "libvisa.so".to_string(),
                reason: "not found".to_string(),
            })
        }

        async fn open(&self, _address: &str) -> TransportResult<Box<dyn Session>> {
            Err(TransportError::Disconnected)
        }
    }

    #[tokio::test]
    async fn test_enumeration_failure() {
        let err = discover(&Unavailable, DEFAULT_TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionOpen);
    }
}
