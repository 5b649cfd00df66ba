//! A simulated LED driver test bench.
//!
//! [`SimBench`] models the four bench instruments wired to an LED driver closely enough to run the
//! measurement sequence without hardware. On top of the model, replies can be scripted and
//! failures injected per address and command, and every exchange is recorded in an event log.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use benchctl_protocol::{TransportError, TransportResult};

use crate::controller::{BenchConfig, Role};
use crate::scpi::{IDENTIFY, OPERATION_COMPLETE};
use crate::transport::{ResourceManager, Session};

const RSRC_NOT_FOUND: i32 = 0xBFFF_0011_u32 as i32;
// Tektronix scopes answer 9.91E37 if a measurement cannot be taken
const SCOPE_INVALID: &str = "9.91E37";

/// Electrical behaviour of the simulated driver under test.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverModel {
    /// Output voltage in V while powered.
    pub output_voltage: f64,
    /// Current in A without dimming.
    pub current_max: f64,
    /// Current in A with the dimming input driven.
    pub current_min: f64,
    /// PWM frequency in Hz.
    pub frequency: f64,
    /// Leakage current in A, always seen by the meter.
    pub leakage: f64,
}

impl Default for DriverModel {
    fn default() -> Self {
        Self {
            output_voltage: 36.0,
            current_max: 0.350,
            current_min: 0.050,
            frequency: 100_000.0,
            leakage: 0.0004,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Open(String),
    Close(String),
    Clear(String),
    SetTimeout { address: String, timeout: Duration },
    Write { address: String, command: String },
    Query { address: String, command: String },
}

impl Event {
    fn address(&self) -> &str {
        match self {
            Event::Open(x) | Event::Close(x) | Event::Clear(x) => x,
            Event::SetTimeout { address, .. } | Event::Write { address, .. } | Event::Query { address, .. } => address,
        }
    }

    /// The SCPI command of a write or query.
    pub fn command(&self) -> Option<&str> {
        match self {
            Event::Write { command, .. } | Event::Query { command, .. } => Some(command),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum MeterMode {
    Voltage,
    Current,
}

#[derive(Clone, Debug)]
struct BenchState {
    supply_volts: f64,
    supply_on: bool,
    dimming_volts: f64,
    dimming_on: bool,
    meter_mode: MeterMode,
}

impl Default for BenchState {
    fn default() -> Self {
        Self {
            supply_volts: 0.0,
            supply_on: false,
            dimming_volts: 0.0,
            dimming_on: false,
            meter_mode: MeterMode::Voltage,
        }
    }
}

struct Device {
    role: Option<Role>,
    idn: Option<String>,
    open: bool,
}

#[derive(Default)]
struct Shared {
    order: Vec<String>,
    devices: HashMap<String, Device>,
    model: DriverModel,
    state: BenchState,
    scripted: HashMap<(String, String), VecDeque<String>>,
    failures: HashMap<(String, String), TransportError>,
    open_failures: HashMap<String, TransportError>,
    clear_unsupported: Vec<String>,
    events: Vec<Event>,
}

fn key(address: &str) -> String {
    address.trim().to_uppercase()
}

impl Shared {
    fn record(&mut self, event: Event) {
        log::debug!("sim: {:?}", event);
        self.events.push(event);
    }

    fn check_failure(&self, address: &str, command: &str) -> TransportResult<()> {
        match self.failures.get(&(key(address), command.to_string())) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn device(&self, address: &str) -> TransportResult<&Device> {
        match self.devices.get(&key(address)) {
            Some(dev) if dev.open => Ok(dev),
            _ => Err(TransportError::Disconnected),
        }
    }

    fn write(&mut self, address: &str, command: &str) -> TransportResult<()> {
        self.record(Event::Write {
            address: address.to_string(),
            command: command.to_string(),
        });
        self.check_failure(address, command)?;
        let role = self.device(address)?.role;
        for token in command.split(';') {
            self.apply(role, token.trim());
        }
        Ok(())
    }

    fn apply(&mut self, role: Option<Role>, token: &str) {
        let token = token.to_uppercase();
        let mut parts = token.split_whitespace();
        let header = parts.next().unwrap_or("");
        let arg = parts.next();
        let state = &mut self.state;
        match (role, header) {
            (Some(Role::Supply), "*RST") => {
                state.supply_on = false;
                state.supply_volts = 0.0;
            }
            (Some(Role::Dimming), "*RST") => {
                state.dimming_on = false;
                state.dimming_volts = 0.0;
            }
            (Some(Role::Meter), "*RST") => state.meter_mode = MeterMode::Voltage,
            (Some(Role::Supply), "VOLT") => {
                state.supply_volts = arg.and_then(|x| x.parse().ok()).unwrap_or(state.supply_volts)
            }
            (Some(Role::Dimming), "VOLT") => {
                state.dimming_volts = arg.and_then(|x| x.parse().ok()).unwrap_or(state.dimming_volts)
            }
            (Some(Role::Supply), "OUTP") => state.supply_on = arg == Some("ON"),
            (Some(Role::Dimming), "OUTP") => state.dimming_on = arg == Some("ON"),
            (Some(Role::Meter), "CONF:VOLT:DC") => state.meter_mode = MeterMode::Voltage,
            (Some(Role::Meter), "CONF:CURR:DC") => state.meter_mode = MeterMode::Current,
            _ => log::debug!("sim: ignoring `{}`", token),
        }
    }

    fn query(&mut self, address: &str, command: &str) -> TransportResult<String> {
        self.record(Event::Query {
            address: address.to_string(),
            command: command.to_string(),
        });
        self.check_failure(address, command)?;
        let (role, idn) = {
            let dev = self.device(address)?;
            (dev.role, dev.idn.clone())
        };
        if let Some(queue) = self.scripted.get_mut(&(key(address), command.to_string())) {
            if let Some(reply) = queue.pop_front() {
                return Ok(reply);
            }
        }
        let model = &self.model;
        let state = &self.state;
        let powered = state.supply_on && state.supply_volts > 0.0;
        let reply = match (role, command) {
            (_, IDENTIFY) => idn,
            (_, OPERATION_COMPLETE) => Some("1".to_string()),
            (Some(Role::Meter), "READ?") => {
                let value = match state.meter_mode {
                    MeterMode::Voltage if powered => model.output_voltage,
                    MeterMode::Voltage => 0.0,
                    MeterMode::Current if !powered => model.leakage,
                    MeterMode::Current if state.dimming_on => model.leakage + model.current_min,
                    MeterMode::Current => model.leakage + model.current_max,
                };
                Some(format!("{:E}", value))
            }
            (Some(Role::Dimming), "MEAS:VOLT?") => {
                let value = if state.dimming_on { state.dimming_volts } else { 0.0 };
                Some(format!("{:.4}", value))
            }
            (Some(Role::Scope), "MEASU:IMM:VAL?") => {
                if powered {
                    Some(format!("{:E}", model.frequency))
                } else {
                    Some(SCOPE_INVALID.to_string())
                }
            }
            _ => None,
        };
        // an instrument that does not understand a query stays silent
        reply.ok_or(TransportError::Timeout)
    }
}

/// Shared handle to a simulated bench. Clones refer to the same bench.
#[derive(Clone, Default)]
pub struct SimBench {
    shared: Arc<Mutex<Shared>>,
}

impl SimBench {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bench with the four instruments at the addresses of `config`, wired to a driver
    /// behaving like `model`.
    pub fn led_driver(config: &BenchConfig, model: DriverModel) -> Self {
        let ret = Self::new();
        ret.lock().model = model;
        ret.add_device(config.address(Role::Supply), Some(Role::Supply), Some("Agilent Technologies,6674A,0,A.00.01"));
        ret.add_device(config.address(Role::Meter), Some(Role::Meter), Some("HEWLETT-PACKARD,34401A,0,11-5-2"));
        ret.add_device(config.address(Role::Dimming), Some(Role::Dimming), Some("Agilent Technologies,E3631A,0,2.1-5.0-1.0"));
        ret.add_device(config.address(Role::Scope), Some(Role::Scope), Some("TEKTRONIX,TDS 2024B,0,CF:91.1CT FV:v22.11"));
        ret
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Attach an instrument. Without identity it never answers `*IDN?`.
    pub fn add_device(&self, address: &str, role: Option<Role>, idn: Option<&str>) {
        let mut shared = self.lock();
        let k = key(address);
        if !shared.devices.contains_key(&k) {
            shared.order.push(address.trim().to_string());
        }
        shared.devices.insert(
            k,
            Device {
                role,
                idn: idn.map(|x| x.to_string()),
                open: false,
            },
        );
    }

    /// Queue replies returned for `command` on `address` before the model is consulted.
    pub fn script(&self, address: &str, command: &str, replies: &[&str]) {
        let mut shared = self.lock();
        let queue = shared
            .scripted
            .entry((key(address), command.to_string()))
            .or_insert_with(VecDeque::new);
        queue.extend(replies.iter().map(|x| x.to_string()));
    }

    /// Fail every write or query of `command` on `address`.
    pub fn fail_on(&self, address: &str, command: &str, err: TransportError) {
        self.lock().failures.insert((key(address), command.to_string()), err);
    }

    pub fn fail_open(&self, address: &str, err: TransportError) {
        self.lock().open_failures.insert(key(address), err);
    }

    /// Reject device clear on `address`, as some older instruments do.
    pub fn reject_clear(&self, address: &str) {
        self.lock().clear_unsupported.push(key(address));
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    /// Commands written or queried on `address`, in order.
    pub fn commands(&self, address: &str) -> Vec<String> {
        let k = key(address);
        self.lock()
            .events
            .iter()
            .filter(|x| key(x.address()) == k)
            .filter_map(|x| x.command().map(|x| x.to_string()))
            .collect()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    pub fn is_open(&self, address: &str) -> bool {
        self.lock().devices.get(&key(address)).map(|x| x.open).unwrap_or(false)
    }

    /// True if the supply or the dimming supply output is switched on.
    pub fn outputs_on(&self) -> bool {
        let shared = self.lock();
        shared.state.supply_on || shared.state.dimming_on
    }

    /// True if the output of the supply in `role` is switched on.
    pub fn output_on(&self, role: Role) -> bool {
        let shared = self.lock();
        match role {
            Role::Supply => shared.state.supply_on,
            Role::Dimming => shared.state.dimming_on,
            Role::Meter | Role::Scope => false,
        }
    }
}

#[async_trait]
impl ResourceManager for SimBench {
    async fn list_resources(&self) -> TransportResult<Vec<String>> {
        Ok(self.lock().order.clone())
    }

    async fn open(&self, address: &str) -> TransportResult<Box<dyn Session>> {
        let mut shared = self.lock();
        let k = key(address);
        if let Some(err) = shared.open_failures.get(&k) {
            return Err(err.clone());
        }
        match shared.devices.get_mut(&k) {
            Some(dev) => dev.open = true,
            None => {
                return Err(TransportError::Visa {
                    code: RSRC_NOT_FOUND,
                    description: "The requested resource is not present in the system.".to_string(),
                })
            }
        }
        shared.record(Event::Open(address.to_string()));
        Ok(Box::new(SimSession {
            address: address.to_string(),
            bench: self.clone(),
            open: true,
        }))
    }
}

struct SimSession {
    address: String,
    bench: SimBench,
    open: bool,
}

impl SimSession {
    fn check_open(&self) -> TransportResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }

    fn shutdown(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let mut shared = self.bench.lock();
        if let Some(dev) = shared.devices.get_mut(&key(&self.address)) {
            dev.open = false;
        }
        shared.record(Event::Close(self.address.clone()));
    }
}

#[async_trait]
impl Session for SimSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&mut self, command: &str) -> TransportResult<()> {
        self.check_open()?;
        self.bench.lock().write(&self.address, command)
    }

    async fn query(&mut self, command: &str) -> TransportResult<String> {
        self.check_open()?;
        self.bench.lock().query(&self.address, command)
    }

    async fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        self.check_open()?;
        self.bench.lock().record(Event::SetTimeout {
            address: self.address.clone(),
            timeout,
        });
        Ok(())
    }

    async fn clear(&mut self) -> TransportResult<()> {
        self.check_open()?;
        let mut shared = self.bench.lock();
        shared.record(Event::Clear(self.address.clone()));
        if shared.clear_unsupported.contains(&key(&self.address)) {
            return Err(anyhow!("Device clear not supported").into());
        }
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for SimSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_model_follows_commands() {
        let config = BenchConfig::default();
        let bench = SimBench::led_driver(&config, DriverModel::default());
        let mut supply = bench.open(&config.supply).await.unwrap();
        let mut meter = bench.open(&config.meter).await.unwrap();

        meter.write("CONF:CURR:DC 0.1").await.unwrap();
        assert_eq!(meter.query("READ?").await.unwrap(), "4E-4");

        supply.write("VOLT 12; OUTP ON").await.unwrap();
        assert!(bench.outputs_on());
        meter.write("*RST; CONF:VOLT:DC 100").await.unwrap();
        assert_eq!(meter.query("READ?").await.unwrap(), "3.6E1");

        supply.write("OUTP OFF").await.unwrap();
        assert!(!bench.outputs_on());
    }

    #[tokio::test]
    async fn test_script_and_failures() {
        let bench = SimBench::new();
        bench.add_device("GPIB0::3::INSTR", None, Some("ACME,1,2,3"));
        bench.add_device("GPIB0::4::INSTR", None, None);
        bench.script("GPIB0::3::INSTR", "*IDN?", &["first"]);
        bench.fail_open("GPIB0::9::INSTR", TransportError::Timeout);

        let mut dev = bench.open("gpib0::3::instr").await.unwrap();
        assert_eq!(dev.query("*IDN?").await.unwrap(), "first");
        assert_eq!(dev.query("*IDN?").await.unwrap(), "ACME,1,2,3");
        assert!(matches!(dev.query("FOO?").await, Err(TransportError::Timeout)));
        dev.close().await.unwrap();
        assert!(matches!(dev.query("*IDN?").await, Err(TransportError::Disconnected)));

        let mut silent = bench.open("GPIB0::4::INSTR").await.unwrap();
        assert!(matches!(silent.query("*IDN?").await, Err(TransportError::Timeout)));

        assert!(matches!(
            bench.open("GPIB0::9::INSTR").await,
            Err(TransportError::Timeout)
        ));
        assert!(matches!(
            bench.open("GPIB0::10::INSTR").await,
            Err(TransportError::Visa { .. })
        ));
        assert_eq!(
            bench.list_resources().await.unwrap(),
            vec!["GPIB0::3::INSTR".to_string(), "GPIB0::4::INSTR".to_string()]
        );
    }

    #[tokio::test]
    async fn test_drop_closes_session() {
        let bench = SimBench::new();
        bench.add_device("GPIB0::3::INSTR", None, None);
        {
            let _dev = bench.open("GPIB0::3::INSTR").await.unwrap();
            assert!(bench.is_open("GPIB0::3::INSTR"));
        }
        assert!(!bench.is_open("GPIB0::3::INSTR"));
        assert_eq!(bench.events().last(), Some(&Event::Close("GPIB0::3::INSTR".to_string())));
    }
}
