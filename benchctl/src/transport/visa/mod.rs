//! Access to instruments through a VISA library installed on the system.
//!
//! The library is loaded at runtime, so `benchctl` builds and runs on machines without VISA as long
//! as this backend is not selected.
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use benchctl_protocol::{TransportError, TransportResult};
use tokio::task::spawn_blocking;

pub use asynced::Instrument;
pub use visa_sys::{Visa, DEFAULT_VISA_LIB};

use crate::transport::{ResourceManager, Session, ALL_INSTRUMENTS};

pub mod asynced;
mod blocking;
mod visa_sys;

#[derive(Clone, Debug)]
pub enum VisaRequest {
    Write(String),
    Query(String),
    SetTimeout(Duration),
    Clear,
}

#[derive(Clone, Debug)]
pub enum VisaReply {
    Done,
    String(String),
}

pub struct VisaResourceManager {
    visa: Arc<Visa>,
}

impl VisaResourceManager {
    pub fn load(path: &str) -> TransportResult<Self> {
        let visa = Visa::load(path)?;
        log::info!("Using VISA library `{}`", visa.path());
        Ok(Self { visa })
    }
}

#[async_trait]
impl ResourceManager for VisaResourceManager {
    async fn list_resources(&self) -> TransportResult<Vec<String>> {
        let visa = self.visa.clone();
        spawn_blocking(move || visa.find_resources(ALL_INSTRUMENTS))
            .await
            .map_err(|err| TransportError::from(anyhow!(err)))?
    }

    async fn open(&self, address: &str) -> TransportResult<Box<dyn Session>> {
        let instr = Instrument::open(self.visa.clone(), address).await?;
        Ok(Box::new(instr))
    }
}
