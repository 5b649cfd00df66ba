//! Instrument transports.
//!
//! A [`ResourceManager`] enumerates and opens instruments, an open instrument is a [`Session`].
//! The controller and the discovery only ever talk to these two traits.
use std::time::Duration;

use async_trait::async_trait;
use benchctl_protocol::TransportResult;

pub mod sim;
pub mod visa;

/// Search expression matching every instrument resource.
pub const ALL_INSTRUMENTS: &str = "?*::INSTR";

#[async_trait]
pub trait Session: Send {
    fn address(&self) -> &str;

    async fn write(&mut self, command: &str) -> TransportResult<()>;

    async fn query(&mut self, command: &str) -> TransportResult<String>;

    async fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()>;

    async fn clear(&mut self) -> TransportResult<()>;

    /// Close the session. Any further request fails with `TransportError::Disconnected`.
    async fn close(&mut self) -> TransportResult<()>;
}

#[async_trait]
pub trait ResourceManager: Send + Sync {
    async fn list_resources(&self) -> TransportResult<Vec<String>>;

    async fn open(&self, address: &str) -> TransportResult<Box<dyn Session>>;
}
