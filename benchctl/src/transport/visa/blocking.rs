use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use benchctl_protocol::{TransportError, TransportResult};

use super::visa_sys::Visa;
use super::{VisaReply, VisaRequest};

const DEFAULT_TERMINATION: &str = "\n";

/// An open VISA session. All calls block the current thread.
pub struct Instrument {
    visa: Arc<Visa>,
    vi: Option<u32>,
    addr: String,
}

impl Instrument {
    pub fn open(visa: Arc<Visa>, addr: &str) -> TransportResult<Instrument> {
        log::debug!("Opening VISA session to {}", addr);
        let vi = visa.open(addr)?;
        Ok(Instrument {
            visa,
            vi: Some(vi),
            addr: addr.to_string(),
        })
    }

    fn vi(&self) -> TransportResult<u32> {
        self.vi.ok_or(TransportError::Disconnected)
    }

    pub fn write(&self, msg: &str) -> TransportResult<()> {
        let vi = self.vi()?;
        log::debug!("{} <- {}", self.addr, msg);
        let mut msg = msg.to_string();
        if !msg.ends_with(DEFAULT_TERMINATION) {
            msg.push_str(DEFAULT_TERMINATION);
        }
        self.visa.write(vi, msg.as_bytes())
    }

    pub fn query(&self, msg: &str) -> TransportResult<String> {
        self.write(msg)?;
        let data = self.visa.read(self.vi()?)?;
        let ret = String::from_utf8(data).map_err(|_| TransportError::from(anyhow!("Reply is not valid UTF-8.")))?;
        let ret = ret.trim_end_matches(|c| c == '\n' || c == '\r').to_string();
        log::debug!("{} -> {}", self.addr, ret);
        Ok(ret)
    }

    pub fn set_timeout(&self, timeout: Duration) -> TransportResult<()> {
        self.visa.set_timeout(self.vi()?, timeout)
    }

    pub fn clear(&self) -> TransportResult<()> {
        self.visa.clear(self.vi()?)
    }

    pub fn close(&mut self) -> TransportResult<()> {
        match self.vi.take() {
            Some(vi) => {
                log::debug!("Closing VISA session to {}", self.addr);
                self.visa.close(vi)
            }
            None => Ok(()),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn handle(&mut self, req: VisaRequest) -> TransportResult<VisaReply> {
        match req {
            VisaRequest::Write(msg) => self.write(&msg).map(|_| VisaReply::Done),
            VisaRequest::Query(msg) => self.query(&msg).map(VisaReply::String),
            VisaRequest::SetTimeout(timeout) => self.set_timeout(timeout).map(|_| VisaReply::Done),
            VisaRequest::Clear => self.clear().map(|_| VisaReply::Done),
        }
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("Error dropping instrument {}: {}", self.addr, err);
        }
    }
}
