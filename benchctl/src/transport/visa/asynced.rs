use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use benchctl_protocol::{TransportError, TransportResult};
use tokio::sync::oneshot;
use tokio::task::spawn_blocking;

use super::blocking::Instrument as BlockingInstrument;
use super::visa_sys::Visa;
use super::{VisaReply, VisaRequest};
use crate::transport::Session;

/// A VISA session driven by a dedicated worker thread.
/// Dropping it closes the underlying session once the worker drains its queue.
pub struct Instrument {
    addr: String,
    tx: Option<mpsc::Sender<Msg>>,
}

enum Msg {
    Request {
        request: VisaRequest,
        reply: oneshot::Sender<TransportResult<VisaReply>>,
    },
    Close {
        reply: oneshot::Sender<TransportResult<()>>,
    },
}

impl Instrument {
    pub async fn open<T: Into<String>>(visa: Arc<Visa>, addr: T) -> TransportResult<Instrument> {
        let addr = addr.into();
        let instr = spawn_blocking(move || BlockingInstrument::open(visa, &addr))
            .await
            .map_err(|err| TransportError::from(anyhow!(err)))?;
        Ok(Self::spawn(instr?))
    }

    fn spawn(mut instr: BlockingInstrument) -> Instrument {
        let (tx, rx) = mpsc::channel();
        let addr = instr.addr().to_string();
        thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    Msg::Request { request, reply } => {
                        let _ = reply.send(instr.handle(request));
                    }
                    Msg::Close { reply } => {
                        let _ = reply.send(instr.close());
                        break;
                    }
                }
            }
        });
        Instrument { addr, tx: Some(tx) }
    }

    async fn request(&mut self, request: VisaRequest) -> TransportResult<VisaReply> {
        let rx = {
            let tx = self.tx.as_ref().ok_or(TransportError::Disconnected)?;
            let (reply, rx) = oneshot::channel();
            tx.send(Msg::Request { request, reply })
                .map_err(|_| TransportError::Disconnected)?;
            rx
        };
        rx.await.map_err(|_| TransportError::Disconnected)?
    }
}

fn unexpected(reply: VisaReply) -> TransportError {
    anyhow!("Invalid response for request: {:?}", reply).into()
}

#[async_trait]
impl Session for Instrument {
    fn address(&self) -> &str {
        &self.addr
    }

    async fn write(&mut self, command: &str) -> TransportResult<()> {
        match self.request(VisaRequest::Write(command.to_string())).await? {
            VisaReply::Done => Ok(()),
            x => Err(unexpected(x)),
        }
    }

    async fn query(&mut self, command: &str) -> TransportResult<String> {
        match self.request(VisaRequest::Query(command.to_string())).await? {
            VisaReply::String(x) => Ok(x),
            x => Err(unexpected(x)),
        }
    }

    async fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        match self.request(VisaRequest::SetTimeout(timeout)).await? {
            VisaReply::Done => Ok(()),
            x => Err(unexpected(x)),
        }
    }

    async fn clear(&mut self) -> TransportResult<()> {
        match self.request(VisaRequest::Clear).await? {
            VisaReply::Done => Ok(()),
            x => Err(unexpected(x)),
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        let rx = match self.tx.take() {
            Some(tx) => {
                let (reply, rx) = oneshot::channel();
                if tx.send(Msg::Close { reply }).is_err() {
                    return Ok(());
                }
                rx
            }
            None => return Ok(()),
        };
        rx.await.unwrap_or(Ok(()))
    }
}
