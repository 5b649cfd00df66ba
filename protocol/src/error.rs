use std::{io, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serde for the opaque causes carried by [`TransportError`]. Only the message survives,
/// plus the kind of an I/O error.
mod opaque {
    use std::io;
    use std::sync::Arc;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct IoCause {
        kind: String,
        message: String,
    }

    pub fn serialize_io<S: Serializer>(err: &Arc<io::Error>, serializer: S) -> Result<S::Ok, S::Error> {
        let cause = IoCause {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        };
        cause.serialize(serializer)
    }

    pub fn deserialize_io<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Arc<io::Error>, D::Error> {
        let cause = IoCause::deserialize(deserializer)?;
        let kind = match cause.kind.as_str() {
            "TimedOut" => io::ErrorKind::TimedOut,
            "NotFound" => io::ErrorKind::NotFound,
            _ => io::ErrorKind::Other,
        };
        Ok(Arc::new(io::Error::new(kind, cause.message)))
    }

    pub fn serialize_anyhow<S: Serializer>(err: &Arc<anyhow::Error>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#}", err))
    }

    pub fn deserialize_anyhow<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Arc<anyhow::Error>, D::Error> {
        let message = String::deserialize(deserializer)?;
        Ok(Arc::new(anyhow::Error::msg(message)))
    }
}

/// Failure of the instrument transport itself, as reported by a session or resource manager.
#[derive(Error, Clone, Debug, Serialize, Deserialize)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(
        #[serde(serialize_with = "opaque::serialize_io", deserialize_with = "opaque::deserialize_io")]
        Arc<io::Error>,
    ),
    #[error("VISA Error ({code:#x}): {description}")]
    Visa { code: i32, description: String },
    #[error("Timeout")]
    Timeout,
    #[error("Session closed")]
    Disconnected,
    #[error("Cannot load VISA library `{path}`: {reason}")]
    LibraryLoad { path: String, reason: String },
    #[error("Other Error: {0}")]
    Other(
        #[serde(serialize_with = "opaque::serialize_anyhow", deserialize_with = "opaque::deserialize_anyhow")]
        Arc<anyhow::Error>,
    ),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io(Arc::new(err))
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(x: anyhow::Error) -> Self {
        TransportError::Other(Arc::new(x))
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Coarse classification of an [`enum@Error`], stable enough to assert on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    SessionOpen,
    Communication,
    Parse,
    NotInitialized,
}

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum Error {
    #[error("Cannot open `{address}`: {source}")]
    SessionOpen {
        address: String,
        source: TransportError,
    },
    #[error("Communication with `{address}` failed: {source}")]
    Communication {
        address: String,
        source: TransportError,
    },
    #[error("Cannot parse `{text}` as {expected}")]
    Parse { text: String, expected: String },
    #[error("Instruments are not initialized")]
    NotInitialized,
}

impl Error {
    pub fn session_open<A: Into<String>, T: Into<TransportError>>(address: A, err: T) -> Self {
        Error::SessionOpen {
            address: address.into(),
            source: err.into(),
        }
    }

    pub fn communication<A: Into<String>, T: Into<TransportError>>(address: A, err: T) -> Self {
        Error::Communication {
            address: address.into(),
            source: err.into(),
        }
    }

    pub fn parse<T: Into<String>, E: Into<String>>(text: T, expected: E) -> Self {
        Error::Parse {
            text: text.into(),
            expected: expected.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SessionOpen { .. } => ErrorKind::SessionOpen,
            Error::Communication { .. } => ErrorKind::Communication,
            Error::Parse { .. } => ErrorKind::Parse,
            Error::NotInitialized => ErrorKind::NotInitialized,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Error::SessionOpen { source, .. } | Error::Communication { source, .. } => {
                matches!(source, TransportError::Timeout)
            }
            _ => false,
        }
    }
}

/// The single failure signal of a measurement run. Wraps whatever went wrong first.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("Measurement error: {cause}")]
pub struct MeasurementError {
    #[source]
    cause: Error,
}

impl MeasurementError {
    pub fn new(cause: Error) -> Self {
        Self { cause }
    }

    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }

    pub fn cause(&self) -> &Error {
        &self.cause
    }
}

impl From<Error> for MeasurementError {
    fn from(err: Error) -> Self {
        MeasurementError::new(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_error_message() {
        let err = MeasurementError::new(Error::communication("GPIB0::22::INSTR", TransportError::Timeout));
        assert_eq!(
            err.to_string(),
            "Measurement error: Communication with `GPIB0::22::INSTR` failed: Timeout"
        );
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert!(err.cause().is_timeout());
    }

    #[test]
    fn test_error_kinds() {
        let err = Error::session_open("GPIB0::5::INSTR", io::Error::new(io::ErrorKind::NotFound, "no device"));
        assert_eq!(err.kind(), ErrorKind::SessionOpen);
        assert!(!err.is_timeout());
        assert_eq!(Error::parse("abc", "a number").kind(), ErrorKind::Parse);
        assert_eq!(Error::NotInitialized.kind(), ErrorKind::NotInitialized);
    }

    #[test]
    fn test_error_serde() {
        let err = Error::communication(
            "GPIB0::18::INSTR",
            io::Error::new(io::ErrorKind::TimedOut, "read timed out"),
        );
        let json = serde_json::to_string(&err).unwrap();
        let back: Error = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), ErrorKind::Communication);
        match back {
            Error::Communication {
                address,
                source: TransportError::Io(io),
            } => {
                assert_eq!(address, "GPIB0::18::INSTR");
                assert_eq!(io.kind(), io::ErrorKind::TimedOut);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn test_opaque_cause_serde() {
        let err = TransportError::from(anyhow::anyhow!("no listener"));
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"Other":"no listener"}"#);
        let back: TransportError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), "Other Error: no listener");
    }
}
