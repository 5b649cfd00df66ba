//! # Shared types of the `benchctl` LED driver test bench
//!
//! This crate holds everything that is exchanged between the instrument side and whatever
//! presents results to the operator:
//!
//!  * [`MeasurementResult`] - the readings of one run of the measurement sequence
//!  * [`TestLimits`] and [`ToleranceSpec`] - what a reading is compared against
//!  * [`evaluate`] - the pure pass/fail evaluation producing a [`Report`]
//!  * [`enum@Error`] and [`MeasurementError`] - the error taxonomy of the bench
//!
//! All types are serializable, which allows results and failures to be emitted as JSON.
pub mod error;
pub mod measurement;
pub mod verdict;

pub use crate::error::{Error, ErrorKind, MeasurementError, TransportError, TransportResult};
pub use crate::measurement::{Channel, InputVoltage, MeasurementResult, TestLimits};
pub use crate::verdict::{evaluate, ChannelVerdict, Report, ToleranceSpec, Verdict};

pub type Result<T> = std::result::Result<T, Error>;
