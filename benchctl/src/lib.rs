//! Instrument control for an LED driver test bench.
//!
//! Instruments are reached through the [`transport`] seam, either over a VISA installation or a
//! simulated bench. [`controller::InstrumentController`] runs the measurement sequence,
//! [`app::App`] pairs it with the pass/fail evaluation and [`shell`] puts a console in front.
//! [`discovery`] checks which GPIB instruments are reachable.

#[macro_use]
extern crate dlopen_derive;

pub mod address;
pub mod app;
pub mod controller;
pub mod discovery;
pub mod scpi;
pub mod shell;
pub mod transport;

pub use benchctl_protocol as protocol;
pub use benchctl_protocol::{Error, Result};
