/// This module contains the data produced by one run of the LED driver measurement sequence.
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::Error;

/// The named channels of a measurement, in reporting order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Voltage,
    CurrentMax,
    CurrentMin,
    DimVoltage,
    Frequency,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Voltage,
        Channel::CurrentMax,
        Channel::CurrentMin,
        Channel::DimVoltage,
        Channel::Frequency,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::Voltage => "voltage",
            Channel::CurrentMax => "current_max",
            Channel::CurrentMin => "current_min",
            Channel::DimVoltage => "dim_voltage",
            Channel::Frequency => "frequency",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Channel::Voltage | Channel::DimVoltage => "V",
            Channel::CurrentMax | Channel::CurrentMin => "mA",
            Channel::Frequency => "kHz",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Readings of a single `measure_all` run.
///
/// Currents are in mA with the baseline offset already subtracted, the frequency is in kHz.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub voltage: f64,
    pub current_max: f64,
    pub current_min: f64,
    pub dim_voltage: f64,
    pub frequency: f64,
}

impl MeasurementResult {
    pub fn get(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Voltage => self.voltage,
            Channel::CurrentMax => self.current_max,
            Channel::CurrentMin => self.current_min,
            Channel::DimVoltage => self.dim_voltage,
            Channel::Frequency => self.frequency,
        }
    }

    /// Iterate over all channels in reporting order.
    pub fn iter(&self) -> impl Iterator<Item = (Channel, f64)> + '_ {
        Channel::ALL.iter().map(move |ch| (*ch, self.get(*ch)))
    }
}

/// Voltage applied to the driver under test by the main supply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputVoltage {
    V12,
    V24,
}

impl InputVoltage {
    pub fn volts(&self) -> u32 {
        match self {
            InputVoltage::V12 => 12,
            InputVoltage::V24 => 24,
        }
    }
}

impl Default for InputVoltage {
    fn default() -> Self {
        InputVoltage::V12
    }
}

impl Display for InputVoltage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.volts())
    }
}

impl FromStr for InputVoltage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_suffix('V').or_else(|| s.strip_suffix('v')).unwrap_or(s);
        match s {
            "12" => Ok(InputVoltage::V12),
            "24" => Ok(InputVoltage::V24),
            _ => Err(Error::parse(s, "an input voltage (12 or 24)")),
        }
    }
}

/// Reference values entered by the operator for one run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestLimits {
    /// Output voltage in V.
    pub voltage: f64,
    /// Current without dimming in mA.
    pub current_max: f64,
    /// Current with dimming enabled in mA.
    pub current_min: f64,
    /// PWM frequency in kHz.
    pub frequency: f64,
}
