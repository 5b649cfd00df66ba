/// Pass/fail evaluation of a measurement against the operator's test limits.
///
/// Voltage and the two currents are allowed to deviate by 10% of their reference. The
/// frequency window is a fixed 30 kHz, independent of the target, and the dimming voltage
/// is checked against a fixed 5.0 V +/- 0.3 V.
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::measurement::{Channel, MeasurementResult, TestLimits};

pub const RELATIVE_TOLERANCE: f64 = 0.10;
pub const FREQUENCY_TOLERANCE_KHZ: f64 = 30.0;
pub const DIM_VOLTAGE_REFERENCE: f64 = 5.0;
pub const DIM_VOLTAGE_TOLERANCE: f64 = 0.3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToleranceSpec {
    pub reference: f64,
    pub tolerance: f64,
    pub unit: String,
}

impl ToleranceSpec {
    fn relative(reference: f64, unit: &str) -> Self {
        Self {
            reference,
            // negative for a negative reference, which no reading can meet
            tolerance: reference * RELATIVE_TOLERANCE,
            unit: unit.to_string(),
        }
    }

    pub fn accepts(&self, measured: f64) -> bool {
        (measured - self.reference).abs() <= self.tolerance
    }
}

impl TestLimits {
    pub fn tolerance(&self, channel: Channel) -> ToleranceSpec {
        let unit = channel.unit();
        match channel {
            Channel::Voltage => ToleranceSpec::relative(self.voltage, unit),
            Channel::CurrentMax => ToleranceSpec::relative(self.current_max, unit),
            Channel::CurrentMin => ToleranceSpec::relative(self.current_min, unit),
            Channel::DimVoltage => ToleranceSpec {
                reference: DIM_VOLTAGE_REFERENCE,
                tolerance: DIM_VOLTAGE_TOLERANCE,
                unit: unit.to_string(),
            },
            Channel::Frequency => ToleranceSpec {
                reference: self.frequency,
                tolerance: FREQUENCY_TOLERANCE_KHZ,
                unit: unit.to_string(),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl From<bool> for Verdict {
    fn from(pass: bool) -> Self {
        if pass {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Fail => f.write_str("FAIL"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelVerdict {
    pub channel: Channel,
    pub measured: f64,
    pub spec: ToleranceSpec,
    pub verdict: Verdict,
}

impl Display for ChannelVerdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:.2} {} ({})",
            self.channel, self.measured, self.spec.unit, self.verdict
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub channels: Vec<ChannelVerdict>,
    pub verdict: Verdict,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelVerdict> {
        self.channels.iter().find(|x| x.channel == channel)
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for ch in &self.channels {
            writeln!(f, "{}", ch)?;
        }
        write!(f, "{}", self.verdict)
    }
}

/// Classify every channel of `result` and the run as a whole.
pub fn evaluate(result: &MeasurementResult, limits: &TestLimits) -> Report {
    let channels: Vec<_> = result
        .iter()
        .map(|(channel, measured)| {
            let spec = limits.tolerance(channel);
            let verdict = spec.accepts(measured).into();
            ChannelVerdict {
                channel,
                measured,
                spec,
                verdict,
            }
        })
        .collect();
    let verdict = channels.iter().all(|x| x.verdict.passed()).into();
    Report { channels, verdict }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> TestLimits {
        TestLimits {
            voltage: 5.0,
            current_max: 350.0,
            current_min: 50.0,
            frequency: 100.0,
        }
    }

    fn nominal() -> MeasurementResult {
        MeasurementResult {
            voltage: 5.0,
            current_max: 350.0,
            current_min: 50.0,
            dim_voltage: 5.0,
            frequency: 100.0,
        }
    }

    #[test]
    fn test_relative_tolerances() {
        let limits = limits();
        let spec = limits.tolerance(Channel::Voltage);
        assert_eq!(spec.reference, 5.0);
        assert!((spec.tolerance - 0.5).abs() < 1e-12);
        assert!((limits.tolerance(Channel::CurrentMax).tolerance - 35.0).abs() < 1e-9);
        assert!((limits.tolerance(Channel::CurrentMin).tolerance - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_reference_never_passes() {
        let limits = TestLimits {
            current_min: -50.0,
            ..limits()
        };
        let spec = limits.tolerance(Channel::CurrentMin);
        assert!((spec.tolerance + 5.0).abs() < 1e-9);
        assert!(!spec.accepts(-50.0));
        assert!(!spec.accepts(-48.0));

        let result = MeasurementResult {
            current_min: -50.0,
            ..nominal()
        };
        let report = evaluate(&result, &limits);
        assert_eq!(report.channel(Channel::CurrentMin).unwrap().verdict, Verdict::Fail);
        assert!(!report.passed());
    }

    #[test]
    fn test_fixed_tolerances() {
        for freq in &[0.0, 1.0, 100.0, 5000.0] {
            let limits = TestLimits {
                frequency: *freq,
                ..limits()
            };
            let spec = limits.tolerance(Channel::Frequency);
            assert_eq!(spec.reference, *freq);
            assert_eq!(spec.tolerance, 30.0);
            assert_eq!(spec.unit, "kHz");

            let dim = limits.tolerance(Channel::DimVoltage);
            assert_eq!(dim.reference, 5.0);
            assert_eq!(dim.tolerance, 0.3);
        }
    }

    #[test]
    fn test_boundary_passes() {
        let spec = ToleranceSpec {
            reference: 100.0,
            tolerance: 30.0,
            unit: "kHz".to_string(),
        };
        assert!(spec.accepts(130.0));
        assert!(spec.accepts(70.0));
        assert!(!spec.accepts(130.5));
        assert!(!spec.accepts(69.5));
    }

    #[test]
    fn test_voltage_within_window() {
        let result = MeasurementResult {
            voltage: 5.4,
            ..nominal()
        };
        let report = evaluate(&result, &limits());
        assert_eq!(report.channel(Channel::Voltage).unwrap().verdict, Verdict::Pass);
        assert!(report.passed());
    }

    #[test]
    fn test_single_failure_fails_run() {
        let result = MeasurementResult {
            voltage: 5.6,
            ..nominal()
        };
        let report = evaluate(&result, &limits());
        assert_eq!(report.channel(Channel::Voltage).unwrap().verdict, Verdict::Fail);
        let others = report
            .channels
            .iter()
            .filter(|x| x.channel != Channel::Voltage)
            .all(|x| x.verdict.passed());
        assert!(others);
        assert_eq!(report.verdict, Verdict::Fail);
    }

    #[test]
    fn test_dim_voltage_ignores_limits() {
        let result = MeasurementResult {
            dim_voltage: 5.35,
            voltage: 12.0,
            ..nominal()
        };
        let limits = TestLimits {
            voltage: 12.0,
            ..limits()
        };
        let report = evaluate(&result, &limits);
        assert_eq!(report.channel(Channel::DimVoltage).unwrap().verdict, Verdict::Fail);
        assert_eq!(report.channel(Channel::Voltage).unwrap().verdict, Verdict::Pass);
    }

    #[test]
    fn test_report_text() {
        let result = MeasurementResult {
            frequency: 140.0,
            ..nominal()
        };
        let report = evaluate(&result, &limits());
        let expected = "voltage: 5.00 V (PASS)\n\
                        current_max: 350.00 mA (PASS)\n\
                        current_min: 50.00 mA (PASS)\n\
                        dim_voltage: 5.00 V (PASS)\n\
                        frequency: 140.00 kHz (FAIL)\n\
                        FAIL";
        assert_eq!(report.to_string(), expected);
    }
}
