use benchctl_protocol::{evaluate, InputVoltage, MeasurementError, MeasurementResult, Report, TestLimits};
use serde::{Deserialize, Serialize};

use crate::controller::InstrumentController;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    Initialize,
    Measure { input: InputVoltage, limits: TestLimits },
    Shutdown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    Status { ready: bool, message: String },
    Report { result: MeasurementResult, report: Report },
    Error(MeasurementError),
    Done,
}

/// Front end independent request handling around one [`InstrumentController`].
pub struct App {
    controller: InstrumentController,
}

impl App {
    pub fn new(controller: InstrumentController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &InstrumentController {
        &self.controller
    }

    pub async fn handle_request(&mut self, req: Request) -> Response {
        match req {
            Request::Initialize => {
                let status = self.controller.initialize_instruments().await;
                Response::Status {
                    ready: status.is_ready(),
                    message: status.to_string(),
                }
            }
            Request::Measure { input, limits } => match self.controller.measure_all(input).await {
                Ok(result) => {
                    let report = evaluate(&result, &limits);
                    log::info!("Verdict: {}", report.verdict);
                    Response::Report { result, report }
                }
                Err(err) => Response::Error(err),
            },
            Request::Shutdown => {
                self.controller.shutdown().await;
                Response::Done
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::controller::BenchConfig;
    use crate::transport::sim::{DriverModel, SimBench};
    use benchctl_protocol::{Channel, ErrorKind, Verdict};

    fn app() -> (SimBench, App) {
        let config = BenchConfig::default();
        let bench = SimBench::led_driver(&config, DriverModel::default());
        let controller = InstrumentController::new(Arc::new(bench.clone()), config);
        (bench, App::new(controller))
    }

    fn measure(voltage: f64, frequency: f64) -> Request {
        Request::Measure {
            input: InputVoltage::V24,
            limits: TestLimits {
                voltage,
                current_max: 350.0,
                current_min: 50.0,
                frequency,
            },
        }
    }

    #[tokio::test]
    async fn test_measure_and_evaluate() {
        let (_bench, mut app) = app();
        match app.handle_request(Request::Initialize).await {
            Response::Status { ready, message } => {
                assert!(ready);
                assert_eq!(message, "Instruments initialized");
            }
            x => panic!("unexpected response {:?}", x),
        }

        match app.handle_request(measure(36.0, 100.0)).await {
            Response::Report { result, report } => {
                assert!((result.voltage - 36.0).abs() < 1e-9);
                assert!(report.passed());
            }
            x => panic!("unexpected response {:?}", x),
        }

        // 36 V is more than 10 % above 32 V, 100 kHz is within 30 kHz of 75 kHz
        match app.handle_request(measure(32.0, 75.0)).await {
            Response::Report { report, .. } => {
                assert_eq!(report.verdict, Verdict::Fail);
                assert_eq!(report.channel(Channel::Voltage).unwrap().verdict, Verdict::Fail);
                assert_eq!(report.channel(Channel::Frequency).unwrap().verdict, Verdict::Pass);
            }
            x => panic!("unexpected response {:?}", x),
        }

        assert!(matches!(app.handle_request(Request::Shutdown).await, Response::Done));
        assert!(!app.controller().is_initialized());
    }

    #[tokio::test]
    async fn test_errors_are_responses() {
        let (bench, mut app) = app();
        match app.handle_request(measure(36.0, 100.0)).await {
            Response::Error(err) => assert_eq!(err.kind(), ErrorKind::NotInitialized),
            x => panic!("unexpected response {:?}", x),
        }

        bench.fail_open(&BenchConfig::default().meter, benchctl_protocol::TransportError::Timeout);
        match app.handle_request(Request::Initialize).await {
            Response::Status { ready, message } => {
                assert!(!ready);
                assert!(message.starts_with("Initialization failed"));
            }
            x => panic!("unexpected response {:?}", x),
        }
    }

    #[test]
    fn test_request_json() {
        let req: Request = serde_json::from_str(
            r#"{"Measure":{"input":"V12","limits":{"voltage":36.0,"current_max":350.0,"current_min":50.0,"frequency":100.0}}}"#,
        )
        .unwrap();
        match req {
            Request::Measure { input, limits } => {
                assert_eq!(input, InputVoltage::V12);
                assert_eq!(limits.current_min, 50.0);
            }
            x => panic!("unexpected request {:?}", x),
        }
    }
}
