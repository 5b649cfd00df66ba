//! Line oriented operator console on top of [`App`].
use std::io;

use benchctl_protocol::{Error, InputVoltage, MeasurementError, TestLimits};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::app::{App, Request, Response};

const PROMPT: &str = "> ";

pub const HELP: &str = "\
Commands:
  init                                   reset the instruments and capture the current offset
  measure <12|24> <V> <mA> <mA> <kHz>    measure with the given input voltage and check against
                                         the output voltage, current without dimming,
                                         current with dimming and PWM frequency
  help                                   show this text
  quit                                   switch the outputs off and exit
";

#[derive(Debug)]
pub enum Command {
    Request(Request),
    Help,
    Quit,
}

fn number(arg: &str, what: &str) -> Result<f64, Error> {
    match arg.parse::<f64>() {
        Ok(x) if x.is_finite() => Ok(x),
        _ => Err(Error::parse(arg, what)),
    }
}

/// Parse one line of operator input. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>, MeasurementError> {
    let mut args = line.split_whitespace();
    let cmd = match args.next() {
        Some(x) => x.to_lowercase(),
        None => return Ok(None),
    };
    let args: Vec<_> = args.collect();
    let ret = match (cmd.as_str(), args.as_slice()) {
        ("init", []) => Command::Request(Request::Initialize),
        ("measure", [input, voltage, current_max, current_min, frequency]) => {
            let input: InputVoltage = input.parse()?;
            let limits = TestLimits {
                voltage: number(voltage, "an output voltage in V")?,
                current_max: number(current_max, "a current in mA")?,
                current_min: number(current_min, "a current in mA")?,
                frequency: number(frequency, "a frequency in kHz")?,
            };
            Command::Request(Request::Measure { input, limits })
        }
        ("measure", _) => {
            return Err(Error::parse(line.trim(), "measure <12|24> <V> <mA> <mA> <kHz>").into())
        }
        ("help", _) | ("?", _) => Command::Help,
        ("quit", _) | ("exit", _) => Command::Quit,
        _ => return Err(Error::parse(line.trim(), "a command, try `help`").into()),
    };
    Ok(Some(ret))
}

fn render_text(resp: &Response) -> String {
    match resp {
        Response::Status { message, .. } => message.clone(),
        Response::Report { report, .. } => report.to_string(),
        Response::Error(err) => err.to_string(),
        Response::Done => "Outputs off, instruments released".to_string(),
    }
}

async fn render<W: AsyncWrite + Unpin>(output: &mut W, resp: &Response, json: bool) -> io::Result<()> {
    let mut text = if json {
        serde_json::to_string(resp)?
    } else {
        render_text(resp)
    };
    text.push('\n');
    output.write_all(text.as_bytes()).await?;
    output.flush().await
}

/// Serve operator commands from `input` until it is exhausted or `quit` is entered.
/// The bench is shut down before returning.
pub async fn run<R, W>(app: &mut App, input: R, mut output: W, json: bool) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    if !json {
        output.write_all(b"Type `help` for a list of commands.\n").await?;
    }
    loop {
        if !json {
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;
        }
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Command::Help)) => output.write_all(HELP.as_bytes()).await?,
            Ok(Some(Command::Quit)) => break,
            Ok(Some(Command::Request(req))) => {
                let resp = app.handle_request(req).await;
                render(&mut output, &resp, json).await?;
            }
            Err(err) => {
                log::debug!("Rejected input `{}`: {}", line, err);
                render(&mut output, &Response::Error(err), json).await?;
            }
        }
    }
    let resp = app.handle_request(Request::Shutdown).await;
    render(&mut output, &resp, json).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::controller::{BenchConfig, InstrumentController};
    use crate::transport::sim::{DriverModel, SimBench};
    use benchctl_protocol::ErrorKind;

    #[test]
    fn test_parse_line() {
        assert!(parse_line("   ").unwrap().is_none());
        assert!(matches!(
            parse_line("INIT").unwrap(),
            Some(Command::Request(Request::Initialize))
        ));
        assert!(matches!(parse_line("quit").unwrap(), Some(Command::Quit)));
        match parse_line("measure 24V 36 350 50.5 100").unwrap() {
            Some(Command::Request(Request::Measure { input, limits })) => {
                assert_eq!(input, InputVoltage::V24);
                assert_eq!(limits.voltage, 36.0);
                assert_eq!(limits.current_min, 50.5);
                assert_eq!(limits.frequency, 100.0);
            }
            x => panic!("unexpected command {:?}", x),
        }
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_line("measure 12 36 abc 50 100").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.to_string().contains("abc"));
        assert_eq!(parse_line("measure 48 36 350 50 100").unwrap_err().kind(), ErrorKind::Parse);
        assert_eq!(parse_line("measure 12 36").unwrap_err().kind(), ErrorKind::Parse);
        assert_eq!(parse_line("measure 12 inf 350 50 100").unwrap_err().kind(), ErrorKind::Parse);
        assert_eq!(parse_line("calibrate").unwrap_err().kind(), ErrorKind::Parse);
    }

    fn app() -> (SimBench, App) {
        let config = BenchConfig::default();
        let bench = SimBench::led_driver(&config, DriverModel::default());
        let controller = InstrumentController::new(Arc::new(bench.clone()), config);
        (bench, App::new(controller))
    }

    #[tokio::test]
    async fn test_session() {
        let (bench, mut app) = app();
        let input: &[u8] = b"init\nmeasure 24 36 350 50 100\nmeasure 24 x 350 50 100\nquit\ninit\n";
        let mut output = Vec::new();
        run(&mut app, input, &mut output, false).await.unwrap();
        let text = String::from_utf8(output).unwrap();

        assert!(text.contains("> Instruments initialized\n"));
        assert!(text.contains("voltage: 36.00 V (PASS)\n"));
        assert!(text.contains("\nPASS\n"));
        assert!(text.contains("Measurement error: Cannot parse `x`"));
        assert!(text.ends_with("Outputs off, instruments released\n"));
        // nothing after `quit` was executed
        assert_eq!(text.matches("Instruments initialized").count(), 1);
        assert!(!bench.outputs_on());
        assert!(!app.controller().is_initialized());
    }

    #[tokio::test]
    async fn test_json_session() {
        let (_bench, mut app) = app();
        let input: &[u8] = b"measure 12 36 350 50 100\n";
        let mut output = Vec::new();
        run(&mut app, input, &mut output, true).await.unwrap();
        let text = String::from_utf8(output).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Response = serde_json::from_str(lines[0]).unwrap();
        match first {
            Response::Error(err) => assert_eq!(err.kind(), ErrorKind::NotInitialized),
            x => panic!("unexpected response {:?}", x),
        }
        assert_eq!(lines[1], "\"Done\"");
    }
}
