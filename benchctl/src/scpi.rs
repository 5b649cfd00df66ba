/// This module implements some helpers to interpret replies of SCPI-based instruments
use lazy_static::lazy_static;
use regex::Regex;

use crate::Error;

/// Query issued to block until all pending operations of an instrument have completed.
pub const OPERATION_COMPLETE: &str = "*OPC?";
pub const IDENTIFY: &str = "*IDN?";

lazy_static! {
    static ref NUMBER: Regex =
        Regex::new(r"[-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?").expect("valid number pattern");
}

/// Parse a reply consisting of a single number, such as returned by `READ?`.
pub fn parse_float(reply: &str) -> crate::Result<f64> {
    let reply = reply.trim();
    reply
        .parse::<f64>()
        .map_err(|_| Error::parse(reply, "a floating point number"))
}

/// Extract the first signed floating point token from a free-form reply.
/// Returns `None` if the reply does not contain any number.
pub fn first_number(reply: &str) -> Option<f64> {
    NUMBER.find(reply).and_then(|x| x.as_str().parse().ok())
}

/// Returns true if the reply to an `*OPC?` query signals completion.
pub fn is_complete(reply: &str) -> bool {
    reply.trim() == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchctl_protocol::ErrorKind;

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("+1.234E-03\n").unwrap(), 1.234e-3);
        assert_eq!(parse_float(" 5.002 ").unwrap(), 5.002);
        let err = parse_float("OVLD").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_first_number() {
        assert_eq!(first_number("9.9903E+4"), Some(99903.0));
        assert_eq!(first_number(":MEASU:IMM:VAL 1.0001E+05"), Some(100010.0));
        assert_eq!(first_number("-12.5 Hz"), Some(-12.5));
        assert_eq!(first_number(".5e3"), Some(500.0));
        assert_eq!(first_number("100000"), Some(100000.0));
        assert_eq!(first_number(""), None);
        assert_eq!(first_number("NAN"), None);
    }

    #[test]
    fn test_is_complete() {
        assert!(is_complete("1\n"));
        assert!(!is_complete("0"));
    }
}
