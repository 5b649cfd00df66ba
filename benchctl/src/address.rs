/// This module implements `Address` which is used for parsing
/// VISA resource strings of the form "GPIB0::22::INSTR"
use crate::Error;
use std::fmt;
use std::fmt::{Display, Formatter};

const EXPECTED: &str = "a VISA resource address";

/// Represents a parsed VISA resource string.
/// GPIB addresses are decoded into board and primary/secondary address,
/// anything else is kept as the list of its `::` separated parts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    Gpib {
        board: u8,
        primary: u8,
        secondary: Option<u8>,
    },
    Other {
        splits: Vec<String>,
    },
}

impl Address {
    fn parse_gpib(splits: &[&str]) -> crate::Result<Self> {
        let invalid = || Error::parse(splits.join("::"), EXPECTED);
        // GPIB[board]::primary[::secondary][::INSTR]
        let board = &splits[0][4..];
        let board = if board.is_empty() {
            0
        } else {
            board.parse().map_err(|_| invalid())?
        };
        let mut rest = &splits[1..];
        if let Some(last) = rest.last() {
            if last.eq_ignore_ascii_case("instr") {
                rest = &rest[..rest.len() - 1];
            }
        }
        let (primary, secondary) = match rest {
            [primary] => (primary.parse().map_err(|_| invalid())?, None),
            [primary, secondary] => (
                primary.parse().map_err(|_| invalid())?,
                Some(secondary.parse().map_err(|_| invalid())?),
            ),
            _ => return Err(invalid()),
        };
        if primary > 30 {
            return Err(invalid());
        }
        Ok(Address::Gpib {
            board,
            primary,
            secondary,
        })
    }

    /// Create a new `Address` by parsing the given resource string.
    /// If the address uses an incorrect format, it will return `Err(Error::Parse)`.
    pub fn parse(addr: &str) -> crate::Result<Self> {
        let addr = addr.trim();
        let splits: Vec<&str> = addr.split("::").collect();
        if splits.len() < 2 || splits.iter().any(|x| x.is_empty()) {
            return Err(Error::parse(addr, EXPECTED));
        }
        if is_gpib(addr) {
            Self::parse_gpib(&splits)
        } else {
            Ok(Address::Other {
                splits: splits.iter().map(|x| x.to_string()).collect(),
            })
        }
    }

    pub fn is_gpib(&self) -> bool {
        matches!(self, Address::Gpib { .. })
    }
}

/// Returns true if the resource string addresses a GPIB instrument.
pub fn is_gpib(resource: &str) -> bool {
    resource.trim().to_uppercase().starts_with("GPIB")
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        match addr {
            Address::Gpib {
                board,
                primary,
                secondary: None,
            } => format!("GPIB{}::{}::INSTR", board, primary),
            Address::Gpib {
                board,
                primary,
                secondary: Some(secondary),
            } => format!("GPIB{}::{}::{}::INSTR", board, primary, secondary),
            Address::Other { splits } => splits.join("::"),
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let x: String = self.clone().into();
        f.write_str(&x)
    }
}
