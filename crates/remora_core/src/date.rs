//! Server timestamps.

use crate::error::{CoreError, CoreResult};
use chrono::{NaiveDateTime, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// Wire format of every date the server exchanges.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Length in bytes of a formatted date. Strings of any other length are
/// never treated as dates.
pub const DATE_LEN: usize = 19;

/// A second-precision timestamp in the server's fixed date format.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    /// Parses a `YYYY-MM-DD HH:MM:SS` string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDate` if the input has the wrong length or does not
    /// describe a valid calendar date and time.
    pub fn parse(input: &str) -> CoreResult<Self> {
        if input.len() != DATE_LEN {
            return Err(CoreError::InvalidDate {
                input: input.to_string(),
            });
        }
        NaiveDateTime::parse_from_str(input, DATE_FORMAT)
            .map(Self)
            .map_err(|_| CoreError::InvalidDate {
                input: input.to_string(),
            })
    }

    /// Wraps a naive date time, dropping sub-second precision.
    #[must_use]
    pub fn from_naive(value: NaiveDateTime) -> Self {
        Self(value.with_nanosecond(0).unwrap_or(value))
    }

    /// The current UTC time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_naive(Utc::now().naive_utc())
    }

    /// Returns the underlying naive date time.
    #[must_use]
    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }

    /// Formats the timestamp for the wire.
    #[must_use]
    pub fn to_wire_string(&self) -> String {
        self.0.format(DATE_FORMAT).to_string()
    }
}

impl FromStr for Timestamp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.to_wire_string())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire_string())
    }
}
