//! Order identifier grammar: `RX<yy><mm><dd>-<seq3>`, e.g. `RX250625-001`.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::contracts::SequenceError;

/// Fixed prefix of every order identifier
pub const ORDER_ID_PREFIX: &str = "RX";
/// Total identifier length: prefix(2) + date(6) + '-'(1) + sequence(3)
pub const ORDER_ID_LEN: usize = 12;
/// Largest sequence that fits in the three-digit field
pub const MAX_SEQUENCE: u64 = 999;

/// Parsed form of an order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId {
    /// Full year, 2000..=2099
    pub year: u16,
    pub month: u8,
    pub day: u8,
    /// 1..=999
    pub sequence: u16,
}

impl OrderId {
    /// Builds the identifier for the `sequence`-th order of `date`.
    pub fn new(date: NaiveDate, sequence: u64) -> Result<Self, SequenceError> {
        if !(2000..=2099).contains(&date.year()) {
            return Err(SequenceError::InvalidDate(format!(
                "{} cannot be encoded with a two-digit year",
                date
            )));
        }
        if sequence == 0 || sequence > MAX_SEQUENCE {
            return Err(SequenceError::OutOfRange {
                value: sequence,
                max: MAX_SEQUENCE,
            });
        }
        Ok(Self {
            year: date.year() as u16,
            month: date.month() as u8,
            day: date.day() as u8,
            sequence: sequence as u16,
        })
    }

    /// Parses an identifier, returning `None` for anything outside the grammar
    /// or naming an impossible calendar day.
    pub fn parse(raw: &str) -> Option<Self> {
        let bytes = raw.as_bytes();
        if bytes.len() != ORDER_ID_LEN || !raw.starts_with(ORDER_ID_PREFIX) || bytes[8] != b'-' {
            return None;
        }
        let date = &raw[2..8];
        let seq = &raw[9..12];
        if !date.bytes().all(|b| b.is_ascii_digit()) || !seq.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let year = 2000 + date[0..2].parse::<u16>().ok()?;
        let month = date[2..4].parse::<u8>().ok()?;
        let day = date[4..6].parse::<u8>().ok()?;
        let sequence = seq.parse::<u16>().ok()?;

        NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?;
        if sequence == 0 {
            return None;
        }

        Some(Self {
            year,
            month,
            day,
            sequence,
        })
    }

    /// Returns true if `raw` is a well-formed order identifier.
    pub fn is_valid(raw: &str) -> bool {
        Self::parse(raw).is_some()
    }

    /// Calendar date the identifier was issued on.
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:02}{:02}{:02}-{:03}",
            ORDER_ID_PREFIX,
            self.year % 100,
            self.month,
            self.day,
            self.sequence
        )
    }
}

impl FromStr for OrderId {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| SequenceError::MalformedOrderId(s.to_string()))
    }
}

/// Returns true if `raw` is a well-formed order identifier.
pub fn validate_order_id(raw: &str) -> bool {
    OrderId::is_valid(raw)
}

/// Parses an order identifier into its year, month, day and sequence.
pub fn parse_order_id(raw: &str) -> Option<OrderId> {
    OrderId::parse(raw)
}
