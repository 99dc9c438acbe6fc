//! Durations written as milliseconds or `<n><unit>`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A duration in milliseconds.
///
/// Accepts either a bare number (`86400000`) or a number with a unit
/// suffix: `ms`, `s`, `m`, `h`, `d` (`"30d"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawDuration", into = "u64")]
pub struct DurationMs(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

impl TryFrom<RawDuration> for DurationMs {
    type Error = String;

    fn try_from(raw: RawDuration) -> Result<Self, Self::Error> {
        match raw {
            RawDuration::Millis(ms) => Ok(Self(ms)),
            RawDuration::Text(text) => text.parse(),
        }
    }
}

impl From<DurationMs> for u64 {
    fn from(d: DurationMs) -> Self {
        d.0
    }
}

impl std::str::FromStr for DurationMs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        let amount: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{}'", s))?;
        let factor = match unit {
            "" | "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            other => return Err(format!("unknown duration unit '{}' in '{}'", other, s)),
        };
        amount
            .checked_mul(factor)
            .map(Self)
            .ok_or_else(|| format!("duration '{}' overflows", s))
    }
}

impl fmt::Display for DurationMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
