use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An inclusive date window for metric calculation.
///
/// The cache keys windows by their *length*, not their absolute dates,
/// so a "last 30 days" window computed today and one computed tomorrow
/// share a cache entry until the TTL expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct Window {
    start: NaiveDate,
    end: NaiveDate,
}

/// Deserialization mirror so the `start <= end` invariant holds even
/// for windows arriving in JSON requests.
#[derive(Deserialize)]
struct RawWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawWindow> for Window {
    type Error = Error;

    fn try_from(raw: RawWindow) -> Result<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl Window {
    /// Create a window. Fails with `InvalidParams` if start is after end.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidParams(format!(
                "window start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The trailing `n`-day window ending at `as_of` (inclusive).
    pub fn last_days(n: u32, as_of: NaiveDate) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidParams("window length must be >= 1 day".into()));
        }
        Ok(Self {
            start: as_of - Duration::days(n as i64 - 1),
            end: as_of,
        })
    }

    /// Parse a window string.
    ///
    /// Supported formats:
    /// - `30d` — rolling last N days ending today
    /// - `2025-01-01..2025-03-31` — explicit inclusive range
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.ends_with('d') || s.ends_with('D') {
            if let Ok(n) = s[..s.len() - 1].parse::<u32>() {
                let today = chrono::Local::now().date_naive();
                return Self::last_days(n, today);
            }
        }

        if let Some((start, end)) = s.split_once("..") {
            let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
                .map_err(|_| Error::InvalidParams(format!("invalid start date: {start}")))?;
            let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")
                .map_err(|_| Error::InvalidParams(format!("invalid end date: {end}")))?;
            return Self::new(start, end);
        }

        Err(Error::InvalidParams(format!("unrecognized window: {s}")))
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Inclusive window length in days. Always >= 1.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// The immediately preceding window of equal length, used for
    /// period-over-period trend comparison.
    pub fn previous(&self) -> Self {
        let len = self.days();
        Self {
            start: self.start - Duration::days(len),
            end: self.end - Duration::days(len),
        }
    }

    pub fn contains(&self, d: NaiveDate) -> bool {
        d >= self.start && d <= self.end
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
