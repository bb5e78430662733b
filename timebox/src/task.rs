// Task model: description + raw timebox token + checked flag
//
// The identity hash only covers (description, timebox), so a task keeps its
// ledger entry when it moves around in the document.

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Trailing timebox token: @1h, @45m, @1h30m, @20 or @[10:00-13:00]
static TIMEBOX_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(@(?:\d+h\d+m|\d+[hm]?|\[\s*\d{1,2}:\d{2}\s*[-–]\s*\d{1,2}:\d{2}\s*\]))\s*$")
        .unwrap()
});

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?$").unwrap());

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[\s*(\d{1,2}:\d{2})\s*[-–]\s*(\d{1,2}:\d{2})\s*\]$").unwrap()
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeboxError {
    #[error("no timebox provided")]
    Missing,
    #[error("timebox {0} has zero length")]
    Zero(String),
    #[error("invalid time {time} in timebox {token}")]
    InvalidTime { token: String, time: String },
    #[error("unsupported timebox format: {0}. Expected @1h, @30m, @1h30m or @[HH:MM-HH:MM]")]
    Unsupported(String),
}

/// A task as written in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Description with the timebox token removed, whitespace preserved as written
    pub description: String,
    /// Raw timebox token including the leading '@', empty if the task has none
    pub timebox: String,
    pub checked: bool,
}

impl Task {
    /// Split the inline text of a checkbox item into description and timebox
    pub fn from_inline(text: &str, checked: bool) -> Self {
        let text = text.trim();
        match TIMEBOX_TOKEN_RE.captures(text) {
            Some(caps) => {
                let token = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                let start = caps.get(0).map(|m| m.start()).unwrap_or(text.len());
                Self {
                    description: text[..start].trim().to_string(),
                    timebox: token.trim().to_string(),
                    checked,
                }
            }
            None => Self {
                description: text.to_string(),
                timebox: String::new(),
                checked,
            },
        }
    }

    pub fn has_timebox(&self) -> bool {
        !self.timebox.is_empty()
    }

    /// Stable identity used as the ledger key
    pub fn hash(&self) -> String {
        task_hash(&self.description, &self.timebox)
    }

    pub fn timebox_spec(&self) -> Result<TimeboxSpec, TimeboxError> {
        TimeboxSpec::parse(&self.timebox)
    }
}

/// SHA-256 over the whitespace-normalized description and the trimmed timebox
pub fn task_hash(description: &str, timebox: &str) -> String {
    let normalized: Vec<&str> = description.split_whitespace().collect();
    let mut hasher = Sha256::new();
    hasher.update(normalized.join(" ").as_bytes());
    hasher.update([0u8]);
    hasher.update(timebox.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Parsed timebox token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeboxSpec {
    /// Work for this long in total
    Duration(Duration),
    /// Work until `end` on the current day
    Range { start: NaiveTime, end: NaiveTime },
}

/// What a session counts towards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTarget {
    Duration(Duration),
    EndsAt(DateTime<Utc>),
}

impl TimeboxSpec {
    pub fn parse(token: &str) -> Result<Self, TimeboxError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TimeboxError::Missing);
        }
        let body = token.strip_prefix('@').unwrap_or(token);

        if let Some(caps) = RANGE_RE.captures(body) {
            let parse_time = |s: &str| {
                NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| TimeboxError::InvalidTime {
                    token: token.to_string(),
                    time: s.to_string(),
                })
            };
            let start = parse_time(&caps[1])?;
            let end = parse_time(&caps[2])?;
            return Ok(TimeboxSpec::Range { start, end });
        }

        // A bare number is read as minutes
        if !body.is_empty() && body.chars().all(|c| c.is_ascii_digit()) {
            let minutes: u64 = body
                .parse()
                .map_err(|_| TimeboxError::Unsupported(token.to_string()))?;
            return minutes_to_spec(0, minutes, token);
        }

        let caps = DURATION_RE
            .captures(body)
            .filter(|_| !body.is_empty())
            .ok_or_else(|| TimeboxError::Unsupported(token.to_string()))?;
        let number = |i: usize| -> Result<u64, TimeboxError> {
            match caps.get(i) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| TimeboxError::Unsupported(token.to_string())),
                None => Ok(0),
            }
        };
        minutes_to_spec(number(1)?, number(2)?, token)
    }

    /// Anchor the spec to `now`
    ///
    /// A range end that is not after `now` today is pushed to the next day.
    pub fn resolve<Tz: TimeZone>(&self, now: DateTime<Tz>) -> SessionTarget {
        match self {
            TimeboxSpec::Duration(d) => SessionTarget::Duration(*d),
            TimeboxSpec::Range { end, .. } => {
                let tz = now.timezone();
                let today = now.date_naive().and_time(*end);
                let mut end_at = tz
                    .from_local_datetime(&today)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|| now.with_timezone(&Utc));
                let now_utc = now.with_timezone(&Utc);
                if end_at <= now_utc {
                    end_at += chrono::TimeDelta::hours(24);
                }
                SessionTarget::EndsAt(end_at)
            }
        }
    }

    /// Resolve against the local wall clock
    pub fn resolve_local(&self) -> SessionTarget {
        self.resolve(Local::now())
    }
}

fn minutes_to_spec(hours: u64, minutes: u64, token: &str) -> Result<TimeboxSpec, TimeboxError> {
    let secs = hours
        .checked_mul(3600)
        .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
        .ok_or_else(|| TimeboxError::Unsupported(token.to_string()))?;
    if secs == 0 {
        return Err(TimeboxError::Zero(token.to_string()));
    }
    Ok(TimeboxSpec::Duration(Duration::from_secs(secs)))
}
