//! Wall-clock timestamps carried in containers and control messages

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeResult;
use crate::value::{FieldValue, WireKind};

/// Microseconds since the Unix epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStamp(i64);

impl TimeStamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_micros())
    }

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// This timestamp shifted forward by `offset`
    pub fn saturating_add(self, offset: Duration) -> Self {
        let micros = i64::try_from(offset.as_micros()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(micros))
    }

    /// Time from `earlier` to `self`, or `None` when `earlier` is later
    pub fn duration_since(self, earlier: TimeStamp) -> Option<Duration> {
        let delta = self.0.checked_sub(earlier.0)?;
        u64::try_from(delta).ok().map(Duration::from_micros)
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.6fZ")),
            None => write!(f, "{}us", self.0),
        }
    }
}

impl FieldValue for TimeStamp {
    const KIND: WireKind = WireKind::I64;

    fn encode_value(&self, out: &mut Vec<u8>) {
        self.0.encode_value(out);
    }

    fn decode_value(bytes: &[u8]) -> DecodeResult<Self> {
        i64::decode_value(bytes).map(Self)
    }
}
