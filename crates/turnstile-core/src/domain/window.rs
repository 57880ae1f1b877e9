//! Fixed-window arithmetic.
//!
//! Time is bucketed into non-overlapping windows: the bucket index of a
//! timestamp is `floor(unix_seconds / window_seconds)` and a bucket ends at
//! `(index + 1) * window_seconds`. Indices need no coordination between
//! callers; each caller derives them from its own wall clock.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Length of the quota day in seconds.
pub const DAY_SECS: u64 = 86_400;

/// One `(limit, window)` pair, optionally named for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub limit: u64,
    pub window_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl WindowSpec {
    pub fn new(limit: u64, window_secs: u64) -> Self {
        Self {
            limit,
            window_secs,
            name: None,
        }
    }

    pub fn named(limit: u64, window_secs: u64, name: impl Into<String>) -> Self {
        Self {
            limit,
            window_secs,
            name: Some(name.into()),
        }
    }

    /// True when one bucket of this window covers a whole quota day.
    pub fn spans_day(&self) -> bool {
        self.window_secs >= DAY_SECS
    }

    /// Parse `limit/window_secs`, e.g. `10/60`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (limit, window) = raw.trim().split_once('/')?;
        let limit = limit.trim().parse().ok()?;
        let window_secs: u64 = window.trim().parse().ok()?;
        if window_secs == 0 {
            return None;
        }
        Some(Self::new(limit, window_secs))
    }
}

/// Index of the bucket containing `now_unix`.
///
/// A zero window is treated as one second.
pub fn bucket_index(now_unix: i64, window_secs: u64) -> i64 {
    now_unix.div_euclid(window_secs.max(1) as i64)
}

/// Unix second at which `bucket` ends and the next one starts.
pub fn bucket_reset_at(bucket: i64, window_secs: u64) -> i64 {
    (bucket + 1) * window_secs.max(1) as i64
}

/// Encode one caller-supplied component of a key.
///
/// `:` separates key segments, so it is percent-encoded along with `%`
/// itself. Distinct inputs always give distinct segments and a segment
/// never contains `:`.
pub fn key_segment(raw: &str) -> Cow<'_, str> {
    if !raw.contains([':', '%']) {
        return Cow::Borrowed(raw);
    }
    let mut encoded = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            ':' => encoded.push_str("%3A"),
            c => encoded.push(c),
        }
    }
    Cow::Owned(encoded)
}

/// Counter key for one bucket of one identifier.
///
/// The window length is part of the key so that two windows on the same
/// identifier never share a counter.
pub fn counter_key(prefix: &str, identifier: &str, window_secs: u64, bucket: i64) -> String {
    format!("{prefix}:{identifier}:{window_secs}:{bucket}")
}
