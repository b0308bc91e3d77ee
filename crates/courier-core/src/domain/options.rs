//! Task options: caller input, merge policy and canonicalization.
//!
//! `PartialTaskOptions` is what callers (and configuration) provide. It is
//! merged copy-then-override with the client defaults and then canonicalized
//! into an immutable `TaskOptions`, which is the only thing the envelope codec
//! reads.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{DeliveryTag, TaskId};
use crate::ports::IdGenerator;

/// `delivery_mode` value meaning "persistent".
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Rejected task option input.
#[derive(Debug, Error)]
pub enum InvalidTaskOptions {
    #[error("invalid timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// An instant for `eta` / `expires`.
///
/// Deserializes from either integer epoch milliseconds or an RFC 3339 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    EpochMillis(i64),
    At(DateTime<Utc>),
}

impl TimeSpec {
    pub fn parse(value: &str) -> Result<Self, InvalidTaskOptions> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| TimeSpec::At(dt.with_timezone(&Utc)))
            .map_err(|source| InvalidTaskOptions::Timestamp {
                value: value.to_string(),
                source,
            })
    }

    /// Wire rendering, e.g. `2017-08-29T12:47:00.000Z`.
    ///
    /// The zero epoch counts as "not set".
    fn render(&self) -> Option<String> {
        let at = match *self {
            TimeSpec::EpochMillis(0) => return None,
            TimeSpec::EpochMillis(ms) => match DateTime::<Utc>::from_timestamp_millis(ms) {
                Some(at) => at,
                None => {
                    tracing::warn!(epoch_ms = ms, "timestamp out of range, dropping it");
                    return None;
                }
            },
            TimeSpec::At(at) => at,
        };
        if at.timestamp_millis() == 0 {
            return None;
        }
        Some(at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl From<DateTime<Utc>> for TimeSpec {
    fn from(at: DateTime<Utc>) -> Self {
        TimeSpec::At(at)
    }
}

/// Retry count as given by the caller.
///
/// Strings are read like a leading-integer parse; anything non-numeric (and
/// anything negative) ends up as 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Retries {
    Count(i64),
    Fractional(f64),
    Text(String),
}

impl Retries {
    pub fn coerce(&self) -> u32 {
        match self {
            Retries::Count(n) => clamp_count(*n),
            Retries::Fractional(f) if f.is_finite() => clamp_count(f.trunc() as i64),
            Retries::Fractional(_) => 0,
            Retries::Text(s) => clamp_count(leading_int(s)),
        }
    }
}

impl From<u32> for Retries {
    fn from(n: u32) -> Self {
        Retries::Count(n.into())
    }
}

impl From<&str> for Retries {
    fn from(s: &str) -> Self {
        Retries::Text(s.to_string())
    }
}

fn clamp_count(n: i64) -> u32 {
    n.clamp(0, i64::from(u32::MAX)) as u32
}

fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let digits = &digits[..end];
    if digits.is_empty() {
        return 0;
    }
    // an over-long digit run saturates instead of failing
    let n = digits.parse::<i64>().unwrap_or(i64::MAX);
    if negative { -n } else { n }
}

/// Caller-supplied task options. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialTaskOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<TimeSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<TimeSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<Retries>,
    /// Hard time limit in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<f64>,
    /// Soft time limit in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soft_time_limit: Option<f64>,
    /// Sender name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// How long a result watch started with these options waits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_wait_timeout_ms: Option<u64>,
}

impl PartialTaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn eta(mut self, eta: impl Into<TimeSpec>) -> Self {
        self.eta = Some(eta.into());
        self
    }

    pub fn expires(mut self, expires: impl Into<TimeSpec>) -> Self {
        self.expires = Some(expires.into());
        self
    }

    pub fn retries(mut self, retries: impl Into<Retries>) -> Self {
        self.retries = Some(retries.into());
        self
    }

    pub fn time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    pub fn soft_time_limit(mut self, seconds: f64) -> Self {
        self.soft_time_limit = Some(seconds);
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn result_wait_timeout(mut self, timeout: Duration) -> Self {
        self.result_wait_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn result_wait_timeout_duration(&self) -> Option<Duration> {
        self.result_wait_timeout_ms.map(Duration::from_millis)
    }

    /// Copy `self` and apply every field `overrides` sets. Neither input changes.
    pub fn merged(&self, overrides: &PartialTaskOptions) -> PartialTaskOptions {
        fn pick<T: Clone>(over: &Option<T>, base: &Option<T>) -> Option<T> {
            over.clone().or_else(|| base.clone())
        }

        PartialTaskOptions {
            id: pick(&overrides.id, &self.id),
            eta: pick(&overrides.eta, &self.eta),
            expires: pick(&overrides.expires, &self.expires),
            retries: pick(&overrides.retries, &self.retries),
            time_limit: pick(&overrides.time_limit, &self.time_limit),
            soft_time_limit: pick(&overrides.soft_time_limit, &self.soft_time_limit),
            origin: pick(&overrides.origin, &self.origin),
            priority: pick(&overrides.priority, &self.priority),
            queue: pick(&overrides.queue, &self.queue),
            result_wait_timeout_ms: pick(
                &overrides.result_wait_timeout_ms,
                &self.result_wait_timeout_ms,
            ),
        }
    }
}

/// Fully populated, protocol-ready task options.
///
/// Only `Canonicalizer` builds these.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOptions {
    id: TaskId,
    eta: Option<String>,
    expires: Option<String>,
    retries: u32,
    time_limit: Option<f64>,
    soft_time_limit: Option<f64>,
    origin: Option<String>,
    priority: i64,
    queue: String,
    delivery_mode: u8,
    delivery_tag: DeliveryTag,
}

impl TaskOptions {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn eta(&self) -> Option<&str> {
        self.eta.as_deref()
    }

    pub fn expires(&self) -> Option<&str> {
        self.expires.as_deref()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn time_limit(&self) -> Option<f64> {
        self.time_limit
    }

    pub fn soft_time_limit(&self) -> Option<f64> {
        self.soft_time_limit
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn delivery_mode(&self) -> u8 {
        self.delivery_mode
    }

    pub fn delivery_tag(&self) -> &DeliveryTag {
        &self.delivery_tag
    }
}

/// Turns partial options into `TaskOptions`. Never fails; degrades instead.
#[derive(Clone)]
pub struct Canonicalizer {
    ids: Arc<dyn IdGenerator>,
    default_queue: String,
}

impl Canonicalizer {
    pub fn new(ids: Arc<dyn IdGenerator>, default_queue: impl Into<String>) -> Self {
        Self {
            ids,
            default_queue: default_queue.into(),
        }
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    pub fn canonicalize(&self, raw: &PartialTaskOptions) -> TaskOptions {
        let id = match raw.id.as_deref() {
            Some(id) if !id.is_empty() => TaskId::new(id),
            _ => self.ids.generate_task_id(),
        };

        let priority = raw.priority.unwrap_or(0);
        if !(0..=255).contains(&priority) {
            // Passed through as-is; the worker side decides what to do with it.
            tracing::warn!(task_id = %id, priority, "priority outside 0..=255");
        }

        let queue = match raw.queue.as_deref() {
            Some(queue) if !queue.is_empty() => queue.to_string(),
            _ => self.default_queue.clone(),
        };

        TaskOptions {
            eta: raw.eta.as_ref().and_then(TimeSpec::render),
            expires: raw.expires.as_ref().and_then(TimeSpec::render),
            retries: raw.retries.as_ref().map(Retries::coerce).unwrap_or(0),
            time_limit: raw.time_limit.filter(|s| *s != 0.0),
            soft_time_limit: raw.soft_time_limit.filter(|s| *s != 0.0),
            origin: raw.origin.clone().filter(|o| !o.is_empty()),
            priority,
            queue,
            delivery_mode: PERSISTENT_DELIVERY_MODE,
            delivery_tag: self.ids.generate_delivery_tag(),
            id,
        }
    }
}
