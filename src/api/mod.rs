//! The value model plugins emit through the output sink.

use crate::messages::DatapointPayload;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

pub use self::config::{Config, ConfigValue};
pub use self::logger::PipeLoggerBuilder;

mod config;
mod logger;

/// How a reported value should be interpreted over time.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum MetricKind {
    /// A gauge is stored as-is. The right choice for values which may
    /// increase as well as decrease, such as temperatures or the amount of
    /// memory used.
    Gauge,

    /// A counter reports the change since the previous report; the backend
    /// derives a rate from consecutive reports.
    Counter,

    /// A cumulative counter reports a monotonically increasing total, like
    /// total requests served since process start.
    CumulativeCounter,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::CumulativeCounter => "cumulative_counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single telemetry reading. Immutable value object; the timestamp
/// defaults to the dispatch time when left unset.
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    pub metric: String,
    pub kind: MetricKind,
    pub value: f64,
    pub dimensions: BTreeMap<String, String>,
    pub time: Option<DateTime<Utc>>,
}

impl Datapoint {
    pub fn new<T: Into<String>>(metric: T, kind: MetricKind, value: f64) -> Datapoint {
        Datapoint {
            metric: metric.into(),
            kind,
            value,
            dimensions: BTreeMap::new(),
            time: None,
        }
    }

    pub fn gauge<T: Into<String>>(metric: T, value: f64) -> Datapoint {
        Datapoint::new(metric, MetricKind::Gauge, value)
    }

    pub fn counter<T: Into<String>>(metric: T, value: f64) -> Datapoint {
        Datapoint::new(metric, MetricKind::Counter, value)
    }

    pub fn cumulative<T: Into<String>>(metric: T, value: f64) -> Datapoint {
        Datapoint::new(metric, MetricKind::CumulativeCounter, value)
    }

    /// Attaches a dimension, replacing any previous value for the key.
    pub fn dimension<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Datapoint {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    /// Overrides the dispatch-time timestamp. Use only when reporting values
    /// observed in the past.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Datapoint {
        self.time = Some(time);
        self
    }

    pub(crate) fn into_payload(self, default_time: DateTime<Utc>) -> DatapointPayload {
        DatapointPayload {
            metric: self.metric,
            value: self.value,
            dimensions: self.dimensions,
            timestamp_ms: Some(self.time.unwrap_or(default_time).timestamp_millis()),
        }
    }
}
