//! Tag value model and the published envelope.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, Serializer};
use std::collections::HashMap;

/// A single tag reading as served by the tag source.
///
/// Tags are dynamically typed at the source, so every shape a reading can
/// take is an explicit variant here and serialization handles each one
/// exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// The tag could not be read this cycle. Never published.
    Absent,
    /// The tag exists but currently carries no value.
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    TextArray(Vec<String>),
}

impl TagValue {
    /// Whether this reading must be skipped rather than published.
    pub fn is_absent(&self) -> bool {
        matches!(self, TagValue::Absent)
    }
}

impl Serialize for TagValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Absent never reaches the wire (the executor skips it); null is
            // the only faithful rendering if it ever does.
            TagValue::Absent | TagValue::Null => serializer.serialize_none(),
            TagValue::Integer(v) => serializer.serialize_i64(*v),
            TagValue::Float(v) => serializer.serialize_f64(*v),
            TagValue::Text(v) => serializer.serialize_str(v),
            TagValue::TextArray(items) => items.serialize(serializer),
        }
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Integer(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Text(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Text(v)
    }
}

impl From<Vec<String>> for TagValue {
    fn from(v: Vec<String>) -> Self {
        TagValue::TextArray(v)
    }
}

/// One cycle's view of every registered tag, keyed by tag identifier.
///
/// Produced fresh per cycle by a single `read_all` call, consumed by that
/// cycle's executor and then discarded.
pub type Snapshot = HashMap<String, TagValue>;

/// The timestamped wrapper published for each mapped tag.
///
/// Wire format is a JSON object with exactly two fields:
/// `{"timestamp": "<ISO-8601 UTC>", "value": <tag value>}`. The timestamp
/// is the cycle's single capture time, identical across all envelopes of
/// one cycle so correlated consumers see a consistent instant.
#[derive(Debug, serde::Serialize)]
pub struct Envelope<'a> {
    pub timestamp: DateTime<Utc>,
    pub value: &'a TagValue,
}

impl Envelope<'_> {
    /// Encode the envelope as a JSON payload.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
