//! Static tag-to-topic mapping table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while building the mapping table. All of these are fatal
/// at load time; none can occur once the table exists.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Topic suffix '{suffix}' is mapped from both '{first}' and '{second}'")]
    DuplicateSuffix {
        suffix: String,
        first: String,
        second: String,
    },

    #[error("Mapping for tag '{tag}': {reason}")]
    InvalidSuffix { tag: String, reason: String },

    #[error("Namespace segment '{segment}': {reason}")]
    InvalidSegment { segment: String, reason: String },

    #[error("Namespace prefix must contain at least one segment")]
    EmptyPrefix,

    #[error("Mapping table must contain at least one entry")]
    Empty,
}

/// A single (tag identifier, topic suffix) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMapping {
    /// Tag identifier as registered with the tag source.
    pub tag: String,
    /// Topic suffix appended to the namespace prefix.
    pub topic: String,
}

/// The immutable mapping table plus the namespace prefix shared by every
/// published topic.
///
/// Loaded once at startup and validated there; lookups during a cycle are a
/// plain in-order walk, which is fine for the tens of entries a deployment
/// carries.
#[derive(Debug, Clone)]
pub struct TopicMappingTable {
    prefix: String,
    mappings: Vec<TopicMapping>,
}

impl TopicMappingTable {
    /// Build a table from ordered deployment segments and mapping entries.
    ///
    /// Rejects the table if any two entries share a topic suffix, or if any
    /// segment or suffix would produce a malformed topic.
    pub fn new(segments: &[String], mappings: Vec<TopicMapping>) -> Result<Self, MappingError> {
        if segments.is_empty() {
            return Err(MappingError::EmptyPrefix);
        }
        for segment in segments {
            validate_segment(segment)?;
        }

        if mappings.is_empty() {
            return Err(MappingError::Empty);
        }

        let mut seen: HashMap<&str, &str> = HashMap::new();
        for mapping in &mappings {
            validate_suffix(mapping)?;
            if let Some(first) = seen.insert(mapping.topic.as_str(), mapping.tag.as_str()) {
                return Err(MappingError::DuplicateSuffix {
                    suffix: mapping.topic.clone(),
                    first: first.to_string(),
                    second: mapping.tag.clone(),
                });
            }
        }

        Ok(Self {
            prefix: segments.join("/"),
            mappings,
        })
    }

    /// The namespace prefix shared by every topic.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Iterate the entries in table order.
    pub fn iter(&self) -> std::slice::Iter<'_, TopicMapping> {
        self.mappings.iter()
    }

    /// The full topic for a mapping entry: `<prefix>/<suffix>`.
    pub fn full_topic(&self, mapping: &TopicMapping) -> String {
        format!("{}/{}", self.prefix, mapping.topic)
    }
}

fn validate_segment(segment: &str) -> Result<(), MappingError> {
    let invalid = |reason: &str| MappingError::InvalidSegment {
        segment: segment.to_string(),
        reason: reason.to_string(),
    };

    if segment.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if segment.contains('/') {
        return Err(invalid("must not contain '/'"));
    }
    if segment.contains(['+', '#']) {
        return Err(invalid("must not contain topic wildcards"));
    }
    Ok(())
}

fn validate_suffix(mapping: &TopicMapping) -> Result<(), MappingError> {
    let invalid = |reason: &str| MappingError::InvalidSuffix {
        tag: mapping.tag.clone(),
        reason: reason.to_string(),
    };

    if mapping.topic.is_empty() {
        return Err(invalid("topic suffix must not be empty"));
    }
    if mapping.topic.contains(['+', '#']) {
        return Err(invalid("topic suffix must not contain topic wildcards"));
    }
    // Suffixes may be hierarchical themselves, but never with empty levels.
    if mapping.topic.split('/').any(str::is_empty) {
        return Err(invalid("topic suffix must not contain empty levels"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments() -> Vec<String> {
        ["v1", "acme", "plant1", "bottling", "line4"]
            .map(String::from)
            .to_vec()
    }

    fn mapping(tag: &str, topic: &str) -> TopicMapping {
        TopicMapping {
            tag: tag.to_string(),
            topic: topic.to_string(),
        }
    }

    #[test]
    fn full_topic_is_prefix_slash_suffix() {
        let table =
            TopicMappingTable::new(&segments(), vec![mapping("good_count", "GoodBottles")])
                .unwrap();

        assert_eq!(table.prefix(), "v1/acme/plant1/bottling/line4");
        let entry = table.iter().next().unwrap();
        assert_eq!(
            table.full_topic(entry),
            "v1/acme/plant1/bottling/line4/GoodBottles"
        );
    }

    #[test]
    fn duplicate_suffix_is_rejected() {
        let result = TopicMappingTable::new(
            &segments(),
            vec![mapping("machine_state", "status"), mapping("order_state", "status")],
        );

        match result {
            Err(MappingError::DuplicateSuffix { suffix, first, second }) => {
                assert_eq!(suffix, "status");
                assert_eq!(first, "machine_state");
                assert_eq!(second, "order_state");
            }
            other => panic!("Expected DuplicateSuffix, got {:?}", other),
        }
    }

    #[test]
    fn empty_table_is_rejected() {
        assert!(matches!(
            TopicMappingTable::new(&segments(), Vec::new()),
            Err(MappingError::Empty)
        ));
    }

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(matches!(
            TopicMappingTable::new(&[], vec![mapping("t", "s")]),
            Err(MappingError::EmptyPrefix)
        ));
    }

    #[test]
    fn wildcards_are_rejected() {
        assert!(
            TopicMappingTable::new(&segments(), vec![mapping("alarms", "alarms/#")]).is_err()
        );

        let bad_segments = vec!["v1".to_string(), "+".to_string()];
        assert!(TopicMappingTable::new(&bad_segments, vec![mapping("t", "s")]).is_err());
    }

    #[test]
    fn hierarchical_suffix_is_allowed_but_not_empty_levels() {
        assert!(
            TopicMappingTable::new(&segments(), vec![mapping("fill_target", "fill/target")])
                .is_ok()
        );
        assert!(
            TopicMappingTable::new(&segments(), vec![mapping("fill_target", "fill//target")])
                .is_err()
        );
        assert!(
            TopicMappingTable::new(&segments(), vec![mapping("fill_target", "/fill")]).is_err()
        );
    }
}
