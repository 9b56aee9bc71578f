//! Per-cycle publish execution with per-mapping fault isolation.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::mapping::TopicMappingTable;
use crate::sink::MessageSink;
use crate::telemetry::{Envelope, Snapshot};

/// Outcome counters for one publish cycle. Ephemeral; exists to be logged.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleResult {
    /// Capture time shared by every envelope in the cycle.
    pub started_at: DateTime<Utc>,
    /// Mappings delivered to the sink.
    pub published: usize,
    /// Mappings whose tag had no value this cycle.
    pub skipped: usize,
    /// Mappings whose delivery failed.
    pub failed: usize,
}

impl CycleResult {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            published: 0,
            skipped: 0,
            failed: 0,
        }
    }

    /// Mappings accounted for. Always equals the mapping table's size.
    pub fn total(&self) -> usize {
        self.published + self.skipped + self.failed
    }
}

/// Executes one publish pass over the mapping table.
pub struct CycleExecutor {
    table: TopicMappingTable,
}

impl CycleExecutor {
    pub fn new(table: TopicMappingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &TopicMappingTable {
        &self.table
    }

    /// Publish one snapshot through the sink, in table order.
    ///
    /// Every mapping is accounted for exactly once: published on success,
    /// skipped when its tag is absent from the snapshot (or read as absent),
    /// failed when delivery errors. A failed publish never blocks the
    /// mappings after it; losing one signal for a cycle beats losing the
    /// whole batch.
    pub async fn execute<K>(
        &self,
        sink: &K,
        snapshot: &Snapshot,
        captured_at: DateTime<Utc>,
    ) -> CycleResult
    where
        K: MessageSink + ?Sized,
    {
        let mut result = CycleResult::new(captured_at);

        for mapping in self.table.iter() {
            // A tag missing from the snapshot and a tag read as absent are
            // the same outcome: nothing to publish this cycle.
            let value = match snapshot.get(&mapping.tag) {
                Some(value) if !value.is_absent() => value,
                _ => {
                    debug!(tag = %mapping.tag, "No value this cycle; skipping");
                    result.skipped += 1;
                    continue;
                }
            };

            let topic = self.table.full_topic(mapping);
            let envelope = Envelope {
                timestamp: captured_at,
                value,
            };
            let payload = match envelope.to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(tag = %mapping.tag, topic = %topic, error = %e, "Envelope encoding failed");
                    result.failed += 1;
                    continue;
                }
            };

            match sink.publish(&topic, payload).await {
                Ok(()) => {
                    debug!(topic = %topic, "Published");
                    result.published += 1;
                }
                Err(e) => {
                    warn!(
                        topic = %topic,
                        error = %e,
                        "Publish failed; continuing with remaining mappings"
                    );
                    result.failed += 1;
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionError, PublishError};
    use crate::mapping::TopicMapping;
    use crate::telemetry::TagValue;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    /// Sink that records deliveries and fails configured topics.
    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail_topics: Vec<String>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn connect(&mut self) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
            if self.fail_topics.iter().any(|t| t == topic) {
                return Err(PublishError::new(topic, "broker unreachable"));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }

        async fn disconnect(&mut self) {}
    }

    fn executor() -> CycleExecutor {
        let segments: Vec<String> = ["v1", "acme", "plant1", "bottling", "line4"]
            .map(String::from)
            .to_vec();
        let table = TopicMappingTable::new(
            &segments,
            vec![
                TopicMapping {
                    tag: "good_count".to_string(),
                    topic: "GoodBottles".to_string(),
                },
                TopicMapping {
                    tag: "bad_count".to_string(),
                    topic: "TotalBadBottles".to_string(),
                },
            ],
        )
        .unwrap();
        CycleExecutor::new(table)
    }

    fn decode(payload: &[u8]) -> Value {
        serde_json::from_slice(payload).unwrap()
    }

    #[tokio::test]
    async fn present_tag_publishes_and_missing_tag_skips() {
        let executor = executor();
        let sink = RecordingSink::default();

        let mut snapshot = Snapshot::new();
        snapshot.insert("good_count".to_string(), TagValue::Integer(120));

        let result = executor.execute(&sink, &snapshot, Utc::now()).await;

        assert_eq!(result.published, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(result.total(), executor.table().len());

        let published = sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        let (topic, payload) = &published[0];
        assert_eq!(topic, "v1/acme/plant1/bottling/line4/GoodBottles");
        assert_eq!(decode(payload)["value"], json!(120));
    }

    #[tokio::test]
    async fn publish_failure_does_not_block_later_mappings() {
        let executor = executor();
        let sink = RecordingSink {
            fail_topics: vec!["v1/acme/plant1/bottling/line4/GoodBottles".to_string()],
            ..Default::default()
        };

        let mut snapshot = Snapshot::new();
        snapshot.insert("good_count".to_string(), TagValue::Integer(120));
        snapshot.insert("bad_count".to_string(), TagValue::Integer(7));

        let result = executor.execute(&sink, &snapshot, Utc::now()).await;

        assert_eq!(result.published, 1);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.failed, 1);

        let published = sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "v1/acme/plant1/bottling/line4/TotalBadBottles");
        assert_eq!(decode(&published[0].1)["value"], json!(7));
    }

    #[tokio::test]
    async fn absent_reading_skips_but_null_publishes() {
        let executor = executor();
        let sink = RecordingSink::default();

        let mut snapshot = Snapshot::new();
        snapshot.insert("good_count".to_string(), TagValue::Absent);
        snapshot.insert("bad_count".to_string(), TagValue::Null);

        let result = executor.execute(&sink, &snapshot, Utc::now()).await;

        assert_eq!(result.published, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.failed, 0);

        let published = sink.published.lock().unwrap();
        assert_eq!(decode(&published[0].1)["value"], json!(null));
    }

    #[tokio::test]
    async fn every_envelope_in_a_cycle_shares_the_capture_time() {
        let executor = executor();
        let sink = RecordingSink::default();
        let captured_at = Utc::now();

        let mut snapshot = Snapshot::new();
        snapshot.insert("good_count".to_string(), TagValue::Integer(1));
        snapshot.insert("bad_count".to_string(), TagValue::Integer(2));

        let result = executor.execute(&sink, &snapshot, captured_at).await;
        assert_eq!(result.started_at, captured_at);

        let published = sink.published.lock().unwrap();
        let timestamps: Vec<Value> = published
            .iter()
            .map(|(_, payload)| decode(payload)["timestamp"].clone())
            .collect();
        assert_eq!(timestamps.len(), 2);
        assert_eq!(timestamps[0], timestamps[1]);
    }

    #[tokio::test]
    async fn payload_round_trips_value_and_nothing_else() {
        let executor = executor();
        let sink = RecordingSink::default();

        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "good_count".to_string(),
            TagValue::TextArray(vec!["low pressure".to_string(), "door open".to_string()]),
        );

        executor.execute(&sink, &snapshot, Utc::now()).await;

        let published = sink.published.lock().unwrap();
        let decoded = decode(&published[0].1);
        let object = decoded.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert!(object.contains_key("timestamp"));
        assert_eq!(object["value"], json!(["low pressure", "door open"]));
    }
}
