use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A formatted exception, optionally tied to the transaction that was in
/// flight when it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionStackTrace {
    pub transaction_id: Option<Uuid>,
    pub stack_trace: String,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// A named gauge sample reported by user code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRecord {
    pub name: String,
    pub value: f32,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// One request's lifecycle record. `recorded_at` is the time the request
/// started; `body_size` is -1 when the response size is unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub endpoint: String,
    #[serde(with = "duration_nanos")]
    pub duration: std::time::Duration,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub status_code: u16,
    pub body_size: i64,
    #[serde(rename = "clientIP")]
    pub client_ip: String,
}

/// In-memory batch of events accumulated during one collection interval.
/// Batches upload as a JSON array of these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionFrame {
    pub stack_traces: Vec<ExceptionStackTrace>,
    pub metrics: Vec<MetricsRecord>,
    pub transactions: Vec<Transaction>,
}

impl CollectionFrame {
    pub fn is_empty(&self) -> bool {
        self.stack_traces.is_empty() && self.metrics.is_empty() && self.transactions.is_empty()
    }

    pub(crate) fn append(&mut self, event: Event) {
        match event {
            Event::Exception(exception) => self.stack_traces.push(exception),
            Event::Metric(metric) => self.metrics.push(metric),
            Event::Transaction(transaction) => self.transactions.push(transaction),
        }
    }
}

/// One message on the capture channel.
#[derive(Debug)]
pub(crate) enum Event {
    Exception(ExceptionStackTrace),
    Metric(MetricsRecord),
    Transaction(Transaction),
}

/// `duration` travels as integer nanoseconds on the wire.
mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }
}
