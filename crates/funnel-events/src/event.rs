//! Funnel events as they sit in the queue
//!
//! A [`QueuedEvent`] is recorded once by [`EventQueue::add`](crate::EventQueue::add)
//! and never changes afterwards. Only its membership in the queue does.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Open bag of event attributes
///
/// Producers are heterogeneous (page views, quiz answers, booking steps), so
/// attributes stay schema-less JSON.
pub type EventData = Map<String, Value>;

/// Opaque identifier correlating events to a known lead
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(String);

impl LeadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LeadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for LeadId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A telemetry event waiting for delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    event_type: String,
    event_data: EventData,
    lead_id: Option<LeadId>,
    timestamp: DateTime<Utc>,
}

impl QueuedEvent {
    /// Record an event at the given instant
    pub fn new(
        event_type: impl Into<String>,
        event_data: EventData,
        lead_id: Option<LeadId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            event_data,
            lead_id,
            timestamp,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_data(&self) -> &EventData {
        &self.event_data
    }

    pub fn lead_id(&self) -> Option<&LeadId> {
        self.lead_id.as_ref()
    }

    /// When the event was recorded client-side (not when it is sent)
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Session id carried by the producer in `event_data.session_id`, if any
    pub fn session_id(&self) -> Option<&str> {
        self.event_data.get("session_id").and_then(Value::as_str)
    }
}

/// Build an [`EventData`] map from `key => value` pairs
///
/// ```
/// use funnel_events::event_data;
///
/// let data = event_data! { "question" => 3, "answer" => "oui" };
/// assert_eq!(data.len(), 2);
/// ```
#[macro_export]
macro_rules! event_data {
    () => { $crate::EventData::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut data = $crate::EventData::new();
        $( data.insert(($key).to_string(), $crate::__private::json!($value)); )+
        data
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_session_id_from_event_data() {
        let mut data = EventData::new();
        data.insert("session_id".into(), json!("sess-42"));
        let event = QueuedEvent::new("quiz_answer", data, None, at(0));
        assert_eq!(event.session_id(), Some("sess-42"));
    }

    #[test]
    fn test_non_string_session_id_is_ignored() {
        let data = event_data! { "session_id" => 42 };
        let event = QueuedEvent::new("quiz_answer", data, None, at(0));
        assert_eq!(event.session_id(), None);
    }

    #[test]
    fn test_lead_id_is_transparent() {
        let lead = LeadId::from("lead-7");
        assert_eq!(serde_json::to_value(&lead).unwrap(), json!("lead-7"));
        assert_eq!(lead.to_string(), "lead-7");
    }

    #[test]
    fn test_event_data_macro() {
        let data = event_data! { "step" => "booking", "slot" => 3 };
        assert_eq!(data.get("step"), Some(&json!("booking")));
        assert_eq!(data.get("slot"), Some(&json!(3)));
        assert!(event_data!().is_empty());
    }
}
