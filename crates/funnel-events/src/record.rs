//! Wire format for the `analytics-batch` endpoint
//!
//! Queued events are turned into [`EventRecord`]s only at send time, which is
//! when the page context (`page_url`, `referrer`) is stamped onto them.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;
use crate::event::{EventData, QueuedEvent};

/// Where the visitor currently is
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageContext {
    pub page_url: String,
    pub referrer: String,
}

impl PageContext {
    pub fn new(page_url: impl Into<String>, referrer: impl Into<String>) -> Self {
        Self {
            page_url: page_url.into(),
            referrer: referrer.into(),
        }
    }
}

/// One row in a batch request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: String,
    pub event_data: EventData,
    pub lead_id: Option<String>,
    pub session_id: String,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    /// Build the wire record for a queued event
    ///
    /// `fallback_session` is used when the producer did not put a
    /// `session_id` string into the event data.
    pub fn from_event(
        event: &QueuedEvent,
        page: &PageContext,
        fallback_session: Option<&str>,
    ) -> Self {
        let session_id = event
            .session_id()
            .or(fallback_session)
            .unwrap_or_default()
            .to_string();

        let mut event_data = event.event_data().clone();
        event_data.insert("referrer".into(), Value::String(page.referrer.clone()));
        event_data.insert("page_url".into(), Value::String(page.page_url.clone()));

        Self {
            event_type: event.event_type().to_string(),
            event_data,
            lead_id: event.lead_id().map(|id| id.as_str().to_string()),
            session_id,
            created_at: event.timestamp(),
        }
    }
}

/// Body of a batch or beacon request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<EventRecord>,
}

impl EventBatch {
    pub fn from_events<'a>(
        events: impl IntoIterator<Item = &'a QueuedEvent>,
        page: &PageContext,
        fallback_session: Option<&str>,
    ) -> Self {
        Self {
            events: events
                .into_iter()
                .map(|event| EventRecord::from_event(event, page, fallback_session))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Serialize to the JSON request body
    pub fn to_body(&self) -> Result<Bytes, TransportError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// RFC 3339 timestamps with millisecond precision and a `Z` suffix
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
