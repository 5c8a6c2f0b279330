//! JSON-lines input
//!
//! Each non-blank line is either an event:
//!
//! ```json
//! {"event_type": "quiz_answer", "event_data": {"question": 2}, "lead_id": "lead-1"}
//! ```
//!
//! or a control command for the simulated host:
//!
//! ```json
//! {"control": "offline"}
//! ```

use funnel_events::{EventData, LeadId};
use serde::Deserialize;
use thiserror::Error;

/// An event to hand to the queue
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InputEvent {
    pub event_type: String,
    #[serde(default)]
    pub event_data: EventData,
    #[serde(default)]
    pub lead_id: Option<LeadId>,
}

/// Host transitions that can be injected from the input stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Online,
    Offline,
    Visible,
    Hidden,
    Unload,
    Flush,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AgentCommand {
    Control { control: Control },
    Event(InputEvent),
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("line {line}: {source}")]
    Malformed {
        line: usize,
        source: serde_json::Error,
    },
}

/// Parse one input line; blank lines and `#` comments yield `None`
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<AgentCommand>, InputError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| InputError::Malformed {
            line: line_no,
            source,
        })
}
