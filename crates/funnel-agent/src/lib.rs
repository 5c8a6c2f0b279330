//! Command-line front end for the funnel event queue
//!
//! Reads one JSON object per line and feeds it to an
//! [`EventQueue`](funnel_events::EventQueue). Besides events, a line may carry
//! a control command that drives the simulated host environment
//! (connectivity, page visibility, explicit flushes).

pub mod agent;
pub mod config;
pub mod input;

pub use agent::{Agent, IngestSummary};
pub use config::{AgentConfig, Cli, ConfigError};
pub use input::{AgentCommand, Control, InputError, InputEvent, parse_line};
