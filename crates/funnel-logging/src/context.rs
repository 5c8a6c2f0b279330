//! Session context for funnel logging
//!
//! The visitor session is carried as a span field rather than thread-local
//! state, so it follows the work onto whichever runtime thread polls it.

/// Span carrying the session id, so JSONL lines emitted inside it include it
///
/// # Example
///
/// ```ignore
/// use tracing::Instrument;
///
/// async { tracing::info!("Queue started") }
///     .instrument(funnel_logging::session_span(queue.session_id()))
///     .await;
/// ```
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("session", session_id = %session_id)
}
