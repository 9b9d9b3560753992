//! Observability subsystem for aerograph
//!
//! - Structured logging (JSON, one line per event)
//! - Monotonic counters
//! - Typed lifecycle events
//!
//! Observability is read-only: nothing here influences scheduling.
//!
//! # Usage
//!
//! ```ignore
//! use aerograph::observability::{log_event_with_fields, Event, MetricsRegistry};
//!
//! log_event_with_fields(Event::BatchFormed, &[("size", "3")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_batches_formed();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log a lifecycle event
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields.
///
/// Failure events are written at WARN so they reach operators without
/// being mistaken for process-level errors.
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_failure() {
        Severity::Warn
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}

/// Log a high-volume event at TRACE level
pub fn trace_event(event: Event, fields: &[(&str, &str)]) {
    Logger::trace(event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        // This just verifies no panic
        log_event(Event::EngineStart);
        log_event(Event::PropagationStop);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event_with_fields(Event::BatchFormed, &[("size", "3"), ("slot", "0")]);
        trace_event(Event::OperationComplete, &[("sequence", "1")]);
    }
}
