//! Metrics and observability infrastructure for eduaudit.
//!
//! This module groups all observability-related components:
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder and the admin HTTP server

pub mod events;
pub mod server;

// Re-export commonly used items
pub use server::{AdminState, init};

/// Emit an internal event.
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding Prometheus metric.
///
/// # Example
///
/// ```ignore
/// use eduaudit::metrics::events::{EntriesDeadLettered, EntrySubmitted};
///
/// emit!(EntrySubmitted);
/// emit!(EntriesDeadLettered { count: 3 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
