//! Built-in wallet observers
//!
//! - [`TracingObserver`]: writes wallet events to `tracing`
//! - [`RecordingObserver`]: captures events for assertions in tests

pub mod mock_listener;
pub mod tracing_observer;

pub use mock_listener::RecordingObserver;
pub use tracing_observer::{LogLevel, TracingObserver};
