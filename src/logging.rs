//! In-memory log ring buffer, exposed as a `tracing_subscriber::Layer`.
//!
//! This generalizes the teacher's `log_capture::LogCollector` (a `log::Log`
//! implementation feeding a fixed `VecDeque`) to a tracing `Layer`, so both a
//! console subscriber and this in-memory sink run side by side. The buffer
//! is what the out-of-scope UI would read from; this crate only exposes it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const MAX_LOG_ENTRIES: usize = 256;

/// A single captured log line.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// A thread-safe, fixed-capacity log buffer addressed like a wrapping ring.
///
/// Capacity is bounded at [`MAX_LOG_ENTRIES`]; the oldest entry is evicted
/// on overflow, mirroring the original 256-line circular log buffer.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<VecDeque<LogEntry>>>);

impl LogBuffer {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LOG_ENTRIES))))
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.0.lock().expect("log buffer mutex poisoned").iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.0.lock().expect("log buffer mutex poisoned").clear();
    }

    fn push(&self, entry: LogEntry) {
        let mut buffer = self.0.lock().expect("log buffer mutex poisoned");
        if buffer.len() >= MAX_LOG_ENTRIES {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

/// A `tracing_subscriber::Layer` that mirrors events into a [`LogBuffer`].
pub struct LogBufferLayer {
    buffer: LogBuffer,
}

impl LogBufferLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for LogBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.buffer.push(LogEntry {
            timestamp: Local::now(),
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
        });
    }
}

/// Output format for the console subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Initializes the global tracing subscriber: a console layer plus a
/// [`LogBufferLayer`] feeding the returned [`LogBuffer`].
///
/// Idempotent — safe to call more than once (e.g. from tests); a second
/// call is a no-op rather than a panic.
pub fn init(level: Level, format: OutputFormat) -> LogBuffer {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let buffer = LogBuffer::new();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let fmt_layer: Box<dyn Layer<_> + Send + Sync> = match format {
        OutputFormat::Pretty => Box::new(fmt::layer().pretty()),
        OutputFormat::Compact => Box::new(fmt::layer().compact()),
        OutputFormat::Json => Box::new(fmt::layer().json()),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(LogBufferLayer::new(buffer.clone()))
        .try_init();

    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_evicts_oldest_past_capacity() {
        let buffer = LogBuffer::new();
        for i in 0..(MAX_LOG_ENTRIES + 10) {
            buffer.push(LogEntry {
                timestamp: Local::now(),
                level: Level::INFO,
                target: "test".into(),
                message: format!("line {i}"),
            });
        }
        let snap = buffer.snapshot();
        assert_eq!(snap.len(), MAX_LOG_ENTRIES);
        assert_eq!(snap.first().unwrap().message, "line 10");
    }

    #[test]
    fn clear_empties_buffer() {
        let buffer = LogBuffer::new();
        buffer.push(LogEntry {
            timestamp: Local::now(),
            level: Level::WARN,
            target: "test".into(),
            message: "hi".into(),
        });
        buffer.clear();
        assert!(buffer.snapshot().is_empty());
    }
}
