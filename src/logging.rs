//! Tracing setup plus an in-memory ring of recent log lines for the control
//! surface.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, Once};

use chrono::Utc;
use once_cell::sync::Lazy;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

const RECENT_CAPACITY: usize = 500;

static INIT: Once = Once::new();
static RECENT: Lazy<RecentLogBuffer> = Lazy::new(|| RecentLogBuffer::new(RECENT_CAPACITY));

/// Which task's lines `recent_lines` should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFilter {
    All,
    Uploader,
    Slideshow,
}

impl LogFilter {
    /// Lenient parse for query strings; anything unrecognized means all.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("uploader") => Self::Uploader,
            Some("slideshow") => Self::Slideshow,
            _ => Self::All,
        }
    }

    fn matches(self, target: &str) -> bool {
        const UPLOADER: &[&str] = &["ingest", "upload", "ledger", "scan", "volume", "client", "failures"];
        const SLIDESHOW: &[&str] = &["slideshow", "feed", "render"];
        match self {
            Self::All => true,
            Self::Uploader => UPLOADER.iter().any(|m| target.contains(m)),
            Self::Slideshow => SLIDESHOW.iter().any(|m| target.contains(m)),
        }
    }
}

#[derive(Debug, Clone)]
struct LogLine {
    target: String,
    formatted: String,
}

/// Fixed-capacity ring of formatted log lines.
#[derive(Clone)]
pub struct RecentLogBuffer {
    inner: Arc<Mutex<VecDeque<LogLine>>>,
    capacity: usize,
}

impl RecentLogBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogLine>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, target: &str, level: &Level, message: String) {
        let formatted = format!(
            "{} {level:>5} {target}: {message}",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        );
        let mut lines = self.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(LogLine {
            target: target.to_string(),
            formatted,
        });
    }

    /// Ordered (oldest first) recent lines matching the filter.
    #[must_use]
    pub fn recent_lines(&self, filter: LogFilter) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|line| filter.matches(&line.target))
            .map(|line| line.formatted.clone())
            .collect()
    }
}

struct BufferLayer {
    buffer: RecentLogBuffer,
}

impl<S: Subscriber> Layer<S> for BufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        self.buffer.push(meta.target(), meta.level(), visitor.rendered);
    }
}

#[derive(Default)]
struct MessageVisitor {
    rendered: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            if self.rendered.is_empty() {
                let _ = write!(self.rendered, "{value:?}");
            } else {
                let existing = std::mem::take(&mut self.rendered);
                let _ = write!(self.rendered, "{value:?} {existing}");
            }
        } else {
            if !self.rendered.is_empty() {
                self.rendered.push(' ');
            }
            let _ = write!(self.rendered, "{}={value:?}", field.name());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            if self.rendered.is_empty() {
                self.rendered.push_str(value);
            } else {
                let existing = std::mem::take(&mut self.rendered);
                self.rendered.push_str(value);
                self.rendered.push(' ');
                self.rendered.push_str(&existing);
            }
        } else {
            if !self.rendered.is_empty() {
                self.rendered.push(' ');
            }
            let _ = write!(self.rendered, "{}={value}", field.name());
        }
    }
}

/// Handle to the process-wide recent-line buffer.
#[must_use]
pub fn buffer() -> RecentLogBuffer {
    RECENT.clone()
}

/// Install the global subscriber: env-filtered fmt output plus the recent
/// line buffer. Safe to call more than once.
pub fn init(verbosity: u8) {
    INIT.call_once(|| {
        let level = match verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("info,photo_courier={level}"))
        });
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(BufferLayer { buffer: buffer() })
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded_and_ordered() {
        let buffer = RecentLogBuffer::new(3);
        for n in 0..5 {
            buffer.push("photo_courier::tasks::ingest", &Level::INFO, format!("line {n}"));
        }
        let lines = buffer.recent_lines(LogFilter::All);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("line 2"));
        assert!(lines[2].contains("line 4"));
    }

    #[test]
    fn filters_select_by_task_target() {
        let buffer = RecentLogBuffer::new(10);
        buffer.push("photo_courier::tasks::ingest", &Level::INFO, "uploading".into());
        buffer.push("photo_courier::tasks::slideshow", &Level::INFO, "frame".into());
        buffer.push("photo_courier::ledger", &Level::WARN, "torn line".into());

        let uploader = buffer.recent_lines(LogFilter::Uploader);
        assert_eq!(uploader.len(), 2);
        let slideshow = buffer.recent_lines(LogFilter::Slideshow);
        assert_eq!(slideshow.len(), 1);
        assert!(slideshow[0].contains("frame"));
        assert_eq!(buffer.recent_lines(LogFilter::All).len(), 3);
    }

    #[test]
    fn filter_parse_is_lenient() {
        assert_eq!(LogFilter::parse(Some("uploader")), LogFilter::Uploader);
        assert_eq!(LogFilter::parse(Some("slideshow")), LogFilter::Slideshow);
        assert_eq!(LogFilter::parse(Some("bogus")), LogFilter::All);
        assert_eq!(LogFilter::parse(None), LogFilter::All);
    }
}
