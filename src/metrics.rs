//! Request counter and Prometheus text exposition

use std::sync::atomic::{AtomicU64, Ordering};

/// Content type of the Prometheus text format, version 0.0.4
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Process-wide, monotonically increasing request counter.
///
/// Increments are atomic; the counter is never reset.
#[derive(Debug, Default)]
pub struct RequestCounter {
    total: AtomicU64,
}

impl RequestCounter {
    pub const fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
        }
    }

    /// Add one and return the new total
    pub fn increment(&self) -> u64 {
        self.total.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

/// Render all metrics in Prometheus text format
pub fn render(requests: &RequestCounter) -> String {
    format!(
        "# HELP http_requests_total Total HTTP Requests\n\
         # TYPE http_requests_total counter\n\
         http_requests_total {}\n",
        requests.get()
    )
}
