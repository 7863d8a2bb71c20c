use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every client and pager of one run.
#[derive(Debug, Default)]
pub struct Metrics {
    api_requests: AtomicU64,
    retries: AtomicU64,
    pages_fetched: AtomicU64,
    page_delays: AtomicU64,
    failed_queries: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub api_requests: u64,
    pub retries: u64,
    pub pages_fetched: u64,
    pub page_delays: u64,
    pub failed_queries: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_api_request(&self) {
        self.api_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_page(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_page_delay(&self) {
        self.page_delays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed_query(&self) {
        self.failed_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            api_requests: self.api_requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            page_delays: self.page_delays.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let snap = self.snapshot();
        tracing::info!(
            api_requests = snap.api_requests,
            retries = snap.retries,
            pages = snap.pages_fetched,
            page_delays = snap.page_delays,
            failed_queries = snap.failed_queries,
            "run metrics"
        );
    }
}
