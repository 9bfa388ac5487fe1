use std::{
    ops::Add,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

#[derive(Debug, Default)]
struct InnerMetrics {
    rows_written: AtomicU64,
    bytes_streamed: AtomicU64,
    rows_forwarded: AtomicU64,
    error_count: AtomicU64,
}

/// Throughput counters of one worker. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct LoadMetrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rows_written: u64,
    pub bytes_streamed: u64,
    pub rows_forwarded: u64,
    pub error_count: u64,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_rows(&self, count: u64) {
        self.inner.rows_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_bytes(&self, count: u64) {
        self.inner.bytes_streamed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_forwarded(&self, count: u64) {
        self.inner.rows_forwarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_errors(&self, count: u64) {
        self.inner.error_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_written: self.inner.rows_written.load(Ordering::Relaxed),
            bytes_streamed: self.inner.bytes_streamed.load(Ordering::Relaxed),
            rows_forwarded: self.inner.rows_forwarded.load(Ordering::Relaxed),
            error_count: self.inner.error_count.load(Ordering::Relaxed),
        }
    }
}

impl Add for MetricsSnapshot {
    type Output = MetricsSnapshot;

    fn add(self, other: MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_written: self.rows_written + other.rows_written,
            bytes_streamed: self.bytes_streamed + other.bytes_streamed,
            rows_forwarded: self.rows_forwarded + other.rows_forwarded,
            error_count: self.error_count + other.error_count,
        }
    }
}
