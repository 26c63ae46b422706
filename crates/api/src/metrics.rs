use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct Metrics {
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Timing (in microseconds)
    total_extract_time_us: AtomicU64,
    total_query_time_us: AtomicU64,

    documents_extracted: AtomicUsize,
    documents_failed: AtomicUsize,
    degraded_graphs: AtomicUsize,
    entities_extracted: AtomicUsize,
    relations_extracted: AtomicUsize,
    queries: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// One batch: `documents` succeeded (of which `degraded` without content),
    /// `failed` did not produce a graph.
    pub fn record_extraction(&self, duration: Duration, documents: usize, degraded: usize, failed: usize) {
        self.total_extract_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.documents_extracted.fetch_add(documents, Ordering::Relaxed);
        self.degraded_graphs.fetch_add(degraded, Ordering::Relaxed);
        self.documents_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn record_graph(&self, entities: usize, relations: usize) {
        self.entities_extracted.fetch_add(entities, Ordering::Relaxed);
        self.relations_extracted.fetch_add(relations, Ordering::Relaxed);
    }

    pub fn record_query(&self, duration: Duration) {
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_extract_time_ms: avg_time_ms(&self.total_extract_time_us, &self.documents_extracted),
            avg_query_time_ms: avg_time_ms(&self.total_query_time_us, &self.queries),
            documents_extracted: self.documents_extracted.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            degraded_graphs: self.degraded_graphs.load(Ordering::Relaxed),
            entities_extracted: self.entities_extracted.load(Ordering::Relaxed),
            relations_extracted: self.relations_extracted.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub avg_extract_time_ms: f64,
    pub avg_query_time_ms: f64,
    pub documents_extracted: usize,
    pub documents_failed: usize,
    pub degraded_graphs: usize,
    pub entities_extracted: usize,
    pub relations_extracted: usize,
    pub queries: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
