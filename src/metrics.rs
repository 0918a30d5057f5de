//! Scheduler instrumentation hooks.
//!
//! Metrics are injected when a queue is built, so embedders can plug in their
//! exporter of choice and tests can substitute a recording collector. Nothing
//! here is process-global.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::request::RequestType;

/// Observer interface for scheduler events. Every hook has an empty default.
///
/// Hooks run on scheduler threads, sometimes while a queue lock is held, so
/// implementations must not block.
pub trait QueueMetrics: Send + Sync {
    /// A request passed admission; `bytes` is its raw payload size.
    fn request_admitted(&self, rtype: RequestType, bytes: u64) {
        let _ = (rtype, bytes);
    }

    /// A worker finished running a request.
    fn request_completed(&self, rtype: RequestType, elapsed: Duration, bytes: u64) {
        let _ = (rtype, elapsed, bytes);
    }

    /// A descriptor was appended to a class FIFO.
    fn class_enqueued(&self, class: &str, shares: u32) {
        let _ = (class, shares);
    }

    /// FIFO depth of a class right after an enqueue or dequeue.
    fn class_depth(&self, class: &str, shares: u32, depth: usize) {
        let _ = (class, shares, depth);
    }

    /// Accumulated costs were rescaled to keep the float math finite.
    fn renormalized(&self) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl QueueMetrics for NoopMetrics {}

/// Bucket labels for completion timing, keyed by request payload size.
pub const GRANULARITY_LABELS: [&str; 5] = ["256KB", "1MB", "2MB", "3MB", "4MB"];

const GRANULARITY_BOUNDS: [u64; 4] = [
    256 * 1024,
    1024 * 1024,
    2 * 1024 * 1024,
    3 * 1024 * 1024,
];

fn granularity_bucket(size: u64) -> usize {
    GRANULARITY_BOUNDS
        .iter()
        .position(|bound| size <= *bound)
        .unwrap_or(GRANULARITY_BOUNDS.len())
}

/// Completion count and total elapsed time per size bucket.
#[derive(Debug)]
struct DurationBuckets {
    counts: [AtomicU64; 5],
    total_us: [AtomicU64; 5],
}

impl DurationBuckets {
    const fn new() -> Self {
        Self {
            counts: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
            total_us: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
        }
    }

    fn record(&self, size: u64, elapsed: Duration) {
        let bucket = granularity_bucket(size);
        self.counts[bucket].fetch_add(1, Ordering::Relaxed);
        self.total_us[bucket].fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Vec<GranularityStat> {
        GRANULARITY_LABELS
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let count = self.counts[i].load(Ordering::Relaxed);
                let total_us = self.total_us[i].load(Ordering::Relaxed);
                let avg_ms = if count == 0 {
                    0.0
                } else {
                    total_us as f64 / count as f64 / 1_000.0
                };
                GranularityStat {
                    granularity: label,
                    count,
                    avg_ms,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct ClassGauges {
    shares: u32,
    enqueued_total: u64,
    depth: usize,
}

/// Recording collector: atomic counters plus per-granularity completion
/// timing and per-class gauges. Cheap enough to stay attached in production.
#[derive(Debug)]
pub struct MetricsRecorder {
    reads_admitted: AtomicU64,
    writes_admitted: AtomicU64,
    read_bytes: AtomicU64,
    written_bytes: AtomicU64,
    reads_completed: AtomicU64,
    writes_completed: AtomicU64,
    renormalizations: AtomicU64,
    read_durations: DurationBuckets,
    write_durations: DurationBuckets,
    classes: Mutex<HashMap<String, ClassGauges>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            reads_admitted: AtomicU64::new(0),
            writes_admitted: AtomicU64::new(0),
            read_bytes: AtomicU64::new(0),
            written_bytes: AtomicU64::new(0),
            reads_completed: AtomicU64::new(0),
            writes_completed: AtomicU64::new(0),
            renormalizations: AtomicU64::new(0),
            read_durations: DurationBuckets::new(),
            write_durations: DurationBuckets::new(),
            classes: Mutex::new(HashMap::new()),
        }
    }

    /// Point-in-time copy of every counter. Classes are sorted by name so the
    /// output is stable across runs.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut classes: Vec<ClassStat> = self
            .classes
            .lock()
            .iter()
            .map(|(name, gauges)| ClassStat {
                class: name.clone(),
                shares: gauges.shares,
                enqueued_total: gauges.enqueued_total,
                depth: gauges.depth,
            })
            .collect();
        classes.sort_by(|a, b| a.class.cmp(&b.class));

        MetricsSnapshot {
            reads_admitted: self.reads_admitted.load(Ordering::Relaxed),
            writes_admitted: self.writes_admitted.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            written_bytes: self.written_bytes.load(Ordering::Relaxed),
            reads_completed: self.reads_completed.load(Ordering::Relaxed),
            writes_completed: self.writes_completed.load(Ordering::Relaxed),
            renormalizations: self.renormalizations.load(Ordering::Relaxed),
            read_durations: self.read_durations.snapshot(),
            write_durations: self.write_durations.snapshot(),
            classes,
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueMetrics for MetricsRecorder {
    fn request_admitted(&self, rtype: RequestType, bytes: u64) {
        match rtype {
            RequestType::Read => {
                self.reads_admitted.fetch_add(1, Ordering::Relaxed);
                self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            RequestType::Write => {
                self.writes_admitted.fetch_add(1, Ordering::Relaxed);
                self.written_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
        }
    }

    fn request_completed(&self, rtype: RequestType, elapsed: Duration, bytes: u64) {
        match rtype {
            RequestType::Read => {
                self.reads_completed.fetch_add(1, Ordering::Relaxed);
                self.read_durations.record(bytes, elapsed);
            }
            RequestType::Write => {
                self.writes_completed.fetch_add(1, Ordering::Relaxed);
                self.write_durations.record(bytes, elapsed);
            }
        }
    }

    fn class_enqueued(&self, class: &str, shares: u32) {
        let mut classes = self.classes.lock();
        let gauges = classes.entry(class.to_string()).or_default();
        gauges.shares = shares;
        gauges.enqueued_total += 1;
    }

    fn class_depth(&self, class: &str, shares: u32, depth: usize) {
        let mut classes = self.classes.lock();
        let gauges = classes.entry(class.to_string()).or_default();
        gauges.shares = shares;
        gauges.depth = depth;
    }

    fn renormalized(&self) {
        self.renormalizations.fetch_add(1, Ordering::Relaxed);
    }
}

/// Serializable view of a [`MetricsRecorder`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub reads_admitted: u64,
    pub writes_admitted: u64,
    pub read_bytes: u64,
    pub written_bytes: u64,
    pub reads_completed: u64,
    pub writes_completed: u64,
    pub renormalizations: u64,
    pub read_durations: Vec<GranularityStat>,
    pub write_durations: Vec<GranularityStat>,
    pub classes: Vec<ClassStat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GranularityStat {
    pub granularity: &'static str,
    pub count: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassStat {
    pub class: String,
    pub shares: u32,
    pub enqueued_total: u64,
    pub depth: usize,
}
