//! Weighted fair queue over named priority classes.
//!
//! Producers append cost-weighted request descriptors to per-class FIFOs.
//! Dequeue always serves the class with the lowest accumulated cost, so while
//! every class has a backlog the service rates converge to the share ratios.
//! Charges grow exponentially with wall time (time constant `tau` in
//! milliseconds), which makes old accumulated cost decay relative to fresh
//! work: an idle class cannot bank unbounded credit, and a lagging class is
//! served first only until balance is restored.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::class::PriorityClass;
use crate::config::{FairQueueConfig, DEFAULT_TAU};
use crate::error::{QueueError, QueueResult};
use crate::metrics::{NoopMetrics, QueueMetrics};
use crate::request::Request;

type Clock = Box<dyn Fn() -> Instant + Send + Sync>;

/// Heap entry: the class plus the accumulated cost it was pushed with.
struct ClassEntry {
    key: f64,
    seq: u64,
    class: Arc<PriorityClass>,
}

impl PartialEq for ClassEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq && self.key.total_cmp(&other.key) == Ordering::Equal
    }
}

impl Eq for ClassEntry {}

impl PartialOrd for ClassEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClassEntry {
    // Reversed so the lowest accumulated cost pops first. Equal costs fall
    // back to push order, which keeps equal-share classes round-robin.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .total_cmp(&self.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    base: Instant,
    classes: HashMap<String, Arc<PriorityClass>>,
    heap: BinaryHeap<ClassEntry>,
    push_seq: u64,
    closed: bool,
}

impl Inner {
    fn push_class(&mut self, pc: Arc<PriorityClass>) {
        if pc.queued() {
            return;
        }
        pc.set_queued(true);
        self.push_seq += 1;
        self.heap.push(ClassEntry {
            key: pc.accumulated(),
            seq: self.push_seq,
            class: pc,
        });
    }

    fn pop_class(&mut self) -> Option<Arc<PriorityClass>> {
        let entry = self.heap.pop()?;
        entry.class.set_queued(false);
        Some(entry.class)
    }

    /// Pending descriptors across every class currently contending.
    fn size(&self) -> usize {
        self.classes
            .values()
            .filter(|pc| pc.queued())
            .map(|pc| pc.len())
            .sum()
    }

    /// Rescale every accumulated cost toward zero and push the time base
    /// forward so future exp() charges start small again. Scaling everything
    /// by one positive factor preserves the relative order of classes.
    fn renormalize(&mut self, tau: f64, metrics: &dyn QueueMetrics) {
        let factor = renormalize_factor();
        // ln(factor) is negative, so the base moves into the future.
        let time_delta_ms = factor.ln() * tau;
        self.base += Duration::from_secs_f64(-time_delta_ms / 1_000.0);
        for pc in self.classes.values() {
            pc.set_accumulated(pc.accumulated() * factor);
        }
        let entries = std::mem::take(&mut self.heap).into_vec();
        self.heap = entries
            .into_iter()
            .map(|mut entry| {
                entry.key *= factor;
                entry
            })
            .collect();
        metrics.renormalized();
        debug!(advanced_ms = -time_delta_ms, "renormalized accumulated costs");
    }
}

/// Smallest positive f64 (subnormal), not `f64::MIN_POSITIVE`.
fn renormalize_factor() -> f64 {
    f64::from_bits(1)
}

/// Signed difference in milliseconds. Negative when `base` sits ahead of
/// `now`, which is the normal state right after a renormalization.
fn signed_millis_since(now: Instant, base: Instant) -> f64 {
    match now.checked_duration_since(base) {
        Some(d) => d.as_secs_f64() * 1_000.0,
        None => base
            .checked_duration_since(now)
            .map_or(0.0, |d| -(d.as_secs_f64() * 1_000.0)),
    }
}

pub struct FairQueue {
    config: FairQueueConfig,
    metrics: Arc<dyn QueueMetrics>,
    clock: Clock,
    inner: Mutex<Inner>,
}

impl FairQueue {
    pub fn new(config: FairQueueConfig, capacity: usize) -> Self {
        Self::with_metrics(config, capacity, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(
        config: FairQueueConfig,
        capacity: usize,
        metrics: Arc<dyn QueueMetrics>,
    ) -> Self {
        Self::with_clock(config, capacity, metrics, Box::new(Instant::now))
    }

    pub(crate) fn with_clock(
        config: FairQueueConfig,
        capacity: usize,
        metrics: Arc<dyn QueueMetrics>,
        clock: Clock,
    ) -> Self {
        // Zero budgets would turn the cost division into inf/NaN.
        let config = FairQueueConfig {
            max_req_count: config.max_req_count.max(1),
            max_bytes_count: config.max_bytes_count.max(1),
            tau: if config.tau.is_finite() && config.tau > 0.0 {
                config.tau
            } else {
                DEFAULT_TAU
            },
        };
        let base = clock();
        Self {
            config,
            metrics,
            clock,
            inner: Mutex::new(Inner {
                base,
                classes: HashMap::new(),
                heap: BinaryHeap::with_capacity(capacity),
                push_seq: 0,
                closed: false,
            }),
        }
    }

    /// Get or create the class. Registering an existing name returns the
    /// original instance and leaves its shares untouched.
    pub fn register_priority_class(&self, name: &str, shares: u32) -> Arc<PriorityClass> {
        let mut inner = self.inner.lock();
        if let Some(pc) = inner.classes.get(name) {
            return Arc::clone(pc);
        }
        let pc = Arc::new(PriorityClass::new(name, shares));
        if !inner.closed {
            inner.classes.insert(name.to_string(), Arc::clone(&pc));
        }
        pc
    }

    /// Drop the class from scheduling. Pending descriptors resolve with
    /// [`QueueError::Closed`] so no caller is left blocked on a future.
    pub fn unregister_priority_class(&self, name: &str) {
        let mut inner = self.inner.lock();
        let Some(pc) = inner.classes.remove(name) else {
            return;
        };
        inner.heap.retain(|entry| !Arc::ptr_eq(&entry.class, &pc));
        pc.set_queued(false);
        let mut dropped = 0usize;
        while let Some(req) = pc.dequeue() {
            req.fail(QueueError::Closed);
            dropped += 1;
        }
        if dropped > 0 {
            debug!(class = name, dropped, "unregistered class had pending requests");
        }
    }

    pub fn update_shares(&self, name: &str, shares: u32) -> QueueResult<()> {
        let inner = self.inner.lock();
        let Some(pc) = inner.classes.get(name) else {
            return Err(QueueError::ClassNotFound {
                class: name.to_string(),
            });
        };
        pc.update_shares(shares);
        Ok(())
    }

    /// Append a descriptor to its class FIFO and report the total number of
    /// pending descriptors, this one included. A return of 1 means the queue
    /// went idle-to-busy and the dispatch loop needs a wake.
    pub fn enqueue(&self, name: &str, req: Request) -> QueueResult<usize> {
        let mut inner = self.inner.lock();
        let Some(pc) = inner.classes.get(name).cloned() else {
            return Err(QueueError::ClassNotFound {
                class: name.to_string(),
            });
        };
        let depth = pc.enqueue(req);
        self.metrics.class_enqueued(pc.name(), pc.shares());
        self.metrics.class_depth(pc.name(), pc.shares(), depth);
        inner.push_class(pc);
        Ok(inner.size())
    }

    /// Pop the next descriptor in fair order and charge its cost to the
    /// class. The flag reports whether the queue is empty afterwards.
    pub fn dequeue(&self) -> (Option<Request>, bool) {
        let mut inner = self.inner.lock();
        let Some(pc) = inner.pop_class() else {
            return (None, true);
        };
        let req = pc.dequeue().expect("queued class had an empty FIFO");
        let next = self.next_accumulated(&mut inner, &pc, &req);
        pc.set_accumulated(next);
        self.metrics.class_depth(pc.name(), pc.shares(), pc.len());
        if !pc.is_empty() {
            inner.push_class(pc);
        }
        let empty = inner.heap.is_empty();
        (Some(req), empty)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().size()
    }

    /// Fail every pending descriptor with [`QueueError::Closed`] and drop the
    /// registry. Later enqueues report [`QueueError::ClassNotFound`].
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        let mut drained = 0usize;
        for pc in inner.classes.values() {
            pc.set_queued(false);
            while let Some(req) = pc.dequeue() {
                req.fail(QueueError::Closed);
                drained += 1;
            }
        }
        inner.classes.clear();
        inner.heap.clear();
        info!(drained, "fair queue closed");
    }

    fn next_accumulated(&self, inner: &mut Inner, pc: &PriorityClass, req: &Request) -> f64 {
        let req_cost = (req.weight() as f64 / self.config.max_req_count as f64
            + req.size() as f64 / self.config.max_bytes_count as f64)
            / pc.shares() as f64;
        loop {
            let delta = signed_millis_since((self.clock)(), inner.base);
            let cost = (delta / self.config.tau).exp() * req_cost;
            let next = pc.accumulated() + cost;
            if !next.is_infinite() {
                return next;
            }
            // The time base moves forward with each pass, so the exponent
            // shrinks and the loop terminates.
            inner.renormalize(self.config.tau, &*self.metrics);
        }
    }
}
