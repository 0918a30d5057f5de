//! Per-class scheduling state.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::request::Request;

/// A named consumer of I/O bandwidth with a relative weight.
///
/// Shares control how fast the class's accumulated virtual cost grows: more
/// shares means slower growth and therefore more frequent service. The
/// accumulated cost doubles as the class's key in the fair queue's min-heap,
/// and `queued` is true exactly while an entry for the class sits in that
/// heap.
pub struct PriorityClass {
    name: String,
    state: Mutex<ClassState>,
}

struct ClassState {
    shares: u32,
    fifo: VecDeque<Request>,
    accumulated: f64,
    queued: bool,
}

impl PriorityClass {
    pub(crate) fn new(name: &str, shares: u32) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(ClassState {
                // Zero shares would make the cost division undefined.
                shares: shares.max(1),
                fifo: VecDeque::new(),
                accumulated: 0.0,
                queued: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shares(&self) -> u32 {
        self.state.lock().shares
    }

    /// Set the share weight, clamped to a minimum of 1. Takes effect from the
    /// next cost computation.
    pub fn update_shares(&self, shares: u32) {
        self.state.lock().shares = shares.max(1);
    }

    pub fn len(&self) -> usize {
        self.state.lock().fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().fifo.is_empty()
    }

    /// Append a request, returning the FIFO depth after the insert.
    pub(crate) fn enqueue(&self, req: Request) -> usize {
        let mut st = self.state.lock();
        st.fifo.push_back(req);
        st.fifo.len()
    }

    pub(crate) fn dequeue(&self) -> Option<Request> {
        self.state.lock().fifo.pop_front()
    }

    pub(crate) fn accumulated(&self) -> f64 {
        self.state.lock().accumulated
    }

    pub(crate) fn set_accumulated(&self, v: f64) {
        self.state.lock().accumulated = v;
    }

    pub(crate) fn queued(&self) -> bool {
        self.state.lock().queued
    }

    pub(crate) fn set_queued(&self, queued: bool) {
        self.state.lock().queued = queued;
    }
}
