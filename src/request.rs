//! Request descriptors and the caller-facing completion future.

use std::fmt;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{QueueError, QueueResult};

/// Direction of an admitted request, used for cost normalization and
/// accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Write,
    Read,
}

/// One unit of queued work: an opaque closure plus the cost inputs the
/// scheduler charges against the owning class.
///
/// A descriptor is consumed exactly once, either by a worker running it or by
/// a shutdown path cancelling it, and either way the paired [`IoFuture`]
/// resolves with one terminal result.
pub struct Request {
    rtype: RequestType,
    req_size: u64,
    weight: u64,
    size: u64,
    op: Box<dyn FnOnce() + Send>,
    completion: Sender<QueueResult<()>>,
}

impl Request {
    /// Build a descriptor and its completion future.
    ///
    /// `weight` and `size` are the normalized cost units charged by the fair
    /// queue; `req_size` is the raw payload size kept for accounting.
    pub fn new(
        rtype: RequestType,
        req_size: u64,
        weight: u64,
        size: u64,
        op: Box<dyn FnOnce() + Send>,
    ) -> (Request, IoFuture) {
        let (tx, rx) = bounded(1);
        let req = Request {
            rtype,
            req_size,
            weight,
            size,
            op,
            completion: tx,
        };
        (req, IoFuture { result: rx })
    }

    pub fn rtype(&self) -> RequestType {
        self.rtype
    }

    pub fn request_size(&self) -> u64 {
        self.req_size
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Run the work and resolve the future with success.
    pub(crate) fn execute(self) {
        (self.op)();
        let _ = self.completion.send(Ok(()));
    }

    /// Resolve the future with a terminal error without running the work.
    pub(crate) fn fail(self, err: QueueError) {
        let _ = self.completion.send(Err(err));
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("rtype", &self.rtype)
            .field("req_size", &self.req_size)
            .field("weight", &self.weight)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Completion handle returned by admission.
///
/// Consuming [`IoFuture::done`] is the only way to observe the outcome, so a
/// result can never be read twice.
#[derive(Debug)]
pub struct IoFuture {
    result: Receiver<QueueResult<()>>,
}

impl IoFuture {
    /// Block until the work ran or shutdown cancelled it.
    pub fn done(self) -> QueueResult<()> {
        match self.result.recv() {
            Ok(res) => res,
            // The descriptor was dropped without a verdict; treat it like a
            // shutdown cancellation so the caller is never stranded.
            Err(_) => Err(QueueError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn execute_resolves_future_with_ok() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let (req, fut) = Request::new(
            RequestType::Read,
            16,
            1,
            16,
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        req.execute();
        assert_eq!(fut.done(), Ok(()));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn fail_resolves_future_without_running_op() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let (req, fut) = Request::new(
            RequestType::Write,
            16,
            1,
            16,
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        req.fail(QueueError::Closed);
        assert_eq!(fut.done(), Err(QueueError::Closed));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn dropped_request_unblocks_future() {
        let (req, fut) = Request::new(RequestType::Read, 1, 1, 1, Box::new(|| {}));
        drop(req);
        assert_eq!(fut.done(), Err(QueueError::Closed));
    }
}
