//! Admission-controlled IO queue: one dispatch loop, a bounded worker pool,
//! and a fair queue deciding service order.
//!
//! `queue_request` costs the request by direction and size, enqueues it, and
//! returns a future the caller blocks on. A single dispatch loop pulls
//! descriptors in fair order and hands each to whichever worker asked for
//! one. `close` stops both loops and fails everything still queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::class::PriorityClass;
use crate::config::{FairQueueConfig, IoQueueConfig, Mountpoint, READ_REQUEST_BASE_COUNT};
use crate::error::{QueueError, QueueResult};
use crate::fair_queue::FairQueue;
use crate::metrics::{NoopMetrics, QueueMetrics};
use crate::request::{IoFuture, Request, RequestType};
use crate::worker::WorkerPool;

const FAIR_QUEUE_CAPACITY: usize = 128;

fn request_costs(cfg: &IoQueueConfig, rtype: RequestType, size: u64) -> (u64, u64) {
    match rtype {
        RequestType::Write => (
            cfg.disk_req_write_to_read_multiplier,
            cfg.disk_bytes_write_to_read_multiplier.saturating_mul(size),
        ),
        RequestType::Read => (
            READ_REQUEST_BASE_COUNT,
            READ_REQUEST_BASE_COUNT.saturating_mul(size),
        ),
    }
}

struct Threads {
    dispatcher: JoinHandle<()>,
    workers: WorkerPool,
}

pub struct IoQueue {
    cfg: IoQueueConfig,
    fq: Arc<FairQueue>,
    metrics: Arc<dyn QueueMetrics>,
    signal_tx: Sender<()>,
    done_tx: Mutex<Option<Sender<()>>>,
    threads: Mutex<Option<Threads>>,
    closing: AtomicBool,
    close_lock: Mutex<()>,
}

impl IoQueue {
    pub fn new(mp: &Mountpoint) -> Self {
        Self::with_metrics(mp, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(mp: &Mountpoint, metrics: Arc<dyn QueueMetrics>) -> Self {
        let cfg = IoQueueConfig::from_mountpoint(mp);
        let fq = Arc::new(FairQueue::with_metrics(
            FairQueueConfig::from_io_config(&cfg),
            FAIR_QUEUE_CAPACITY,
            Arc::clone(&metrics),
        ));
        let workers = mp.num_io_queues.max(1) as usize;

        let (ready_tx, ready_rx) = bounded(workers);
        // Capacity 1 keeps the wake edge-triggered without ever blocking an
        // admitting caller: a full slot already holds a pending wake.
        let (signal_tx, signal_rx) = bounded(1);
        let (done_tx, done_rx) = bounded::<()>(0);

        let pool = WorkerPool::spawn(workers, ready_tx, done_rx.clone(), Arc::clone(&metrics));
        let dispatcher = {
            let fq = Arc::clone(&fq);
            thread::Builder::new()
                .name("IO-Dispatch".to_string())
                .spawn(move || dispatch_loop(fq, signal_rx, ready_rx, done_rx))
                .expect("failed to spawn IO dispatch thread")
        };
        info!(workers, mountpoint = %cfg.mountpoint, "IO queue started");

        Self {
            cfg,
            fq,
            metrics,
            signal_tx,
            done_tx: Mutex::new(Some(done_tx)),
            threads: Mutex::new(Some(Threads {
                dispatcher,
                workers: pool,
            })),
            closing: AtomicBool::new(false),
            close_lock: Mutex::new(()),
        }
    }

    /// Get or create a class. Re-registering a name returns the existing
    /// instance with its original shares.
    pub fn register_priority_class(&self, name: &str, shares: u32) -> Arc<PriorityClass> {
        self.fq.register_priority_class(name, shares)
    }

    /// Remove a class. Its pending requests resolve with
    /// [`QueueError::Closed`].
    pub fn unregister_priority_class(&self, name: &str) {
        self.fq.unregister_priority_class(name)
    }

    pub fn update_shares_for_class(&self, name: &str, shares: u32) -> QueueResult<()> {
        self.fq.update_shares(name, shares)
    }

    /// Descriptors admitted but not yet handed to a worker.
    pub fn pending(&self) -> usize {
        self.fq.size()
    }

    /// Admit `op` under `class`. Returns a future that resolves once a worker
    /// has run the closure, or with an error if the request is cancelled.
    pub fn queue_request(
        &self,
        class: &str,
        size: u64,
        rtype: RequestType,
        op: impl FnOnce() + Send + 'static,
    ) -> QueueResult<IoFuture> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        let (weight, cost_size) = request_costs(&self.cfg, rtype, size);
        let (req, future) = Request::new(rtype, size, weight, cost_size, Box::new(op));
        let depth = self.fq.enqueue(class, req)?;
        self.metrics.request_admitted(rtype, size);
        if depth == 1 {
            // Idle-to-busy edge. try_send because a Full slot means the wake
            // is already pending.
            let _ = self.signal_tx.try_send(());
        }
        Ok(future)
    }

    /// Stop admission, join the dispatch loop and workers, then fail whatever
    /// is still queued. Safe to call more than once; concurrent callers block
    /// until the first close finishes.
    pub fn close(&self) {
        let _guard = self.close_lock.lock();
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the only sender trips every select waiting on done.
        self.done_tx.lock().take();
        let threads = self.threads.lock().take();
        if let Some(threads) = threads {
            if threads.dispatcher.join().is_err() {
                warn!("IO dispatch loop exited by panic");
            }
            threads.workers.join();
        }
        // Requests that raced admission past the closing flag are still in
        // the fair queue; this resolves them.
        self.fq.close();
        info!(mountpoint = %self.cfg.mountpoint, "IO queue closed");
    }
}

impl Drop for IoQueue {
    fn drop(&mut self) {
        self.close();
    }
}

fn dispatch_loop(
    fq: Arc<FairQueue>,
    signal_rx: Receiver<()>,
    ready_rx: Receiver<Sender<Request>>,
    done_rx: Receiver<()>,
) {
    debug!("IO dispatch loop started");
    let mut draining = false;
    loop {
        if !draining {
            select! {
                recv(signal_rx) -> msg => {
                    if msg.is_err() {
                        break;
                    }
                    draining = true;
                }
                recv(done_rx) -> _msg => break,
            }
        }
        if matches!(done_rx.try_recv(), Ok(()) | Err(TryRecvError::Disconnected)) {
            break;
        }
        let (req, empty) = fq.dequeue();
        if let Some(req) = req {
            dispatch_one(req, &ready_rx, &done_rx);
        }
        draining = !empty;
    }
    debug!("IO dispatch loop stopped");
}

fn dispatch_one(req: Request, ready_rx: &Receiver<Sender<Request>>, done_rx: &Receiver<()>) {
    select! {
        recv(ready_rx) -> slot => match slot {
            Ok(job_tx) => {
                // The send loses only to a shutdown that got there first;
                // the descriptor must still resolve.
                if let Err(err) = job_tx.send(req) {
                    err.into_inner().fail(QueueError::Closed);
                }
            }
            Err(_) => req.fail(QueueError::Closed),
        },
        recv(done_rx) -> _msg => req.fail(QueueError::Closed),
    }
}
