//! Pull-based worker pool.
//!
//! Workers never share a job queue. Each one offers a single-job channel to
//! the dispatcher through the shared `ready` channel and then waits on it, so
//! a job is only ever sent to a worker that asked for one.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, warn};

use crate::metrics::QueueMetrics;
use crate::request::Request;

pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        count: usize,
        ready_tx: Sender<Sender<Request>>,
        done_rx: Receiver<()>,
        metrics: Arc<dyn QueueMetrics>,
    ) -> Self {
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let ready_tx = ready_tx.clone();
            let done_rx = done_rx.clone();
            let metrics = Arc::clone(&metrics);
            let handle = thread::Builder::new()
                .name(format!("IO-Worker-{}", i))
                .spawn(move || run(i, ready_tx, done_rx, metrics))
                .expect("failed to spawn IO worker thread");
            handles.push(handle);
        }
        Self { handles }
    }

    pub(crate) fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("IO worker exited by panic");
            }
        }
    }
}

fn run(
    worker: usize,
    ready_tx: Sender<Sender<Request>>,
    done_rx: Receiver<()>,
    metrics: Arc<dyn QueueMetrics>,
) {
    debug!(worker, "IO worker started");
    let (job_tx, job_rx) = bounded::<Request>(1);
    loop {
        // Re-register for the next job. Failure means the dispatcher is gone.
        if ready_tx.send(job_tx.clone()).is_err() {
            break;
        }
        select! {
            recv(job_rx) -> job => {
                let Ok(req) = job else { break };
                run_one(req, &*metrics);
            }
            recv(done_rx) -> _msg => {
                // A job can race the shutdown signal through the rendezvous.
                // It was already promised a worker, so run it.
                if let Ok(req) = job_rx.try_recv() {
                    run_one(req, &*metrics);
                }
                break;
            }
        }
    }
    debug!(worker, "IO worker stopped");
}

fn run_one(req: Request, metrics: &dyn QueueMetrics) {
    let rtype = req.rtype();
    let bytes = req.request_size();
    let start = Instant::now();
    req.execute();
    metrics.request_completed(rtype, start.elapsed(), bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRecorder;
    use crate::request::RequestType;

    #[test]
    fn worker_runs_jobs_it_pulled() {
        let (ready_tx, ready_rx) = bounded(1);
        let (done_tx, done_rx) = bounded::<()>(0);
        let recorder = Arc::new(MetricsRecorder::new());
        let pool = WorkerPool::spawn(
            1,
            ready_tx,
            done_rx,
            Arc::clone(&recorder) as Arc<dyn QueueMetrics>,
        );

        let (probe_tx, probe_rx) = bounded(1);
        let (req, future) = Request::new(
            RequestType::Write,
            4096,
            1,
            1,
            Box::new(move || {
                let _ = probe_tx.send(());
            }),
        );

        let job_tx = ready_rx.recv().unwrap();
        job_tx.send(req).unwrap();

        assert_eq!(future.done(), Ok(()));
        assert!(probe_rx.try_recv().is_ok());

        drop(done_tx);
        pool.join();
        // Joined, so the completion hook has definitely fired.
        assert_eq!(recorder.snapshot().writes_completed, 1);
    }

    #[test]
    fn shutdown_still_runs_a_job_already_handed_over() {
        let (ready_tx, ready_rx) = bounded(1);
        let (done_tx, done_rx) = bounded::<()>(0);
        let pool = WorkerPool::spawn(1, ready_tx, done_rx, Arc::new(crate::metrics::NoopMetrics));

        let (req, future) = Request::new(RequestType::Read, 1, 1, 1, Box::new(|| {}));

        // Hand the job over first, then signal shutdown. Whichever event the
        // worker observes first, the job must still complete.
        let job_tx = ready_rx.recv().unwrap();
        job_tx.send(req).unwrap();
        drop(done_tx);

        assert_eq!(future.done(), Ok(()));
        pool.join();
    }
}
