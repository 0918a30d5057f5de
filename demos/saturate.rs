// Saturation demo for the fair IO queue.
// Three priority classes flood one queue with simulated device writes; the
// interim progress lines show service tracking the 1:2:6 share ratio while
// the backlog lasts, and the final JSON snapshot sums up the run.
//
//   RUST_LOG=debug cargo run --example saturate -- --requests=30000

use std::env;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use fairio::{IoQueue, MetricsRecorder, Mountpoint, QueueMetrics, RequestType};

const CLASSES: &[(&str, u32)] = &[("background", 100), ("online", 200), ("critical", 600)];

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(env_filter).try_init();
}

fn main() {
    init_tracing();

    let mut requests_per_class: u64 = 20_000;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if let Some((key, value)) = arg.split_once('=') {
            if key == "--requests" {
                if let Ok(n) = value.parse::<u64>() {
                    requests_per_class = n.max(1);
                }
            }
        }
    }

    let recorder = Arc::new(MetricsRecorder::new());
    let q = Arc::new(IoQueue::with_metrics(
        &Mountpoint {
            path: "/demo".to_string(),
            read_bytes_rate: 2_000_000,
            write_bytes_rate: 1_000_000,
            write_req_rate: 200_000,
            read_req_rate: 400_000,
            num_io_queues: 2,
        },
        Arc::clone(&recorder) as Arc<dyn QueueMetrics>,
    ));

    let counters: Vec<Arc<AtomicU64>> =
        CLASSES.iter().map(|_| Arc::new(AtomicU64::new(0))).collect();
    for (name, shares) in CLASSES {
        q.register_priority_class(name, *shares);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let reporter = {
        let q = Arc::clone(&q);
        let stop = Arc::clone(&stop);
        let counters = counters.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(500));
                let served: Vec<String> = CLASSES
                    .iter()
                    .zip(counters.iter())
                    .map(|((name, _), counter)| {
                        format!("{}={}", name, counter.load(Ordering::Relaxed))
                    })
                    .collect();
                info!(pending = q.pending(), served = %served.join(" "), "progress");
            }
        })
    };

    let start = Instant::now();
    let mut producers = Vec::new();
    for (idx, (name, _shares)) in CLASSES.iter().enumerate() {
        let q = Arc::clone(&q);
        let counter = Arc::clone(&counters[idx]);
        let name = *name;
        producers.push(thread::spawn(move || {
            let mut futures = Vec::with_capacity(requests_per_class as usize);
            for _ in 0..requests_per_class {
                let counter = Arc::clone(&counter);
                let future = q
                    .queue_request(name, 4096, RequestType::Write, move || {
                        // Stand-in for device latency; keeps a backlog alive
                        // so the fair queue decides the service order.
                        thread::sleep(Duration::from_micros(50));
                        counter.fetch_add(1, Ordering::Relaxed);
                    })
                    .expect("admission failed");
                futures.push(future);
            }
            for future in futures {
                future.done().expect("request cancelled");
            }
        }));
    }

    for producer in producers {
        producer.join().expect("producer panicked");
    }
    stop.store(true, Ordering::Relaxed);
    let _ = reporter.join();
    q.close();

    let elapsed = start.elapsed();
    info!(
        ?elapsed,
        total = requests_per_class * CLASSES.len() as u64,
        "all requests serviced"
    );

    let snapshot = recorder.snapshot();
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).expect("snapshot serializes")
    );
}
