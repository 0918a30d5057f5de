pub mod class;
pub mod config;
pub mod error;
pub mod fair_queue;
pub mod io_queue;
pub mod metrics;
pub mod request;
mod worker;

// Re-export for easier embedding
pub use class::PriorityClass;
pub use config::{FairQueueConfig, IoQueueConfig, Mountpoint};
pub use error::{QueueError, QueueResult};
pub use fair_queue::FairQueue;
pub use io_queue::IoQueue;
pub use metrics::{MetricsRecorder, MetricsSnapshot, NoopMetrics, QueueMetrics};
pub use request::{IoFuture, Request, RequestType};
