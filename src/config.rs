//! Mountpoint description and the admission budgets derived from it.

use serde::{Deserialize, Serialize};

/// Scaling base for request accounting. One read request counts as this many
/// units, so write-to-read cost ratios stay in integer math: a write that is
/// 30% more expensive than a read is accounted as `128 * 130 / 100`.
pub const READ_REQUEST_BASE_COUNT: u64 = 128;

/// Decay constant for accumulated class cost, in milliseconds.
pub const DEFAULT_TAU: f64 = 100_000.0;

/// Rate value meaning "unknown"; budgets derived from it stay unlimited.
pub const UNBOUNDED: u64 = u64::MAX;

/// Measured capabilities of one mounted device. Rates are per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mountpoint {
    pub path: String,
    pub read_bytes_rate: u64,
    pub write_bytes_rate: u64,
    pub write_req_rate: u64,
    pub read_req_rate: u64,
    pub num_io_queues: u64,
}

impl Default for Mountpoint {
    fn default() -> Self {
        Self {
            path: "undefined".to_string(),
            read_bytes_rate: UNBOUNDED,
            write_bytes_rate: UNBOUNDED,
            write_req_rate: UNBOUNDED,
            read_req_rate: UNBOUNDED,
            num_io_queues: 1,
        }
    }
}

/// Cost multipliers and budgets derived from a [`Mountpoint`].
#[derive(Debug, Clone)]
pub struct IoQueueConfig {
    pub mountpoint: String,
    pub disk_bytes_write_to_read_multiplier: u64,
    pub disk_req_write_to_read_multiplier: u64,
    pub max_bytes_count: u64,
    pub max_req_count: u64,
}

fn write_to_read_multiplier(read_rate: u64, write_rate: u64) -> u64 {
    // Degenerate rates would divide by zero or overflow; treat both
    // directions as equally expensive instead.
    if read_rate == 0 || write_rate == 0 || read_rate == UNBOUNDED || write_rate == UNBOUNDED {
        return READ_REQUEST_BASE_COUNT;
    }
    READ_REQUEST_BASE_COUNT.saturating_mul(read_rate) / write_rate
}

impl IoQueueConfig {
    pub fn from_mountpoint(mp: &Mountpoint) -> Self {
        let queues = mp.num_io_queues.max(1);
        let max_bandwidth = mp.read_bytes_rate.max(mp.write_bytes_rate);
        let max_iops = mp.read_req_rate.max(mp.write_req_rate);

        let max_bytes_count = if max_bandwidth == UNBOUNDED {
            UNBOUNDED
        } else {
            READ_REQUEST_BASE_COUNT.saturating_mul(max_bandwidth / queues)
        };
        let max_req_count = if max_iops == UNBOUNDED {
            UNBOUNDED
        } else {
            READ_REQUEST_BASE_COUNT.saturating_mul(max_iops / queues)
        };

        Self {
            mountpoint: mp.path.clone(),
            disk_bytes_write_to_read_multiplier: write_to_read_multiplier(
                mp.read_bytes_rate,
                mp.write_bytes_rate,
            ),
            disk_req_write_to_read_multiplier: write_to_read_multiplier(
                mp.read_req_rate,
                mp.write_req_rate,
            ),
            max_bytes_count,
            max_req_count,
        }
    }
}

/// Tunables for the fair queue itself.
#[derive(Debug, Clone, Copy)]
pub struct FairQueueConfig {
    pub max_req_count: u64,
    pub max_bytes_count: u64,
    /// Decay constant in milliseconds.
    pub tau: f64,
}

impl FairQueueConfig {
    pub fn from_io_config(cfg: &IoQueueConfig) -> Self {
        Self {
            max_req_count: cfg.max_req_count,
            max_bytes_count: cfg.max_bytes_count,
            tau: DEFAULT_TAU,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_multipliers_and_budgets_from_rates() {
        let mp = Mountpoint {
            path: "/disk1".to_string(),
            read_bytes_rate: 100,
            write_bytes_rate: 100,
            write_req_rate: 10,
            read_req_rate: 20,
            num_io_queues: 1,
        };
        let cfg = IoQueueConfig::from_mountpoint(&mp);

        assert_eq!(cfg.mountpoint, "/disk1");
        assert_eq!(cfg.disk_bytes_write_to_read_multiplier, 128);
        assert_eq!(cfg.disk_req_write_to_read_multiplier, 256);
        assert_eq!(cfg.max_bytes_count, 12_800);
        assert_eq!(cfg.max_req_count, 2_560);
    }

    #[test]
    fn unknown_rates_stay_unbounded() {
        let cfg = IoQueueConfig::from_mountpoint(&Mountpoint::default());

        assert_eq!(cfg.mountpoint, "undefined");
        assert_eq!(cfg.disk_bytes_write_to_read_multiplier, READ_REQUEST_BASE_COUNT);
        assert_eq!(cfg.disk_req_write_to_read_multiplier, READ_REQUEST_BASE_COUNT);
        assert_eq!(cfg.max_bytes_count, UNBOUNDED);
        assert_eq!(cfg.max_req_count, UNBOUNDED);
    }

    #[test]
    fn degenerate_rates_fall_back_to_base_multiplier() {
        let mp = Mountpoint {
            path: "/disk2".to_string(),
            read_bytes_rate: 100,
            write_bytes_rate: 0,
            write_req_rate: UNBOUNDED,
            read_req_rate: 20,
            num_io_queues: 0,
        };
        let cfg = IoQueueConfig::from_mountpoint(&mp);

        assert_eq!(cfg.disk_bytes_write_to_read_multiplier, READ_REQUEST_BASE_COUNT);
        assert_eq!(cfg.disk_req_write_to_read_multiplier, READ_REQUEST_BASE_COUNT);
        // num_io_queues is clamped, so the byte budget still derives.
        assert_eq!(cfg.max_bytes_count, 12_800);
    }

    #[test]
    fn fair_queue_config_carries_budgets_and_default_tau() {
        let mp = Mountpoint {
            path: "/disk1".to_string(),
            read_bytes_rate: 100,
            write_bytes_rate: 100,
            write_req_rate: 10,
            read_req_rate: 20,
            num_io_queues: 1,
        };
        let fq = FairQueueConfig::from_io_config(&IoQueueConfig::from_mountpoint(&mp));

        assert_eq!(fq.max_req_count, 2_560);
        assert_eq!(fq.max_bytes_count, 12_800);
        assert_eq!(fq.tau, DEFAULT_TAU);
    }

    #[test]
    fn mountpoint_round_trips_through_serde() {
        let mp = Mountpoint {
            path: "/data/nvme0".to_string(),
            read_bytes_rate: 2_000_000_000,
            write_bytes_rate: 1_000_000_000,
            write_req_rate: 400_000,
            read_req_rate: 800_000,
            num_io_queues: 4,
        };
        let json = serde_json::to_string(&mp).unwrap();
        let back: Mountpoint = serde_json::from_str(&json).unwrap();

        assert_eq!(back.path, mp.path);
        assert_eq!(back.num_io_queues, 4);
        assert_eq!(back.read_bytes_rate, 2_000_000_000);
    }
}
