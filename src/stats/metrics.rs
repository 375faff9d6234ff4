//! Statistics and metrics for inputs and connections

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::input::InputPhase;
use crate::media::MediaType;
use crate::route::Protocol;
use crate::sync::lock;

/// Byte counter that is read and reset atomically to produce a bytes/second figure
///
/// Each reader and each connection owns its own sample. Reading the rate
/// restarts the measurement window.
#[derive(Debug)]
pub struct RateSample {
    count: AtomicU64,
    since: Mutex<Instant>,
}

impl RateSample {
    /// Create a new sample starting now
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            since: Mutex::new(Instant::now()),
        }
    }

    /// Account for `bytes` transferred
    pub fn add(&self, bytes: usize) {
        self.count.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Bytes per second since the previous call, resetting the sample
    pub fn take_rate(&self) -> f64 {
        let mut since = lock(&self.since);
        let now = Instant::now();
        let elapsed = now.duration_since(*since);
        let count = self.count.swap(0, Ordering::Relaxed);
        *since = now;
        rate_per_second(count, elapsed)
    }
}

impl Default for RateSample {
    fn default() -> Self {
        Self::new()
    }
}

fn rate_per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Snapshot of one end-user connection
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    /// Connection id
    pub id: Uuid,
    /// Client address
    pub peer: Option<SocketAddr>,
    /// Path the client requested
    pub path: String,
    /// Total bytes written to the client
    pub bytes_sent: u64,
    /// Bytes accepted by the private queue but not yet written
    pub buffered: usize,
    /// Connection age
    pub duration: Duration,
}

/// Snapshot of one registered input and its outputs
#[derive(Debug, Clone)]
pub struct InputStats {
    /// Registered path (as given at registration)
    pub path: String,
    /// Input descriptor uuid
    pub uuid: Uuid,
    /// Human readable input name
    pub name: String,
    /// Media type served on this path
    pub media_type: MediaType,
    /// Transport protocol of the input route
    pub protocol: Protocol,
    /// Local address of the input listener, when bound
    pub local_addr: Option<SocketAddr>,
    /// Address of the current source, when known
    pub peer: Option<SocketAddr>,
    /// Lifecycle phase of the input worker
    pub phase: InputPhase,
    /// Frames that did not match the expected format
    pub broken_count: u64,
    /// Input bytes/second
    pub input_rate: f64,
    /// Output bytes/second summed over every connection on the path
    pub output_rate: f64,
    /// Number of attached connections
    pub connection_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_per_second() {
        assert_eq!(rate_per_second(1_000_000, Duration::from_secs(10)), 100_000.0);
    }

    #[test]
    fn test_rate_per_second_zero_duration() {
        assert_eq!(rate_per_second(1_000_000, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_rate_sample_resets_on_read() {
        let sample = RateSample::new();
        sample.add(4096);
        sample.add(4096);
        std::thread::sleep(Duration::from_millis(5));

        let first = sample.take_rate();
        assert!(first > 0.0);

        // Nothing was added since the previous read
        let second = sample.take_rate();
        assert_eq!(second, 0.0);
    }
}
