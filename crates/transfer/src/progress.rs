use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::session::{Role, TransferState};

// ---------------------------------------------------------------------------
// Throughput
// ---------------------------------------------------------------------------

/// Average rate since an anchor point.
///
/// The anchor is re-set whenever a transfer starts or resumes, so the rate
/// only counts bytes moved in the current run.
#[derive(Debug, Clone, Copy)]
pub struct Throughput {
    anchor: Instant,
    base: u64,
}

impl Throughput {
    /// Anchors at `now` with `base` bytes already on the destination.
    pub fn start(base: u64) -> Self {
        Self {
            anchor: Instant::now(),
            base,
        }
    }

    /// Bytes per second moved since the anchor.
    ///
    /// Returns 0.0 until time has elapsed.
    pub fn bytes_per_second(&self, transferred: u64) -> f64 {
        self.rate_at(transferred, self.anchor.elapsed())
    }

    /// Estimated time to reach `total`. `None` while the rate is zero.
    pub fn eta(&self, transferred: u64, total: u64) -> Option<Duration> {
        let speed = self.bytes_per_second(transferred);
        if speed <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(transferred);
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }

    fn rate_at(&self, transferred: u64, elapsed: Duration) -> f64 {
        if elapsed.is_zero() {
            return 0.0;
        }
        transferred.saturating_sub(self.base) as f64 / elapsed.as_secs_f64()
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of a transfer session.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub session_id: Uuid,
    pub role: Role,
    pub state: TransferState,
    pub file_name: String,
    /// Source path when sending, destination path when receiving.
    pub file_path: PathBuf,
    pub transferred_size: u64,
    pub file_size: u64,
    /// Bytes per second.
    pub speed: f64,
    /// Time left at the current speed; `None` until bytes are moving.
    pub eta: Option<Duration>,
    pub peer: Option<SocketAddr>,
    /// Failure reason once the session has moved to `Error`.
    pub error: Option<String>,
}

impl Progress {
    /// Completed fraction in `[0.0, 1.0]`; zero for an empty file.
    pub fn fraction(&self) -> f64 {
        if self.file_size == 0 {
            return 0.0;
        }
        (self.transferred_size as f64 / self.file_size as f64).min(1.0)
    }

    /// Completed percentage in `[0.0, 100.0]`.
    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }
}
