use std::path::PathBuf;
use std::time::Duration;

/// Default chunk size for parallel range requests: 16 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024 * 1024;
/// Default worker pool size.
pub const DEFAULT_WORKER_COUNT: usize = 8;
/// Default per-worker read buffer: 128 KiB.
pub const DEFAULT_READ_BUFFER: usize = 128 * 1024;
/// Default retry budget per chunk.
pub const DEFAULT_RETRY_BUDGET: u32 = 5;
/// Backoff base delay.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Backoff cap.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Progress reporter tick cadence.
pub const PROGRESS_TICK: Duration = Duration::from_millis(100);
/// EMA smoothing factor applied to new speed samples.
pub const SPEED_EMA_FACTOR: f64 = 0.3;

/// A single request header to inject on every fetch for a format.
///
/// Kept as an ordered `Vec` rather than a `HashMap` so the precedence
/// merge in `client::apply_format_headers` is deterministic and so a
/// format can legally repeat a header name (e.g. multiple `Cookie`
/// fragments) without a map silently dropping one.
pub type Headers = Vec<(String, String)>;

/// What an extractor hands back for one URL: a directly fetchable media
/// URL plus everything the core needs to fetch it. Immutable for the
/// lifetime of a download.
#[derive(Debug, Clone)]
pub struct ResolvedFormat {
    pub url: String,
    pub extension_hint: String,
    /// Present when audio and video are delivered as separate streams
    /// that must be merged by the assembler after both complete.
    pub companion_url: Option<String>,
    pub headers: Headers,
}

impl ResolvedFormat {
    pub fn new(url: impl Into<String>, extension_hint: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            extension_hint: extension_hint.into(),
            companion_url: None,
            headers: Vec::new(),
        }
    }

    pub fn with_companion(mut self, companion_url: impl Into<String>) -> Self {
        self.companion_url = Some(companion_url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Recommended fetch strategy from the capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    ParallelRange,
    SingleStream,
}

/// A half-open byte range `[start, end)` planned for one ranged GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkSpec {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Lifecycle state of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// Produced once per download by the chunk planner.
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub total_bytes: Option<u64>,
    pub strategy: FetchStrategy,
    pub chunk_size: u64,
    pub worker_count: usize,
    pub read_buffer: usize,
    pub retry_budget: u32,
    pub chunks: Vec<ChunkSpec>,
}

impl DownloadPlan {
    /// Asserts the partition invariant: chunks cover `[0, total_bytes)`
    /// exactly, pairwise disjoint, in order.
    #[cfg(debug_assertions)]
    pub fn assert_partition_invariant(&self) {
        let Some(total) = self.total_bytes else {
            assert!(self.chunks.is_empty());
            return;
        };
        if self.strategy == FetchStrategy::SingleStream {
            assert!(self.chunks.is_empty());
            return;
        }
        let mut expected_start = 0u64;
        for chunk in &self.chunks {
            assert_eq!(chunk.start, expected_start);
            assert!(chunk.end > chunk.start);
            assert!(chunk.len() <= self.chunk_size);
            expected_start = chunk.end;
        }
        assert_eq!(expected_start, total);
    }
}

/// Point-in-time readout published by the progress reporter.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub bytes_written: u64,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: f64,
    pub elapsed: Duration,
    pub eta: Option<Duration>,
    /// Set on the final snapshot of a session that did not complete
    /// successfully, so a UI can distinguish completion from failure
    /// without polling separate state.
    pub terminal_error: bool,
}

/// Result of a completed (or failed/cancelled) `DownloadSession`.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub output_path: PathBuf,
    pub bytes_written: u64,
    pub elapsed: Duration,
    pub average_speed_bytes_per_sec: f64,
}
