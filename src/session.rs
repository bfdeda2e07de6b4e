use futures::stream::{self, StreamExt};
use rand::Rng;
use reqwest::Client;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::client::apply_format_headers;
use crate::error::{DownloadError, Result};
use crate::types::{BACKOFF_BASE, BACKOFF_CAP, ChunkSpec, DownloadPlan, FetchStrategy, Headers, SessionOutcome};

/// Owns the output file handle, the shared progress counters, and the
/// cancellation signal for one download. Created
/// at the start of a single download and dropped once every chunk reaches
/// `Done`, any chunk reaches `Failed`, or cancellation fires.
pub struct DownloadSession {
    client: Client,
    url: String,
    headers: Headers,
    output_path: PathBuf,
    plan: DownloadPlan,
    cancel: CancellationToken,
    bytes_written: Arc<AtomicU64>,
    /// Set by the first worker to successfully flush any byte; guards the
    /// `200`-instead-of-`206` downgrade race.
    any_byte_written: Arc<AtomicBool>,
    /// Set once a worker has claimed the single-stream takeover after an
    /// unexpected `200`.
    downgraded: Arc<AtomicBool>,
}

impl DownloadSession {
    pub fn new(client: Client, url: String, headers: Headers, output_path: PathBuf, plan: DownloadPlan) -> Self {
        DownloadSession {
            client,
            url,
            headers,
            output_path,
            plan,
            cancel: CancellationToken::new(),
            bytes_written: Arc::new(AtomicU64::new(0)),
            any_byte_written: Arc::new(AtomicBool::new(false)),
            downgraded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared cancellation handle an embedder can fire (e.g. on Ctrl-C)
    /// without the core depending on a signal-handling crate.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared byte counter the progress reporter reads.
    pub fn bytes_written_handle(&self) -> Arc<AtomicU64> {
        self.bytes_written.clone()
    }

    /// Runs the session to completion. Returns `Ok` only once every
    /// planned chunk has reached `Done`.
    #[instrument(skip(self), fields(url = %self.url, output = ?self.output_path))]
    pub async fn run(&self) -> Result<SessionOutcome> {
        let start = Instant::now();
        let file = Arc::new(presize_file(&self.output_path, self.plan.total_bytes).await?);

        let result = match self.plan.strategy {
            FetchStrategy::ParallelRange => self.run_parallel(file.clone()).await,
            FetchStrategy::SingleStream => self.run_single_stream(file.clone(), 0).await,
        };

        let elapsed = start.elapsed();
        let bytes_written = self.bytes_written.load(Ordering::Relaxed);

        result.map(|_| SessionOutcome {
            output_path: self.output_path.clone(),
            bytes_written,
            elapsed,
            average_speed_bytes_per_sec: if elapsed.as_secs_f64() > 0.0 {
                bytes_written as f64 / elapsed.as_secs_f64()
            } else {
                0.0
            },
        })
    }

    async fn run_parallel(&self, file: Arc<File>) -> Result<()> {
        let worker_count = self.plan.worker_count.max(1);
        let mut in_flight = stream::iter(self.plan.chunks.clone())
            .map(|chunk| {
                let file = file.clone();
                async move { self.download_chunk_with_retry(&chunk, file).await }
            })
            .buffer_unordered(worker_count);

        // React to each chunk result as it arrives rather than collecting
        // the whole stream first: a `collect()` can't return until every
        // chunk (including its own retries and backoff sleeps) has already
        // finished, so cancelling afterwards leaves nothing left to cancel.
        // Firing `cancel` as soon as the first failure is observed lets
        // every other still-running chunk see it on its next check.
        let mut first_error = None;
        while let Some(result) = in_flight.next().await {
            if let Err(err) = result {
                error!(error = %err, "chunk failed after exhausting retry budget, cancelling session");
                self.cancel.cancel();
                first_error = Some(err);
                break;
            }
        }

        if let Some(err) = first_error {
            // Keep draining so every remaining worker observes the
            // cancellation and exits before the output file handle is
            // released, rather than being silently dropped mid-request.
            while in_flight.next().await.is_some() {}
            return Err(err);
        }

        Ok(())
    }

    #[instrument(skip(self, file), fields(chunk = chunk.index))]
    async fn download_chunk_with_retry(&self, chunk: &ChunkSpec, file: Arc<File>) -> Result<()> {
        let mut last_error = DownloadError::Other("no attempts made".to_string());

        for attempt in 1..=self.plan.retry_budget {
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            if self.downgraded.load(Ordering::Acquire) {
                // A sibling already claimed the single-stream takeover;
                // this chunk's bytes will be covered by that fetch.
                return Ok(());
            }

            match self.download_chunk_once(chunk, &file).await {
                Ok(()) => return Ok(()),
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    last_error = err;
                    if attempt >= self.plan.retry_budget {
                        break;
                    }
                    let backoff = backoff_delay(attempt);
                    warn!(
                        chunk = chunk.index,
                        attempt,
                        error = %last_error,
                        backoff_ms = backoff.as_millis() as u64,
                        "chunk failed, retrying after backoff"
                    );
                    sleep(backoff).await;
                }
            }
        }

        error!(chunk = chunk.index, "chunk failed after all retries");
        Err(last_error)
    }

    async fn download_chunk_once(&self, chunk: &ChunkSpec, file: &Arc<File>) -> Result<()> {
        let range = format!("bytes={}-{}", chunk.start, chunk.end - 1);
        let builder = apply_format_headers(self.client.get(&self.url), &self.headers, Some(&range));
        let resp = self.send_cancellable(builder).await?;
        let status = resp.status();

        if status.as_u16() == 206 {
            return self.stream_to_offset(resp, file.clone(), chunk.start, chunk.len()).await;
        }

        if status.as_u16() == 200 {
            return self.handle_range_ignored(resp, file.clone()).await;
        }

        Err(DownloadError::from_status(status, "unexpected status for ranged GET"))
    }

    /// A `200 OK` instead of `206` means the server
    /// ignored the `Range` header. Downgrades the whole session to
    /// `single_stream`, but only if no worker has written a byte yet.
    async fn handle_range_ignored(&self, resp: reqwest::Response, file: Arc<File>) -> Result<()> {
        if self.any_byte_written.load(Ordering::Acquire) {
            return Err(DownloadError::Other(
                "server ignored Range after another worker already wrote bytes".to_string(),
            ));
        }
        if self
            .downgraded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another worker already claimed the takeover; let it proceed.
            return Ok(());
        }
        debug!("range request was ignored by the server, downgrading to single_stream");
        self.stream_to_offset(resp, file, 0, u64::MAX).await
    }

    async fn run_single_stream(&self, file: Arc<File>, start_offset: u64) -> Result<()> {
        let builder = apply_format_headers(self.client.get(&self.url), &self.headers, None);
        let resp = self.send_cancellable(builder).await?;
        if !resp.status().is_success() {
            return Err(DownloadError::from_status(resp.status(), "single_stream GET failed"));
        }
        self.stream_to_offset(resp, file, start_offset, u64::MAX).await
    }

    /// Races a request send against the cancellation signal so a worker
    /// blocked waiting on connection/headers is also interruptible, not
    /// just the body-read loop: a stalled socket is a suspension point
    /// regardless of which phase of the response it is in.
    async fn send_cancellable(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            result = builder.send() => Ok(result?),
        }
    }

    /// Streams a response body through a `read_buffer`-sized buffer,
    /// positional-writing each flush at `start + bytes_read_so_far` and
    /// only adding to `bytes_written` after a successful flush. `max_len`
    /// bounds a single ranged chunk; `u64::MAX` means "until the stream
    /// ends" for single-stream fetches.
    async fn stream_to_offset(&self, resp: reqwest::Response, file: Arc<File>, start: u64, max_len: u64) -> Result<()> {
        let mut stream = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::with_capacity(self.plan.read_buffer);
        let mut written_in_chunk = 0u64;

        // A failed attempt must not leave its partial bytes counted in the
        // shared total, or a retry double-counts them. Every
        // error exit below rolls back exactly what this attempt added.
        macro_rules! fail {
            ($err:expr) => {{
                if written_in_chunk > 0 {
                    self.bytes_written.fetch_sub(written_in_chunk, Ordering::Relaxed);
                }
                return Err($err);
            }};
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => fail!(DownloadError::Cancelled),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = next else { break };
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => fail!(DownloadError::from(e)),
            };
            buffer.extend_from_slice(&bytes);

            while buffer.len() >= self.plan.read_buffer {
                let take = self.plan.read_buffer.min(buffer.len());
                let flush: Vec<u8> = buffer.drain(..take).collect();
                let offset = start + written_in_chunk;
                if let Err(e) = write_all_at_async(file.clone(), flush, offset).await {
                    fail!(e);
                }
                written_in_chunk += take as u64;
                self.bytes_written.fetch_add(take as u64, Ordering::Relaxed);
                self.any_byte_written.store(true, Ordering::Release);
            }

            if written_in_chunk >= max_len {
                break;
            }
        }

        if !buffer.is_empty() {
            let take = buffer.len() as u64;
            if let Err(e) = write_all_at_async(file, buffer, start + written_in_chunk).await {
                fail!(e);
            }
            self.bytes_written.fetch_add(take, Ordering::Relaxed);
            self.any_byte_written.store(true, Ordering::Release);
        }

        Ok(())
    }
}

/// Pre-sizes the output file to `total_bytes` before any worker starts, so
/// every positional write targets pre-allocated space. When the
/// length is unknown the file is simply created/truncated.
async fn presize_file(path: &Path, total_bytes: Option<u64>) -> Result<File> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .truncate(true)
            .open(&path)?;
        if let Some(total) = total_bytes {
            file.set_len(total)?;
        }
        Ok(file)
    })
    .await
    .map_err(|e| DownloadError::Other(e.to_string()))?
    .map_err(DownloadError::from)
}

/// Positional write that does not mutate any shared file pointer, run on
/// a blocking thread since the underlying syscall is synchronous.
async fn write_all_at_async(file: Arc<File>, buf: Vec<u8>, position: u64) -> Result<()> {
    tokio::task::spawn_blocking(move || write_all_at(&file, &buf, position))
        .await
        .map_err(|e| DownloadError::Other(e.to_string()))?
        .map_err(DownloadError::from)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], position: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, position)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut position: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let written = file.seek_write(buf, position)?;
        if written == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "failed to write chunk data"));
        }
        buf = &buf[written..];
        position += written as u64;
    }
    Ok(())
}

/// Exponential backoff with base 1s, doubling per attempt, capped at 30s,
/// with ±20% jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
    let capped = exp.min(BACKOFF_CAP.as_millis() as u64);
    let jitter_factor = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((capped as f64 * jitter_factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let d1 = backoff_delay(1).as_millis();
        let d2 = backoff_delay(2).as_millis();
        let d5 = backoff_delay(5).as_millis();
        assert!((800..=1200).contains(&d1));
        assert!((1600..=2400).contains(&d2));
        // 2^4 * 1000ms = 16000ms, well under the 30s cap.
        assert!(d5 <= 30_000 + 6_000);
    }

    #[test]
    fn backoff_never_exceeds_cap_plus_jitter() {
        for attempt in 1..20 {
            let d = backoff_delay(attempt).as_millis();
            assert!(d <= 36_000);
        }
    }
}
