use indicatif::ProgressStyle;
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::interval;

use crate::types::{PROGRESS_TICK, ProgressSnapshot, SPEED_EMA_FACTOR};

/// Publishes immutable `ProgressSnapshot` values on a `watch` channel at a
/// fixed cadence.
/// The reporter is UI-agnostic: it knows nothing about `indicatif` or any
/// other renderer, it just reads the shared counter and does the math.
pub struct ProgressReporter {
    sender: watch::Sender<ProgressSnapshot>,
    handle: tokio::task::JoinHandle<()>,
}

impl ProgressReporter {
    /// Spawns the tick loop and returns the reporter plus a subscribable
    /// receiver. `bytes_written` is the same counter the fetch engine
    /// increments.
    pub fn spawn(
        total_bytes: Option<u64>,
        bytes_written: Arc<AtomicU64>,
    ) -> (Self, watch::Receiver<ProgressSnapshot>) {
        let start_time = Instant::now();
        let initial = ProgressSnapshot {
            bytes_written: 0,
            total_bytes,
            speed_bytes_per_sec: 0.0,
            elapsed: Duration::ZERO,
            eta: None,
            terminal_error: false,
        };
        let (sender, receiver) = watch::channel(initial);
        let tick_sender = sender.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(PROGRESS_TICK);
            let mut last_bytes = 0u64;
            let mut last_tick = start_time;
            let mut smoothed_speed = 0.0f64;

            loop {
                ticker.tick().await;
                let now = Instant::now();
                let current = bytes_written.load(Ordering::Relaxed);
                let dt = now.duration_since(last_tick).as_secs_f64().max(1e-6);
                let instantaneous = (current.saturating_sub(last_bytes)) as f64 / dt;
                smoothed_speed = SPEED_EMA_FACTOR * instantaneous + (1.0 - SPEED_EMA_FACTOR) * smoothed_speed;

                let eta = total_bytes.and_then(|total| {
                    if smoothed_speed <= 0.0 {
                        return None;
                    }
                    let remaining = total.saturating_sub(current) as f64;
                    Some(Duration::from_secs_f64(remaining / smoothed_speed))
                });

                let snapshot = ProgressSnapshot {
                    bytes_written: current,
                    total_bytes,
                    speed_bytes_per_sec: smoothed_speed,
                    elapsed: now.duration_since(start_time),
                    eta,
                    terminal_error: false,
                };

                if tick_sender.send(snapshot).is_err() {
                    break;
                }

                last_bytes = current;
                last_tick = now;

                if total_bytes.is_some_and(|total| current >= total) {
                    break;
                }
            }
        });

        (Self { sender, handle }, receiver)
    }

    /// Emits one last snapshot and stops the tick loop. Final average
    /// speed is `total_bytes / elapsed`, rather than the EMA-smoothed
    /// instantaneous figure.
    pub async fn finish(self, bytes_written: u64, total_bytes: Option<u64>, elapsed: Duration, terminal_error: bool) {
        self.handle.abort();
        let average_speed = if elapsed.as_secs_f64() > 0.0 {
            bytes_written as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let _ = self.sender.send(ProgressSnapshot {
            bytes_written,
            total_bytes,
            speed_bytes_per_sec: average_speed,
            elapsed,
            eta: Some(Duration::ZERO),
            terminal_error,
        });
    }
}

/// Creates a configured progress bar style for downloads.
///
/// Format: `Spinner [Elapsed] [Bar] Bytes/Total (Speed, ETA)`.
pub fn style_download_bar() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        .unwrap()
        .progress_chars("#>-")
}

/// Creates a spinner style for indeterminate states (e.g. muxing).
pub fn style_spinner() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .unwrap()
}

/// Formats bytes into human-readable strings (KB, MB, GB).
pub fn format_bytes(bytes: u64) -> Cow<'static, str> {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64).into()
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64).into()
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64).into()
    } else {
        format!("{bytes} B").into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_monotone_snapshots_until_total_reached() {
        let counter = Arc::new(AtomicU64::new(0));
        let (reporter, mut rx) = ProgressReporter::spawn(Some(1024), counter.clone());

        counter.store(512, Ordering::Relaxed);
        rx.changed().await.unwrap();
        let first = *rx.borrow();
        assert_eq!(first.bytes_written, 512);

        counter.store(1024, Ordering::Relaxed);
        rx.changed().await.unwrap();
        let second = *rx.borrow();
        assert_eq!(second.bytes_written, 1024);

        reporter
            .finish(1024, Some(1024), Duration::from_secs(1), false)
            .await;
        let last = *rx.borrow();
        assert!(!last.terminal_error);
        assert_eq!(last.bytes_written, 1024);
    }

    #[test]
    fn format_bytes_picks_the_right_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }
}
