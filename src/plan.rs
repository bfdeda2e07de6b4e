use crate::probe::ProbeResult;
use crate::types::{ChunkSpec, DownloadPlan, FetchStrategy};

/// Planner configuration the caller may override from the built-in defaults.
#[derive(Debug, Clone, Copy)]
pub struct PlanConfig {
    pub chunk_size: u64,
    pub worker_count: usize,
    pub read_buffer: usize,
    pub retry_budget: u32,
}

impl Default for PlanConfig {
    fn default() -> Self {
        PlanConfig {
            chunk_size: crate::types::DEFAULT_CHUNK_SIZE,
            worker_count: crate::types::DEFAULT_WORKER_COUNT,
            read_buffer: crate::types::DEFAULT_READ_BUFFER,
            retry_budget: crate::types::DEFAULT_RETRY_BUDGET,
        }
    }
}

/// Produces the download plan from a probe result.
///
/// `SingleStream` or unknown length yields an empty chunk list; otherwise
/// `[0, total_bytes)` is partitioned into `chunk_size`-sized half-open
/// intervals, the last one possibly shorter.
pub fn plan_from_probe(probe: ProbeResult, config: PlanConfig) -> DownloadPlan {
    let chunks = match (probe.strategy, probe.total_bytes) {
        (FetchStrategy::ParallelRange, Some(total)) => split_into_chunks(total, config.chunk_size),
        _ => Vec::new(),
    };

    let plan = DownloadPlan {
        total_bytes: probe.total_bytes,
        strategy: probe.strategy,
        chunk_size: config.chunk_size,
        worker_count: config.worker_count,
        read_buffer: config.read_buffer,
        retry_budget: config.retry_budget,
        chunks,
    };

    #[cfg(debug_assertions)]
    plan.assert_partition_invariant();

    plan
}

fn split_into_chunks(total_bytes: u64, chunk_size: u64) -> Vec<ChunkSpec> {
    if total_bytes == 0 {
        return Vec::new();
    }
    let mut chunks = Vec::with_capacity((total_bytes / chunk_size + 1) as usize);
    let mut start = 0u64;
    let mut index = 0usize;
    while start < total_bytes {
        let end = (start + chunk_size).min(total_bytes);
        chunks.push(ChunkSpec { index, start, end });
        start = end;
        index += 1;
    }
    chunks
}
