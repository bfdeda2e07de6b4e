use reqwest::{
    Client, Response,
    header::{ACCEPT_RANGES, CONTENT_LENGTH},
};
use tracing::{debug, instrument, trace, warn};

use crate::client::apply_format_headers;
use crate::types::{FetchStrategy, Headers};

/// Outcome of the capability probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    pub total_bytes: Option<u64>,
    pub supports_range: bool,
    pub strategy: FetchStrategy,
}

impl ProbeResult {
    fn unknown_single_stream() -> Self {
        ProbeResult {
            total_bytes: None,
            supports_range: false,
            strategy: FetchStrategy::SingleStream,
        }
    }
}

/// HEADs the target with the format's headers applied; falls back to a
/// ranged `GET bytes=0-0` when HEAD is unhelpful. Never returns an error:
/// probe failure downgrades to `SingleStream` with unknown length rather
/// than failing the caller.
#[instrument(skip(client, headers), fields(url = %url))]
pub async fn probe(client: &Client, url: &str, headers: &Headers, chunk_size: u64) -> ProbeResult {
    match probe_via_head(client, url, headers).await {
        Some(result) => return finalize(result, chunk_size),
        None => debug!("HEAD probe inconclusive, falling back to ranged GET"),
    }

    match probe_via_ranged_get(client, url, headers).await {
        Some(result) => finalize(result, chunk_size),
        None => {
            warn!("probe failed entirely, downgrading to single_stream with unknown length");
            ProbeResult::unknown_single_stream()
        }
    }
}

/// Applies the "`total_bytes > chunk_size`" clause of the `supports_range`
/// definition, which only makes sense once both probe paths have produced
/// a raw `(total, accept_ranges)` pair.
fn finalize(result: (Option<u64>, bool), chunk_size: u64) -> ProbeResult {
    let (total_bytes, accept_ranges) = result;
    let supports_range = accept_ranges
        && total_bytes.is_some_and(|total| total > chunk_size);
    let strategy = if supports_range {
        FetchStrategy::ParallelRange
    } else {
        FetchStrategy::SingleStream
    };
    ProbeResult {
        total_bytes,
        supports_range,
        strategy,
    }
}

async fn probe_via_head(
    client: &Client,
    url: &str,
    headers: &Headers,
) -> Option<(Option<u64>, bool)> {
    let builder = apply_format_headers(client.head(url), headers, None);
    let resp = builder.send().await.ok()?;
    debug!(status = %resp.status(), "HEAD response received");
    trace_headers(&resp);

    if !resp.status().is_success() {
        return None;
    }

    let total = parse_content_length(&resp);
    let accept_ranges = resp
        .headers()
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_ascii_lowercase().contains("bytes"))
        .unwrap_or(false);

    if total.is_none() {
        return None;
    }
    Some((total, accept_ranges))
}

async fn probe_via_ranged_get(
    client: &Client,
    url: &str,
    headers: &Headers,
) -> Option<(Option<u64>, bool)> {
    let builder = apply_format_headers(client.get(url), headers, Some("bytes=0-0"));
    let resp = builder.send().await.ok()?;
    debug!(status = %resp.status(), "ranged GET probe response received");
    trace_headers(&resp);

    let accept_ranges = resp.status().as_u16() == 206;
    let total = resp
        .headers()
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_total_from_content_range)
        .or_else(|| parse_content_length(&resp));

    Some((total, accept_ranges))
}

fn trace_headers(resp: &Response) {
    for (name, value) in resp.headers().iter() {
        trace!(header_name = %name, header_value = ?value);
    }
}

fn parse_total_from_content_range(s: &str) -> Option<u64> {
    let slash = s.rfind('/')?;
    let total_str = &s[slash + 1..];
    if total_str == "*" {
        return None;
    }
    total_str.parse().ok()
}

fn parse_content_length(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}
