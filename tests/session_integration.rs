//! End-to-end scenarios from the seed test cases: a real `reqwest::Client`
//! talking to a `wiremock` server, writing through `DownloadSession` into a
//! real temp file, and reading the bytes back to check correctness.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dlcore::client::{ClientPoolConfig, ProxyMode, build_client};
use dlcore::plan::{PlanConfig, plan_from_probe};
use dlcore::probe::probe;
use dlcore::session::DownloadSession;
use dlcore::types::{ChunkSpec, DownloadPlan, FetchStrategy};
use tempfile::tempdir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn test_client() -> reqwest::Client {
    build_client(&ClientPoolConfig {
        user_agent: "dlcore-tests/0.1",
        proxy_mode: ProxyMode::Off,
        proxy: None,
        worker_count: 4,
        connect_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn parallel_download_writes_every_chunk_at_the_right_offset() {
    let content = pattern_bytes(48 * 1024);
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/file"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", content.len().to_string())
                .insert_header("Accept-Ranges", "bytes"),
        )
        .mount(&server)
        .await;

    for (range, content_range, slice) in [
        ("bytes=0-16383", "bytes 0-16383/49152", &content[0..16384]),
        ("bytes=16384-32767", "bytes 16384-32767/49152", &content[16384..32768]),
        ("bytes=32768-49151", "bytes 32768-49151/49152", &content[32768..49152]),
    ] {
        Mock::given(method("GET"))
            .and(path("/file"))
            .and(header("Range", range))
            .respond_with(
                ResponseTemplate::new(206)
                    .set_body_bytes(slice.to_vec())
                    .insert_header("Content-Range", content_range),
            )
            .mount(&server)
            .await;
    }

    let client = test_client();
    let url = format!("{}/file", server.uri());
    let probe_result = probe(&client, &url, &Vec::new(), 16 * 1024).await;
    assert_eq!(probe_result.strategy, FetchStrategy::ParallelRange);

    let plan = plan_from_probe(
        probe_result,
        PlanConfig {
            chunk_size: 16 * 1024,
            worker_count: 4,
            read_buffer: 4 * 1024,
            retry_budget: 3,
        },
    );
    assert_eq!(plan.chunks.len(), 3);

    let dir = tempdir().unwrap();
    let output = dir.path().join("out.bin");
    let session = DownloadSession::new(client, url, Vec::new(), output.clone(), plan);

    let outcome = session.run().await.unwrap();
    assert_eq!(outcome.bytes_written, content.len() as u64);

    let on_disk = std::fs::read(&output).unwrap();
    assert_eq!(on_disk, content);
}

#[tokio::test]
async fn single_stream_fallback_when_server_does_not_advertise_ranges() {
    let content = pattern_bytes(50 * 1024);
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/file"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", content.len().to_string()))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/file"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;

    let client = test_client();
    let url = format!("{}/file", server.uri());
    let probe_result = probe(&client, &url, &Vec::new(), 16 * 1024 * 1024).await;
    assert_eq!(probe_result.strategy, FetchStrategy::SingleStream);
    assert!(!probe_result.supports_range);

    let plan = plan_from_probe(probe_result, PlanConfig::default());
    assert!(plan.chunks.is_empty());

    let dir = tempdir().unwrap();
    let output = dir.path().join("out.bin");
    let session = DownloadSession::new(client, url, Vec::new(), output.clone(), plan);

    let outcome = session.run().await.unwrap();
    assert_eq!(outcome.bytes_written, content.len() as u64);
    assert_eq!(std::fs::read(&output).unwrap(), content);
}

/// Fails an exact number of times before succeeding, independent of the
/// matcher that routed the request here. Used to simulate a chunk that
/// returns 503 twice and 206 on its third attempt.
struct FlakyThenSucceeds {
    remaining_failures: AtomicUsize,
    body: Vec<u8>,
    content_range: String,
}

impl Respond for FlakyThenSucceeds {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let previous = self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            Some(n.saturating_sub(1))
        });
        let still_failing = previous.map(|n| n > 0).unwrap_or(false);
        if still_failing {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(206)
                .set_body_bytes(self.body.clone())
                .insert_header("Content-Range", self.content_range.clone())
        }
    }
}

#[tokio::test]
async fn chunk_recovers_after_two_503s_and_succeeds_on_the_third_attempt() {
    let content = pattern_bytes(8 * 1024);
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/file"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", content.len().to_string())
                .insert_header("Accept-Ranges", "bytes"),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/file"))
        .and(header("Range", "bytes=0-4095"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(content[0..4096].to_vec())
                .insert_header("Content-Range", format!("bytes 0-4095/{}", content.len())),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/file"))
        .and(header("Range", "bytes=4096-8191"))
        .respond_with(FlakyThenSucceeds {
            remaining_failures: AtomicUsize::new(2),
            body: content[4096..8192].to_vec(),
            content_range: format!("bytes 4096-8191/{}", content.len()),
        })
        .mount(&server)
        .await;

    let client = test_client();
    let url = format!("{}/file", server.uri());
    let probe_result = probe(&client, &url, &Vec::new(), 4 * 1024).await;
    let plan = plan_from_probe(
        probe_result,
        PlanConfig {
            chunk_size: 4 * 1024,
            worker_count: 4,
            read_buffer: 4 * 1024,
            retry_budget: 5,
        },
    );
    assert_eq!(plan.chunks.len(), 2);

    let dir = tempdir().unwrap();
    let output = dir.path().join("out.bin");
    let session = DownloadSession::new(client, url, Vec::new(), output.clone(), plan);

    let outcome = session.run().await.unwrap();
    assert_eq!(outcome.bytes_written, content.len() as u64);
    assert_eq!(std::fs::read(&output).unwrap(), content);
}

#[tokio::test]
async fn chunk_that_exhausts_its_retry_budget_fails_the_whole_session() {
    let content = pattern_bytes(8 * 1024);
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/file"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", content.len().to_string())
                .insert_header("Accept-Ranges", "bytes"),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/file"))
        .and(header("Range", "bytes=0-4095"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(content[0..4096].to_vec())
                .insert_header("Content-Range", format!("bytes 0-4095/{}", content.len())),
        )
        .mount(&server)
        .await;

    // Always 503: this chunk will exhaust its retry budget.
    Mock::given(method("GET"))
        .and(path("/file"))
        .and(header("Range", "bytes=4096-8191"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = test_client();
    let url = format!("{}/file", server.uri());
    let probe_result = probe(&client, &url, &Vec::new(), 4 * 1024).await;
    let plan = plan_from_probe(
        probe_result,
        PlanConfig {
            chunk_size: 4 * 1024,
            worker_count: 4,
            read_buffer: 4 * 1024,
            retry_budget: 2,
        },
    );

    let dir = tempdir().unwrap();
    let output = dir.path().join("out.bin");
    let session = DownloadSession::new(client, url, Vec::new(), output.clone(), plan);

    let result = session.run().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn server_ignoring_range_downgrades_to_single_stream_before_any_worker_writes() {
    let content = pattern_bytes(64 * 1024);
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/file"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", content.len().to_string())
                .insert_header("Accept-Ranges", "bytes"),
        )
        .mount(&server)
        .await;

    // Advertises range support but ignores every `Range` header and always
    // answers with a plain `200` carrying the whole body - the boundary
    // case that must downgrade the session to single_stream before any
    // worker writes, not corrupt the file with four overlapping full-body
    // writes.
    Mock::given(method("GET"))
        .and(path("/file"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;

    let client = test_client();
    let url = format!("{}/file", server.uri());
    let probe_result = probe(&client, &url, &Vec::new(), 16 * 1024).await;
    assert_eq!(probe_result.strategy, FetchStrategy::ParallelRange);
    assert!(probe_result.supports_range);

    let plan = plan_from_probe(
        probe_result,
        PlanConfig {
            chunk_size: 16 * 1024,
            worker_count: 4,
            read_buffer: 4 * 1024,
            retry_budget: 3,
        },
    );
    assert_eq!(plan.chunks.len(), 4);

    let dir = tempdir().unwrap();
    let output = dir.path().join("out.bin");
    let session = DownloadSession::new(client, url, Vec::new(), output.clone(), plan);

    let outcome = session.run().await.unwrap();
    assert_eq!(outcome.bytes_written, content.len() as u64);
    assert_eq!(std::fs::read(&output).unwrap(), content);
}

#[tokio::test]
async fn cancellation_interrupts_a_stalled_body_read_well_before_it_completes() {
    let body = vec![0xABu8; 64 * 1024];
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.clone())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = test_client();
    let url = format!("{}/slow", server.uri());

    // A hand-built plan rather than a probe round trip: this scenario only
    // cares about the single_stream fetch path, not capability discovery.
    let plan = DownloadPlan {
        total_bytes: None,
        strategy: FetchStrategy::SingleStream,
        chunk_size: 16 * 1024 * 1024,
        worker_count: 1,
        read_buffer: 128 * 1024,
        retry_budget: 5,
        chunks: Vec::<ChunkSpec>::new(),
    };

    let dir = tempdir().unwrap();
    let output = dir.path().join("out.bin");
    let session = Arc::new(DownloadSession::new(client, url, Vec::new(), output, plan));
    let cancel = session.cancel_handle();

    let session_for_task = session.clone();
    let handle = tokio::spawn(async move { session_for_task.run().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("session should return promptly after cancellation")
        .unwrap();

    assert!(matches!(result, Err(dlcore::DownloadError::Cancelled)));
}
