use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use dlcore::assembler::Assembler;
use dlcore::client::{BasicAuth, ClientPoolConfig, ProxyMode, build_client};
use dlcore::plan::{PlanConfig, plan_from_probe};
use dlcore::probe::probe;
use dlcore::progress::{format_bytes, style_download_bar, style_spinner};
use dlcore::session::DownloadSession;
use dlcore::types::{DEFAULT_CHUNK_SIZE, DEFAULT_READ_BUFFER, DEFAULT_RETRY_BUDGET, DEFAULT_WORKER_COUNT, ResolvedFormat};

#[derive(Parser, Debug)]
#[command(author, version, about = "A parallel-range media downloader core.")]
struct Args {
    /// URL of the primary media stream to download.
    url: String,

    /// Output file path (if not provided, derived from URL).
    #[arg(long, short = 'O')]
    output: Option<PathBuf>,

    /// Companion audio URL, when the primary URL is a video-only stream
    /// that must be muxed with a separately delivered audio track.
    #[arg(long)]
    companion_audio_url: Option<String>,

    /// Path to the muxer binary used to combine companion streams.
    #[arg(long, default_value = "ffmpeg")]
    muxer_path: String,

    /// Run the companion audio download after the video instead of
    /// concurrently with it.
    #[arg(long)]
    serialize_companion: bool,

    /// Number of parallel chunk workers.
    #[arg(long, default_value_t = DEFAULT_WORKER_COUNT)]
    threads: usize,

    /// Chunk size in bytes for parallel range requests.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Per-worker read buffer size in bytes.
    #[arg(long, default_value_t = DEFAULT_READ_BUFFER)]
    read_buffer: usize,

    /// Maximum retry attempts per chunk.
    #[arg(long, default_value_t = DEFAULT_RETRY_BUDGET)]
    retries: u32,

    /// User-Agent to send in every request.
    #[arg(long, short = 'A', default_value = "dlcore/0.1.0")]
    user_agent: String,

    /// Proxy URL (automatically enables --proxy-mode custom).
    #[arg(long, short = 'x')]
    proxy: Option<String>,

    /// Proxy mode: auto (env), off (disable), custom (use --proxy).
    #[arg(long, value_enum, default_value_t = ProxyMode::Auto)]
    proxy_mode: ProxyMode,

    /// WebDAV Basic-auth username, if the target requires authentication.
    #[arg(long)]
    webdav_user: Option<String>,

    /// WebDAV Basic-auth password.
    #[arg(long)]
    webdav_pass: Option<String>,

    /// Directory for companion-track temporary files (default: alongside output).
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace).
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Enable debug mode (sets log level to at least debug, detailed output).
    #[arg(long, short = 'v')]
    debug: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn init_tracing(level: LogLevel, debug_mode: bool) {
    let trace_level = if debug_mode {
        if matches!(level, LogLevel::Trace) {
            Level::TRACE
        } else {
            Level::DEBUG
        }
    } else {
        match level {
            LogLevel::Off => return,
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(trace_level)
        .with_writer(std::io::stderr);

    if debug_mode {
        builder.with_target(true).with_file(true).with_line_number(true).init();
    } else {
        builder.with_target(false).without_time().with_level(true).init();
    }
}

fn get_filename_from_url(url_str: &str) -> String {
    if let Ok(url) = reqwest::Url::parse(url_str)
        && let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        return last.to_string();
    }
    "download.bin".to_string()
}

/// Runs one `probe -> plan -> session` pipeline against `output_path`,
/// rendering an `indicatif` bar driven by the session's progress snapshots.
async fn run_one(
    client: reqwest::Client,
    format: &ResolvedFormat,
    output_path: PathBuf,
    config: PlanConfig,
    message: &'static str,
) -> dlcore::Result<dlcore::SessionOutcome> {
    let probe_result = probe(&client, &format.url, &format.headers, config.chunk_size).await;
    info!(
        total_bytes = ?probe_result.total_bytes,
        supports_range = probe_result.supports_range,
        "probe completed"
    );

    let plan = plan_from_probe(probe_result, config);
    let session = DownloadSession::new(client, format.url.clone(), format.headers.clone(), output_path, plan.clone());

    let cancel = session.cancel_handle();
    let ctrl_c_task = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel.cancel();
    });

    let bar = indicatif::ProgressBar::new(plan.total_bytes.unwrap_or(0));
    bar.set_style(style_download_bar());
    bar.set_message(message);
    let (reporter, mut rx) = dlcore::progress::ProgressReporter::spawn(plan.total_bytes, session.bytes_written_handle());
    let bar_clone = bar.clone();
    let bar_task = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = *rx.borrow();
            bar_clone.set_position(snapshot.bytes_written);
        }
    });

    let result = session.run().await;
    ctrl_c_task.abort();

    let (bytes_written, total_bytes, elapsed, terminal_error) = match &result {
        Ok(outcome) => (outcome.bytes_written, plan.total_bytes, outcome.elapsed, false),
        Err(_) => (
            session.bytes_written_handle().load(std::sync::atomic::Ordering::Relaxed),
            plan.total_bytes,
            std::time::Duration::ZERO,
            true,
        ),
    };
    reporter.finish(bytes_written, total_bytes, elapsed, terminal_error).await;
    bar_task.abort();

    match &result {
        Ok(_) => bar.finish_with_message("done"),
        Err(e) => bar.abandon_with_message(format!("failed: {e}")),
    }

    result
}

async fn run(args: Args) -> dlcore::Result<()> {
    if args.threads == 0 {
        return Err(dlcore::DownloadError::ArgNotValid("threads must be >= 1".to_string()));
    }

    let output_path = match args.output {
        Some(p) => p,
        None => PathBuf::from(get_filename_from_url(&args.url)),
    };

    let webdav_auth = match (&args.webdav_user, &args.webdav_pass) {
        (Some(user), Some(pass)) => Some(BasicAuth {
            username: user.clone(),
            password: pass.clone(),
        }),
        _ => None,
    };

    let mut format = ResolvedFormat::new(args.url.clone(), "bin");
    if let Some(auth) = &webdav_auth {
        format = format.with_header("Authorization", auth.header_value());
    }

    let client_config = ClientPoolConfig {
        user_agent: &args.user_agent,
        proxy_mode: args.proxy_mode,
        proxy: args.proxy.as_deref(),
        worker_count: args.threads,
        connect_timeout: std::time::Duration::from_secs(30),
    };
    let client = build_client(&client_config)?;

    let plan_config = PlanConfig {
        chunk_size: args.chunk_size,
        worker_count: args.threads,
        read_buffer: args.read_buffer,
        retry_budget: args.retries,
    };

    info!("starting download: {}", args.url);
    info!(output = ?output_path, "output path resolved");

    match args.companion_audio_url {
        None => {
            run_one(client, &format, output_path.clone(), plan_config, "Downloading").await?;
        }
        Some(companion_url) => {
            let temp_dir = args
                .temp_dir
                .unwrap_or_else(|| output_path.parent().unwrap_or(std::path::Path::new(".")).to_path_buf());
            tokio::fs::create_dir_all(&temp_dir).await?;

            let video_tmp = temp_dir.join(format!("{}.video.part", get_filename_from_url(&args.url)));
            let audio_tmp = temp_dir.join(format!("{}.audio.part", get_filename_from_url(&args.url)));

            let mut audio_format = ResolvedFormat::new(companion_url, "bin");
            if let Some(auth) = &webdav_auth {
                audio_format = audio_format.with_header("Authorization", auth.header_value());
            }

            let video_client = client.clone();
            let audio_client = client.clone();
            let video_path = video_tmp.clone();
            let audio_path = audio_tmp.clone();
            let video_config = plan_config;
            let audio_config = plan_config;
            let video_format = format.clone();

            if args.serialize_companion {
                run_one(video_client, &video_format, video_path, video_config, "Downloading video").await?;
                run_one(audio_client, &audio_format, audio_path, audio_config, "Downloading audio").await?;
            } else {
                tokio::try_join!(
                    run_one(video_client, &video_format, video_path, video_config, "Downloading video"),
                    run_one(audio_client, &audio_format, audio_path, audio_config, "Downloading audio"),
                )?;
            }

            let pb_merge = indicatif::ProgressBar::new_spinner();
            pb_merge.set_style(style_spinner());
            pb_merge.set_message("Muxing video and audio...");
            pb_merge.enable_steady_tick(std::time::Duration::from_millis(100));

            let assembler = Assembler::new(args.muxer_path);
            assembler.mux(&video_tmp, &audio_tmp, &output_path).await?;

            pb_merge.finish_with_message("Mux completed");
        }
    }

    let size = tokio::fs::metadata(&output_path).await.map(|m| m.len()).unwrap_or(0);
    info!(size = %format_bytes(size), "file saved to {:?}", output_path);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_level, args.debug);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            warn!(error = %err, "download failed");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

