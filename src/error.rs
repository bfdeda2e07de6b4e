use std::fmt;

/// Unified error type for the download core.
///
/// Groups the errors the download core can hit into a single enum so
/// every layer (session, probe, assembler, CLI) can match on a small,
/// closed set instead of threading `reqwest`/`io` errors around directly.
#[derive(Debug)]
pub enum DownloadError {
    /// Invalid command-line arguments or configuration.
    ArgNotValid(String),
    /// Timeout, connection reset, 5xx, or 429. Recovered locally by retry;
    /// only surfaced once a chunk's retry budget is exhausted.
    TransientNetwork(String),
    /// 4xx other than 429. Fails the session immediately.
    PermanentHttp { status: u16, message: String },
    /// Output file create/truncate/write/seek failure.
    Filesystem(std::io::Error),
    /// Session was cancelled before completion.
    Cancelled,
    /// External muxer invocation failed or exited non-zero.
    PostProcessing(String),
    /// Generic or miscellaneous errors.
    Other(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::ArgNotValid(msg) => write!(f, "invalid argument: {msg}"),
            DownloadError::TransientNetwork(msg) => write!(f, "transient network error: {msg}"),
            DownloadError::PermanentHttp { status, message } => {
                write!(f, "permanent HTTP error {status}: {message}")
            }
            DownloadError::Filesystem(e) => write!(f, "filesystem error: {e}"),
            DownloadError::Cancelled => write!(f, "download cancelled"),
            DownloadError::PostProcessing(msg) => write!(f, "post-processing error: {msg}"),
            DownloadError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for DownloadError {}

impl DownloadError {
    /// Classifies an HTTP status: 5xx and 429 are transient, everything
    /// else in 4xx is permanent.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        let code = status.as_u16();
        if status.is_server_error() || code == 429 {
            DownloadError::TransientNetwork(format!("{context}: status {code}"))
        } else {
            DownloadError::PermanentHttp {
                status: code,
                message: context.to_string(),
            }
        }
    }

    /// Whether the retry machinery should re-enqueue the chunk.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DownloadError::TransientNetwork(_))
    }

    /// Exit-status category for an embedding CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            DownloadError::ArgNotValid(_) => 2,
            DownloadError::TransientNetwork(_) => 10,
            DownloadError::PermanentHttp { .. } => 20,
            DownloadError::Filesystem(_) => 30,
            DownloadError::Cancelled => 40,
            DownloadError::PostProcessing(_) => 50,
            DownloadError::Other(_) => 1,
        }
    }
}

impl From<reqwest::header::InvalidHeaderValue> for DownloadError {
    fn from(msg: reqwest::header::InvalidHeaderValue) -> Self {
        DownloadError::ArgNotValid(msg.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            DownloadError::from_status(status, &err.to_string())
        } else if err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() {
            // A reset or dropped connection mid-body-stream surfaces as
            // `is_body()`/`is_request()`, not `is_connect()`. Just as retryable
            // as a timeout or a fresh connection failure.
            DownloadError::TransientNetwork(err.to_string())
        } else {
            DownloadError::Other(err.to_string())
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::Filesystem(err)
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
