use base64::Engine;
use reqwest::{
    Client, Proxy,
    header::{HeaderMap, HeaderName, HeaderValue, RANGE, USER_AGENT},
};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::{DownloadError, Result};
use crate::types::Headers;

#[derive(Debug, Clone, Copy, clap::ValueEnum, PartialEq)]
pub enum ProxyMode {
    Auto,
    Off,
    Custom,
}

/// Everything the HTTP client pool needs at construction time.
pub struct ClientPoolConfig<'a> {
    pub user_agent: &'a str,
    pub proxy_mode: ProxyMode,
    pub proxy: Option<&'a str>,
    /// Sized to at least `worker_count` so idle keep-alive connections
    /// don't starve a worker waiting on socket acquisition.
    pub worker_count: usize,
    /// Applies to connection + header read only; body streaming is never
    /// bounded by this, so large chunks are never killed mid-transfer.
    pub connect_timeout: Duration,
}

/// Builds the single, long-lived client reused across all requests within
/// a session.
pub fn build_client(config: &ClientPoolConfig<'_>) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_str(config.user_agent)?);

    debug!(
        user_agent = %config.user_agent,
        proxy_mode = ?config.proxy_mode,
        proxy = ?config.proxy,
        worker_count = config.worker_count,
        "building HTTP client pool"
    );

    let mut builder = Client::builder()
        .default_headers(headers)
        .pool_max_idle_per_host(config.worker_count.max(1))
        .connect_timeout(config.connect_timeout)
        .redirect(reqwest::redirect::Policy::limited(10));

    builder = match config.proxy_mode {
        ProxyMode::Auto => builder,
        ProxyMode::Off => builder.no_proxy(),
        ProxyMode::Custom => {
            let proxy_url = config.proxy.ok_or_else(|| {
                DownloadError::ArgNotValid("proxy-mode custom requires --proxy <URL>".to_string())
            })?;
            builder.no_proxy().proxy(Proxy::all(proxy_url)?)
        }
    };

    Ok(builder.build()?)
}

/// Merges headers for one request with a fixed precedence:
/// request-specific `Range` > format-provided headers (`Referer`,
/// cookies) > default client headers. Default client headers are already
/// attached to the `Client` itself, so this only needs to order `Range`
/// after the format headers when both are present.
pub fn apply_format_headers(
    mut builder: reqwest::RequestBuilder,
    headers: &Headers,
    range: Option<&str>,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        if let Ok(header_name) = HeaderName::from_str(name)
            && let Ok(header_value) = HeaderValue::from_str(value)
        {
            builder = builder.header(header_name, header_value);
        }
    }
    if let Some(range) = range {
        builder = builder.header(RANGE, range);
    }
    builder
}

/// HTTP Basic authentication credentials for a WebDAV target.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}
