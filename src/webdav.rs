use reqwest::Client;

use crate::client::BasicAuth;
use crate::probe::{self, ProbeResult};
use crate::types::{Headers, ResolvedFormat};

/// Credentials for a WebDAV remote.
pub type Credentials = BasicAuth;

/// A WebDAV byte source: per-file `stat`, a `GET` URL, and
/// an `Authorization` header. Directory listing is explicitly out of
/// scope; the core only ever fetches one file at a time here.
pub struct WebDavSource {
    pub base_url: String,
    pub credentials: Option<Credentials>,
}

impl WebDavSource {
    pub fn new(base_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        WebDavSource {
            base_url: base_url.into(),
            credentials,
        }
    }

    fn file_url(&self, remote_path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), remote_path.trim_start_matches('/'))
    }

    fn auth_headers(&self) -> Headers {
        match &self.credentials {
            Some(creds) => vec![("Authorization".to_string(), creds.header_value())],
            None => Vec::new(),
        }
    }

    /// `stat(path) -> {size, range_supported}`, reusing the core's
    /// capability probe since, once authenticated, a WebDAV GET behaves
    /// like any other HTTP URL.
    pub async fn stat(&self, client: &Client, remote_path: &str, chunk_size: u64) -> ProbeResult {
        let url = self.file_url(remote_path);
        probe::probe(client, &url, &self.auth_headers(), chunk_size).await
    }

    /// Produces the `ResolvedFormat` the download core consumes,
    /// already carrying the Basic-auth header.
    pub fn resolved_format(&self, remote_path: &str) -> ResolvedFormat {
        let url = self.file_url(remote_path);
        let extension_hint = remote_path.rsplit('.').next().unwrap_or("bin").to_string();
        let mut format = ResolvedFormat::new(url, extension_hint);
        format.headers = self.auth_headers();
        format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_header_is_base64_of_user_colon_pass() {
        let creds = Credentials {
            username: "alice".to_string(),
            password: "s3cret".to_string(),
        };
        let header = creds.header_value();
        assert!(header.starts_with("Basic "));
        let decoded = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(header.trim_start_matches("Basic "))
                .unwrap()
        };
        assert_eq!(decoded, b"alice:s3cret");
    }

    #[test]
    fn resolved_format_carries_authorization_header() {
        let source = WebDavSource::new(
            "https://dav.example.com/remote.php/dav",
            Some(Credentials {
                username: "bob".to_string(),
                password: "hunter2".to_string(),
            }),
        );
        let format = source.resolved_format("/files/bob/podcast.mp3");
        assert!(format.url.ends_with("/files/bob/podcast.mp3"));
        assert!(format.headers.iter().any(|(name, _)| name == "Authorization"));
    }

    #[test]
    fn file_url_joins_base_and_remote_path_without_double_slashes() {
        let source = WebDavSource::new("https://dav.example.com/root/", None);
        assert_eq!(
            source.file_url("/a/b.mp3"),
            "https://dav.example.com/root/a/b.mp3"
        );
    }
}
