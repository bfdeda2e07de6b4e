use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::ResolvedFormat;

/// What an extractor produces for one URL: a tagged variant over
/// the shapes a site can hand back, rather than an inheritance hierarchy.
#[derive(Debug, Clone)]
pub enum Media {
    AudioTrack(ResolvedFormat),
    /// One video at one or more qualities; the caller picks a format.
    VideoCandidateSet(Vec<ResolvedFormat>),
    /// A multi-video post (e.g. a thread of clips).
    MultiVideoBundle(Vec<Vec<ResolvedFormat>>),
    ImageSet(Vec<String>),
}

/// Capability set an extractor exposes: `matches` + `extract`.
/// The core only consumes `ResolvedFormat` values through this trait;
/// grouping/presentation is handled by the surrounding layers, out of
/// scope here.
pub trait Extractor: Send + Sync {
    fn matches(&self, url: &str) -> bool;
    fn extract<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Media>>;
}

/// Holds a collection of extractors polymorphic over the capability set
/// and selects one by host match.
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extractor: Box<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    pub fn find(&self, url: &str) -> Option<&dyn Extractor> {
        self.extractors
            .iter()
            .find(|extractor| extractor.matches(url))
            .map(|boxed| boxed.as_ref())
    }
}

/// Default/fallback extractor: treats any URL as a single directly
/// fetchable format. Site-specific extractors (Twitter, Bilibili,
/// Xiaoyuzhou, iTunes, ...) are out of scope; this is the one
/// concrete impl needed to exercise the trait-object registry end to end.
pub struct DirectUrlExtractor;

impl Extractor for DirectUrlExtractor {
    fn matches(&self, _url: &str) -> bool {
        true
    }

    fn extract<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Media>> {
        Box::pin(async move {
            let extension_hint = url.rsplit('.').next().unwrap_or("bin").to_string();
            Ok(Media::AudioTrack(ResolvedFormat::new(url, extension_hint)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_url_extractor_matches_everything_and_round_trips_the_url() {
        let registry = {
            let mut r = ExtractorRegistry::new();
            r.register(Box::new(DirectUrlExtractor));
            r
        };

        let extractor = registry.find("https://example.com/clip.mp4").expect("should match");
        let media = extractor.extract("https://example.com/clip.mp4").await.unwrap();
        match media {
            Media::AudioTrack(format) => assert_eq!(format.url, "https://example.com/clip.mp4"),
            _ => panic!("expected AudioTrack"),
        }
    }
}
