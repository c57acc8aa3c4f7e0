//! Lyric providers.
//!
//! Each provider answers "given track metadata, which candidate matches do
//! you know about" as a lazy, single-pass stream. A candidate carries the
//! identifying fields needed for acceptance plus a deferred fetch closure,
//! because most services require a second request keyed by a candidate id to
//! resolve the lyric body.

pub mod kugou;
pub mod kuwo;
pub mod lrclib;
pub mod mxm;
pub mod ncm;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use once_cell::sync::Lazy;
use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::{Lyrics, TrackMetadata};

// Provider ids double as the lyrics source field and must stay within 6
// ASCII bytes.
pub const LRCLIB_PROVIDER_ID: &str = "lrclib";
pub const NCM_PROVIDER_ID: &str = "ncm";
pub const KUGOU_PROVIDER_ID: &str = "kugou";
pub const KUWO_PROVIDER_ID: &str = "kuwo";
pub const MXM_PROVIDER_ID: &str = "mxm";

static HTTP_CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// Shared HTTP client, also used by the request-per-send publishers.
pub(crate) fn http_client() -> &'static Client {
    &HTTP_CLIENT
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network failure")]
    Network,
    #[error("parse failure")]
    Parse,
    #[error("no lyrics found")]
    NoLyrics,
    #[error("rate limited")]
    RateLimited,
    #[error("canceled")]
    Canceled,
}

impl ProviderError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ProviderError::Canceled)
    }
}

pub type LyricsFuture = BoxFuture<'static, Result<Lyrics, ProviderError>>;

/// Deferred lyric resolution for one candidate.
pub type FetchFn = Box<dyn FnOnce(CancellationToken) -> LyricsFuture + Send>;

/// A provider-reported possible match for a track, not yet resolved to
/// lyrics.
pub struct Candidate {
    pub titles: Vec<String>,
    pub artists: Vec<String>,
    pub duration: Duration,
    fetch: FetchFn,
}

impl Candidate {
    pub fn new(
        titles: Vec<String>,
        artists: Vec<String>,
        duration: Duration,
        fetch: FetchFn,
    ) -> Self {
        Candidate {
            titles,
            artists,
            duration,
            fetch,
        }
    }

    /// Resolve the lyric body; cancellable at every request.
    pub async fn lyrics(self, cancel: &CancellationToken) -> Result<Lyrics, ProviderError> {
        (self.fetch)(cancel.clone()).await
    }
}

/// Single-pass candidate sequence; dropping it abandons remaining work.
pub type CandidateStream = BoxStream<'static, Candidate>;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider id, ASCII and at most 6 bytes, unique across providers.
    fn id(&self) -> &'static str;

    /// Enumerate match candidates for the given track.
    async fn iter_all(
        &self,
        cancel: &CancellationToken,
        meta: &TrackMetadata,
    ) -> Result<CandidateStream, ProviderError>;
}

/// Search keyword: title followed by every artist, percent-encoded.
pub(crate) fn query_str(meta: &TrackMetadata) -> String {
    let mut q = meta.title.clone();
    for artist in &meta.artists {
        q.push(' ');
        q.push_str(artist);
    }
    urlencoding::encode(&q).into_owned()
}

/// GET with up to 5 attempts on network error, each raced against the
/// cancellation token. HTTP 429 aborts the provider immediately.
pub(crate) async fn get(
    cancel: &CancellationToken,
    url: &str,
    headers: &[(&str, &str)],
) -> Result<reqwest::Response, ProviderError> {
    debug!(url, "http get");
    for _ in 0..5 {
        let mut request = HTTP_CLIENT.get(url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Canceled),
            response = request.send() => response,
        };
        match response {
            Ok(response) if response.status().as_u16() == 429 => {
                return Err(ProviderError::RateLimited)
            }
            Ok(response) => return Ok(response),
            Err(_) => continue,
        }
    }
    Err(ProviderError::Network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_ids_fit_the_source_field() {
        let ids = [
            LRCLIB_PROVIDER_ID,
            NCM_PROVIDER_ID,
            KUGOU_PROVIDER_ID,
            KUWO_PROVIDER_ID,
            MXM_PROVIDER_ID,
        ];
        for id in ids {
            assert!(id.is_ascii());
            assert!(id.len() <= 6);
        }
        for (i, a) in ids.iter().enumerate() {
            assert!(!ids[i + 1..].contains(a));
        }
    }

    #[test]
    fn query_str_joins_title_and_artists() {
        let meta = TrackMetadata {
            title: "Song".to_string(),
            artists: vec!["A B".to_string(), "C".to_string()],
            ..Default::default()
        };
        assert_eq!(query_str(&meta), "Song%20A%20B%20C");
    }
}
