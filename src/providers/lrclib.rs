//! lrclib.net provider. The search response already carries the synced
//! lyric body, so the per-candidate fetch only parses it.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::models::{Lyrics, TrackMetadata};
use crate::utils;

use super::{get, Candidate, CandidateStream, Provider, ProviderError, LRCLIB_PROVIDER_ID};

pub struct LrclibProvider;

impl LrclibProvider {
    pub fn new() -> Self {
        LrclibProvider
    }
}

impl Default for LrclibProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct LrclibTrack {
    #[serde(rename = "trackName", default)]
    track_name: String,
    #[serde(rename = "artistName", default)]
    artist_name: String,
    #[serde(rename = "syncedLyrics", default)]
    synced_lyrics: Option<String>,
    #[serde(default)]
    duration: f64,
}

struct QueryState {
    cancel: CancellationToken,
    queries: VecDeque<(String, String)>,
    pending: VecDeque<Candidate>,
}

#[async_trait]
impl Provider for LrclibProvider {
    fn id(&self) -> &'static str {
        LRCLIB_PROVIDER_ID
    }

    async fn iter_all(
        &self,
        cancel: &CancellationToken,
        meta: &TrackMetadata,
    ) -> Result<CandidateStream, ProviderError> {
        // One search per (title, artist) pair; the stripped title round only
        // runs when the exact-title rounds did not satisfy the consumer.
        let mut queries: VecDeque<(String, String)> = meta
            .artists
            .iter()
            .map(|artist| (meta.title.clone(), artist.clone()))
            .collect();
        let alt_title = utils::strip_title(&meta.title).to_string();
        if alt_title != meta.title {
            for artist in &meta.artists {
                queries.push_back((alt_title.clone(), artist.clone()));
            }
        }

        let state = QueryState {
            cancel: cancel.clone(),
            queries,
            pending: VecDeque::new(),
        };
        let stream = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(candidate) = state.pending.pop_front() {
                    return Some((candidate, state));
                }
                let (title, artist) = state.queries.pop_front()?;
                let url = format!(
                    "https://lrclib.net/api/search?track_name={}&artist_name={}",
                    urlencoding::encode(&title),
                    urlencoding::encode(&artist)
                );
                let response = match get(&state.cancel, &url, &[("User-Agent", "lrcd")]).await {
                    Ok(response) => response,
                    Err(ProviderError::Canceled) => return None,
                    Err(_) => continue,
                };
                if response.status().as_u16() != 200 {
                    continue;
                }
                let tracks: Vec<LrclibTrack> = match response.json().await {
                    Ok(tracks) => tracks,
                    Err(_) => continue,
                };
                for track in tracks {
                    let synced = track.synced_lyrics.unwrap_or_default();
                    state.pending.push_back(Candidate::new(
                        vec![track.track_name],
                        vec![track.artist_name],
                        Duration::from_secs_f64(track.duration.max(0.0)),
                        Box::new(move |_cancel| {
                            Box::pin(async move {
                                if synced.is_empty() {
                                    return Err(ProviderError::NoLyrics);
                                }
                                let lines =
                                    utils::parse_lrc(&synced).map_err(|_| ProviderError::Parse)?;
                                Ok(Lyrics {
                                    lines,
                                    source: LRCLIB_PROVIDER_ID.to_string(),
                                })
                            })
                        }),
                    ));
                }
            }
        });
        Ok(stream.boxed())
    }
}
