//! NetEase Cloud Music provider.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::models::{Lyrics, TrackMetadata};
use crate::utils;

use super::{get, query_str, Candidate, CandidateStream, Provider, ProviderError, NCM_PROVIDER_ID};

const NCM_BASE_URL: &str = "https://music.163.com/api";

pub struct NcmProvider;

impl NcmProvider {
    pub fn new() -> Self {
        NcmProvider
    }
}

impl Default for NcmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize, Default)]
struct NcmArtist {
    #[serde(default)]
    name: String,
    #[serde(default)]
    alias: Vec<String>,
}

#[derive(Deserialize, Default)]
struct NcmSong {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    alias: Vec<String>,
    /// Track length in milliseconds.
    #[serde(default)]
    duration: i64,
    #[serde(default)]
    artists: Vec<NcmArtist>,
}

#[derive(Deserialize, Default)]
struct NcmSearchResult {
    #[serde(default)]
    songs: Vec<NcmSong>,
}

#[derive(Deserialize, Default)]
struct NcmSearchResponse {
    #[serde(default)]
    result: NcmSearchResult,
}

#[derive(Deserialize, Default)]
struct NcmLrc {
    #[serde(default)]
    lyric: String,
}

#[derive(Deserialize, Default)]
struct NcmGetResponse {
    #[serde(default)]
    lrc: NcmLrc,
}

#[async_trait]
impl Provider for NcmProvider {
    fn id(&self) -> &'static str {
        NCM_PROVIDER_ID
    }

    async fn iter_all(
        &self,
        cancel: &CancellationToken,
        meta: &TrackMetadata,
    ) -> Result<CandidateStream, ProviderError> {
        let url = format!(
            "{NCM_BASE_URL}/search/get/web?limit=30&type=1&s={}",
            query_str(meta)
        );
        let response = get(cancel, &url, &[]).await?;
        let body: NcmSearchResponse = response.json().await.map_err(|_| ProviderError::Parse)?;

        let candidates: Vec<Candidate> = body
            .result
            .songs
            .into_iter()
            .map(|song| {
                let mut titles = song.alias;
                titles.push(song.name);
                let mut artists = Vec::new();
                for artist in song.artists {
                    artists.push(artist.name);
                    artists.extend(artist.alias);
                }
                let id = song.id;
                Candidate::new(
                    titles,
                    artists,
                    Duration::from_millis(song.duration.max(0) as u64),
                    Box::new(move |cancel| {
                        Box::pin(async move {
                            let url = format!("{NCM_BASE_URL}/song/lyric?lv=1&id={id}");
                            let response = get(&cancel, &url, &[]).await?;
                            let body: NcmGetResponse =
                                response.json().await.map_err(|_| ProviderError::Parse)?;
                            let lines = utils::parse_lrc(&body.lrc.lyric)
                                .map_err(|_| ProviderError::Parse)?;
                            Ok(Lyrics {
                                lines,
                                source: NCM_PROVIDER_ID.to_string(),
                            })
                        })
                    }),
                )
            })
            .collect();

        Ok(stream::iter(candidates).boxed())
    }
}
