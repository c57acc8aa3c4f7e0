//! Kugou provider. Lyric resolution is two-step: a candidate search keyed by
//! the track hash, then a download per lyric candidate (base64 LRC body).

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use futures_util::stream;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::models::{Lyrics, TrackMetadata};
use crate::utils;

use super::{
    get, query_str, Candidate, CandidateStream, Provider, ProviderError, KUGOU_PROVIDER_ID,
};

const KUGOU_BASE_URL: &str = "http://lyrics.kugou.com";

// Placeholder body kugou serves for instrumental tracks.
const INSTRUMENTAL_PLACEHOLDER: &str = "纯音乐，请欣赏";

pub struct KugouProvider;

impl KugouProvider {
    pub fn new() -> Self {
        KugouProvider
    }
}

impl Default for KugouProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize, Default)]
struct KugouSong {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    songname: String,
    #[serde(default)]
    othername: String,
    #[serde(default)]
    songname_original: String,
    #[serde(default)]
    othername_original: String,
    #[serde(default)]
    singername: String,
    /// Track length in seconds.
    #[serde(default)]
    duration: i64,
}

#[derive(Deserialize, Default)]
struct KugouSearchData {
    #[serde(default)]
    info: Vec<KugouSong>,
}

#[derive(Deserialize, Default)]
struct KugouSongSearchResponse {
    #[serde(default)]
    data: KugouSearchData,
}

#[derive(Deserialize, Default)]
struct KugouLyricsCandidate {
    #[serde(default)]
    id: String,
    #[serde(default)]
    accesskey: String,
}

#[derive(Deserialize, Default)]
struct KugouLyricsSearchResponse {
    #[serde(default)]
    candidates: Vec<KugouLyricsCandidate>,
}

#[derive(Deserialize, Default)]
struct KugouLyricsDownloadResponse {
    #[serde(default)]
    content: String,
}

async fn fetch_by_hash(cancel: CancellationToken, hash: String) -> Result<Lyrics, ProviderError> {
    let url = format!("{KUGOU_BASE_URL}/search?ver=1&man=yes&client=pc&hash={hash}");
    let response = get(&cancel, &url, &[]).await?;
    let body: KugouLyricsSearchResponse =
        response.json().await.map_err(|_| ProviderError::Parse)?;

    for candidate in body.candidates {
        let url = format!(
            "{KUGOU_BASE_URL}/download?ver=1&client=pc&id={}&accesskey={}&fmt=lrc&charset=utf8",
            candidate.id, candidate.accesskey
        );
        let response = match get(&cancel, &url, &[]).await {
            Ok(response) => response,
            Err(err) if err.is_canceled() => return Err(err),
            Err(_) => continue,
        };
        let body: KugouLyricsDownloadResponse = match response.json().await {
            Ok(body) => body,
            Err(_) => continue,
        };
        let Ok(raw) = general_purpose::STANDARD.decode(&body.content) else {
            continue;
        };
        let Ok(text) = String::from_utf8(raw) else {
            continue;
        };
        let Ok(lines) = utils::parse_lrc(&text) else {
            continue;
        };
        if lines.first().is_some_and(|l| l.text == INSTRUMENTAL_PLACEHOLDER) {
            continue;
        }
        return Ok(Lyrics {
            lines,
            source: KUGOU_PROVIDER_ID.to_string(),
        });
    }
    Err(ProviderError::NoLyrics)
}

#[async_trait]
impl Provider for KugouProvider {
    fn id(&self) -> &'static str {
        KUGOU_PROVIDER_ID
    }

    async fn iter_all(
        &self,
        cancel: &CancellationToken,
        meta: &TrackMetadata,
    ) -> Result<CandidateStream, ProviderError> {
        let url = format!(
            "http://msearchcdn.kugou.com/api/v3/search/song?keyword={}",
            query_str(meta)
        );
        let response = get(cancel, &url, &[]).await?;
        let body: KugouSongSearchResponse =
            response.json().await.map_err(|_| ProviderError::Parse)?;

        let candidates: Vec<Candidate> = body
            .data
            .info
            .into_iter()
            .map(|song| {
                let titles = vec![
                    song.songname,
                    song.songname_original,
                    song.othername,
                    song.othername_original,
                ];
                let artists = vec![song.singername];
                let hash = song.hash;
                Candidate::new(
                    titles,
                    artists,
                    Duration::from_secs(song.duration.max(0) as u64),
                    Box::new(move |cancel| Box::pin(fetch_by_hash(cancel, hash))),
                )
            })
            .collect();

        Ok(stream::iter(candidates).boxed())
    }
}
