//! Musixmatch desktop API provider. A usertoken is fetched on first use and
//! kept for the provider's lifetime; captcha/renew hints trigger one refresh.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::models::{Lyrics, TrackMetadata};
use crate::utils;

use super::{get, query_str, Candidate, CandidateStream, Provider, ProviderError, MXM_PROVIDER_ID};

const MXM_BASE_URL: &str = "https://apic-desktop.musixmatch.com/ws/1.1";
const MXM_APP_ID: &str = "app_id=web-desktop-app-v1.0";
const MXM_COOKIE: (&str, &str) = ("Cookie", "AWSELB=unknown");

pub struct MxmProvider {
    token: Arc<Mutex<String>>,
}

impl MxmProvider {
    pub fn new() -> Self {
        MxmProvider {
            token: Arc::new(Mutex::new(String::new())),
        }
    }
}

impl Default for MxmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize, Default)]
struct MxmResponseHeader {
    #[serde(default)]
    status_code: i64,
    #[serde(default)]
    hint: String,
}

#[derive(Deserialize, Default)]
struct MxmMessage {
    #[serde(default)]
    header: MxmResponseHeader,
    #[serde(default)]
    body: serde_json::Value,
}

#[derive(Deserialize, Default)]
struct MxmBaseResponse {
    #[serde(default)]
    message: MxmMessage,
}

#[derive(Deserialize, Default)]
struct MxmTrackInfo {
    #[serde(rename = "commontrack_id", default)]
    id: i64,
    #[serde(default)]
    artist_id: i64,
    #[serde(default)]
    artist_name: String,
    #[serde(default)]
    track_name: String,
    /// Track length in seconds.
    #[serde(default)]
    track_length: f64,
}

#[derive(Deserialize, Default)]
struct MxmTrack {
    #[serde(default)]
    track: MxmTrackInfo,
}

#[derive(Deserialize, Default)]
struct MxmTrackSearchBody {
    #[serde(default)]
    track_list: Vec<MxmTrack>,
}

#[derive(Deserialize, Default)]
struct MxmSubtitle {
    #[serde(default)]
    subtitle_body: String,
}

#[derive(Deserialize, Default)]
struct MxmSubtitleGetBody {
    #[serde(default)]
    subtitle: MxmSubtitle,
}

#[derive(Deserialize, Default)]
struct MxmArtistAlias {
    #[serde(default)]
    artist_alias: String,
}

#[derive(Deserialize, Default)]
struct MxmArtist {
    #[serde(default)]
    artist_alias_list: Vec<MxmArtistAlias>,
}

#[derive(Deserialize, Default)]
struct MxmArtistGetBody {
    #[serde(default)]
    artist: MxmArtist,
}

#[derive(Deserialize, Default)]
struct MxmTokenBody {
    #[serde(default)]
    user_token: String,
}

async fn update_token(
    cancel: &CancellationToken,
    token: &Mutex<String>,
) -> Result<(), ProviderError> {
    let url = format!("{MXM_BASE_URL}/token.get?{MXM_APP_ID}");
    let response = get(cancel, &url, &[MXM_COOKIE]).await?;
    let body: MxmBaseResponse = response.json().await.map_err(|_| ProviderError::Parse)?;
    if body.message.header.status_code != 200 {
        return Err(ProviderError::RateLimited);
    }
    let token_body: MxmTokenBody =
        serde_json::from_value(body.message.body).map_err(|_| ProviderError::Parse)?;
    *token.lock().await = token_body.user_token;
    Ok(())
}

async fn get_body(
    cancel: &CancellationToken,
    token: &Mutex<String>,
    endpoint: &str,
) -> Result<serde_json::Value, ProviderError> {
    let current = token.lock().await.clone();
    let url = format!("{MXM_BASE_URL}{endpoint}&{MXM_APP_ID}&usertoken={current}");
    let response = get(cancel, &url, &[MXM_COOKIE]).await?;
    let body: MxmBaseResponse = response.json().await.map_err(|_| ProviderError::Parse)?;
    if body.message.header.hint == "captcha" || body.message.header.hint == "renew" {
        update_token(cancel, token).await?;
        let current = token.lock().await.clone();
        let url = format!("{MXM_BASE_URL}{endpoint}&{MXM_APP_ID}&usertoken={current}");
        let response = get(cancel, &url, &[MXM_COOKIE]).await?;
        let body: MxmBaseResponse = response.json().await.map_err(|_| ProviderError::Parse)?;
        return Ok(body.message.body);
    }
    Ok(body.message.body)
}

struct TrackState {
    cancel: CancellationToken,
    token: Arc<Mutex<String>>,
    tracks: VecDeque<MxmTrackInfo>,
    /// Artist aliases resolved once per artist id across the stream.
    artists_cache: HashMap<i64, Vec<String>>,
}

#[async_trait]
impl Provider for MxmProvider {
    fn id(&self) -> &'static str {
        MXM_PROVIDER_ID
    }

    async fn iter_all(
        &self,
        cancel: &CancellationToken,
        meta: &TrackMetadata,
    ) -> Result<CandidateStream, ProviderError> {
        let needs_token = self.token.lock().await.is_empty();
        if needs_token {
            update_token(cancel, &self.token).await?;
        }
        let body = get_body(
            cancel,
            &self.token,
            &format!("/track.search?page_size=10&page=1&q={}", query_str(meta)),
        )
        .await?;
        let search: MxmTrackSearchBody =
            serde_json::from_value(body).map_err(|_| ProviderError::Parse)?;

        let state = TrackState {
            cancel: cancel.clone(),
            token: self.token.clone(),
            tracks: search.track_list.into_iter().map(|t| t.track).collect(),
            artists_cache: HashMap::new(),
        };
        let stream = stream::unfold(state, |mut state| async move {
            let track = state.tracks.pop_front()?;
            let mut artists = vec![track.artist_name.clone()];
            if let Some(cached) = state.artists_cache.get(&track.artist_id) {
                artists = cached.clone();
            } else {
                match get_body(
                    &state.cancel,
                    &state.token,
                    &format!("/artist.get?artist_id={}", track.artist_id),
                )
                .await
                {
                    Ok(body) => {
                        if let Ok(artist_body) =
                            serde_json::from_value::<MxmArtistGetBody>(body)
                        {
                            for alias in artist_body.artist.artist_alias_list {
                                artists.push(alias.artist_alias);
                            }
                        }
                    }
                    Err(err) if err.is_canceled() => return None,
                    Err(_) => {}
                }
                state
                    .artists_cache
                    .insert(track.artist_id, artists.clone());
            }
            let token = state.token.clone();
            let id = track.id;
            let candidate = Candidate::new(
                vec![track.track_name],
                artists,
                Duration::from_secs_f64(track.track_length.max(0.0)),
                Box::new(move |cancel| {
                    Box::pin(async move {
                        let body = get_body(
                            &cancel,
                            &token,
                            &format!("/track.subtitle.get?commontrack_id={id}"),
                        )
                        .await?;
                        let subtitle: MxmSubtitleGetBody =
                            serde_json::from_value(body).map_err(|_| ProviderError::Parse)?;
                        let lines = utils::parse_lrc(&subtitle.subtitle.subtitle_body)
                            .map_err(|_| ProviderError::Parse)?;
                        Ok(Lyrics {
                            lines,
                            source: MXM_PROVIDER_ID.to_string(),
                        })
                    })
                }),
            );
            Some((candidate, state))
        });
        Ok(stream.boxed())
    }
}
