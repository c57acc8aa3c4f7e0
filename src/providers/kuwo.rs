//! Kuwo provider. The lyric endpoint returns a JSON line list with string
//! second timestamps rather than an LRC document.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::models::{LyricLine, Lyrics, TrackMetadata};

use super::{get, query_str, Candidate, CandidateStream, Provider, ProviderError, KUWO_PROVIDER_ID};

const KUWO_BASE_URL: &str = "https://kuwo.cn";

pub struct KuwoProvider;

impl KuwoProvider {
    pub fn new() -> Self {
        KuwoProvider
    }
}

impl Default for KuwoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize, Default)]
struct KuwoAbs {
    #[serde(rename = "DC_TARGETID", default)]
    id: String,
    #[serde(rename = "ARTIST", default)]
    artist: String,
    #[serde(rename = "AARTIST", default)]
    aartist: String,
    #[serde(rename = "FARTIST", default)]
    fartist: String,
    #[serde(rename = "NAME", default)]
    name: String,
    #[serde(rename = "ALIAS", default)]
    alias: String,
    #[serde(rename = "SONGNAME", default)]
    songname: String,
    #[serde(rename = "FSONGNAME", default)]
    fsongname: String,
    /// Track length, string seconds.
    #[serde(rename = "DURATION", default)]
    duration: String,
}

#[derive(Deserialize, Default)]
struct KuwoSearchResponse {
    #[serde(default)]
    abslist: Vec<KuwoAbs>,
}

#[derive(Deserialize, Default)]
struct KuwoLrcLine {
    #[serde(default)]
    time: String,
    #[serde(rename = "lineLyric", default)]
    line_lyric: String,
}

#[derive(Deserialize, Default)]
struct KuwoGetData {
    #[serde(default)]
    lrclist: Vec<KuwoLrcLine>,
}

#[derive(Deserialize, Default)]
struct KuwoGetResponse {
    #[serde(default)]
    data: KuwoGetData,
}

/// The first entry is a credits header; lines sharing a timestamp collapse
/// keeping the last, and a run of collapses drops the trailing ad line.
fn parse_lrc_list(lrc_list: &[KuwoLrcLine]) -> Result<Vec<LyricLine>, ProviderError> {
    let mut lines: Vec<LyricLine> = Vec::new();
    let mut rep_cnt = 0;
    let mut prev_time = -1.0f64;
    for (i, lrc) in lrc_list.iter().enumerate() {
        if i == 0 {
            continue;
        }
        let time_sec: f64 = lrc.time.parse().map_err(|_| ProviderError::Parse)?;
        let line = LyricLine {
            position: (time_sec * 1000.0) as i64,
            text: lrc.line_lyric.trim().to_string(),
        };
        if time_sec == prev_time {
            if let Some(last) = lines.last_mut() {
                *last = line;
            }
            rep_cnt += 1;
        } else {
            lines.push(line);
        }
        prev_time = time_sec;
    }
    if rep_cnt > 1 {
        lines.pop();
    }
    if lines.is_empty() {
        return Err(ProviderError::NoLyrics);
    }
    Ok(lines)
}

#[async_trait]
impl Provider for KuwoProvider {
    fn id(&self) -> &'static str {
        KUWO_PROVIDER_ID
    }

    async fn iter_all(
        &self,
        cancel: &CancellationToken,
        meta: &TrackMetadata,
    ) -> Result<CandidateStream, ProviderError> {
        let url = format!(
            "{KUWO_BASE_URL}/search/searchMusicBykeyWord?vipver=1&client=kt&ft=music&cluster=0&strategy=2012&encoding=utf8&rformat=json&mobi=1&issubtitle=1&pn=0&rn=20&all={}",
            query_str(meta)
        );
        let response = get(cancel, &url, &[]).await?;
        let body: KuwoSearchResponse = response.json().await.map_err(|_| ProviderError::Parse)?;

        let candidates: Vec<Candidate> = body
            .abslist
            .into_iter()
            .map(|track| {
                let titles = vec![
                    track.name,
                    track.alias,
                    track.songname,
                    track.fsongname,
                ];
                let mut artists = Vec::new();
                for group in [&track.artist, &track.aartist, &track.fartist] {
                    artists.extend(group.split('&').map(str::to_string));
                }
                let duration = track.duration.parse::<f64>().unwrap_or(0.0);
                let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
                let id = track.id;
                Candidate::new(
                    titles,
                    artists,
                    Duration::from_secs_f64(duration),
                    Box::new(move |cancel| {
                        Box::pin(async move {
                            let url = format!(
                                "{KUWO_BASE_URL}/openapi/v1/www/lyric/getlyric?musicId={id}"
                            );
                            let response = get(&cancel, &url, &[]).await?;
                            let body: KuwoGetResponse =
                                response.json().await.map_err(|_| ProviderError::Parse)?;
                            if body.data.lrclist.is_empty() {
                                return Err(ProviderError::NoLyrics);
                            }
                            let lines = parse_lrc_list(&body.data.lrclist)
                                .map_err(|_| ProviderError::Parse)?;
                            Ok(Lyrics {
                                lines,
                                source: KUWO_PROVIDER_ID.to_string(),
                            })
                        })
                    }),
                )
            })
            .collect();

        Ok(stream::iter(candidates).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(time: &str, text: &str) -> KuwoLrcLine {
        KuwoLrcLine {
            time: time.to_string(),
            line_lyric: text.to_string(),
        }
    }

    #[test]
    fn drops_header_and_collapses_repeats() {
        let list = vec![
            line("0.0", "credits"),
            line("1.0", "a"),
            line("1.0", "a2"),
            line("2.0", "b"),
        ];
        let lines = parse_lrc_list(&list).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "a2");
        assert_eq!(lines[1].text, "b");
    }

    #[test]
    fn empty_list_has_no_lyrics() {
        assert!(matches!(
            parse_lrc_list(&[line("0.0", "header")]),
            Err(ProviderError::NoLyrics)
        ));
    }
}
