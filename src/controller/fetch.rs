//! Candidate acceptance and the two provider-composition policies.
//!
//! Both policies share a single cancellation root: a fastest-mode win or an
//! external cancel tears down every in-flight branch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{Lyrics, TrackMetadata};
use crate::providers::{Candidate, Provider, ProviderError};
use crate::utils;

const DURATION_TOLERANCE: Duration = Duration::from_secs(2);

pub(super) fn check_candidate(
    meta: &TrackMetadata,
    candidate: &Candidate,
    alt_title: &str,
    artist_set: &HashSet<&str>,
) -> bool {
    let title_matched = candidate
        .titles
        .iter()
        .any(|t| t == &meta.title || utils::strip_title(t) == alt_title);
    if !title_matched {
        return false;
    }
    let artist_matched = candidate
        .artists
        .iter()
        .any(|a| artist_set.contains(a.as_str()));
    if !artist_matched {
        return false;
    }
    let delta = if meta.duration >= candidate.duration {
        meta.duration - candidate.duration
    } else {
        candidate.duration - meta.duration
    };
    delta <= DURATION_TOLERANCE
}

/// Try providers in declared order; the first accepted candidate that
/// resolves wins. Cancellation aborts the whole pass.
pub(super) async fn fetch_fallback(
    providers: &[Arc<dyn Provider>],
    cancel: &CancellationToken,
    meta: &TrackMetadata,
) -> Option<Lyrics> {
    let alt_title = utils::strip_title(&meta.title).to_string();
    let artist_set: HashSet<&str> = meta.artists.iter().map(String::as_str).collect();
    let trackname = utils::format_track(meta);
    for provider in providers {
        info!(track = %trackname, source = provider.id(), "fetching lyrics");
        let mut candidates = match provider.iter_all(cancel, meta).await {
            Ok(candidates) => candidates,
            Err(err) if err.is_canceled() => {
                debug!(track = %trackname, "fetch canceled");
                return None;
            }
            Err(err) => {
                warn!(track = %trackname, source = provider.id(), "{err}");
                continue;
            }
        };
        loop {
            let candidate = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(track = %trackname, "fetch canceled");
                    return None;
                }
                candidate = candidates.next() => match candidate {
                    Some(candidate) => candidate,
                    None => break,
                },
            };
            if !check_candidate(meta, &candidate, &alt_title, &artist_set) {
                continue;
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(ProviderError::Canceled),
                result = candidate.lyrics(cancel) => result,
            };
            match result {
                Ok(lyrics) => return Some(lyrics),
                Err(err) if err.is_canceled() => {
                    debug!(track = %trackname, "fetch canceled");
                    return None;
                }
                Err(_) => continue,
            }
        }
    }
    None
}

/// Race all providers; the first lyrics successfully obtained anywhere wins
/// and the shared token tears down the losing branches.
pub(super) async fn fetch_fastest(
    providers: &[Arc<dyn Provider>],
    cancel: &CancellationToken,
    meta: &TrackMetadata,
) -> Option<Lyrics> {
    let alt_title = utils::strip_title(&meta.title).to_string();
    let trackname = utils::format_track(meta);
    let (lyrics_tx, mut lyrics_rx) = mpsc::channel::<Lyrics>(providers.len().max(1));
    for provider in providers {
        info!(track = %trackname, source = provider.id(), "fetching lyrics");
        let provider = provider.clone();
        let cancel = cancel.clone();
        let meta = meta.clone();
        let alt_title = alt_title.clone();
        let trackname = trackname.clone();
        let lyrics_tx = lyrics_tx.clone();
        tokio::spawn(async move {
            let artist_set: HashSet<&str> = meta.artists.iter().map(String::as_str).collect();
            let mut candidates = match provider.iter_all(&cancel, &meta).await {
                Ok(candidates) => candidates,
                Err(err) if err.is_canceled() => {
                    debug!(track = %trackname, "fetch canceled");
                    return;
                }
                Err(err) => {
                    warn!(track = %trackname, source = provider.id(), "{err}");
                    return;
                }
            };
            loop {
                let candidate = tokio::select! {
                    _ = cancel.cancelled() => return,
                    candidate = candidates.next() => match candidate {
                        Some(candidate) => candidate,
                        None => return,
                    },
                };
                if !check_candidate(&meta, &candidate, &alt_title, &artist_set) {
                    continue;
                }
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(ProviderError::Canceled),
                    result = candidate.lyrics(&cancel) => result,
                };
                match result {
                    Ok(lyrics) => {
                        let _ = lyrics_tx.send(lyrics).await;
                    }
                    Err(err) if err.is_canceled() => {
                        debug!(track = %trackname, "fetch canceled");
                        return;
                    }
                    Err(_) => continue,
                }
            }
        });
    }
    drop(lyrics_tx);
    let winner = lyrics_rx.recv().await;
    if winner.is_some() {
        cancel.cancel();
    }
    winner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FetchFn;

    fn dummy_fetch() -> FetchFn {
        Box::new(|_cancel| Box::pin(async { Err(ProviderError::NoLyrics) }))
    }

    fn meta(title: &str, artists: &[&str], duration: Duration) -> TrackMetadata {
        TrackMetadata {
            title: title.to_string(),
            artists: artists.iter().map(|a| a.to_string()).collect(),
            duration,
            ..Default::default()
        }
    }

    fn candidate(titles: &[&str], artists: &[&str], duration: Duration) -> Candidate {
        Candidate::new(
            titles.iter().map(|t| t.to_string()).collect(),
            artists.iter().map(|a| a.to_string()).collect(),
            duration,
            dummy_fetch(),
        )
    }

    fn check(meta: &TrackMetadata, candidate: &Candidate) -> bool {
        let alt_title = utils::strip_title(&meta.title).to_string();
        let artist_set: HashSet<&str> = meta.artists.iter().map(String::as_str).collect();
        check_candidate(meta, candidate, &alt_title, &artist_set)
    }

    #[test]
    fn accepts_stripped_title_and_close_duration() {
        let meta = meta("春日影", &["CRYCHIC"], Duration::from_secs(258));
        let candidate = candidate(
            &["春日影 (MyGo!!!!! ver.)"],
            &["CRYCHIC"],
            Duration::from_millis(259_900),
        );
        assert!(check(&meta, &candidate));
    }

    #[test]
    fn duration_tolerance_is_inclusive() {
        let m = meta("Song", &["A"], Duration::from_secs(100));
        let at_limit = candidate(&["Song"], &["A"], Duration::from_secs(102));
        assert!(check(&m, &at_limit));
        let over = candidate(&["Song"], &["A"], Duration::from_millis(102_001));
        assert!(!check(&m, &over));
    }

    #[test]
    fn rejects_title_and_artist_mismatch() {
        let m = meta("Song", &["A"], Duration::from_secs(100));
        let wrong_title = candidate(&["Other"], &["A"], Duration::from_secs(100));
        assert!(!check(&m, &wrong_title));
        let wrong_artist = candidate(&["Song"], &["B"], Duration::from_secs(100));
        assert!(!check(&m, &wrong_artist));
        let alias_match = candidate(&["Other", "Song"], &["B", "A"], Duration::from_secs(100));
        assert!(check(&m, &alias_match));
    }
}
