//! The coordination core.
//!
//! The controller owns all mutable playback state behind one mutex,
//! processes snapshots from the bus ingress in order, dispatches lyric
//! fetches tagged with a monotonically increasing request id, advances the
//! playback position on a 100 ms tick, and pushes the active line to every
//! publisher entry. Fetch and tick tasks run outside the mutex and re-enter
//! only to commit.

mod fetch;
mod sink;

pub use sink::{PublisherEntry, EOT, ETX};

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::config::FetchMode;
use crate::matcher::Matcher;
use crate::models::{Lyrics, PlaybackStatus, PlayerProperties, TrackMetadata};
use crate::providers::Provider;
use crate::utils;

const TICK_INTERVAL: Duration = Duration::from_millis(100);

pub struct ControllerOptions {
    pub providers: Vec<Arc<dyn Provider>>,
    pub publishers: Vec<PublisherEntry>,
    pub fetch_mode: FetchMode,
    /// Upper bound on one fetch attempt in milliseconds; 0 disables the
    /// deadline and leaves the fetch cancellable only.
    pub fetch_timeout: u64,
    pub show_title: bool,
    pub filters: Vec<String>,
    pub url_blacklist: Vec<String>,
    pub cache_dir: Option<PathBuf>,
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

struct Inner {
    providers: Vec<Arc<dyn Provider>>,
    fetch_mode: FetchMode,
    fetch_timeout: u64,
    show_title: bool,
    filter_matcher: Option<Matcher>,
    url_matcher: Option<Matcher>,
    cache: Option<Arc<Cache>>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    publishers: Vec<PublisherEntry>,
    lyrics: Option<Arc<Lyrics>>,
    props: PlayerProperties,
    position: i64,
    cancel_ticking: Option<CancellationToken>,
    cancel_fetching: Option<CancellationToken>,
    current_request_id: u64,
}

impl Controller {
    pub fn new(opt: ControllerOptions) -> Self {
        let filter_matcher = (!opt.filters.is_empty()).then(|| Matcher::new(&opt.filters));
        let url_matcher = (!opt.url_blacklist.is_empty()).then(|| Matcher::new(&opt.url_blacklist));
        Controller {
            inner: Arc::new(Inner {
                providers: opt.providers,
                fetch_mode: opt.fetch_mode,
                fetch_timeout: opt.fetch_timeout,
                show_title: opt.show_title,
                filter_matcher,
                url_matcher,
                cache: opt.cache_dir.map(|dir| Arc::new(Cache::new(dir))),
                state: Mutex::new(State {
                    publishers: opt.publishers,
                    ..Default::default()
                }),
            }),
        }
    }

    /// Consume snapshots in bus order until the channel closes.
    pub async fn serve(&self, mut props_rx: mpsc::Receiver<PlayerProperties>) {
        while let Some(props) = props_rx.recv().await {
            self.process(props);
        }
    }

    fn process(&self, props: PlayerProperties) {
        debug!(?props, "process");
        let inner = &self.inner;
        let mut st = inner.state_lock();

        if props.status == PlaybackStatus::Unknown && props.metadata.title.is_empty() {
            info!("backend reset");
            Inner::reset_all(&mut st);
        } else if !utils::metadata_equal(&props.metadata, &st.props.metadata) {
            Inner::reset_all(&mut st);
            if props.metadata.title.is_empty() || props.metadata.artists.is_empty() {
                info!("invalid metadata");
                st.props = props;
                return;
            }
            if let Some(matcher) = &inner.url_matcher {
                if matcher.contains(props.metadata.url.as_bytes()) {
                    info!(url = %props.metadata.url, "blacklisted");
                    st.props = props;
                    return;
                }
            }
            let track_str = utils::format_track(&props.metadata);
            info!(track = %track_str, "playback changed");
            if inner.show_title && !props.metadata.title.is_empty() {
                for publisher in &st.publishers {
                    publisher.send(&track_str);
                }
            }
            st.current_request_id += 1;
            let req_id = st.current_request_id;
            let meta = props.metadata.clone();
            let task_inner = inner.clone();
            tokio::spawn(async move {
                Inner::run_fetch(task_inner, meta, req_id, track_str).await;
            });
        } else if props.status != st.props.status {
            if props.status == PlaybackStatus::Playing {
                info!("playback started");
                let position = st.position;
                let lyrics = st.lyrics.clone();
                let title = (inner.show_title && !props.metadata.title.is_empty())
                    .then(|| utils::format_track(&props.metadata));
                for publisher in &st.publishers {
                    match &lyrics {
                        Some(lyrics) if lyrics.index_of(position, publisher.offset) != -1 => {
                            publisher.send(lyrics.get(publisher.sent_index));
                        }
                        _ => {
                            if let Some(title) = &title {
                                publisher.send(title);
                            }
                        }
                    }
                }
                Inner::start_ticking(inner, &mut st);
            } else {
                info!("playback stopped");
                if let Some(cancel) = st.cancel_ticking.take() {
                    cancel.cancel();
                }
                for publisher in &st.publishers {
                    publisher.clear();
                }
            }
        }

        if props.position != st.props.position {
            st.position = props.position;
        }
        st.props = props;
    }

    /// Cancel everything and drive each sink through its shutdown sequence.
    pub async fn exit(&self) {
        let entries = {
            let mut st = self.inner.state_lock();
            Inner::reset_all(&mut st);
            std::mem::take(&mut st.publishers)
        };
        for entry in entries {
            entry.exit().await;
        }
    }
}

impl Inner {
    fn state_lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_all(st: &mut State) {
        if let Some(cancel) = st.cancel_ticking.take() {
            cancel.cancel();
        }
        if let Some(cancel) = st.cancel_fetching.take() {
            cancel.cancel();
        }
        st.position = 0;
        st.lyrics = None;
        for publisher in &mut st.publishers {
            publisher.sent_index = -1;
            publisher.clear();
        }
    }

    fn set_lyrics(&self, st: &mut State, lyrics: Lyrics) {
        let Some(matcher) = &self.filter_matcher else {
            st.lyrics = Some(Arc::new(lyrics));
            return;
        };
        let Lyrics { lines, source } = lyrics;
        let lines = lines
            .into_iter()
            .filter(|line| !matcher.contains(line.text.as_bytes()))
            .collect();
        st.lyrics = Some(Arc::new(Lyrics { lines, source }));
    }

    async fn run_fetch(inner: Arc<Inner>, meta: TrackMetadata, req_id: u64, track_str: String) {
        let (lyrics, should_cache) = Inner::fetch_lyrics(&inner, &meta, req_id, &track_str).await;

        if let (Some(cache), Some(lyrics)) = (&inner.cache, &lyrics) {
            if should_cache {
                info!(track = %track_str, source = %lyrics.source, "set cache");
                let cache = cache.clone();
                let meta = meta.clone();
                let lyrics = lyrics.clone();
                tokio::task::spawn_blocking(move || {
                    if let Err(err) = cache.set(&meta, &lyrics) {
                        warn!(%err, "cache write failed");
                    }
                });
            }
        }

        let mut st = inner.state_lock();
        if req_id != st.current_request_id {
            info!(track = %track_str, "request discarded");
            return;
        }
        let Some(lyrics) = lyrics else {
            info!(track = %track_str, "no lyrics available");
            return;
        };
        info!(track = %track_str, source = %lyrics.source, "got lyrics");
        inner.set_lyrics(&mut st, lyrics);
        if st.props.status == PlaybackStatus::Playing {
            Inner::start_ticking(&inner, &mut st);
        }
    }

    /// Returns the fetched lyrics (if any) plus whether they came from a
    /// provider and should be written to the cache.
    async fn fetch_lyrics(
        inner: &Arc<Inner>,
        meta: &TrackMetadata,
        req_id: u64,
        track_str: &str,
    ) -> (Option<Lyrics>, bool) {
        if let Some(cache) = &inner.cache {
            let cache = cache.clone();
            let lookup_meta = meta.clone();
            let cached = tokio::task::spawn_blocking(move || cache.get(&lookup_meta)).await;
            if let Ok(Ok(lyrics)) = cached {
                info!(track = %track_str, "got cache");
                return (Some(lyrics), false);
            }
        }

        if !meta.text.is_empty() {
            if let Ok(lines) = utils::parse_lrc(&meta.text) {
                return (
                    Some(Lyrics {
                        lines,
                        source: "mpris".to_string(),
                    }),
                    false,
                );
            }
        }

        if inner.providers.is_empty() {
            return (None, false);
        }

        let cancel = CancellationToken::new();
        {
            let mut st = inner.state_lock();
            if req_id != st.current_request_id {
                drop(st);
                cancel.cancel();
                info!(track = %track_str, "request canceled");
                return (None, false);
            }
            if let Some(prev) = st.cancel_fetching.replace(cancel.clone()) {
                prev.cancel();
            }
        }

        let run = async {
            match inner.fetch_mode {
                FetchMode::Fallback => {
                    fetch::fetch_fallback(&inner.providers, &cancel, meta).await
                }
                FetchMode::Fastest => fetch::fetch_fastest(&inner.providers, &cancel, meta).await,
            }
        };
        let lyrics = if inner.fetch_timeout > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(inner.fetch_timeout)) => {
                    cancel.cancel();
                    None
                }
                lyrics = run => lyrics,
            }
        } else {
            run.await
        };
        (lyrics, true)
    }

    fn start_ticking(inner: &Arc<Inner>, st: &mut State) {
        if let Some(prev) = st.cancel_ticking.take() {
            prev.cancel();
        }
        let token = CancellationToken::new();
        st.cancel_ticking = Some(token.clone());
        let inner = inner.clone();
        tokio::spawn(async move {
            Inner::tick_loop(inner, token).await;
        });
    }

    async fn tick_loop(inner: Arc<Inner>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(TICK_INTERVAL) => {}
            }
            let mut st = inner.state_lock();
            let Some(lyrics) = st.lyrics.clone() else {
                Inner::finish_ticking(&mut st, &token);
                return;
            };
            st.position += 100;
            let position = st.position;
            let last = lyrics.len() as i64 - 1;
            let mut all_done = true;
            for publisher in &mut st.publishers {
                let idx = lyrics.index_of(position, publisher.offset);
                if idx < last {
                    all_done = false;
                }
                if idx == publisher.sent_index {
                    continue;
                }
                publisher.sent_index = idx;
                publisher.send(lyrics.get(idx));
            }
            if all_done {
                Inner::finish_ticking(&mut st, &token);
                return;
            }
        }
    }

    fn finish_ticking(st: &mut State, token: &CancellationToken) {
        // A successor ticker cancels this token before installing its own
        // handle, so an uncancelled token still owns the slot.
        if !token.is_cancelled() {
            if let Some(cancel) = st.cancel_ticking.take() {
                cancel.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LyricLine;
    use crate::providers::{Candidate, CandidateStream, ProviderError};
    use crate::publishers::Publisher;
    use async_trait::async_trait;
    use futures_util::stream;
    use futures_util::StreamExt;
    use std::sync::Mutex as StdMutex;
    use tokio_util::sync::CancellationToken;

    struct RecordingPublisher {
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        fn id(&self) -> &'static str {
            "rec"
        }

        async fn send(&self, txt: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(txt.to_string());
            Ok(())
        }

        async fn exit(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Yields one candidate matching whatever metadata was asked for, whose
    /// lyrics carry the requested title as line text after `delay`.
    struct EchoProvider {
        delay: Duration,
    }

    #[async_trait]
    impl crate::providers::Provider for EchoProvider {
        fn id(&self) -> &'static str {
            "echo"
        }

        async fn iter_all(
            &self,
            _cancel: &CancellationToken,
            meta: &TrackMetadata,
        ) -> Result<CandidateStream, ProviderError> {
            let delay = self.delay;
            let lyrics = Lyrics {
                lines: vec![
                    LyricLine {
                        position: 0,
                        text: meta.title.clone(),
                    },
                    LyricLine {
                        position: 60_000,
                        text: "ending".to_string(),
                    },
                ],
                source: "echo".to_string(),
            };
            let candidate = Candidate::new(
                vec![meta.title.clone()],
                meta.artists.clone(),
                meta.duration,
                Box::new(move |cancel| {
                    Box::pin(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => Err(ProviderError::Canceled),
                            _ = tokio::time::sleep(delay) => Ok(lyrics),
                        }
                    })
                }),
            );
            Ok(stream::iter(vec![candidate]).boxed())
        }
    }

    struct FixedProvider {
        lines: Vec<LyricLine>,
    }

    #[async_trait]
    impl crate::providers::Provider for FixedProvider {
        fn id(&self) -> &'static str {
            "fixed"
        }

        async fn iter_all(
            &self,
            _cancel: &CancellationToken,
            meta: &TrackMetadata,
        ) -> Result<CandidateStream, ProviderError> {
            let lyrics = Lyrics {
                lines: self.lines.clone(),
                source: "fixed".to_string(),
            };
            let candidate = Candidate::new(
                vec![meta.title.clone()],
                meta.artists.clone(),
                meta.duration,
                Box::new(move |_cancel| Box::pin(async move { Ok(lyrics) })),
            );
            Ok(stream::iter(vec![candidate]).boxed())
        }
    }

    fn snapshot(title: &str, status: PlaybackStatus, position: i64) -> PlayerProperties {
        PlayerProperties {
            metadata: TrackMetadata {
                title: title.to_string(),
                artists: vec!["Artist".to_string()],
                duration: Duration::from_secs(200),
                ..Default::default()
            },
            position,
            status,
        }
    }

    fn build(
        providers: Vec<Arc<dyn crate::providers::Provider>>,
        filters: Vec<String>,
        show_title: bool,
    ) -> (Controller, Arc<StdMutex<Vec<String>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let publisher = Arc::new(RecordingPublisher { sent: sent.clone() });
        let controller = Controller::new(ControllerOptions {
            providers,
            publishers: vec![PublisherEntry::new(publisher, 0)],
            fetch_mode: FetchMode::Fallback,
            fetch_timeout: 0,
            show_title,
            filters,
            url_blacklist: Vec::new(),
            cache_dir: None,
        });
        (controller, sent)
    }

    fn sent_lines(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<String> {
        sent.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[tokio::test]
    async fn track_change_fetches_commits_and_ticks() {
        let (controller, sent) = build(
            vec![Arc::new(EchoProvider {
                delay: Duration::from_millis(10),
            })],
            Vec::new(),
            true,
        );
        controller.process(snapshot("Song", PlaybackStatus::Playing, 0));
        tokio::time::sleep(Duration::from_millis(400)).await;

        let sent = sent_lines(&sent);
        assert!(sent.contains(&"Song - Artist".to_string()), "{sent:?}");
        assert!(sent.contains(&"Song".to_string()), "{sent:?}");

        let st = controller.inner.state_lock();
        assert_eq!(
            st.lyrics.as_ref().map(|l| l.source.clone()),
            Some("echo".to_string())
        );
        assert_eq!(st.publishers[0].sent_index, 0);
    }

    #[tokio::test]
    async fn superseded_fetch_is_discarded() {
        let (controller, sent) = build(
            vec![Arc::new(EchoProvider {
                delay: Duration::from_millis(80),
            })],
            Vec::new(),
            false,
        );
        controller.process(snapshot("First", PlaybackStatus::Playing, 0));
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.process(snapshot("Second", PlaybackStatus::Playing, 0));
        tokio::time::sleep(Duration::from_millis(400)).await;

        let st = controller.inner.state_lock();
        let lines: Vec<String> = st
            .lyrics
            .as_ref()
            .map(|l| l.lines.iter().map(|l| l.text.clone()).collect())
            .unwrap_or_default();
        assert!(lines.contains(&"Second".to_string()), "{lines:?}");
        assert!(!lines.contains(&"First".to_string()), "{lines:?}");
        drop(st);
        assert!(
            !sent_lines(&sent).contains(&"First".to_string()),
            "stale lyrics must never reach a sink"
        );
    }

    #[tokio::test]
    async fn filter_drops_matching_lines_before_dispatch() {
        let (controller, _sent) = build(
            vec![Arc::new(FixedProvider {
                lines: vec![
                    LyricLine {
                        position: 0,
                        text: "作词: X".to_string(),
                    },
                    LyricLine {
                        position: 1000,
                        text: "la la".to_string(),
                    },
                ],
            })],
            vec!["作词".to_string()],
            false,
        );
        controller.process(snapshot("Song", PlaybackStatus::Paused, 0));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let st = controller.inner.state_lock();
        let lyrics = st.lyrics.as_ref().expect("lyrics committed");
        assert_eq!(lyrics.lines.len(), 1);
        assert_eq!(lyrics.lines[0].text, "la la");
    }

    #[tokio::test]
    async fn backend_reset_clears_state_and_sinks() {
        let (controller, sent) = build(
            vec![Arc::new(EchoProvider {
                delay: Duration::from_millis(5),
            })],
            Vec::new(),
            false,
        );
        controller.process(snapshot("Song", PlaybackStatus::Playing, 0));
        tokio::time::sleep(Duration::from_millis(200)).await;
        controller.process(PlayerProperties::default());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let st = controller.inner.state_lock();
        assert!(st.lyrics.is_none());
        assert_eq!(st.position, 0);
        assert_eq!(st.publishers[0].sent_index, -1);
        drop(st);
        assert!(sent_lines(&sent).contains(&ETX.to_string()));
    }

    #[tokio::test]
    async fn pause_stops_ticking_and_clears() {
        let (controller, sent) = build(
            vec![Arc::new(EchoProvider {
                delay: Duration::from_millis(5),
            })],
            Vec::new(),
            false,
        );
        controller.process(snapshot("Song", PlaybackStatus::Playing, 0));
        tokio::time::sleep(Duration::from_millis(200)).await;
        controller.process(snapshot("Song", PlaybackStatus::Paused, 300));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let st = controller.inner.state_lock();
        assert!(st.cancel_ticking.is_none());
        assert_eq!(st.position, 300);
        drop(st);
        assert!(sent_lines(&sent).contains(&ETX.to_string()));
    }

    #[tokio::test]
    async fn invalid_metadata_only_resets() {
        let (controller, sent) = build(
            vec![Arc::new(EchoProvider {
                delay: Duration::from_millis(5),
            })],
            Vec::new(),
            true,
        );
        let mut props = snapshot("Song", PlaybackStatus::Playing, 500);
        props.metadata.artists.clear();
        controller.process(props);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let st = controller.inner.state_lock();
        assert_eq!(st.current_request_id, 0, "no fetch may be dispatched");
        assert_eq!(st.position, 0, "reset wins; no position re-install");
        drop(st);
        let sent = sent_lines(&sent);
        assert_eq!(sent, vec![ETX.to_string()]);
    }
}
