//! MPRIS ingress: watches the session bus and emits debounced playback
//! snapshots to the controller.
//!
//! Two signal subscriptions cover everything: `PropertiesChanged` under the
//! MPRIS path namespace for metadata/status updates and `Seeked` for
//! explicit position jumps. A working snapshot is folded over the incoming
//! signals and emitted after a short debounce, because some players (eg.
//! kdeconnect) fan one logical update out over several signals. While a
//! backend is playing, its `Position` is polled every two seconds.

pub mod metadata;

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use zbus::names::InterfaceName;
use zbus::{fdo, MatchRule, MessageStream};

use crate::models::{PlaybackStatus, PlayerProperties};

const DEBOUNCE: Duration = Duration::from_millis(20);
const POSITION_POLL: Duration = Duration::from_secs(2);
const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";
const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

fn player_interface() -> InterfaceName<'static> {
    InterfaceName::from_static_str_unchecked(PLAYER_INTERFACE)
}

#[derive(Clone)]
pub struct Mpris {
    inner: Arc<MprisInner>,
}

struct MprisInner {
    props_tx: mpsc::Sender<PlayerProperties>,
    conn: zbus::Connection,
    state: Mutex<IngressState>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct IngressState {
    props: PlayerProperties,
    cancel_checker: Option<CancellationToken>,
}

/// Optional pinned sleep used to coalesce signal bursts.
struct Debouncer {
    sleep: Option<Pin<Box<Sleep>>>,
    duration: Duration,
}

impl Debouncer {
    fn new(duration: Duration) -> Self {
        Debouncer {
            sleep: None,
            duration,
        }
    }

    fn start(&mut self) {
        self.sleep = Some(Box::pin(sleep(self.duration)));
    }

    fn is_active(&self) -> bool {
        self.sleep.is_some()
    }

    async fn wait(&mut self) {
        if let Some(sleep_fut) = self.sleep.as_mut() {
            sleep_fut.as_mut().await;
        }
        self.sleep = None;
    }
}

impl Mpris {
    pub fn new(props_tx: mpsc::Sender<PlayerProperties>, conn: zbus::Connection) -> Self {
        Mpris {
            inner: Arc::new(MprisInner {
                props_tx,
                conn,
                state: Mutex::new(IngressState::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Run the ingress: probe for an already-playing backend, then fold bus
    /// signals into snapshots until the connection closes or [`exit`]
    /// (Self::exit) is called.
    pub async fn serve(&self) -> anyhow::Result<()> {
        let checker = self.inner.clone();
        tokio::spawn(async move {
            MprisInner::start_checker(checker).await;
        });
        MprisInner::listen_signals(&self.inner).await
    }

    /// Stop the signal loop and cancel any in-flight position checker.
    pub fn exit(&self) {
        self.inner.shutdown.cancel();
        let mut st = self.inner.state_lock();
        if let Some(cancel) = st.cancel_checker.take() {
            cancel.cancel();
        }
    }
}

impl MprisInner {
    fn state_lock(&self) -> MutexGuard<'_, IngressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn listen_signals(inner: &Arc<Self>) -> anyhow::Result<()> {
        let props_rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .interface("org.freedesktop.DBus.Properties")?
            .member("PropertiesChanged")?
            .path_namespace(MPRIS_PATH)?
            .build();
        let seeked_rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .interface(PLAYER_INTERFACE)?
            .member("Seeked")?
            .path_namespace(MPRIS_PATH)?
            .build();
        let props_stream = MessageStream::for_match_rule(props_rule, &inner.conn, Some(8)).await?;
        let seeked_stream = MessageStream::for_match_rule(seeked_rule, &inner.conn, Some(8)).await?;
        let mut signals = futures_util::stream::select(props_stream, seeked_stream);

        let mut debouncer = Debouncer::new(DEBOUNCE);
        let mut pending: Option<PlayerProperties> = None;
        loop {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                msg = signals.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(_)) => continue,
                        None => break,
                    };
                    let snapshot = {
                        let mut st = inner.state_lock();
                        Self::handle_signal(inner, &mut st, &msg);
                        st.props.clone()
                    };
                    pending = Some(snapshot);
                    debouncer.start();
                }
                _ = debouncer.wait(), if debouncer.is_active() => {
                    if let Some(props) = pending.take() {
                        let _ = inner.props_tx.send(props).await;
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_signal(inner: &Arc<Self>, st: &mut IngressState, msg: &zbus::Message) {
        let header = msg.header();
        let Some(member) = header.member() else {
            return;
        };
        match member.as_str() {
            "PropertiesChanged" => Self::on_properties_changed(inner, st, msg),
            "Seeked" => Self::on_seeked(st, msg),
            _ => {}
        }
    }

    fn on_properties_changed(inner: &Arc<Self>, st: &mut IngressState, msg: &zbus::Message) {
        type Body = (
            String,
            std::collections::HashMap<String, zvariant::OwnedValue>,
            Vec<String>,
        );
        let Ok((_, changed, _)) = msg.body().deserialize::<Body>() else {
            return;
        };
        if let Some(value) = changed.get("Metadata") {
            if let Some(meta) = metadata::parse_metadata_value(value) {
                st.props.metadata = meta;
            }
        }
        if let Some(value) = changed.get("PlaybackStatus") {
            if let Some(status) = metadata::value_str(value) {
                st.props.status = metadata::parse_playback_status(&status);
                if let Some(cancel) = st.cancel_checker.take() {
                    cancel.cancel();
                }
                if st.props.status == PlaybackStatus::Playing {
                    let inner = inner.clone();
                    tokio::spawn(async move {
                        MprisInner::start_checker(inner).await;
                    });
                }
            }
        }
    }

    fn on_seeked(st: &mut IngressState, msg: &zbus::Message) {
        if let Ok(position_us) = msg.body().deserialize::<i64>() {
            st.props.position = position_us / 1000;
        }
    }

    /// Probe bus names under the MPRIS prefix, adopt the first backend that
    /// is currently playing, and poll its position until cancelled or the
    /// backend disappears.
    async fn start_checker(inner: Arc<Self>) {
        let Ok(dbus) = fdo::DBusProxy::new(&inner.conn).await else {
            return;
        };
        let Ok(names) = dbus.list_names().await else {
            return;
        };

        let mut focus = None;
        let mut token = None;
        for name in names {
            if !name.as_str().starts_with(MPRIS_PREFIX) {
                continue;
            }
            let Ok(builder) = fdo::PropertiesProxy::builder(&inner.conn).destination(name) else {
                continue;
            };
            let Ok(builder) = builder.path(MPRIS_PATH) else {
                continue;
            };
            let Ok(proxy) = builder.build().await else {
                continue;
            };
            let Ok(all) = proxy.get_all(player_interface()).await else {
                continue;
            };
            let props = metadata::parse_properties(&all);
            if props.status != PlaybackStatus::Playing {
                continue;
            }
            let cancel = CancellationToken::new();
            let _ = inner.props_tx.send(props.clone()).await;
            {
                let mut st = inner.state_lock();
                st.props = props;
                st.cancel_checker = Some(cancel.clone());
            }
            token = Some(cancel);
            focus = Some(proxy);
            break;
        }
        let (Some(token), Some(focus)) = (token, focus) else {
            return;
        };

        if !Self::update_position(&inner, &focus).await {
            return;
        }
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(POSITION_POLL) => {
                    if !Self::update_position(&inner, &focus).await {
                        return;
                    }
                }
            }
        }
    }

    /// One `Position` poll; a failure means the backend went away, so the
    /// checker cancels itself and signals a backend reset downstream.
    async fn update_position(inner: &Arc<Self>, proxy: &fdo::PropertiesProxy<'_>) -> bool {
        match proxy.get(player_interface(), "Position").await {
            Ok(value) => {
                let position_us = metadata::value_i64(&value).unwrap_or(0);
                let props = {
                    let mut st = inner.state_lock();
                    st.props.position = position_us / 1000;
                    st.props.clone()
                };
                let _ = inner.props_tx.send(props).await;
                true
            }
            Err(err) => {
                warn!(%err, "position query failed");
                {
                    let mut st = inner.state_lock();
                    if let Some(cancel) = st.cancel_checker.take() {
                        cancel.cancel();
                    }
                }
                let _ = inner.props_tx.send(PlayerProperties::default()).await;
                false
            }
        }
    }
}
