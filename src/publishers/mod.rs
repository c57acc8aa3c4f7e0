//! Downstream sinks for the current lyric line.
//!
//! A publisher accepts a text payload and exposes teardown; everything else
//! (queueing, drop policy, sentinels) lives in the controller's sink fanout.

pub mod dbus;
pub mod file;
pub mod http;
pub mod websocket;

use async_trait::async_trait;

pub const FILE_PUBLISHER_ID: &str = "file";
pub const HTTP_PUBLISHER_ID: &str = "http";
pub const WEBSOCKET_PUBLISHER_ID: &str = "websocket";
pub const DBUS_PUBLISHER_ID: &str = "dbus";

#[async_trait]
pub trait Publisher: Send + Sync {
    fn id(&self) -> &'static str;

    /// Deliver one payload. Errors are logged by the caller; a failing sink
    /// stays registered.
    async fn send(&self, txt: &str) -> anyhow::Result<()>;

    async fn exit(&self) -> anyhow::Result<()>;
}
