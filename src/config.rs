//! Configuration: a YAML document in the user config directory selects the
//! log level, fetch policy, filters, and the provider/publisher sets.
//!
//! Parsing is two-phase so logging can be initialized in between: scalar
//! options (including the log level) are validated eagerly and are fatal
//! when invalid, while providers and publishers are constructed afterwards,
//! skipping and logging unknown or misconfigured entries.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::{error, Level};

use crate::controller::PublisherEntry;
use crate::providers::{self, Provider};
use crate::publishers::{self, Publisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    #[default]
    Fallback,
    Fastest,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    log_level: String,
    fetch_mode: String,
    fetch_timeout: u64,
    show_title: bool,
    use_cache: bool,
    filters: Vec<String>,
    url_blacklist: Vec<String>,
    providers: Vec<RawProvider>,
    publishers: Vec<RawPublisher>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawProvider {
    id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPublisher {
    id: String,
    offset: i64,
    options: serde_yaml::Value,
}

pub struct Config {
    pub log_level: Level,
    pub fetch_mode: FetchMode,
    pub fetch_timeout: u64,
    pub show_title: bool,
    pub use_cache: bool,
    pub filters: Vec<String>,
    pub url_blacklist: Vec<String>,
    providers: Vec<RawProvider>,
    publishers: Vec<RawPublisher>,
}

impl Config {
    pub fn parse(path: &Path) -> anyhow::Result<Self> {
        let buf = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Self::parse_str(&buf)
    }

    fn parse_str(buf: &str) -> anyhow::Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(buf).context("parse config")?;

        let fetch_mode = match raw.fetch_mode.as_str() {
            "fallback" | "" => FetchMode::Fallback,
            "fastest" => FetchMode::Fastest,
            other => bail!("unknown fetch mode {other:?}"),
        };
        let log_level = match raw.log_level.as_str() {
            "debug" => Level::DEBUG,
            "info" | "" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            other => bail!("unknown log level {other:?}"),
        };

        Ok(Config {
            log_level,
            fetch_mode,
            fetch_timeout: raw.fetch_timeout,
            show_title: raw.show_title,
            use_cache: raw.use_cache,
            filters: raw.filters,
            url_blacklist: raw.url_blacklist,
            providers: raw.providers,
            publishers: raw.publishers,
        })
    }

    /// Instantiate the configured providers, in declared order. Unknown ids
    /// log and are skipped.
    pub fn create_providers(&self) -> Vec<Arc<dyn Provider>> {
        let mut built: Vec<Arc<dyn Provider>> = Vec::with_capacity(self.providers.len());
        for raw in &self.providers {
            match create_provider(&raw.id) {
                Ok(provider) => built.push(provider),
                Err(err) => error!(%err, "skipping provider"),
            }
        }
        built
    }

    /// Instantiate the configured publishers, each wrapped in its queue
    /// entry. Unknown ids or bad options log and are skipped.
    pub async fn create_publishers(&self) -> Vec<PublisherEntry> {
        let mut built = Vec::with_capacity(self.publishers.len());
        for raw in &self.publishers {
            match create_publisher(&raw.id, raw.options.clone()).await {
                Ok(publisher) => built.push(PublisherEntry::new(publisher, raw.offset)),
                Err(err) => error!(%err, "skipping publisher"),
            }
        }
        built
    }
}

fn create_provider(id: &str) -> anyhow::Result<Arc<dyn Provider>> {
    Ok(match id {
        providers::MXM_PROVIDER_ID => Arc::new(providers::mxm::MxmProvider::new()),
        providers::LRCLIB_PROVIDER_ID => Arc::new(providers::lrclib::LrclibProvider::new()),
        providers::KUGOU_PROVIDER_ID => Arc::new(providers::kugou::KugouProvider::new()),
        providers::NCM_PROVIDER_ID => Arc::new(providers::ncm::NcmProvider::new()),
        providers::KUWO_PROVIDER_ID => Arc::new(providers::kuwo::KuwoProvider::new()),
        other => bail!("unknown provider {other:?}"),
    })
}

async fn create_publisher(
    id: &str,
    options: serde_yaml::Value,
) -> anyhow::Result<Arc<dyn Publisher>> {
    Ok(match id {
        publishers::FILE_PUBLISHER_ID => {
            let opt = serde_yaml::from_value(options).context("file publisher options")?;
            Arc::new(publishers::file::FilePublisher::new(opt).await?)
        }
        publishers::HTTP_PUBLISHER_ID => {
            let opt = serde_yaml::from_value(options).context("http publisher options")?;
            Arc::new(publishers::http::HttpPublisher::new(opt)?)
        }
        publishers::WEBSOCKET_PUBLISHER_ID => {
            let opt = serde_yaml::from_value(options).context("websocket publisher options")?;
            Arc::new(publishers::websocket::WebSocketPublisher::new(opt).await?)
        }
        publishers::DBUS_PUBLISHER_ID => {
            let opt = serde_yaml::from_value(options).context("dbus publisher options")?;
            Arc::new(publishers::dbus::DbusPublisher::new(opt).await?)
        }
        other => bail!("unknown publisher {other:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::parse_str("{}").unwrap();
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.fetch_mode, FetchMode::Fallback);
        assert_eq!(config.fetch_timeout, 0);
        assert!(!config.show_title);
        assert!(!config.use_cache);
        assert!(config.providers.is_empty());
        assert!(config.publishers.is_empty());
    }

    #[test]
    fn full_document_parses() {
        let config = Config::parse_str(
            r#"
log_level: debug
fetch_mode: fastest
fetch_timeout: 5000
show_title: true
use_cache: true
filters: ["作词", "作曲"]
url_blacklist: ["advert.example"]
providers:
  - id: lrclib
  - id: ncm
publishers:
  - id: file
    offset: -200
    options:
      path: /tmp/lyrics.pipe
      format: "%s\n"
"#,
        )
        .unwrap();
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.fetch_mode, FetchMode::Fastest);
        assert_eq!(config.fetch_timeout, 5000);
        assert!(config.show_title);
        assert!(config.use_cache);
        assert_eq!(config.filters.len(), 2);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.publishers.len(), 1);
        assert_eq!(config.publishers[0].offset, -200);
    }

    #[test]
    fn unknown_scalars_are_fatal() {
        assert!(Config::parse_str("fetch_mode: bogus").is_err());
        assert!(Config::parse_str("log_level: loud").is_err());
        assert!(Config::parse_str(": not yaml :").is_err());
    }

    #[test]
    fn unknown_provider_entries_are_skipped() {
        let config = Config::parse_str(
            r#"
providers:
  - id: lrclib
  - id: spotify
  - id: kuwo
"#,
        )
        .unwrap();
        let providers = config.create_providers();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].id(), "lrclib");
        assert_eq!(providers[1].id(), "kuwo");
    }

    #[tokio::test]
    async fn unknown_publisher_entries_are_skipped() {
        let config = Config::parse_str(
            r#"
publishers:
  - id: carrier-pigeon
"#,
        )
        .unwrap();
        assert!(config.create_publishers().await.is_empty());
    }
}
