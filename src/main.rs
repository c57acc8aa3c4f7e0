use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::info;

use lrcd::config::Config;
use lrcd::controller::{Controller, ControllerOptions};
use lrcd::mpris::Mpris;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_dir = dirs::config_dir()
        .context("no user config directory")?
        .join("lrcd");
    std::fs::create_dir_all(&config_dir).context("create config directory")?;
    let config = Config::parse(&config_dir.join("config.yaml"))?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let cache_dir = if config.use_cache {
        let dir = dirs::cache_dir()
            .context("no user cache directory")?
            .join("lrcd");
        std::fs::create_dir_all(&dir).context("create cache directory")?;
        Some(dir)
    } else {
        None
    };

    let conn = zbus::Connection::session()
        .await
        .context("connect to session bus")?;

    let providers = config.create_providers();
    let publishers = config.create_publishers().await;

    let (props_tx, props_rx) = mpsc::channel(8);
    let controller = Controller::new(ControllerOptions {
        providers,
        publishers,
        fetch_mode: config.fetch_mode,
        fetch_timeout: config.fetch_timeout,
        show_title: config.show_title,
        filters: config.filters.clone(),
        url_blacklist: config.url_blacklist.clone(),
        cache_dir,
    });
    let mpris = Mpris::new(props_tx, conn.clone());

    {
        let mpris = mpris.clone();
        tokio::spawn(async move {
            if let Err(err) = mpris.serve().await {
                tracing::error!(%err, "mpris ingress failed");
            }
        });
    }
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller.serve(props_rx).await;
        });
    }

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
    }

    conn.graceful_shutdown().await;
    mpris.exit();
    controller.exit().await;
    Ok(())
}
