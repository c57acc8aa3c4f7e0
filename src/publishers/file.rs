//! File publisher: writes each payload to a regular file or FIFO through a
//! user-supplied `%s` format template.

use std::path::Path;

use anyhow::{bail, Context};
use async_trait::async_trait;
use nix::sys::stat::Mode;
use serde::Deserialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{Publisher, FILE_PUBLISHER_ID};

#[derive(Debug, Deserialize)]
pub struct FilePublisherOptions {
    pub path: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "%s\n".to_string()
}

pub struct FilePublisher {
    file: Mutex<File>,
    format: String,
}

impl FilePublisher {
    pub async fn new(opt: FilePublisherOptions) -> anyhow::Result<Self> {
        let path = Path::new(&opt.path);
        if !path.is_absolute() {
            bail!("file publisher path must be absolute: {}", opt.path);
        }
        let file = match tokio::fs::metadata(path).await {
            Ok(meta) => {
                use std::os::unix::fs::FileTypeExt;
                if meta.file_type().is_fifo() {
                    // RDWR keeps the FIFO open without a blocked reader.
                    OpenOptions::new().read(true).write(true).open(path).await?
                } else {
                    OpenOptions::new().write(true).open(path).await?
                }
            }
            Err(_) => {
                if opt.path.ends_with(".pipe") {
                    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o644))
                        .with_context(|| format!("mkfifo {}", opt.path))?;
                    OpenOptions::new().read(true).write(true).open(path).await?
                } else {
                    OpenOptions::new().write(true).create(true).open(path).await?
                }
            }
        };
        Ok(FilePublisher {
            file: Mutex::new(file),
            format: opt.format,
        })
    }
}

#[async_trait]
impl Publisher for FilePublisher {
    fn id(&self) -> &'static str {
        FILE_PUBLISHER_ID
    }

    async fn send(&self, txt: &str) -> anyhow::Result<()> {
        let payload = self.format.replace("%s", txt);
        let mut file = self.file.lock().await;
        file.write_all(payload.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn exit(&self) -> anyhow::Result<()> {
        self.file.lock().await.shutdown().await?;
        Ok(())
    }
}
