//! Session-bus publisher: emits each payload as the sole argument of a
//! signal at the configured object path.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use zvariant::ObjectPath;

use super::{Publisher, DBUS_PUBLISHER_ID};

#[derive(Debug, Deserialize)]
pub struct DbusPublisherOptions {
    pub path: String,
    /// Fully qualified signal name, `interface.Member`.
    pub name: String,
}

pub struct DbusPublisher {
    conn: zbus::Connection,
    path: String,
    interface: String,
    member: String,
}

impl DbusPublisher {
    pub async fn new(opt: DbusPublisherOptions) -> anyhow::Result<Self> {
        let Some((interface, member)) = opt.name.rsplit_once('.') else {
            bail!("dbus publisher name must be interface.member: {}", opt.name);
        };
        ObjectPath::try_from(opt.path.as_str())
            .with_context(|| format!("invalid object path {:?}", opt.path))?;
        let conn = zbus::Connection::session()
            .await
            .context("connect to session bus")?;
        Ok(DbusPublisher {
            conn,
            path: opt.path,
            interface: interface.to_string(),
            member: member.to_string(),
        })
    }
}

#[async_trait]
impl Publisher for DbusPublisher {
    fn id(&self) -> &'static str {
        DBUS_PUBLISHER_ID
    }

    async fn send(&self, txt: &str) -> anyhow::Result<()> {
        self.conn
            .emit_signal(
                None::<&str>,
                self.path.as_str(),
                self.interface.as_str(),
                self.member.as_str(),
                &(txt,),
            )
            .await?;
        Ok(())
    }

    async fn exit(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
