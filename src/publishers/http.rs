//! HTTP publisher: one request per payload, raw body.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use crate::providers::http_client;

use super::{Publisher, HTTP_PUBLISHER_ID};

#[derive(Debug, Deserialize)]
pub struct HttpPublisherOptions {
    pub method: String,
    pub url: String,
}

pub struct HttpPublisher {
    method: Method,
    url: String,
}

impl HttpPublisher {
    pub fn new(opt: HttpPublisherOptions) -> anyhow::Result<Self> {
        let method = Method::from_bytes(opt.method.as_bytes())
            .with_context(|| format!("invalid http method {:?}", opt.method))?;
        Ok(HttpPublisher {
            method,
            url: opt.url,
        })
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    fn id(&self) -> &'static str {
        HTTP_PUBLISHER_ID
    }

    async fn send(&self, txt: &str) -> anyhow::Result<()> {
        http_client()
            .request(self.method.clone(), &self.url)
            .body(txt.to_string())
            .send()
            .await?;
        Ok(())
    }

    async fn exit(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
