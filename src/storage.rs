use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::fmt;
use tracing::debug;

/// Object storage collaborator: store bytes under a bucket key, get back the
/// public CDN URL the stored object resolves at.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<String>;
}

/// Upload gateway that accepts `PUT {upload_base}/{key}` and serves the object
/// from the CDN host.
#[derive(Clone)]
pub struct HttpObjectStore {
    http: Client,
    upload_base: Url,
    cdn_base: String,
}

impl fmt::Debug for HttpObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpObjectStore")
            .field("upload_base", &self.upload_base)
            .field("cdn_base", &self.cdn_base)
            .finish_non_exhaustive()
    }
}

impl HttpObjectStore {
    pub fn new(upload_base: &str, cdn_base: &str) -> Result<Self> {
        let upload_base = Url::parse(upload_base).context("invalid upload base URL")?;
        let http = Client::builder()
            .user_agent("storymill/0.1")
            .build()
            .expect("reqwest client");
        Ok(Self {
            http,
            upload_base,
            cdn_base: cdn_base.to_string(),
        })
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        let mut url = self.upload_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("upload base URL cannot carry a path"))?;
            segments.pop_if_empty();
            for segment in key.split('/') {
                segments.push(segment);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        let url = self.object_url(key)?;
        debug!(url=%url, size = bytes.len(), "uploading object");
        let res = self
            .http
            .put(url)
            .body(bytes)
            .send()
            .await
            .context("failed to reach object storage")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("object upload failed {}: {}", status, body));
        }
        Ok(format!("{}{key}", self.cdn_base))
    }
}
