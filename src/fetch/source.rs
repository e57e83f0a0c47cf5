//! Asset sources for texture bytes
//!
//! Sources return encoded image bytes; decoding and discard-level reduction
//! happen in the fetch worker.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Encoded image bytes from a source
#[derive(Debug, Clone)]
pub struct SourcePayload {
    pub bytes: Bytes,
    pub from_cache: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Asset not found")]
    NotFound,

    #[error("Transient source failure: {reason}")]
    Transient { reason: String },
}

#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, id: Uuid, discard: u8, host: Option<SocketAddr>) -> Result<SourcePayload, SourceError>;
}

const CACHE_EXTENSIONS: [&str; 5] = ["png", "tga", "jpg", "jpeg", "bmp"];

/// Local texture cache: `{dir}/{uuid}.{png,tga,jpg,jpeg,bmp}`
#[derive(Debug, Clone)]
pub struct CacheDirSource {
    dir: PathBuf,
}

impl CacheDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[async_trait]
impl AssetSource for CacheDirSource {
    async fn fetch(&self, id: Uuid, _discard: u8, _host: Option<SocketAddr>) -> Result<SourcePayload, SourceError> {
        for ext in CACHE_EXTENSIONS {
            let path = self.dir.join(format!("{}.{}", id, ext));
            match tokio::fs::read(&path).await {
                Ok(data) => {
                    debug!("📋 Cache HIT for texture {} ({} bytes)", id, data.len());
                    return Ok(SourcePayload { bytes: Bytes::from(data), from_cache: true });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(SourceError::Transient { reason: format!("{}: {}", path.display(), e) });
                }
            }
        }
        debug!("📋 Cache MISS for texture {}", id);
        Err(SourceError::NotFound)
    }
}

/// GetTexture-style HTTP capability: `GET {base}?texture_id={uuid}`
#[derive(Debug, Clone)]
pub struct HttpAssetSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAssetSource {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("slv-texture-stream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Transient { reason: e.to_string() })?;
        info!("🌐 Texture fetches use {}", base_url);
        Ok(Self { client, base_url })
    }

    fn texture_url(&self, id: Uuid) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("texture_id", &id.to_string());
        url
    }
}

#[async_trait]
impl AssetSource for HttpAssetSource {
    async fn fetch(&self, id: Uuid, _discard: u8, _host: Option<SocketAddr>) -> Result<SourcePayload, SourceError> {
        let url = self.texture_url(id);
        debug!("🖼️ Requesting texture: {}", id);

        let response = self
            .client
            .get(url)
            .header("Accept", "image/x-j2c, image/*")
            .send()
            .await
            .map_err(|e| SourceError::Transient { reason: e.to_string() })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            warn!("❌ Texture {} does not exist (HTTP 404)", id);
            return Err(SourceError::NotFound);
        }
        if !status.is_success() {
            return Err(SourceError::Transient { reason: format!("HTTP {}", status.as_u16()) });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Transient { reason: e.to_string() })?;
        debug!("🖼️ Downloaded texture {}: {} bytes", id, bytes.len());
        Ok(SourcePayload { bytes, from_cache: false })
    }
}

/// Tries each source in order. Not-found only when every source says so.
#[derive(Clone)]
pub struct LayeredSource {
    layers: Vec<Arc<dyn AssetSource>>,
}

impl LayeredSource {
    pub fn new(layers: Vec<Arc<dyn AssetSource>>) -> Self {
        Self { layers }
    }
}

impl std::fmt::Debug for LayeredSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredSource").field("layers", &self.layers.len()).finish()
    }
}

#[async_trait]
impl AssetSource for LayeredSource {
    async fn fetch(&self, id: Uuid, discard: u8, host: Option<SocketAddr>) -> Result<SourcePayload, SourceError> {
        let mut last_transient = None;
        for layer in &self.layers {
            match layer.fetch(id, discard, host).await {
                Ok(payload) => return Ok(payload),
                Err(SourceError::NotFound) => continue,
                Err(err) => {
                    debug!("🔄 Source failed for {}, trying next: {}", id, err);
                    last_transient = Some(err);
                }
            }
        }
        Err(last_transient.unwrap_or(SourceError::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<SourcePayload, SourceError>);

    #[async_trait]
    impl AssetSource for Fixed {
        async fn fetch(&self, _: Uuid, _: u8, _: Option<SocketAddr>) -> Result<SourcePayload, SourceError> {
            self.0.clone()
        }
    }

    fn payload(tag: u8) -> SourcePayload {
        SourcePayload { bytes: Bytes::from(vec![tag]), from_cache: false }
    }

    #[test]
    fn test_texture_url() {
        let source = HttpAssetSource::new(
            Url::parse("http://sim.example:12046/cap/abc").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        let id = Uuid::nil();
        assert_eq!(
            source.texture_url(id).as_str(),
            "http://sim.example:12046/cap/abc?texture_id=00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    async fn test_layered_first_success_wins() {
        let layered = LayeredSource::new(vec![
            Arc::new(Fixed(Err(SourceError::NotFound))),
            Arc::new(Fixed(Ok(payload(2)))),
            Arc::new(Fixed(Ok(payload(3)))),
        ]);
        let got = layered.fetch(Uuid::nil(), 0, None).await.unwrap();
        assert_eq!(&got.bytes[..], &[2]);
    }

    #[tokio::test]
    async fn test_layered_not_found_only_when_all_agree() {
        let all_missing = LayeredSource::new(vec![
            Arc::new(Fixed(Err(SourceError::NotFound))),
            Arc::new(Fixed(Err(SourceError::NotFound))),
        ]);
        assert_eq!(all_missing.fetch(Uuid::nil(), 0, None).await.unwrap_err(), SourceError::NotFound);

        let flaky = LayeredSource::new(vec![
            Arc::new(Fixed(Err(SourceError::Transient { reason: "timeout".into() }))),
            Arc::new(Fixed(Err(SourceError::NotFound))),
        ]);
        assert!(matches!(
            flaky.fetch(Uuid::nil(), 0, None).await.unwrap_err(),
            SourceError::Transient { .. }
        ));
    }

    #[tokio::test]
    async fn test_cache_dir_missing_file() {
        let dir = std::env::temp_dir().join(format!("slv-cache-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let source = CacheDirSource::new(&dir);
        assert_eq!(source.fetch(Uuid::new_v4(), 0, None).await.unwrap_err(), SourceError::NotFound);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
