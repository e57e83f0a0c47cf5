use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};
use rand::Rng;
use slv_texture_stream::config::initialize_streaming_settings;
use slv_texture_stream::fetch::{
    AssetSource, AsyncFetchService, CacheDirSource, CompletionQueue, HttpAssetSource, LayeredSource, SourceError,
    SourcePayload,
};
use slv_texture_stream::texture::{BoostLevel, FaceId, HostTextureLayer, TextureKind, TextureManager};
use slv_texture_stream::utils::logging::{init_logging, log_streaming_settings, log_system_info};
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line options for a simulated streaming session
#[derive(Debug)]
struct Options {
    frames: u64,
    textures: usize,
    cache_dir: Option<PathBuf>,
    http_base: Option<Url>,
    session_out: Option<PathBuf>,
}

impl Options {
    fn parse() -> anyhow::Result<Self> {
        let mut options = Options {
            frames: 600,
            textures: 200,
            cache_dir: None,
            http_base: None,
            session_out: None,
        };
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            let mut value = || args.next().with_context(|| format!("{} needs a value", arg));
            match arg.as_str() {
                "--frames" => options.frames = value()?.parse().context("--frames")?,
                "--textures" => options.textures = value()?.parse().context("--textures")?,
                "--cache-dir" => options.cache_dir = Some(PathBuf::from(value()?)),
                "--http" => options.http_base = Some(Url::parse(&value()?).context("--http")?),
                "--session" => options.session_out = Some(PathBuf::from(value()?)),
                "--help" | "-h" => {
                    println!(
                        "slv-texture-stream {}\n\n\
                         Usage: slv-texture-stream [--frames N] [--textures N] [--cache-dir DIR] \
                         [--http URL] [--session FILE]",
                        VERSION
                    );
                    std::process::exit(0);
                }
                other => anyhow::bail!("Unknown argument: {}", other),
            }
        }
        Ok(options)
    }
}

/// Generates PNG textures on demand with network-like latency and failures
struct SyntheticSource {
    failure_rate: f64,
    missing_rate: f64,
}

impl SyntheticSource {
    fn edge_for(id: Uuid) -> u32 {
        match id.as_bytes()[0] % 4 {
            0 => 128,
            1 => 256,
            2 => 512,
            _ => 1024,
        }
    }

    fn encode(id: Uuid, edge: u32) -> Result<Bytes, SourceError> {
        let [r, g, b, ..] = *id.as_bytes();
        let img = RgbaImage::from_fn(edge, edge, |x, y| {
            let checker = ((x / 16) + (y / 16)) % 2 == 0;
            if checker {
                Rgba([r, g, b, 255])
            } else {
                Rgba([255 - r, 255 - g, 255 - b, 255])
            }
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| SourceError::Transient { reason: e.to_string() })?;
        Ok(Bytes::from(out.into_inner()))
    }
}

#[async_trait]
impl AssetSource for SyntheticSource {
    async fn fetch(&self, id: Uuid, _discard: u8, _host: Option<SocketAddr>) -> Result<SourcePayload, SourceError> {
        let (latency_ms, roll) = {
            let mut rng = rand::rng();
            (rng.random_range(5..80u64), rng.random::<f64>())
        };
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        // Missing assets are a property of the id, not of the attempt
        if (id.as_bytes()[15] as f64 / 255.0) < self.missing_rate {
            return Err(SourceError::NotFound);
        }
        if roll < self.failure_rate {
            return Err(SourceError::Transient { reason: "simulated timeout".into() });
        }

        let edge = Self::edge_for(id);
        let bytes = tokio::task::spawn_blocking(move || Self::encode(id, edge))
            .await
            .map_err(|e| SourceError::Transient { reason: e.to_string() })??;
        Ok(SourcePayload { bytes, from_cache: false })
    }
}

/// A face in the simulated scene
struct SceneObject {
    texture: Uuid,
    face: FaceId,
    distance: f32,
}

fn build_source(options: &Options, request_timeout: Duration) -> anyhow::Result<Arc<dyn AssetSource>> {
    let mut layers: Vec<Arc<dyn AssetSource>> = Vec::new();
    if let Some(dir) = &options.cache_dir {
        info!("📋 Using texture cache at {}", dir.display());
        layers.push(Arc::new(CacheDirSource::new(dir.clone())));
    }
    match &options.http_base {
        Some(base) => {
            info!("🌐 Fetching textures from {}", base);
            layers.push(Arc::new(HttpAssetSource::new(base.clone(), request_timeout)?));
        }
        None => layers.push(Arc::new(SyntheticSource { failure_rate: 0.05, missing_rate: 0.02 })),
    }
    Ok(Arc::new(LayeredSource::new(layers)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    log_system_info();

    let options = Options::parse()?;
    let settings = initialize_streaming_settings()?;
    log_streaming_settings(&settings);

    let source = build_source(&options, settings.request_timeout())?;
    let completions = CompletionQueue::new();
    let fetcher = AsyncFetchService::new(tokio::runtime::Handle::current(), source, completions.sender());
    let mut manager = TextureManager::new(settings, fetcher, HostTextureLayer::new(), completions)?;

    let mut rng = rand::rng();
    let mut scene: Vec<SceneObject> = (0..options.textures)
        .map(|i| SceneObject {
            texture: Uuid::new_v4(),
            face: FaceId(i as u64),
            distance: rng.random_range(1.0..200.0),
        })
        .collect();
    for (i, object) in scene.iter().enumerate() {
        let boost = if i % 50 == 0 { BoostLevel::Ui } else { BoostLevel::None };
        manager.get_fetched_texture(object.texture, TextureKind::Lod, boost, None);
        manager.add_user(object.texture, object.face);
    }

    info!("🚀 Streaming {} textures for {} frames", scene.len(), options.frames);
    let mut interval = tokio::time::interval(Duration::from_millis(16));
    let started = Instant::now();

    for frame in 0..options.frames {
        interval.tick().await;

        // The camera drifts through the scene; faces far behind it go away
        for object in scene.iter_mut() {
            object.distance = (object.distance + rng.random_range(-2.0..2.0)).clamp(0.5, 250.0);
            if object.distance < 200.0 {
                let pixels = (512.0 / object.distance).powi(2) * 100.0;
                manager.add_texture_stats(object.texture, pixels);
                manager.bind(object.texture);
            }
        }
        if frame % 120 == 119 {
            if let Some(object) = scene.pop() {
                manager.remove_user(object.texture, object.face);
            }
        }

        let report = manager.tick();
        if frame % 60 == 0 {
            info!(
                "Frame {}: {} pending, {} issued, {} promoted, {} MB total, bias {:.1}{}",
                report.frame,
                report.pending,
                report.fetches_issued,
                report.promotions,
                report.total_bytes / (1024 * 1024),
                report.discard_bias,
                if report.under_pressure { " (under pressure)" } else { "" }
            );
        }
    }

    let stats = manager.stats().clone();
    info!(
        "✅ Done in {:.1}s: {} fetches, {} promotions, {} evictions, {} missing, {:.1}% stale",
        started.elapsed().as_secs_f32(),
        stats.fetches_issued,
        stats.promotions,
        stats.evictions,
        stats.missing_assets,
        stats.stale_rate()
    );

    if let (Some(path), Some(tester)) = (&options.session_out, manager.tester()) {
        match tester.write_session(path) {
            Ok(()) => info!("📊 Wrote pipeline session to {}", path.display()),
            Err(e) => warn!("Failed to write pipeline session: {}", e),
        }
    }

    manager.shutdown();
    Ok(())
}
