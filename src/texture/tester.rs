//! Texture pipeline performance tester
//!
//! Collects per-frame usage and loading statistics while the scheduler runs.
//! The scheduler only ever writes to it; nothing here feeds back into
//! scheduling decisions.

use super::types::MIN_LARGE_IMAGE_AREA;
use super::{TextureError, TextureResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Per-second averages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstantPerformance {
    pub time_secs: f32,
    pub average_bytes_used_per_second: f32,
    pub average_bytes_used_for_large_image_per_second: f32,
    /// Share of the used bytes that belong to large images, in percent
    pub average_percentage_large_image: f32,
}

/// Summary of one tester run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextureTestSession {
    pub name: String,
    pub frames: u64,
    pub total_time_secs: f32,
    pub total_fetching_time_secs: f32,
    pub total_gray_time_secs: f32,
    pub total_stabilizing_time_secs: f32,
    pub total_time_loading_sculpties_secs: f32,
    pub total_bytes_loaded: u64,
    pub total_bytes_loaded_from_cache: u64,
    pub total_bytes_loaded_for_large_image: u64,
    pub total_bytes_loaded_for_sculpties: u64,
    pub fetch_count: u64,
    pub mean_fetch_latency_ms: f32,
    pub instant_performance: Vec<InstantPerformance>,
}

#[derive(Debug)]
pub struct TexturePipelineTester {
    name: String,
    paused: bool,
    start_time: Instant,
    last_update: Option<Instant>,
    frames: u64,

    // per-frame, reset by update()
    total_bytes_used: u64,
    total_bytes_used_for_large_image: u64,
    using_default_texture: bool,

    total_bytes_loaded: u64,
    total_bytes_loaded_from_cache: u64,
    total_bytes_loaded_for_large_image: u64,
    total_bytes_loaded_for_sculpties: u64,

    first_load: Option<Instant>,
    last_load: Option<Instant>,
    first_sculpty_load: Option<Instant>,
    last_sculpty_load: Option<Instant>,

    total_gray_time: Duration,
    total_stabilizing_time: Duration,
    start_stabilizing: Option<Instant>,

    fetch_count: u64,
    total_fetch_latency: Duration,

    window_start: Option<Instant>,
    window_bytes_used: u64,
    window_bytes_large: u64,
    instant_performance: Vec<InstantPerformance>,
}

impl TexturePipelineTester {
    pub fn new(name: impl Into<String>, now: Instant) -> Self {
        let name = name.into();
        info!("📊 Texture pipeline tester '{}' started", name);
        Self {
            name,
            paused: false,
            start_time: now,
            last_update: None,
            frames: 0,
            total_bytes_used: 0,
            total_bytes_used_for_large_image: 0,
            using_default_texture: false,
            total_bytes_loaded: 0,
            total_bytes_loaded_from_cache: 0,
            total_bytes_loaded_for_large_image: 0,
            total_bytes_loaded_for_sculpties: 0,
            first_load: None,
            last_load: None,
            first_sculpty_load: None,
            last_sculpty_load: None,
            total_gray_time: Duration::ZERO,
            total_stabilizing_time: Duration::ZERO,
            start_stabilizing: None,
            fetch_count: 0,
            total_fetch_latency: Duration::ZERO,
            window_start: None,
            window_bytes_used: 0,
            window_bytes_large: 0,
            instant_performance: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// A texture was drawn this frame
    pub fn update_texture_binding_stats(&mut self, bytes: u64, area: u64) {
        if self.paused {
            return;
        }
        self.total_bytes_used += bytes;
        if area >= MIN_LARGE_IMAGE_AREA {
            self.total_bytes_used_for_large_image += bytes;
        }
    }

    /// A fetched level was promoted
    pub fn update_texture_loading_stats(&mut self, now: Instant, bytes: u64, area: u64, from_cache: bool, sculpted: bool) {
        if self.paused {
            return;
        }
        self.first_load.get_or_insert(now);
        self.last_load = Some(now);

        self.total_bytes_loaded += bytes;
        if from_cache {
            self.total_bytes_loaded_from_cache += bytes;
        }
        if area >= MIN_LARGE_IMAGE_AREA {
            self.total_bytes_loaded_for_large_image += bytes;
        }
        if sculpted {
            self.first_sculpty_load.get_or_insert(now);
            self.last_sculpty_load = Some(now);
            self.total_bytes_loaded_for_sculpties += bytes;
        }
    }

    /// Something on screen is still showing the default placeholder
    pub fn update_gray_texture_binding(&mut self) {
        if !self.paused {
            self.using_default_texture = true;
        }
    }

    pub fn record_fetch_latency(&mut self, latency: Duration) {
        if self.paused {
            return;
        }
        self.fetch_count += 1;
        self.total_fetch_latency += latency;
    }

    /// Memory overflow started; time until [`TexturePipelineTester::update`]
    /// sees it cleared counts as stabilizing time
    pub fn set_stabilizing_time(&mut self, now: Instant) {
        if self.start_stabilizing.is_none() {
            self.start_stabilizing = Some(now);
        }
    }

    /// Close the frame. `memory_overflow` is the scheduler's pressure flag.
    pub fn update(&mut self, now: Instant, memory_overflow: bool) {
        let dt = self
            .last_update
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        self.last_update = Some(now);
        if self.paused {
            return;
        }
        self.frames += 1;

        if self.using_default_texture {
            self.total_gray_time += dt;
        }

        if memory_overflow {
            self.set_stabilizing_time(now);
        } else if let Some(start) = self.start_stabilizing.take() {
            self.total_stabilizing_time += now.saturating_duration_since(start);
        }

        let window_start = *self.window_start.get_or_insert(now);
        self.window_bytes_used += self.total_bytes_used;
        self.window_bytes_large += self.total_bytes_used_for_large_image;
        let window = now.saturating_duration_since(window_start);
        if window >= Duration::from_secs(1) {
            let secs = window.as_secs_f32();
            let used = self.window_bytes_used as f32 / secs;
            let large = self.window_bytes_large as f32 / secs;
            let percentage = if self.window_bytes_used > 0 {
                self.window_bytes_large as f32 * 100.0 / self.window_bytes_used as f32
            } else {
                0.0
            };
            self.instant_performance.push(InstantPerformance {
                time_secs: now.saturating_duration_since(self.start_time).as_secs_f32(),
                average_bytes_used_per_second: used,
                average_bytes_used_for_large_image_per_second: large,
                average_percentage_large_image: percentage,
            });
            self.window_start = Some(now);
            self.window_bytes_used = 0;
            self.window_bytes_large = 0;
        }

        self.total_bytes_used = 0;
        self.total_bytes_used_for_large_image = 0;
        self.using_default_texture = false;
    }

    pub fn mean_fetch_latency(&self) -> Duration {
        if self.fetch_count == 0 {
            Duration::ZERO
        } else {
            self.total_fetch_latency / self.fetch_count as u32
        }
    }

    pub fn session(&self) -> TextureTestSession {
        let span = |first: Option<Instant>, last: Option<Instant>| match (first, last) {
            (Some(first), Some(last)) => last.saturating_duration_since(first).as_secs_f32(),
            _ => 0.0,
        };
        let end = self.last_update.unwrap_or(self.start_time);
        let stabilizing = self.total_stabilizing_time
            + self
                .start_stabilizing
                .map_or(Duration::ZERO, |start| end.saturating_duration_since(start));

        TextureTestSession {
            name: self.name.clone(),
            frames: self.frames,
            total_time_secs: end.saturating_duration_since(self.start_time).as_secs_f32(),
            total_fetching_time_secs: span(self.first_load, self.last_load),
            total_gray_time_secs: self.total_gray_time.as_secs_f32(),
            total_stabilizing_time_secs: stabilizing.as_secs_f32(),
            total_time_loading_sculpties_secs: span(self.first_sculpty_load, self.last_sculpty_load),
            total_bytes_loaded: self.total_bytes_loaded,
            total_bytes_loaded_from_cache: self.total_bytes_loaded_from_cache,
            total_bytes_loaded_for_large_image: self.total_bytes_loaded_for_large_image,
            total_bytes_loaded_for_sculpties: self.total_bytes_loaded_for_sculpties,
            fetch_count: self.fetch_count,
            mean_fetch_latency_ms: self.mean_fetch_latency().as_secs_f32() * 1000.0,
            instant_performance: self.instant_performance.clone(),
        }
    }

    pub fn write_session(&self, path: &Path) -> TextureResult<()> {
        let json = serde_json::to_string_pretty(&self.session())
            .map_err(|e| TextureError::Serialization { reason: e.to_string() })?;
        std::fs::write(path, json)?;
        info!("📊 Tester session written to {}", path.display());
        Ok(())
    }
}

pub fn load_session(path: &Path) -> TextureResult<TextureTestSession> {
    let json = std::fs::read_to_string(path)?;
    let session =
        serde_json::from_str(&json).map_err(|e| TextureError::Serialization { reason: e.to_string() })?;
    debug!("Loaded tester session from {}", path.display());
    Ok(session)
}

/// One metric of a session comparison
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDelta {
    pub name: &'static str,
    pub base: f64,
    pub current: f64,
}

impl MetricDelta {
    /// Relative change in percent, `None` when the base is zero
    pub fn change_percent(&self) -> Option<f64> {
        if self.base == 0.0 {
            None
        } else {
            Some((self.current - self.base) * 100.0 / self.base)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionComparison {
    pub base_name: String,
    pub current_name: String,
    pub metrics: Vec<MetricDelta>,
}

impl SessionComparison {
    pub fn metric(&self, name: &str) -> Option<&MetricDelta> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

pub fn compare_sessions(base: &TextureTestSession, current: &TextureTestSession) -> SessionComparison {
    let pairs: [(&'static str, f64, f64); 10] = [
        ("total_fetching_time_secs", base.total_fetching_time_secs as f64, current.total_fetching_time_secs as f64),
        ("total_gray_time_secs", base.total_gray_time_secs as f64, current.total_gray_time_secs as f64),
        (
            "total_stabilizing_time_secs",
            base.total_stabilizing_time_secs as f64,
            current.total_stabilizing_time_secs as f64,
        ),
        (
            "total_time_loading_sculpties_secs",
            base.total_time_loading_sculpties_secs as f64,
            current.total_time_loading_sculpties_secs as f64,
        ),
        ("total_bytes_loaded", base.total_bytes_loaded as f64, current.total_bytes_loaded as f64),
        (
            "total_bytes_loaded_from_cache",
            base.total_bytes_loaded_from_cache as f64,
            current.total_bytes_loaded_from_cache as f64,
        ),
        (
            "total_bytes_loaded_for_large_image",
            base.total_bytes_loaded_for_large_image as f64,
            current.total_bytes_loaded_for_large_image as f64,
        ),
        (
            "total_bytes_loaded_for_sculpties",
            base.total_bytes_loaded_for_sculpties as f64,
            current.total_bytes_loaded_for_sculpties as f64,
        ),
        ("fetch_count", base.fetch_count as f64, current.fetch_count as f64),
        ("mean_fetch_latency_ms", base.mean_fetch_latency_ms as f64, current.mean_fetch_latency_ms as f64),
    ];

    SessionComparison {
        base_name: base.name.clone(),
        current_name: current.name.clone(),
        metrics: pairs
            .into_iter()
            .map(|(name, base, current)| MetricDelta { name, base, current })
            .collect(),
    }
}

impl std::fmt::Display for SessionComparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Texture pipeline: '{}' vs '{}'", self.base_name, self.current_name)?;
        writeln!(f, "{:<36} {:>14} {:>14} {:>9}", "metric", "base", "current", "change")?;
        for metric in &self.metrics {
            let change = match metric.change_percent() {
                Some(pct) => format!("{:+.1}%", pct),
                None => "n/a".to_string(),
            };
            writeln!(f, "{:<36} {:>14.2} {:>14.2} {:>9}", metric.name, metric.base, metric.current, change)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_large_image_accounting() {
        let start = Instant::now();
        let mut tester = TexturePipelineTester::new("large", start);
        tester.update_texture_loading_stats(start, 1_048_576, 512 * 512, true, false);
        tester.update_texture_loading_stats(start + Duration::from_secs(2), 4_096, 32 * 32, false, true);
        tester.record_fetch_latency(Duration::from_millis(10));
        tester.record_fetch_latency(Duration::from_millis(30));

        let session = tester.session();
        assert_eq!(session.total_bytes_loaded, 1_052_672);
        assert_eq!(session.total_bytes_loaded_from_cache, 1_048_576);
        assert_eq!(session.total_bytes_loaded_for_large_image, 1_048_576);
        assert_eq!(session.total_bytes_loaded_for_sculpties, 4_096);
        assert_eq!(session.fetch_count, 2);
        assert!((session.mean_fetch_latency_ms - 20.0).abs() < 0.5);
        // spans follow the caller's clock
        assert!((session.total_fetching_time_secs - 2.0).abs() < 1e-3);
        assert_eq!(session.total_time_loading_sculpties_secs, 0.0);
    }

    #[test]
    fn test_instant_performance_windows() {
        let start = Instant::now();
        let mut tester = TexturePipelineTester::new("windows", start);
        for frame in 0..=4u64 {
            tester.update_texture_binding_stats(1000, 1024 * 1024);
            tester.update_texture_binding_stats(1000, 16);
            tester.update(start + Duration::from_millis(frame * 500), false);
        }
        let session = tester.session();
        assert_eq!(session.frames, 5);
        assert_eq!(session.instant_performance.len(), 2);
        let first = &session.instant_performance[0];
        assert!((first.average_percentage_large_image - 50.0).abs() < 1e-3);
        assert!(first.average_bytes_used_per_second > 0.0);
    }

    #[test]
    fn test_gray_and_stabilizing_time() {
        let start = Instant::now();
        let mut tester = TexturePipelineTester::new("gray", start);
        tester.update(start, false);
        tester.update_gray_texture_binding();
        tester.update(start + Duration::from_secs(1), true);
        tester.update(start + Duration::from_secs(3), false);

        let session = tester.session();
        assert!((session.total_gray_time_secs - 1.0).abs() < 1e-3);
        assert!((session.total_stabilizing_time_secs - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_paused_ignores_stats() {
        let mut tester = TexturePipelineTester::new("paused", Instant::now());
        tester.set_paused(true);
        tester.update_texture_loading_stats(Instant::now(), 100, 100, false, false);
        tester.record_fetch_latency(Duration::from_millis(5));
        assert_eq!(tester.session().total_bytes_loaded, 0);
        assert_eq!(tester.session().fetch_count, 0);
    }

    #[test]
    fn test_session_json_round_trip() {
        let mut tester = TexturePipelineTester::new("round-trip", Instant::now());
        tester.update_texture_loading_stats(Instant::now(), 2048, 64, false, false);
        let path = std::env::temp_dir().join(format!("slv-tester-{}.json", Uuid::new_v4()));

        tester.write_session(&path).unwrap();
        let loaded = load_session(&path).unwrap();
        assert_eq!(loaded, tester.session());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_compare_sessions_report() {
        let base = TextureTestSession {
            name: "base".into(),
            total_bytes_loaded: 1000,
            fetch_count: 10,
            ..Default::default()
        };
        let current = TextureTestSession {
            name: "current".into(),
            total_bytes_loaded: 1500,
            fetch_count: 5,
            ..Default::default()
        };
        let comparison = compare_sessions(&base, &current);
        assert_eq!(comparison.metric("total_bytes_loaded").unwrap().change_percent(), Some(50.0));
        assert_eq!(comparison.metric("fetch_count").unwrap().change_percent(), Some(-50.0));
        assert_eq!(comparison.metric("total_gray_time_secs").unwrap().change_percent(), None);

        let report = comparison.to_string();
        assert!(report.contains("'base' vs 'current'"));
        assert!(report.contains("+50.0%"));
        assert!(report.contains("n/a"));
    }
}
