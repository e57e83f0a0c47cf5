use super::{ConfigError, ConfigResult};
use crate::texture::fetched::PriorityParams;
use crate::texture::ledger::BudgetLedger;
use crate::texture::lod::LodParams;
use crate::texture::types::{MAX_DISCARD_LEVEL, MAX_IMAGE_SIZE_DEFAULT};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const STREAMING_CONFIG_FILE: &str = "texture_streaming.toml";

// =============================================================================
// Texture Streaming Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceProfile {
    Low,      // Small budgets, few concurrent fetches
    Balanced, // Default for mid-range systems
    High,     // Large budgets for high-end hardware
    Custom,   // User-edited values
}

impl Default for PerformanceProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Budget for textures drawn in the current window
    pub max_bound_texture_mem_mb: u32,
    /// Budget for every live texture
    pub max_total_texture_mem_mb: u32,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_bound_texture_mem_mb: 256,
            max_total_texture_mem_mb: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSettings {
    pub max_concurrent_fetches: usize,
    /// Priority multiplier per transient failure, in (0, 1]
    pub retry_priority_decay: f32,
    pub request_timeout_secs: u64,
    /// Edge length assumed before a texture's size is known
    pub default_image_size: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 8,
            retry_priority_decay: 0.5,
            request_timeout_secs: 30,
            default_image_size: MAX_IMAGE_SIZE_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LodSettings {
    /// Texels wanted per on-screen pixel
    pub texel_ratio: f32,
    /// Relative virtual size change before the discard level is recomputed
    pub hysteresis: f32,
}

impl Default for LodSettings {
    fn default() -> Self {
        Self {
            texel_ratio: 1.0,
            hysteresis: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidencySettings {
    /// Unreferenced textures go inactive after this long
    pub inactive_after_secs: u64,
    /// ...and become eviction candidates after this long
    pub deletion_candidate_after_secs: u64,
}

impl Default for ResidencySettings {
    fn default() -> Self {
        Self {
            inactive_after_secs: 30,
            deletion_candidate_after_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureSettings {
    pub bias_step: f32,
    pub max_bias: f32,
    pub bias_adjust_interval_ms: u64,
}

impl Default for PressureSettings {
    fn default() -> Self {
        Self {
            bias_step: 0.5,
            max_bias: MAX_DISCARD_LEVEL as f32 - 1.0,
            bias_adjust_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingSettings {
    pub profile: PerformanceProfile,
    pub memory: MemorySettings,
    pub fetch: FetchSettings,
    pub lod: LodSettings,
    pub residency: ResidencySettings,
    pub pressure: PressureSettings,
    pub enable_pipeline_tester: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            profile: PerformanceProfile::default(),
            memory: MemorySettings::default(),
            fetch: FetchSettings::default(),
            lod: LodSettings::default(),
            residency: ResidencySettings::default(),
            pressure: PressureSettings::default(),
            enable_pipeline_tester: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub total_memory_gb: u32,
    pub graphics_memory_mb: u32,
    pub cpu_cores: u32,
    pub is_integrated_gpu: bool,
}

impl StreamingSettings {
    pub fn for_profile(profile: PerformanceProfile, hardware: &HardwareInfo) -> Self {
        let vram = hardware.graphics_memory_mb;
        let (memory, fetch, pressure) = match profile {
            PerformanceProfile::Low => (
                MemorySettings {
                    max_bound_texture_mem_mb: vram / 4,
                    max_total_texture_mem_mb: vram / 2,
                },
                FetchSettings {
                    max_concurrent_fetches: 4,
                    retry_priority_decay: 0.25,
                    request_timeout_secs: 60,
                    ..FetchSettings::default()
                },
                PressureSettings {
                    bias_step: 1.0,
                    ..PressureSettings::default()
                },
            ),
            PerformanceProfile::Balanced => (
                MemorySettings {
                    max_bound_texture_mem_mb: vram / 2,
                    max_total_texture_mem_mb: vram,
                },
                FetchSettings::default(),
                PressureSettings::default(),
            ),
            PerformanceProfile::High => (
                MemorySettings {
                    max_bound_texture_mem_mb: vram * 3 / 4,
                    max_total_texture_mem_mb: vram * 3 / 2,
                },
                FetchSettings {
                    max_concurrent_fetches: 16,
                    request_timeout_secs: 15,
                    ..FetchSettings::default()
                },
                PressureSettings {
                    bias_step: 0.25,
                    bias_adjust_interval_ms: 250,
                    ..PressureSettings::default()
                },
            ),
            PerformanceProfile::Custom => {
                // Defaults the user can edit
                (MemorySettings::default(), FetchSettings::default(), PressureSettings::default())
            }
        };

        Self {
            profile,
            memory,
            fetch,
            lod: LodSettings::default(),
            residency: ResidencySettings::default(),
            pressure,
            enable_pipeline_tester: false,
        }
        .clamped()
    }

    /// Pull every value into its valid range
    pub fn clamped(mut self) -> Self {
        let (bound, total) =
            BudgetLedger::clamp_caps(self.memory.max_bound_texture_mem_mb, self.memory.max_total_texture_mem_mb);
        self.memory.max_bound_texture_mem_mb = bound;
        self.memory.max_total_texture_mem_mb = total;

        self.fetch.max_concurrent_fetches = self.fetch.max_concurrent_fetches.clamp(1, 64);
        self.fetch.retry_priority_decay = if self.fetch.retry_priority_decay.is_finite() {
            self.fetch.retry_priority_decay.clamp(0.01, 1.0)
        } else {
            FetchSettings::default().retry_priority_decay
        };
        self.fetch.request_timeout_secs = self.fetch.request_timeout_secs.clamp(1, 600);
        self.fetch.default_image_size = self.fetch.default_image_size.clamp(32, 2048);

        if !(self.lod.texel_ratio.is_finite() && self.lod.texel_ratio > 0.0) {
            self.lod.texel_ratio = LodSettings::default().texel_ratio;
        }
        self.lod.hysteresis = self.lod.hysteresis.clamp(0.0, 0.9);

        self.residency.deletion_candidate_after_secs = self
            .residency
            .deletion_candidate_after_secs
            .max(self.residency.inactive_after_secs);

        self.pressure.max_bias = self.pressure.max_bias.clamp(0.0, MAX_DISCARD_LEVEL as f32);
        self.pressure.bias_step = self.pressure.bias_step.clamp(0.0, self.pressure.max_bias.max(0.0));
        self
    }

    pub fn inactive_after(&self) -> Duration {
        Duration::from_secs(self.residency.inactive_after_secs)
    }

    pub fn deletion_candidate_after(&self) -> Duration {
        Duration::from_secs(self.residency.deletion_candidate_after_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.request_timeout_secs)
    }

    pub fn bias_adjust_interval(&self) -> Duration {
        Duration::from_millis(self.pressure.bias_adjust_interval_ms)
    }

    pub fn lod_params(&self, discard_bias: f32) -> LodParams {
        LodParams {
            texel_ratio: self.lod.texel_ratio,
            hysteresis: self.lod.hysteresis,
            discard_bias,
        }
    }

    pub fn priority_params(&self) -> PriorityParams {
        PriorityParams {
            retry_decay: self.fetch.retry_priority_decay,
            default_image_size: self.fetch.default_image_size,
        }
    }

    /// Ledger sized and tuned by these settings
    pub fn budget_ledger(&self) -> BudgetLedger {
        BudgetLedger::new(self.memory.max_bound_texture_mem_mb, self.memory.max_total_texture_mem_mb)
            .with_bias_tuning(self.pressure.bias_step, self.pressure.max_bias, self.bias_adjust_interval())
    }

    pub fn save_to_path(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize { reason: e.to_string() })?;
        fs::write(path, toml)?;
        Ok(())
    }

    /// Loaded values are clamped
    pub fn load_from_path(path: &Path) -> ConfigResult<Self> {
        let data = fs::read_to_string(path)?;
        let settings =
            toml::from_str::<StreamingSettings>(&data).map_err(|e| ConfigError::Parse { reason: e.to_string() })?;
        Ok(settings.clamped())
    }
}

// Streaming configuration file management
pub fn streaming_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "slv", "slv-texture-stream")
        .map(|proj| proj.config_dir().join(STREAMING_CONFIG_FILE))
}

pub fn save_streaming_settings(settings: &StreamingSettings) -> ConfigResult<()> {
    let path = streaming_config_path().ok_or(ConfigError::NoConfigDir)?;
    settings.save_to_path(&path)
}

pub fn load_streaming_settings() -> Option<StreamingSettings> {
    let path = streaming_config_path()?;
    StreamingSettings::load_from_path(&path).ok()
}
