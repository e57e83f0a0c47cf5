pub mod settings;
pub mod hardware;

// Re-export commonly used types
pub use settings::{
    PerformanceProfile, StreamingSettings, MemorySettings, FetchSettings, LodSettings,
    ResidencySettings, PressureSettings, HardwareInfo,
    save_streaming_settings, load_streaming_settings, streaming_config_path,
};
pub use hardware::{detect_hardware, recommend_profile, initialize_streaming_settings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {reason}")]
    Parse { reason: String },

    #[error("Failed to serialize settings: {reason}")]
    Serialize { reason: String },

    #[error("No configuration directory for this platform")]
    NoConfigDir,
}

pub type ConfigResult<T> = Result<T, ConfigError>;
