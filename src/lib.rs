// SLV texture streaming: adaptive texture residency for a Second Life viewer
// Fetch what is visible, at the resolution it needs, inside a memory budget

pub mod config;
pub mod fetch;
pub mod texture;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::{
    initialize_streaming_settings, HardwareInfo, PerformanceProfile, StreamingSettings,
};
pub use fetch::{
    AssetSource, AsyncFetchService, CompletionQueue, FetchCompletion, FetchOutcome, FetchRequest,
    FetchService, FetchTicket,
};
pub use texture::{
    BoostLevel, FaceId, GpuTextureLayer, HostTextureLayer, RawImage, TextureError, TextureKind,
    TextureManager, TextureResult, TickReport,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
