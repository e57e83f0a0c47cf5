//! Adaptive texture streaming core
//!
//! Texture records, the fetch state machine, LOD selection, the memory
//! budget ledger and the per-frame scheduler that ties them together.

pub mod callbacks;
pub mod fetched;
pub mod gpu;
pub mod ledger;
pub mod lod;
pub mod manager;
pub mod record;
pub mod tester;
pub mod types;
#[cfg(feature = "wgpu")]
pub mod wgpu_layer;

pub use callbacks::{CallbackAction, CallbackHandle, LoadedCallback, LoadedEvent};
pub use fetched::{Admission, CompletionDisposition, FetchContext, FetchedTexture, PriorityParams};
pub use gpu::{GpuHandle, GpuTexture, GpuTextureLayer, HostTextureLayer};
pub use ledger::BudgetLedger;
pub use lod::{LodController, LodParams};
pub use manager::{ManagerStats, TextureManager, TickReport};
pub use record::{MediaExt, TextureCore, TextureExt, ViewerTexture};
pub use tester::{
    compare_sessions, load_session, MetricDelta, SessionComparison, TexturePipelineTester, TextureTestSession,
};
pub use types::{
    BoostLevel, FaceId, FetchState, RawImage, TextureKind, TextureState, MAX_DISCARD_LEVEL,
    MAX_IMAGE_SIZE_DEFAULT, MIN_LARGE_IMAGE_AREA,
};

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("GPU texture creation failed: {reason}")]
    GpuCreate { reason: String },

    #[error("Image decode failed: {reason}")]
    Decode { reason: String },

    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    #[error("Asset source failed: {reason}")]
    Source { reason: String },

    #[error("Texture not found: {id}")]
    NotFound { id: Uuid },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TextureResult<T> = Result<T, TextureError>;
