//! Shared texture type definitions
//!
//! Boost classes, lifecycle states, kind tags and the raw bitmap type that
//! moves between the fetch workers, the scheduler and the GPU layer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Coarsest discard level the pipeline will ever ask for
pub const MAX_DISCARD_LEVEL: u8 = 5;

/// Edge length assumed for textures whose dimensions are not known yet
pub const MAX_IMAGE_SIZE_DEFAULT: u32 = 1024;

/// Images at or above this area (512 * 512) count as "large" for diagnostics
pub const MIN_LARGE_IMAGE_AREA: u64 = 262_144;

/// Scene reference to a texture (a drawable face). Never owns the texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceId(pub u64);

/// Priority class that biases scheduling independent of on-screen size
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BoostLevel {
    None = 0,
    AvatarBaked = 1,
    Avatar = 2,
    Clouds = 3,
    Sculpted = 4,

    High = 10,
    /// Has to be high priority for minimap / low detail
    Terrain = 11,
    Selected = 12,
    Hud = 13,
    AvatarBakedSelf = 14,
    Ui = 15,
    Preview = 16,
    Map = 17,
    MapLayer = 18,
    /// Needed for baking the agent's own avatar
    AvatarSelf = 19,
}

impl BoostLevel {
    /// High boosts skip the global discard bias and outrank all size-driven work
    pub fn is_high(&self) -> bool {
        *self >= BoostLevel::High
    }
}

impl Default for BoostLevel {
    fn default() -> Self {
        BoostLevel::None
    }
}

impl std::fmt::Display for BoostLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, *self as u8)
    }
}

/// Closed set of texture kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// Generated locally, raw image never changes
    Local,
    /// Frames pushed by the media pipeline
    Media,
    /// Rendered into at runtime
    Dynamic,
    /// Fetched from cache or network, resolution fixed by its users (UI etc.)
    Fetched,
    /// Fetched, resolution driven by projected on-screen size
    Lod,
}

impl TextureKind {
    pub fn is_fetched(&self) -> bool {
        matches!(self, TextureKind::Fetched | TextureKind::Lod)
    }
}

/// Residency lifecycle of a texture record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TextureState {
    /// Removed from memory
    Deleted,
    /// Ready to be removed from memory
    DeletionCandidate,
    /// Not used for a while
    Inactive,
    /// Just being used, becomes inactive if nothing references it
    Active,
    /// Stays in memory, can never be removed
    NoDelete,
}

impl std::fmt::Display for TextureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextureState::Deleted => write!(f, "Deleted"),
            TextureState::DeletionCandidate => write!(f, "DeletionCandidate"),
            TextureState::Inactive => write!(f, "Inactive"),
            TextureState::Active => write!(f, "Active"),
            TextureState::NoDelete => write!(f, "NoDelete"),
        }
    }
}

/// Progress of the fetch pipeline for one texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchState {
    /// Nothing requested yet
    None,
    /// Wants data but has not been admitted by the scheduler
    Queued,
    /// A request is outstanding with the fetch service
    InFlight,
    /// Decoded data arrived and waits for promotion to the GPU
    Decoding,
    /// Current data satisfies the desired discard level
    Complete,
    /// The backing store confirmed the asset does not exist
    Missing,
}

impl Default for FetchState {
    fn default() -> Self {
        FetchState::None
    }
}

impl std::fmt::Display for FetchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchState::None => write!(f, "None"),
            FetchState::Queued => write!(f, "Queued"),
            FetchState::InFlight => write!(f, "InFlight"),
            FetchState::Decoding => write!(f, "Decoding"),
            FetchState::Complete => write!(f, "Complete"),
            FetchState::Missing => write!(f, "Missing"),
        }
    }
}

/// Decoded bitmap in host memory
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    /// Bytes per texel
    pub components: u8,
    pub data: Bytes,
}

impl RawImage {
    pub fn new(width: u32, height: u32, components: u8, data: Bytes) -> Self {
        Self { width, height, components, data }
    }

    /// Single-colour image, used for placeholders
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let texels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(texels * 4);
        for _ in 0..texels {
            data.extend_from_slice(&rgba);
        }
        Self::new(width, height, 4, Bytes::from(data))
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Expected byte length for the declared dimensions
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.components as usize
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.components > 0 && self.data.len() == self.expected_len()
    }
}

/// Number of halvings before either side collapses to a single texel, capped
/// at [`MAX_DISCARD_LEVEL`]
pub fn max_discard_for(width: u32, height: u32) -> u8 {
    if width == 0 || height == 0 {
        return MAX_DISCARD_LEVEL;
    }
    let mut discard = 0u8;
    while discard < MAX_DISCARD_LEVEL && (width >> (discard + 1)) >= 1 && (height >> (discard + 1)) >= 1 {
        discard += 1;
    }
    discard
}

/// Dimensions of a level given the full-resolution dimensions
pub fn dimensions_at(width: u32, height: u32, discard: u8) -> (u32, u32) {
    ((width >> discard).max(1), (height >> discard).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_discard_levels() {
        assert_eq!(max_discard_for(1024, 1024), MAX_DISCARD_LEVEL);
        assert_eq!(max_discard_for(128, 128), MAX_DISCARD_LEVEL);
        assert_eq!(max_discard_for(8, 8), 3);
        assert_eq!(max_discard_for(64, 2), 1);
        assert_eq!(max_discard_for(1, 1), 0);
        assert_eq!(max_discard_for(0, 0), MAX_DISCARD_LEVEL);
    }

    #[test]
    fn test_boost_classes() {
        assert!(!BoostLevel::None.is_high());
        assert!(!BoostLevel::Sculpted.is_high());
        assert!(BoostLevel::High.is_high());
        assert!(BoostLevel::Ui.is_high());
        assert!(BoostLevel::Ui > BoostLevel::Selected);
    }

    #[test]
    fn test_solid_image() {
        let image = RawImage::solid(4, 2, [1, 2, 3, 4]);
        assert!(image.is_valid());
        assert_eq!(image.area(), 8);
        assert_eq!(&image.data[..4], &[1, 2, 3, 4]);
    }
}
