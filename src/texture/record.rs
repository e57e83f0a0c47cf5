//! Texture records
//!
//! Every texture is a [`TextureCore`] holding identity, residency and usage
//! data, plus a [`TextureExt`] variant carrying what only some kinds need.

use super::fetched::{FetchedTexture, PriorityParams};
use super::gpu::GpuTexture;
use super::lod::{self, LodController, LodParams};
use super::types::{max_discard_for, BoostLevel, FaceId, TextureKind, TextureState};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// State shared by every texture kind
#[derive(Debug)]
pub struct TextureCore {
    id: Uuid,
    generation: u64,
    full_width: u32,
    full_height: u32,
    components: u8,
    use_mipmaps: bool,
    boost: BoostLevel,
    state: TextureState,
    dont_discard: bool,
    users: BTreeSet<FaceId>,
    max_virtual_size: f32,
    stats_reported: bool,
    last_referenced: Instant,
    bound_frame: Option<u64>,
    gpu: Option<GpuTexture>,
}

impl TextureCore {
    pub fn new(id: Uuid, generation: u64, now: Instant) -> Self {
        Self {
            id,
            generation,
            full_width: 0,
            full_height: 0,
            components: 0,
            use_mipmaps: true,
            boost: BoostLevel::None,
            state: TextureState::Active,
            dont_discard: false,
            users: BTreeSet::new(),
            max_virtual_size: 0.0,
            stats_reported: false,
            last_referenced: now,
            bound_frame: None,
            gpu: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn full_width(&self) -> u32 {
        self.full_width
    }

    pub fn full_height(&self) -> u32 {
        self.full_height
    }

    pub fn has_dimensions(&self) -> bool {
        self.full_width > 0 && self.full_height > 0
    }

    pub fn components(&self) -> u8 {
        self.components
    }

    pub(crate) fn set_full_dimensions(&mut self, width: u32, height: u32, components: u8) {
        if (self.full_width, self.full_height) != (width, height) {
            debug!("Texture {} is {}x{}x{}", self.id, width, height, components);
        }
        self.full_width = width;
        self.full_height = height;
        self.components = components;
    }

    pub(crate) fn clear_dimensions(&mut self) {
        self.full_width = 0;
        self.full_height = 0;
        self.components = 0;
    }

    pub fn use_mipmaps(&self) -> bool {
        self.use_mipmaps
    }

    pub fn set_use_mipmaps(&mut self, use_mipmaps: bool) {
        self.use_mipmaps = use_mipmaps;
    }

    pub fn boost_level(&self) -> BoostLevel {
        self.boost
    }

    pub fn set_boost_level(&mut self, level: BoostLevel) {
        if self.boost == level {
            return;
        }
        debug!("Texture {} boost {} -> {}", self.id, self.boost, level);
        self.boost = level;
        if level.is_high() {
            self.force_active();
        }
    }

    pub fn state(&self) -> TextureState {
        self.state
    }

    /// Pinned records are never evicted
    pub fn is_pinned(&self) -> bool {
        self.state == TextureState::NoDelete
    }

    pub fn set_no_delete(&mut self) {
        self.state = TextureState::NoDelete;
    }

    /// Keep full resolution forever, implies no-delete
    pub fn dont_discard(&mut self) {
        self.dont_discard = true;
        self.set_no_delete();
    }

    pub fn is_dont_discard(&self) -> bool {
        self.dont_discard
    }

    /// Bring an idle record back to active. Pinned records stay pinned.
    pub fn force_active(&mut self) {
        if matches!(self.state, TextureState::Inactive | TextureState::DeletionCandidate) {
            self.state = TextureState::Active;
        }
    }

    pub fn set_active(&mut self, now: Instant) {
        self.force_active();
        self.last_referenced = now;
    }

    pub(crate) fn set_inactive(&mut self) {
        if self.state == TextureState::Active {
            self.state = TextureState::Inactive;
        }
    }

    pub(crate) fn set_deletion_candidate(&mut self) {
        if matches!(self.state, TextureState::Active | TextureState::Inactive) {
            self.state = TextureState::DeletionCandidate;
        }
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.state = TextureState::Deleted;
    }

    /// Returns true when the face was not already a user
    pub fn add_user(&mut self, face: FaceId, now: Instant) -> bool {
        let added = self.users.insert(face);
        self.set_active(now);
        added
    }

    /// Returns true when the face was a user
    pub fn remove_user(&mut self, face: FaceId, now: Instant) -> bool {
        let removed = self.users.remove(&face);
        if removed {
            self.last_referenced = now;
        }
        removed
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn has_user(&self, face: FaceId) -> bool {
        self.users.contains(&face)
    }

    pub fn users(&self) -> impl Iterator<Item = FaceId> + '_ {
        self.users.iter().copied()
    }

    pub(crate) fn take_users(&mut self) -> BTreeSet<FaceId> {
        std::mem::take(&mut self.users)
    }

    /// Report a projected on-screen area (pixels²) for this evaluation window
    pub fn add_texture_stats(&mut self, virtual_size: f32, now: Instant) {
        if virtual_size > self.max_virtual_size {
            self.max_virtual_size = virtual_size;
        }
        if virtual_size > 0.0 {
            self.stats_reported = true;
            self.last_referenced = now;
        }
    }

    /// Start a new evaluation window. Without `force` a recently seen texture
    /// keeps 90% of its size so it does not snap to zero between reports.
    pub fn reset_texture_stats(&mut self, force: bool) {
        if force || !self.stats_reported {
            self.max_virtual_size = 0.0;
        } else {
            self.max_virtual_size *= 0.9;
        }
        self.stats_reported = false;
    }

    pub fn max_virtual_size(&self) -> f32 {
        self.max_virtual_size
    }

    pub fn last_referenced(&self) -> Instant {
        self.last_referenced
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_referenced)
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_referenced = now;
    }

    /// Draw use reported by the render layer
    pub fn bind(&mut self, frame: u64) {
        self.bound_frame = Some(frame);
    }

    /// Bound in this frame or the one before
    pub fn bound_recently(&self, frame: u64) -> bool {
        self.bound_frame.map_or(false, |bound| bound + 1 >= frame)
    }

    pub fn max_discard_level(&self) -> u8 {
        max_discard_for(self.full_width, self.full_height)
    }

    /// Discard level of the texture on the GPU
    pub fn discard_level(&self) -> Option<u8> {
        self.gpu.as_ref().map(|t| t.discard_level)
    }

    pub fn texture_memory(&self) -> u64 {
        self.gpu.as_ref().map_or(0, |t| t.bytes)
    }

    pub fn gpu_texture(&self) -> Option<&GpuTexture> {
        self.gpu.as_ref()
    }

    pub fn has_gpu_texture(&self) -> bool {
        self.gpu.is_some()
    }

    /// Install a new GPU texture, handing back the previous one for destruction
    pub(crate) fn replace_gpu(&mut self, texture: GpuTexture) -> Option<GpuTexture> {
        self.gpu.replace(texture)
    }

    pub(crate) fn take_gpu(&mut self) -> Option<GpuTexture> {
        self.gpu.take()
    }
}

/// Media frames replace the texture that was on a face before playback
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MediaExt {
    pub playing: bool,
    /// Texture the media stream is standing in for
    pub old_texture: Option<Uuid>,
}

/// Per-kind extension data
#[derive(Debug)]
pub enum TextureExt {
    Local,
    Dynamic,
    Media(MediaExt),
    Fetched(FetchedTexture),
    Lod(FetchedTexture, LodController),
}

/// A texture record owned by the manager
#[derive(Debug)]
pub struct ViewerTexture {
    pub(crate) core: TextureCore,
    pub(crate) ext: TextureExt,
}

impl ViewerTexture {
    pub fn new(core: TextureCore, ext: TextureExt) -> Self {
        Self { core, ext }
    }

    pub fn fetched(id: Uuid, generation: u64, kind: TextureKind, now: Instant) -> Self {
        let fetch = FetchedTexture::new();
        let ext = match kind {
            TextureKind::Lod => TextureExt::Lod(fetch, LodController::new()),
            _ => TextureExt::Fetched(fetch),
        };
        Self::new(TextureCore::new(id, generation, now), ext)
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn kind(&self) -> TextureKind {
        match self.ext {
            TextureExt::Local => TextureKind::Local,
            TextureExt::Dynamic => TextureKind::Dynamic,
            TextureExt::Media(_) => TextureKind::Media,
            TextureExt::Fetched(_) => TextureKind::Fetched,
            TextureExt::Lod(..) => TextureKind::Lod,
        }
    }

    pub fn core(&self) -> &TextureCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut TextureCore {
        &mut self.core
    }

    pub fn fetch(&self) -> Option<&FetchedTexture> {
        match &self.ext {
            TextureExt::Fetched(fetch) | TextureExt::Lod(fetch, _) => Some(fetch),
            _ => None,
        }
    }

    pub fn fetch_mut(&mut self) -> Option<&mut FetchedTexture> {
        match &mut self.ext {
            TextureExt::Fetched(fetch) | TextureExt::Lod(fetch, _) => Some(fetch),
            _ => None,
        }
    }

    /// Core and fetch state borrowed together
    pub fn split_fetch_mut(&mut self) -> Option<(&mut TextureCore, &mut FetchedTexture)> {
        match &mut self.ext {
            TextureExt::Fetched(fetch) | TextureExt::Lod(fetch, _) => Some((&mut self.core, fetch)),
            _ => None,
        }
    }

    pub fn media(&self) -> Option<&MediaExt> {
        match &self.ext {
            TextureExt::Media(media) => Some(media),
            _ => None,
        }
    }

    pub fn media_mut(&mut self) -> Option<&mut MediaExt> {
        match &mut self.ext {
            TextureExt::Media(media) => Some(media),
            _ => None,
        }
    }

    pub fn is_missing_asset(&self) -> bool {
        self.fetch().map_or(false, |f| f.is_missing_asset())
    }

    pub fn decode_priority(&self) -> f32 {
        self.fetch().map_or(0.0, |f| f.decode_priority())
    }

    pub fn desired_discard_level(&self) -> Option<u8> {
        self.fetch().map(|f| f.desired_discard_level())
    }

    /// Run the LOD step and refresh the decode priority. No-op for kinds that
    /// are not fetched.
    pub fn process_texture_stats(&mut self, lod_params: &LodParams, priority_params: &PriorityParams) {
        match &mut self.ext {
            TextureExt::Fetched(fetch) => {
                lod::process_fixed_stats(&self.core, fetch);
                fetch.calc_decode_priority(&self.core, priority_params);
            }
            TextureExt::Lod(fetch, controller) => {
                controller.process_texture_stats(&self.core, fetch, lod_params);
                fetch.calc_decode_priority(&self.core, priority_params);
            }
            TextureExt::Local | TextureExt::Dynamic | TextureExt::Media(_) => {}
        }
    }

    /// Queued, in flight, or holding staged data
    pub fn has_pending_work(&self) -> bool {
        self.fetch().map_or(false, |f| f.has_pending_work())
    }
}
