//! Texture manager: the per-frame streaming scheduler
//!
//! Owns every texture record, the budget ledger and the two collaborators
//! (fetch service and GPU layer). Each [`TextureManager::update`] drains fetch
//! completions, recomputes desired levels and priorities, admits fetches in
//! priority order, ages idle records and evicts them under memory pressure.

use super::callbacks::{CallbackHandle, LoadedCallback};
use super::fetched::{Admission, CompletionDisposition, FetchContext};
use super::gpu::{GpuHandle, GpuTexture, GpuTextureLayer};
use super::ledger::BudgetLedger;
use super::record::{MediaExt, TextureCore, TextureExt, ViewerTexture};
use super::tester::TexturePipelineTester;
use super::types::{BoostLevel, FaceId, RawImage, TextureKind, TextureState};
use super::{TextureError, TextureResult};
use crate::config::StreamingSettings;
use crate::fetch::{CompletionQueue, CompletionSender, FetchCompletion, FetchService};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What one scheduler pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub frame: u64,
    pub completions: usize,
    pub stale_completions: usize,
    pub fetches_issued: usize,
    pub promotions: usize,
    pub deferred_promotions: usize,
    pub aged_inactive: usize,
    pub aged_candidates: usize,
    pub evicted: usize,
    pub pending: usize,
    pub under_pressure: bool,
    pub discard_bias: f32,
    pub bound_bytes: u64,
    pub total_bytes: u64,
}

/// Running totals since the manager was created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub ticks: u64,
    pub textures_created: u64,
    pub fetches_issued: u64,
    pub promotions: u64,
    pub completions: u64,
    pub stale_completions: u64,
    pub missing_assets: u64,
    pub transient_failures: u64,
    pub gpu_failures: u64,
    pub evictions: u64,
}

impl ManagerStats {
    /// Share of completions that were dropped as stale, in percent
    pub fn stale_rate(&self) -> f64 {
        if self.completions == 0 {
            0.0
        } else {
            (self.stale_completions as f64 / self.completions as f64) * 100.0
        }
    }
}

/// Textures shown while the real one is not on the GPU
#[derive(Debug)]
struct Placeholders {
    default_image: GpuTexture,
    missing_image: GpuTexture,
}

pub struct TextureManager<F: FetchService, G: GpuTextureLayer> {
    textures: HashMap<Uuid, ViewerTexture>,
    ledger: BudgetLedger,
    settings: StreamingSettings,
    fetcher: F,
    gpu: G,
    completions: CompletionQueue,
    tester: Option<TexturePipelineTester>,
    placeholders: Placeholders,
    frame: u64,
    next_generation: u64,
    stats: ManagerStats,
}

impl<F: FetchService, G: GpuTextureLayer> std::fmt::Debug for TextureManager<F, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureManager")
            .field("textures", &self.textures.len())
            .field("frame", &self.frame)
            .field("ledger", &self.ledger)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<F: FetchService, G: GpuTextureLayer> TextureManager<F, G> {
    /// `completions` is the queue whose sender was handed to `fetcher`
    pub fn new(settings: StreamingSettings, fetcher: F, mut gpu: G, completions: CompletionQueue) -> TextureResult<Self> {
        let settings = settings.clamped();
        let placeholders = Placeholders {
            default_image: gpu.create(&RawImage::solid(8, 8, [128, 128, 128, 255]), 0)?,
            missing_image: gpu.create(&RawImage::solid(8, 8, [255, 0, 255, 255]), 0)?,
        };
        let tester = settings
            .enable_pipeline_tester
            .then(|| TexturePipelineTester::new("texture-stream", Instant::now()));

        info!(
            "🖼️ Texture manager ready: {} concurrent fetches, tester {}",
            settings.fetch.max_concurrent_fetches,
            if tester.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            textures: HashMap::new(),
            ledger: settings.budget_ledger(),
            settings,
            fetcher,
            gpu,
            completions,
            tester,
            placeholders,
            frame: 0,
            next_generation: 1,
            stats: ManagerStats::default(),
        })
    }

    pub fn completion_sender(&self) -> CompletionSender {
        self.completions.sender()
    }

    pub fn settings(&self) -> &StreamingSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    pub fn stats(&self) -> &ManagerStats {
        &self.stats
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn fetch_service(&self) -> &F {
        &self.fetcher
    }

    pub fn fetch_service_mut(&mut self) -> &mut F {
        &mut self.fetcher
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn tester(&self) -> Option<&TexturePipelineTester> {
        self.tester.as_ref()
    }

    pub fn tester_mut(&mut self) -> Option<&mut TexturePipelineTester> {
        self.tester.as_mut()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn textures(&self) -> impl Iterator<Item = &ViewerTexture> {
        self.textures.values()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.textures.contains_key(&id)
    }

    pub fn find(&self, id: Uuid) -> Option<&ViewerTexture> {
        self.textures.get(&id)
    }

    pub fn find_mut(&mut self, id: Uuid) -> Option<&mut ViewerTexture> {
        self.textures.get_mut(&id)
    }

    /// Change the budget at runtime (e.g. after the user edits preferences)
    pub fn set_memory_caps(&mut self, max_bound_mb: u32, max_total_mb: u32) {
        self.ledger.set_caps(max_bound_mb, max_total_mb);
        let (bound, total) = BudgetLedger::clamp_caps(max_bound_mb, max_total_mb);
        self.settings.memory.max_bound_texture_mem_mb = bound;
        self.settings.memory.max_total_texture_mem_mb = total;
    }

    fn allocate_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    // =========================================================================
    // Record creation
    // =========================================================================

    /// Find or create a fetched texture. An existing record keeps its kind and
    /// only ever has its boost raised here.
    pub fn get_fetched_texture(
        &mut self,
        id: Uuid,
        kind: TextureKind,
        boost: BoostLevel,
        host: Option<SocketAddr>,
    ) -> &mut ViewerTexture {
        let texture = match self.textures.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let generation = self.next_generation;
                self.next_generation += 1;
                self.stats.textures_created += 1;
                debug!("📋 New {:?} texture {} (boost {})", kind, id, boost);
                entry.insert(ViewerTexture::fetched(id, generation, kind, Instant::now()))
            }
        };
        if boost > texture.core.boost_level() {
            texture.core.set_boost_level(boost);
        }
        if let (Some(host), Some(fetch)) = (host, texture.fetch_mut()) {
            fetch.set_target_host(host);
        }
        texture
    }

    fn insert_generated(&mut self, id: Uuid, image: &RawImage, ext: TextureExt) -> TextureResult<()> {
        let gpu_texture = self.gpu.create(image, 0)?;
        let generation = self.allocate_generation();
        let mut core = TextureCore::new(id, generation, Instant::now());
        core.set_full_dimensions(image.width, image.height, image.components);
        core.replace_gpu(gpu_texture);
        self.stats.textures_created += 1;
        if let Some(previous) = self.textures.insert(id, ViewerTexture::new(core, ext)) {
            debug!("Replacing texture {}", id);
            self.dispose(previous);
        }
        Ok(())
    }

    /// Locally generated texture, uploaded immediately at full resolution
    pub fn create_local_texture(&mut self, id: Uuid, image: &RawImage) -> TextureResult<()> {
        self.insert_generated(id, image, TextureExt::Local)
    }

    /// Render target the caller draws into
    pub fn create_dynamic_texture(&mut self, id: Uuid, width: u32, height: u32) -> TextureResult<()> {
        self.insert_generated(id, &RawImage::solid(width, height, [0, 0, 0, 255]), TextureExt::Dynamic)
    }

    /// Media texture standing in for `replaces` while playing
    pub fn create_media_texture(&mut self, id: Uuid, replaces: Option<Uuid>) {
        let generation = self.allocate_generation();
        let core = TextureCore::new(id, generation, Instant::now());
        let ext = TextureExt::Media(MediaExt { playing: false, old_texture: replaces });
        self.stats.textures_created += 1;
        if let Some(previous) = self.textures.insert(id, ViewerTexture::new(core, ext)) {
            self.dispose(previous);
        }
    }

    /// Upload a new media frame
    pub fn update_media_frame(&mut self, id: Uuid, frame: &RawImage) -> TextureResult<()> {
        let texture = self
            .textures
            .get_mut(&id)
            .filter(|t| t.kind() == TextureKind::Media)
            .ok_or(TextureError::NotFound { id })?;
        let gpu_texture = self.gpu.create(frame, 0)?;
        texture.core.set_full_dimensions(frame.width, frame.height, frame.components);
        if let Some(old) = texture.core.replace_gpu(gpu_texture) {
            self.gpu.destroy(old);
        }
        Ok(())
    }

    /// Start or stop playback. Faces move to the media texture while playing
    /// and back to the texture it replaced when stopped.
    pub fn set_media_playing(&mut self, id: Uuid, playing: bool) -> bool {
        let Some(media) = self.textures.get_mut(&id).and_then(|t| t.media_mut()) else {
            return false;
        };
        if media.playing == playing {
            return true;
        }
        media.playing = playing;
        let old_texture = media.old_texture;

        if let Some(old) = old_texture {
            let moved = if playing { self.switch_users(old, id) } else { self.switch_users(id, old) };
            debug!("Media {} {}: moved {} faces", id, if playing { "playing" } else { "stopped" }, moved);
        }
        true
    }

    // =========================================================================
    // Scene-facing operations. Unknown ids are ignored.
    // =========================================================================

    pub fn add_user(&mut self, id: Uuid, face: FaceId) -> bool {
        match self.textures.get_mut(&id) {
            Some(texture) => {
                texture.core.add_user(face, Instant::now());
                true
            }
            None => false,
        }
    }

    pub fn remove_user(&mut self, id: Uuid, face: FaceId) -> bool {
        self.textures
            .get_mut(&id)
            .map_or(false, |texture| texture.core.remove_user(face, Instant::now()))
    }

    /// Move every face using `from` over to `to`. Returns how many moved.
    pub fn switch_users(&mut self, from: Uuid, to: Uuid) -> usize {
        if from == to || !self.textures.contains_key(&to) {
            return 0;
        }
        let now = Instant::now();
        let users = match self.textures.get_mut(&from) {
            Some(texture) => {
                texture.core.touch(now);
                texture.core.take_users()
            }
            None => return 0,
        };
        let moved = users.len();
        if let Some(target) = self.textures.get_mut(&to) {
            for face in users {
                target.core.add_user(face, now);
            }
        }
        moved
    }

    pub fn add_texture_stats(&mut self, id: Uuid, virtual_size: f32) -> bool {
        match self.textures.get_mut(&id) {
            Some(texture) => {
                texture.core.add_texture_stats(virtual_size, Instant::now());
                true
            }
            None => false,
        }
    }

    /// Draw use in the current frame
    pub fn bind(&mut self, id: Uuid) -> bool {
        let frame = self.frame;
        match self.textures.get_mut(&id) {
            Some(texture) => {
                texture.core.bind(frame);
                texture.core.touch(Instant::now());
                true
            }
            None => false,
        }
    }

    pub fn set_boost_level(&mut self, id: Uuid, level: BoostLevel) -> bool {
        match self.textures.get_mut(&id) {
            Some(texture) => {
                texture.core.set_boost_level(level);
                true
            }
            None => false,
        }
    }

    pub fn set_no_delete(&mut self, id: Uuid) -> bool {
        match self.textures.get_mut(&id) {
            Some(texture) => {
                texture.core.set_no_delete();
                true
            }
            None => false,
        }
    }

    pub fn dont_discard(&mut self, id: Uuid) -> bool {
        match self.textures.get_mut(&id) {
            Some(texture) => {
                texture.core.dont_discard();
                true
            }
            None => false,
        }
    }

    /// Size the texture by its draw size instead of its projected area
    pub fn set_known_draw_size(&mut self, id: Uuid, width: u32, height: u32) -> bool {
        let Some(texture) = self.textures.get_mut(&id) else {
            return false;
        };
        let Some(fetch) = texture.fetch_mut() else {
            return false;
        };
        fetch.set_known_draw_size(width, height);
        texture.core.add_texture_stats(width as f32 * height as f32, Instant::now());
        true
    }

    pub fn set_min_discard_level(&mut self, id: Uuid, discard: u8) -> bool {
        match self.textures.get_mut(&id).and_then(|t| t.fetch_mut()) {
            Some(fetch) => {
                fetch.set_min_discard_level(discard);
                true
            }
            None => false,
        }
    }

    pub fn set_target_host(&mut self, id: Uuid, host: SocketAddr) -> bool {
        match self.textures.get_mut(&id).and_then(|t| t.fetch_mut()) {
            Some(fetch) => {
                fetch.set_target_host(host);
                true
            }
            None => false,
        }
    }

    /// Register a loaded callback. `None` when the id is unknown or not fetched.
    pub fn set_loaded_callback(
        &mut self,
        id: Uuid,
        callback: LoadedCallback,
        desired_discard: u8,
        keep_raw: bool,
        needs_aux: bool,
    ) -> Option<CallbackHandle> {
        let fetch = self.textures.get_mut(&id)?.fetch_mut()?;
        Some(fetch.set_loaded_callback(callback, desired_discard, keep_raw, needs_aux))
    }

    pub fn destroy_raw_image(&mut self, id: Uuid) -> bool {
        match self.textures.get_mut(&id).and_then(|t| t.fetch_mut()) {
            Some(fetch) => {
                fetch.destroy_raw_image();
                true
            }
            None => false,
        }
    }

    /// Mark the asset as nonexistent without waiting for the fetch service
    pub fn set_is_missing_asset(&mut self, id: Uuid) -> bool {
        match self.textures.get_mut(&id).and_then(|t| t.split_fetch_mut()) {
            Some((core, fetch)) => {
                if !fetch.is_missing_asset() {
                    fetch.set_is_missing_asset(core, &mut self.fetcher);
                    self.stats.missing_assets += 1;
                }
                true
            }
            None => false,
        }
    }

    /// The id now names different content: drop everything fetched so far.
    /// Results still in flight for the old identity are dropped as stale.
    /// Only fetched kinds can be reset; their content can be fetched again.
    pub fn reset_identity(&mut self, id: Uuid) -> bool {
        if !self.textures.get(&id).map_or(false, |t| t.kind().is_fetched()) {
            return false;
        }
        let generation = self.allocate_generation();
        let Some(texture) = self.textures.get_mut(&id) else {
            return false;
        };

        match &mut texture.ext {
            TextureExt::Fetched(fetch) => fetch.reset_identity(&texture.core, &mut self.fetcher),
            TextureExt::Lod(fetch, lod) => {
                fetch.reset_identity(&texture.core, &mut self.fetcher);
                lod.reset();
            }
            TextureExt::Local | TextureExt::Dynamic | TextureExt::Media(_) => return false,
        }
        if let Some(old) = texture.core.take_gpu() {
            self.gpu.destroy(old);
        }
        texture.core.clear_dimensions();
        texture.core.set_generation(generation);
        debug!("🔄 Texture {} reset to generation {}", id, generation);
        true
    }

    /// GPU handle to draw with: the texture itself, or a placeholder
    pub fn handle_for(&self, id: Uuid) -> GpuHandle {
        match self.textures.get(&id) {
            Some(texture) => match texture.core.gpu_texture() {
                Some(gpu) => gpu.handle,
                None if texture.is_missing_asset() => self.placeholders.missing_image.handle,
                None => self.placeholders.default_image.handle,
            },
            None => self.placeholders.default_image.handle,
        }
    }

    // =========================================================================
    // Scheduler
    // =========================================================================

    pub fn tick(&mut self) -> TickReport {
        self.update(Instant::now())
    }

    pub fn update(&mut self, now: Instant) -> TickReport {
        self.frame += 1;
        self.stats.ticks += 1;
        let mut report = TickReport { frame: self.frame, ..TickReport::default() };

        self.drain_completions(now, &mut report);

        let lod_params = self.settings.lod_params(self.ledger.desired_discard_bias());
        let priority_params = self.settings.priority_params();
        for texture in self.textures.values_mut() {
            if texture.core.user_count() > 0 {
                texture.core.touch(now);
                texture.core.force_active();
            }
            texture.process_texture_stats(&lod_params, &priority_params);
        }
        self.aggregate_ledger();

        let ranked = self.rank_pending();
        report.pending = ranked.len();
        self.admit(&ranked, now, &mut report);
        self.aggregate_ledger();

        self.age_textures(now, &mut report);
        if self.ledger.over_total_cap() {
            report.evicted = self.evict(true);
        }

        let pressure_started = self.ledger.update_pressure(now);
        if pressure_started {
            if let Some(tester) = self.tester.as_mut() {
                tester.set_stabilizing_time(now);
            }
        }

        for texture in self.textures.values_mut() {
            texture.core.reset_texture_stats(false);
        }
        self.verify_ledger();
        self.sample_tester(now);

        report.under_pressure = self.ledger.is_under_pressure();
        report.discard_bias = self.ledger.desired_discard_bias();
        report.bound_bytes = self.ledger.bound_bytes();
        report.total_bytes = self.ledger.total_bytes();
        report
    }

    fn drain_completions(&mut self, now: Instant, report: &mut TickReport) {
        for FetchCompletion { ticket, outcome } in self.completions.drain() {
            report.completions += 1;
            self.stats.completions += 1;

            let disposition = match self.textures.get_mut(&ticket.id).and_then(|t| t.split_fetch_mut()) {
                Some((core, fetch)) => fetch.apply_completion(core, ticket, outcome, &mut self.fetcher, now),
                None => CompletionDisposition::Stale,
            };

            match disposition {
                CompletionDisposition::Stale => {
                    debug!("Stale completion for {} @ discard {}", ticket.id, ticket.discard);
                    report.stale_completions += 1;
                    self.stats.stale_completions += 1;
                }
                CompletionDisposition::Missing => self.stats.missing_assets += 1,
                CompletionDisposition::Retry => self.stats.transient_failures += 1,
                CompletionDisposition::Staged => {}
            }
        }
    }

    fn aggregate_ledger(&mut self) {
        let frame = self.frame;
        self.ledger.aggregate(
            self.textures
                .values()
                .map(|t| (t.core.texture_memory(), t.core.bound_recently(frame))),
        );
    }

    /// Records with work to do, highest priority first, ties by id
    fn rank_pending(&self) -> Vec<Uuid> {
        let mut ranked: Vec<(f32, Uuid)> = self
            .textures
            .values()
            .filter(|t| t.has_pending_work())
            .map(|t| (t.decode_priority(), t.id()))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, id)| id).collect()
    }

    fn admit(&mut self, ranked: &[Uuid], now: Instant, report: &mut TickReport) {
        let in_flight: usize = self
            .textures
            .values()
            .filter_map(|t| t.fetch())
            .map(|f| f.in_flight_count())
            .sum();
        let slots = self.settings.fetch.max_concurrent_fetches.saturating_sub(in_flight);
        let mut admission = Admission::new(slots, self.ledger.total_bytes(), self.ledger.max_total_bytes());

        for id in ranked {
            let Some((core, fetch)) = self.textures.get_mut(id).and_then(|t| t.split_fetch_mut()) else {
                continue;
            };
            let mut ctx = FetchContext {
                service: &mut self.fetcher,
                gpu: &mut self.gpu,
                admission: &mut admission,
                tester: self.tester.as_mut(),
                default_image_size: self.settings.fetch.default_image_size,
                request_timeout: self.settings.request_timeout(),
                now,
            };
            fetch.update_fetch(core, &mut ctx);
        }

        report.fetches_issued = admission.issued;
        report.promotions = admission.promoted;
        report.deferred_promotions = admission.deferred;
        self.stats.fetches_issued += admission.issued as u64;
        self.stats.promotions += admission.promoted as u64;
        self.stats.gpu_failures += admission.gpu_failures as u64;
    }

    /// Idle fetched textures drift towards eviction
    fn age_textures(&mut self, now: Instant, report: &mut TickReport) {
        let inactive_after = self.settings.inactive_after();
        let deletion_after = self.settings.deletion_candidate_after();

        for texture in self.textures.values_mut() {
            if !texture.kind().is_fetched() || texture.core.user_count() > 0 {
                continue;
            }
            let core = &mut texture.core;
            let idle = core.idle_for(now);
            match core.state() {
                TextureState::Active | TextureState::Inactive if idle >= deletion_after => {
                    core.set_deletion_candidate();
                    report.aged_candidates += 1;
                    debug!("Texture {} is a deletion candidate after {:?} idle", core.id(), idle);
                }
                TextureState::Active if idle >= inactive_after => {
                    core.set_inactive();
                    report.aged_inactive += 1;
                }
                _ => {}
            }
        }
    }

    /// Evict every deletion candidate regardless of pressure
    pub fn evict_candidates(&mut self) -> usize {
        self.evict(false)
    }

    /// Candidates in eviction order: lowest priority, least recently
    /// referenced, then id. With `only_over_cap` stops once under the cap.
    fn evict(&mut self, only_over_cap: bool) -> usize {
        let mut candidates: Vec<(f32, Instant, Uuid)> = self
            .textures
            .values()
            .filter(|t| t.core.state() == TextureState::DeletionCandidate && !t.core.is_pinned())
            .map(|t| (t.decode_priority(), t.core.last_referenced(), t.id()))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut evicted = 0;
        for (_, _, id) in candidates {
            if only_over_cap && !self.ledger.over_total_cap() {
                break;
            }
            if self.delete_texture(id) {
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(
                "🗑️ Evicted {} textures, {} MB total in use",
                evicted,
                self.ledger.total_bytes() / (1024 * 1024)
            );
        }
        evicted
    }

    fn delete_texture(&mut self, id: Uuid) -> bool {
        let Some(texture) = self.textures.remove(&id) else {
            return false;
        };
        let was_bound = texture.core.bound_recently(self.frame);
        let bytes = self.dispose(texture);
        self.ledger.release(bytes, was_bound);
        self.stats.evictions += 1;
        debug!("🗑️ Deleted texture {} ({} bytes)", id, bytes);
        true
    }

    /// Cancel fetches and free the GPU texture of a record that already left
    /// the map. Its callbacks are dropped unfired. Returns the bytes released.
    fn dispose(&mut self, mut texture: ViewerTexture) -> u64 {
        if let Some((core, fetch)) = texture.split_fetch_mut() {
            fetch.cancel_in_flight(core, &mut self.fetcher);
        }
        let bytes = match texture.core.take_gpu() {
            Some(gpu) => {
                let bytes = gpu.bytes;
                self.gpu.destroy(gpu);
                bytes
            }
            None => 0,
        };
        texture.core.mark_deleted();
        bytes
    }

    fn verify_ledger(&mut self) {
        let holds = self.ledger.invariant_holds();
        debug_assert!(holds, "bound texture memory exceeds total");
        if !holds {
            warn!(
                "⚠️ Texture ledger out of balance ({} bound > {} total), recomputing",
                self.ledger.bound_bytes(),
                self.ledger.total_bytes()
            );
            self.ledger.note_correction();
            self.aggregate_ledger();
        }
    }

    fn sample_tester(&mut self, now: Instant) {
        let Some(tester) = self.tester.as_mut() else {
            return;
        };
        let frame = self.frame;
        for texture in self.textures.values() {
            if !texture.core.bound_recently(frame) {
                continue;
            }
            match texture.core.gpu_texture() {
                Some(gpu) => tester.update_texture_binding_stats(gpu.bytes, gpu.area()),
                None => tester.update_gray_texture_binding(),
            }
        }
        tester.update(now, self.ledger.is_under_pressure());
    }

    /// Cancel all fetches and free every texture, placeholders included
    pub fn shutdown(&mut self) {
        let ids: Vec<Uuid> = self.textures.keys().copied().collect();
        let count = ids.len();
        for id in ids {
            if let Some(texture) = self.textures.remove(&id) {
                self.dispose(texture);
            }
        }
        self.ledger.aggregate(std::iter::empty());

        let placeholders = std::mem::replace(
            &mut self.placeholders,
            Placeholders {
                default_image: empty_gpu_texture(),
                missing_image: empty_gpu_texture(),
            },
        );
        self.gpu.destroy(placeholders.default_image);
        self.gpu.destroy(placeholders.missing_image);
        info!("🖼️ Texture manager shut down, released {} textures", count);
    }
}

fn empty_gpu_texture() -> GpuTexture {
    GpuTexture {
        handle: GpuHandle(0),
        width: 0,
        height: 0,
        discard_level: 0,
        bytes: 0,
    }
}
