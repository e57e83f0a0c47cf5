//! Fetch state machine for textures that come from the cache or network
//!
//! One [`FetchedTexture`] per fetched record. The scheduler drives it with
//! [`FetchedTexture::update_fetch`] in priority order and feeds it results with
//! [`FetchedTexture::apply_completion`]. Neither call blocks.

use super::callbacks::{CallbackHandle, CallbackList, LoadedCallback};
use super::gpu::GpuTextureLayer;
use super::record::TextureCore;
use super::tester::TexturePipelineTester;
use super::types::{dimensions_at, BoostLevel, FetchState, RawImage, MAX_DISCARD_LEVEL, MAX_IMAGE_SIZE_DEFAULT};
use crate::fetch::{FetchOutcome, FetchRequest, FetchService, FetchTicket, FetchedImage};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Largest discard gap that still raises priority
const MAX_PRIORITY_GAP: u8 = 4;
const GAP_WEIGHT: f32 = 100_000.0;
const PIXEL_WEIGHT: f32 = 100.0;
const MAX_PIXEL_TERM: f32 = 999.0;
const BOOST_WEIGHT: f32 = 1_000.0;
const HIGH_BOOST_BONUS: f32 = 10_000_000.0;

/// Per-tick inputs to the priority calculation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityParams {
    /// Multiplier applied once per transient failure
    pub retry_decay: f32,
    /// Edge length assumed while dimensions are unknown
    pub default_image_size: u32,
}

impl Default for PriorityParams {
    fn default() -> Self {
        Self {
            retry_decay: 0.5,
            default_image_size: MAX_IMAGE_SIZE_DEFAULT,
        }
    }
}

/// Shared budget for one scheduler pass: fetch slots and projected memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    slots: usize,
    projected_total: u64,
    max_total: u64,
    pub issued: usize,
    pub promoted: usize,
    pub deferred: usize,
    pub gpu_failures: usize,
}

impl Admission {
    pub fn new(slots: usize, projected_total: u64, max_total: u64) -> Self {
        Self {
            slots,
            projected_total,
            max_total,
            issued: 0,
            promoted: 0,
            deferred: 0,
            gpu_failures: 0,
        }
    }

    /// No slot or memory limit
    pub fn unlimited() -> Self {
        Self::new(usize::MAX, 0, u64::MAX)
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn projected_total(&self) -> u64 {
        self.projected_total
    }

    pub fn over_cap(&self) -> bool {
        self.projected_total > self.max_total
    }

    fn try_admit(&mut self, estimate: u64) -> bool {
        if self.slots == 0 || self.projected_total.saturating_add(estimate) > self.max_total {
            return false;
        }
        self.slots -= 1;
        self.projected_total += estimate;
        self.issued += 1;
        true
    }

    /// A request given up on frees its slot for later records in the pass
    fn release_slot(&mut self) {
        self.slots = self.slots.saturating_add(1);
    }

    fn note_promotion(&mut self, new_bytes: u64, old_bytes: u64) {
        self.projected_total = self.projected_total.saturating_add(new_bytes).saturating_sub(old_bytes);
        self.promoted += 1;
    }
}

/// Collaborators handed to [`FetchedTexture::update_fetch`]
pub struct FetchContext<'a> {
    pub service: &'a mut dyn FetchService,
    pub gpu: &'a mut dyn GpuTextureLayer,
    pub admission: &'a mut Admission,
    pub tester: Option<&'a mut TexturePipelineTester>,
    pub default_image_size: u32,
    /// In-flight requests older than this count as transient failures
    pub request_timeout: Duration,
    pub now: Instant,
}

/// What happened to a delivered completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionDisposition {
    /// Decoded data is waiting for promotion
    Staged,
    /// The asset does not exist
    Missing,
    /// Transient failure, will be requested again
    Retry,
    /// Dropped: wrong generation, not outstanding, or not an improvement
    Stale,
}

#[derive(Debug)]
struct StagedImage {
    discard: u8,
    image: FetchedImage,
    latency: Duration,
}

#[derive(Debug)]
pub struct FetchedTexture {
    desired_discard: u8,
    min_desired_discard: u8,
    requested_discard: Option<u8>,
    actual_discard: Option<u8>,
    state: FetchState,
    in_flight: BTreeMap<u8, Instant>,
    pending: Option<StagedImage>,
    decode_priority: f32,
    retries: u32,
    missing: bool,
    known_draw_size: Option<(u32, u32)>,
    target_host: Option<SocketAddr>,
    needs_aux: bool,
    keep_raw: bool,
    raw: Option<RawImage>,
    aux: Option<RawImage>,
    callbacks: CallbackList,
}

impl Default for FetchedTexture {
    fn default() -> Self {
        Self {
            desired_discard: MAX_DISCARD_LEVEL,
            min_desired_discard: MAX_DISCARD_LEVEL,
            requested_discard: None,
            actual_discard: None,
            state: FetchState::None,
            in_flight: BTreeMap::new(),
            pending: None,
            decode_priority: 0.0,
            retries: 0,
            missing: false,
            known_draw_size: None,
            target_host: None,
            needs_aux: false,
            keep_raw: false,
            raw: None,
            aux: None,
            callbacks: CallbackList::new(),
        }
    }
}

impl FetchedTexture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn desired_discard_level(&self) -> u8 {
        self.desired_discard
    }

    /// Never coarser than the minimum desired level
    pub fn set_desired_discard_level(&mut self, discard: u8) {
        self.desired_discard = discard.min(self.min_desired_discard);
    }

    pub fn min_desired_discard_level(&self) -> u8 {
        self.min_desired_discard
    }

    /// Only ever lowers the cap
    pub fn set_min_discard_level(&mut self, discard: u8) {
        self.min_desired_discard = self.min_desired_discard.min(discard);
        self.desired_discard = self.desired_discard.min(self.min_desired_discard);
    }

    pub fn requested_discard_level(&self) -> Option<u8> {
        self.requested_discard
    }

    pub fn actual_discard_level(&self) -> Option<u8> {
        self.actual_discard
    }

    pub fn fetch_state(&self) -> FetchState {
        self.state
    }

    pub fn in_flight_levels(&self) -> impl Iterator<Item = u8> + '_ {
        self.in_flight.keys().copied()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn staged_discard_level(&self) -> Option<u8> {
        self.pending.as_ref().map(|staged| staged.discard)
    }

    pub fn decode_priority(&self) -> f32 {
        self.decode_priority
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_missing_asset(&self) -> bool {
        self.missing
    }

    pub fn known_draw_size(&self) -> Option<(u32, u32)> {
        self.known_draw_size
    }

    pub fn set_known_draw_size(&mut self, width: u32, height: u32) {
        self.known_draw_size = Some((width.max(1), height.max(1)));
    }

    pub fn target_host(&self) -> Option<SocketAddr> {
        self.target_host
    }

    pub fn set_target_host(&mut self, host: SocketAddr) {
        self.target_host = Some(host);
    }

    pub fn needs_aux(&self) -> bool {
        self.needs_aux
    }

    pub fn set_needs_aux(&mut self, needs_aux: bool) {
        self.needs_aux = needs_aux;
    }

    pub fn raw_image(&self) -> Option<&RawImage> {
        self.raw.as_ref()
    }

    pub fn aux_image(&self) -> Option<&RawImage> {
        self.aux.as_ref()
    }

    pub fn destroy_raw_image(&mut self) {
        self.raw = None;
        self.aux = None;
        self.keep_raw = false;
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Current data is at least as fine as desired
    pub fn is_satisfied(&self) -> bool {
        self.actual_discard.map_or(false, |actual| actual <= self.desired_discard)
    }

    /// Staged, in flight, below the desired level, or holding a callback
    /// that would fire at the current level
    pub fn has_pending_work(&self) -> bool {
        if self.missing {
            return false;
        }
        self.pending.is_some()
            || !self.in_flight.is_empty()
            || !self.is_satisfied()
            || self.actual_discard.map_or(false, |actual| self.callbacks.would_fire(actual))
    }

    pub fn set_loaded_callback(
        &mut self,
        callback: LoadedCallback,
        desired_discard: u8,
        keep_raw: bool,
        needs_aux: bool,
    ) -> CallbackHandle {
        if keep_raw {
            self.keep_raw = true;
        }
        if needs_aux {
            self.needs_aux = true;
        }
        self.callbacks.register(callback, desired_discard, keep_raw)
    }

    /// Rank score for the scheduler. Zero when there is nothing left to do.
    pub fn calc_decode_priority(&mut self, core: &TextureCore, params: &PriorityParams) -> f32 {
        self.decode_priority = self.compute_priority(core, params);
        self.decode_priority
    }

    fn compute_priority(&self, core: &TextureCore, params: &PriorityParams) -> f32 {
        if self.missing {
            return 0.0;
        }
        let current = match &self.pending {
            Some(staged) => Some(staged.discard),
            None if self.is_satisfied() => return 0.0,
            None => self.actual_discard,
        };

        let mut pixel_priority = core.max_virtual_size().max(0.0).sqrt();
        let gap = match current {
            Some(level) => level.saturating_sub(self.desired_discard).min(MAX_PRIORITY_GAP),
            None => {
                // Unknown textures get at least the priority of their coarsest default level
                let default_edge = (params.default_image_size >> MAX_DISCARD_LEVEL).max(1);
                pixel_priority = pixel_priority.max(default_edge as f32);
                MAX_PRIORITY_GAP
            }
        };

        let boost = core.boost_level();
        let mut priority = (gap as f32 + 1.0) * GAP_WEIGHT
            + PIXEL_WEIGHT * pixel_priority.min(MAX_PIXEL_TERM)
            + BOOST_WEIGHT * boost as u8 as f32;
        if boost.is_high() {
            priority += HIGH_BOOST_BONUS;
        }
        priority * params.retry_decay.clamp(0.0, 1.0).powi(self.retries as i32)
    }

    /// Bytes a level of this texture would take on the GPU
    pub fn estimate_bytes(&self, core: &TextureCore, discard: u8, default_image_size: u32) -> u64 {
        let (w, h) = if core.has_dimensions() {
            dimensions_at(core.full_width(), core.full_height(), discard)
        } else {
            dimensions_at(default_image_size, default_image_size, discard)
        };
        let components = if core.components() > 0 { core.components() } else { 4 };
        w as u64 * h as u64 * components as u64
    }

    /// Advance one step. Returns true while work remains (queued, in flight
    /// or staged), false once satisfied or missing.
    pub fn update_fetch(&mut self, core: &mut TextureCore, ctx: &mut FetchContext<'_>) -> bool {
        if self.missing {
            return false;
        }

        if let Some(staged) = self.pending.take() {
            if staged.discard == 0 && ctx.admission.over_cap() {
                debug!("Holding full resolution of {} until memory is available", core.id());
                self.pending = Some(staged);
                self.state = FetchState::Decoding;
                ctx.admission.deferred += 1;
                return true;
            }
            self.promote(core, staged, ctx);
        }

        if let Some(actual) = self.actual_discard {
            if !self.callbacks.is_empty() {
                self.callbacks
                    .dispatch_loaded(core.id(), actual, self.raw.as_ref(), self.aux.as_ref());
            }
        }

        if self.is_satisfied() {
            self.cancel_in_flight(core, ctx.service);
            self.state = FetchState::Complete;
            return false;
        }

        if self.expire_in_flight(core, ctx) && self.in_flight.is_empty() {
            self.state = FetchState::Queued;
            return true;
        }

        if self.in_flight.keys().next().map_or(false, |&level| level <= self.desired_discard) {
            self.state = FetchState::InFlight;
            return true;
        }

        let discard = self.desired_discard;
        let estimate = self
            .estimate_bytes(core, discard, ctx.default_image_size)
            .saturating_sub(core.texture_memory());
        if ctx.admission.try_admit(estimate) {
            let ticket = FetchTicket {
                id: core.id(),
                generation: core.generation(),
                discard,
            };
            self.in_flight.insert(discard, ctx.now);
            self.requested_discard = Some(discard);
            self.state = FetchState::InFlight;
            debug!("🖼️ Requesting {} @ discard {} (priority {:.0})", core.id(), discard, self.decode_priority);
            ctx.service.request(FetchRequest {
                ticket,
                priority: self.decode_priority,
                host: self.target_host,
                needs_aux: self.needs_aux,
            });
        } else if self.in_flight.is_empty() {
            self.state = FetchState::Queued;
        }
        true
    }

    /// Give up on requests the service never answered. Returns true if any
    /// were dropped; each one counts as a transient failure.
    fn expire_in_flight(&mut self, core: &TextureCore, ctx: &mut FetchContext<'_>) -> bool {
        let expired: Vec<u8> = self
            .in_flight
            .iter()
            .filter(|(_, issued_at)| ctx.now.saturating_duration_since(**issued_at) >= ctx.request_timeout)
            .map(|(&discard, _)| discard)
            .collect();

        for &discard in &expired {
            self.in_flight.remove(&discard);
            warn!("⏱️ Fetch of {} @ discard {} timed out after {:?}", core.id(), discard, ctx.request_timeout);
            ctx.service.cancel(FetchTicket {
                id: core.id(),
                generation: core.generation(),
                discard,
            });
            ctx.admission.release_slot();
            self.note_failure();
        }
        !expired.is_empty()
    }

    fn promote(&mut self, core: &mut TextureCore, staged: StagedImage, ctx: &mut FetchContext<'_>) {
        let StagedImage { discard, image, latency } = staged;
        let texture = match ctx.gpu.create(&image.raw, discard) {
            Ok(texture) => texture,
            Err(e) => {
                warn!("❌ GPU upload failed for {} @ discard {}: {}", core.id(), discard, e);
                self.retries += 1;
                self.state = FetchState::Queued;
                ctx.admission.gpu_failures += 1;
                return;
            }
        };

        if !core.has_dimensions() {
            let (width, height) = if image.full_width > 0 && image.full_height > 0 {
                (image.full_width, image.full_height)
            } else {
                (image.raw.width << discard, image.raw.height << discard)
            };
            core.set_full_dimensions(width, height, image.raw.components);
        }

        let new_bytes = texture.bytes;
        let old_bytes = match core.replace_gpu(texture) {
            Some(old) => {
                let bytes = old.bytes;
                ctx.gpu.destroy(old);
                bytes
            }
            None => 0,
        };
        ctx.admission.note_promotion(new_bytes, old_bytes);
        self.actual_discard = Some(discard);
        self.retries = 0;

        if let Some(tester) = ctx.tester.as_deref_mut() {
            tester.update_texture_loading_stats(
                ctx.now,
                image.raw.data.len() as u64,
                image.raw.area(),
                image.from_cache,
                core.boost_level() == BoostLevel::Sculpted,
            );
            tester.record_fetch_latency(latency);
        }

        debug!(
            "🖼️ Promoted {} to discard {} ({}x{}, {} bytes)",
            core.id(),
            discard,
            image.raw.width,
            image.raw.height,
            new_bytes
        );

        if self.keep_raw || self.callbacks.wants_raw() {
            self.raw = Some(image.raw);
            self.aux = image.aux;
        }
    }

    /// Route a completion to this texture
    pub fn apply_completion(
        &mut self,
        core: &TextureCore,
        ticket: FetchTicket,
        outcome: FetchOutcome,
        service: &mut dyn FetchService,
        now: Instant,
    ) -> CompletionDisposition {
        if ticket.generation != core.generation() || self.missing {
            return CompletionDisposition::Stale;
        }
        let Some(issued_at) = self.in_flight.remove(&ticket.discard) else {
            return CompletionDisposition::Stale;
        };

        match outcome {
            FetchOutcome::Loaded(image) => {
                let best = match (self.actual_discard, self.staged_discard_level()) {
                    (Some(a), Some(s)) => Some(a.min(s)),
                    (a, s) => a.or(s),
                };
                if best.map_or(false, |best| ticket.discard >= best) {
                    debug!("Dropping late discard {} for {} (have {:?})", ticket.discard, core.id(), best);
                    return CompletionDisposition::Stale;
                }
                if !image.raw.is_valid() {
                    warn!("❌ Fetch of {} @ discard {} delivered a malformed image", core.id(), ticket.discard);
                    self.note_failure();
                    return CompletionDisposition::Retry;
                }
                self.pending = Some(StagedImage {
                    discard: ticket.discard,
                    image,
                    latency: now.saturating_duration_since(issued_at),
                });
                self.state = FetchState::Decoding;
                self.retries = 0;
                CompletionDisposition::Staged
            }
            FetchOutcome::NotFound => {
                self.set_is_missing_asset(core, service);
                CompletionDisposition::Missing
            }
            FetchOutcome::Failed { reason } => {
                debug!("🔄 Fetch of {} @ discard {} failed: {}", core.id(), ticket.discard, reason);
                self.note_failure();
                CompletionDisposition::Retry
            }
        }
    }

    fn note_failure(&mut self) {
        self.retries += 1;
        if self.in_flight.is_empty() && self.pending.is_none() {
            self.state = FetchState::Queued;
        }
    }

    /// Sticky until the identity is reset
    pub fn set_is_missing_asset(&mut self, core: &TextureCore, service: &mut dyn FetchService) {
        if self.missing {
            return;
        }
        warn!("❌ Texture {} is missing", core.id());
        self.missing = true;
        self.cancel_in_flight(core, service);
        self.pending = None;
        self.requested_discard = None;
        self.decode_priority = 0.0;
        self.state = FetchState::Missing;
        self.callbacks.dispatch_failed(core.id());
    }

    /// Cancel every outstanding request. Late results are dropped as stale.
    pub fn cancel_in_flight(&mut self, core: &TextureCore, service: &mut dyn FetchService) {
        for discard in std::mem::take(&mut self.in_flight).into_keys() {
            debug!("Cancelling {} @ discard {}", core.id(), discard);
            service.cancel(FetchTicket {
                id: core.id(),
                generation: core.generation(),
                discard,
            });
        }
    }

    /// Forget everything learned about the asset. Callbacks stay registered.
    pub fn reset_identity(&mut self, core: &TextureCore, service: &mut dyn FetchService) {
        self.cancel_in_flight(core, service);
        self.missing = false;
        self.retries = 0;
        self.pending = None;
        self.requested_discard = None;
        self.actual_discard = None;
        self.desired_discard = self.min_desired_discard;
        self.decode_priority = 0.0;
        self.raw = None;
        self.aux = None;
        self.state = FetchState::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::worker::decode_at_discard;
    use crate::fetch::RecordingFetchService;
    use crate::texture::callbacks::{CallbackAction, LoadedEvent};
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use crate::texture::gpu::HostTextureLayer;
    use crate::texture::types::RawImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    struct Harness {
        core: TextureCore,
        fetch: FetchedTexture,
        service: RecordingFetchService,
        gpu: HostTextureLayer,
        now: Instant,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                core: TextureCore::new(Uuid::new_v4(), 1, Instant::now()),
                fetch: FetchedTexture::new(),
                service: RecordingFetchService::new(),
                gpu: HostTextureLayer::new(),
                now: Instant::now(),
            }
        }

        fn step(&mut self, admission: &mut Admission) -> bool {
            let mut ctx = FetchContext {
                service: &mut self.service,
                gpu: &mut self.gpu,
                admission,
                tester: None,
                default_image_size: MAX_IMAGE_SIZE_DEFAULT,
                request_timeout: Duration::from_secs(30),
                now: self.now,
            };
            self.fetch.update_fetch(&mut self.core, &mut ctx)
        }

        fn deliver(&mut self, discard: u8, edge: u32) -> CompletionDisposition {
            let ticket = FetchTicket {
                id: self.core.id(),
                generation: self.core.generation(),
                discard,
            };
            let image = FetchedImage {
                raw: RawImage::solid(edge, edge, [9, 9, 9, 255]),
                full_width: edge << discard,
                full_height: edge << discard,
                aux: None,
                from_cache: false,
            };
            self.fetch
                .apply_completion(&self.core, ticket, FetchOutcome::Loaded(image), &mut self.service, Instant::now())
        }
    }

    #[test]
    fn test_first_step_requests_desired_level() {
        let mut h = Harness::new();
        assert!(h.step(&mut Admission::unlimited()));
        assert_eq!(h.fetch.fetch_state(), FetchState::InFlight);
        assert_eq!(h.fetch.requested_discard_level(), Some(MAX_DISCARD_LEVEL));
        assert_eq!(h.service.requests.len(), 1);

        // nothing new arrived: the second step changes nothing
        assert!(h.step(&mut Admission::unlimited()));
        assert_eq!(h.service.requests.len(), 1);
        assert_eq!(h.fetch.in_flight_count(), 1);
    }

    #[test]
    fn test_no_slot_means_queued() {
        let mut h = Harness::new();
        let mut admission = Admission::new(0, 0, u64::MAX);
        assert!(h.step(&mut admission));
        assert_eq!(h.fetch.fetch_state(), FetchState::Queued);
        assert!(h.service.requests.is_empty());
    }

    #[test]
    fn test_memory_cap_blocks_admission() {
        let mut h = Harness::new();
        let mut admission = Admission::new(4, 100, 100);
        h.step(&mut admission);
        assert_eq!(h.fetch.fetch_state(), FetchState::Queued);
    }

    #[test]
    fn test_delivery_promotes_and_learns_dimensions() {
        let mut h = Harness::new();
        h.step(&mut Admission::unlimited());
        assert_eq!(h.deliver(MAX_DISCARD_LEVEL, 4), CompletionDisposition::Staged);
        assert_eq!(h.fetch.fetch_state(), FetchState::Decoding);

        assert!(!h.step(&mut Admission::unlimited()));
        assert_eq!(h.fetch.fetch_state(), FetchState::Complete);
        assert_eq!(h.fetch.actual_discard_level(), Some(MAX_DISCARD_LEVEL));
        assert_eq!((h.core.full_width(), h.core.full_height()), (128, 128));
        assert_eq!(h.core.texture_memory(), 64);
        assert_eq!(h.gpu.texture_count(), 1);
    }

    #[test]
    fn test_small_image_learns_decoded_dimensions() {
        let mut h = Harness::new();
        h.step(&mut Admission::unlimited());

        let mut png = Cursor::new(Vec::new());
        RgbaImage::from_pixel(8, 8, Rgba([40, 80, 120, 255]))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        let image = decode_at_discard(png.get_ref(), MAX_DISCARD_LEVEL, false).unwrap();
        let ticket = FetchTicket { id: h.core.id(), generation: 1, discard: MAX_DISCARD_LEVEL };
        assert_eq!(
            h.fetch
                .apply_completion(&h.core, ticket, FetchOutcome::Loaded(image), &mut h.service, h.now),
            CompletionDisposition::Staged
        );

        h.step(&mut Admission::unlimited());
        assert_eq!((h.core.full_width(), h.core.full_height()), (8, 8));
        assert_eq!(h.core.max_discard_level(), 3);
        assert_eq!(h.fetch.estimate_bytes(&h.core, 0, MAX_IMAGE_SIZE_DEFAULT), 8 * 8 * 4);
    }

    #[test]
    fn test_unanswered_request_times_out() {
        let mut h = Harness::new();
        h.step(&mut Admission::unlimited());
        assert_eq!(h.service.requests.len(), 1);

        h.now += Duration::from_secs(29);
        assert!(h.step(&mut Admission::new(0, 0, u64::MAX)));
        assert_eq!(h.fetch.fetch_state(), FetchState::InFlight);
        assert!(h.service.cancelled.is_empty());

        // expired: the slot is handed back and the texture waits its turn
        h.now += Duration::from_secs(1);
        let mut admission = Admission::new(0, 0, u64::MAX);
        assert!(h.step(&mut admission));
        assert_eq!(admission.slots(), 1);
        assert_eq!(h.fetch.fetch_state(), FetchState::Queued);
        assert_eq!(h.fetch.in_flight_count(), 0);
        assert_eq!(h.fetch.retries(), 1);
        assert_eq!(h.service.cancelled.len(), 1);
        assert_eq!(h.service.requests.len(), 1);

        // a result for the abandoned request is ignored
        assert_eq!(h.deliver(MAX_DISCARD_LEVEL, 4), CompletionDisposition::Stale);

        assert!(h.step(&mut Admission::unlimited()));
        assert_eq!(h.service.requests.len(), 2);
        assert_eq!(h.fetch.fetch_state(), FetchState::InFlight);
    }

    #[test]
    fn test_kept_callback_does_not_hold_pending_work() {
        let mut h = Harness::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        h.fetch.set_loaded_callback(
            Box::new(move |_: &LoadedEvent<'_>| {
                seen.fetch_add(1, Ordering::SeqCst);
                CallbackAction::Keep
            }),
            MAX_DISCARD_LEVEL,
            false,
            false,
        );

        h.step(&mut Admission::unlimited());
        h.deliver(MAX_DISCARD_LEVEL, 4);
        assert!(h.fetch.has_pending_work());
        assert!(!h.step(&mut Admission::unlimited()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert_eq!(h.fetch.fetch_state(), FetchState::Complete);
        assert_eq!(h.fetch.callback_count(), 1);
        assert!(!h.fetch.has_pending_work());
    }

    #[test]
    fn test_full_resolution_deferred_over_cap() {
        let mut h = Harness::new();
        h.fetch.set_min_discard_level(0);
        h.step(&mut Admission::unlimited());
        assert_eq!(h.deliver(0, 8), CompletionDisposition::Staged);

        let mut over = Admission::new(4, 200, 100);
        assert!(h.step(&mut over));
        assert_eq!(over.deferred, 1);
        assert_eq!(h.fetch.fetch_state(), FetchState::Decoding);
        assert!(!h.core.has_gpu_texture());

        assert!(!h.step(&mut Admission::unlimited()));
        assert_eq!(h.fetch.actual_discard_level(), Some(0));
    }

    #[test]
    fn test_stale_and_late_deliveries() {
        let mut h = Harness::new();
        h.step(&mut Admission::unlimited());

        // level never requested
        assert_eq!(h.deliver(2, 4), CompletionDisposition::Stale);

        // wrong generation
        let ticket = FetchTicket { id: h.core.id(), generation: 99, discard: MAX_DISCARD_LEVEL };
        let outcome = FetchOutcome::NotFound;
        assert_eq!(
            h.fetch.apply_completion(&h.core, ticket, outcome, &mut h.service, Instant::now()),
            CompletionDisposition::Stale
        );
        assert!(!h.fetch.is_missing_asset());
    }

    #[test]
    fn test_transient_failure_requeues_with_decay() {
        let mut h = Harness::new();
        h.core.add_texture_stats(400.0, Instant::now());
        let params = PriorityParams::default();
        let before = h.fetch.calc_decode_priority(&h.core, &params);

        h.step(&mut Admission::unlimited());
        let ticket = FetchTicket { id: h.core.id(), generation: 1, discard: MAX_DISCARD_LEVEL };
        let outcome = FetchOutcome::Failed { reason: "timeout".into() };
        assert_eq!(
            h.fetch.apply_completion(&h.core, ticket, outcome, &mut h.service, Instant::now()),
            CompletionDisposition::Retry
        );
        assert_eq!(h.fetch.fetch_state(), FetchState::Queued);
        assert_eq!(h.fetch.retries(), 1);

        let after = h.fetch.calc_decode_priority(&h.core, &params);
        assert!(after < before);

        assert!(h.step(&mut Admission::unlimited()));
        assert_eq!(h.service.requests.len(), 2);
    }

    #[test]
    fn test_missing_is_sticky_and_fails_callbacks() {
        let mut h = Harness::new();
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        let handle = h.fetch.set_loaded_callback(
            Box::new(move |event| {
                assert!(!event.success);
                seen.fetch_add(1, Ordering::SeqCst);
                CallbackAction::Done
            }),
            0,
            false,
            false,
        );

        h.step(&mut Admission::unlimited());
        let ticket = FetchTicket { id: h.core.id(), generation: 1, discard: MAX_DISCARD_LEVEL };
        h.fetch
            .apply_completion(&h.core, ticket, FetchOutcome::NotFound, &mut h.service, Instant::now());

        assert!(h.fetch.is_missing_asset());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(!handle.is_active());

        for _ in 0..3 {
            assert!(!h.step(&mut Admission::unlimited()));
        }
        assert_eq!(h.service.requests.len(), 1);
        assert_eq!(h.fetch.decode_priority(), 0.0);

        h.fetch.reset_identity(&h.core, &mut h.service);
        assert!(!h.fetch.is_missing_asset());
        assert!(h.step(&mut Admission::unlimited()));
        assert_eq!(h.service.requests.len(), 2);
    }

    #[test]
    fn test_priority_monotonic() {
        let now = Instant::now();
        let params = PriorityParams::default();
        let mut fetch = FetchedTexture::new();
        let mut previous = 0.0;
        for vsize in [0.0, 1.0, 50.0, 1e3, 1e4, 1e5, 1e6, 1e7] {
            let mut core = TextureCore::new(Uuid::nil(), 1, now);
            core.add_texture_stats(vsize, now);
            let priority = fetch.calc_decode_priority(&core, &params);
            assert!(priority >= previous, "{} < {} at vsize {}", priority, previous, vsize);
            previous = priority;
        }

        let mut previous = 0.0;
        for boost in [BoostLevel::None, BoostLevel::Avatar, BoostLevel::Sculpted, BoostLevel::High, BoostLevel::Ui] {
            let mut core = TextureCore::new(Uuid::nil(), 1, now);
            core.add_texture_stats(100.0, now);
            core.set_boost_level(boost);
            let priority = fetch.calc_decode_priority(&core, &params);
            assert!(priority > previous);
            previous = priority;
        }
    }

    #[test]
    fn test_min_discard_only_lowers() {
        let mut fetch = FetchedTexture::new();
        fetch.set_min_discard_level(2);
        fetch.set_min_discard_level(4);
        assert_eq!(fetch.min_desired_discard_level(), 2);
        fetch.set_desired_discard_level(5);
        assert_eq!(fetch.desired_discard_level(), 2);
    }
}
