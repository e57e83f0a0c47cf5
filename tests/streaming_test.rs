use slv_texture_stream::config::StreamingSettings;
use slv_texture_stream::fetch::{
    CompletionQueue, FetchCompletion, FetchOutcome, FetchTicket, FetchedImage, RecordingFetchService,
};
use slv_texture_stream::texture::{
    BoostLevel, CallbackAction, FaceId, FetchState, GpuHandle, GpuTexture, GpuTextureLayer, HostTextureLayer,
    RawImage, TextureKind, TextureManager, TextureResult, TextureState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const FRAME: Duration = Duration::from_millis(16);

fn manager_with<G: GpuTextureLayer>(
    settings: StreamingSettings,
    gpu: G,
) -> TextureManager<RecordingFetchService, G> {
    TextureManager::new(settings, RecordingFetchService::new(), gpu, CompletionQueue::new()).unwrap()
}

fn manager(settings: StreamingSettings) -> TextureManager<RecordingFetchService, HostTextureLayer> {
    manager_with(settings, HostTextureLayer::new())
}

fn deliver<G: GpuTextureLayer>(m: &TextureManager<RecordingFetchService, G>, id: Uuid, discard: u8, edge: u32) {
    let generation = m.find(id).unwrap().core().generation();
    m.completion_sender().send(FetchCompletion {
        ticket: FetchTicket { id, generation, discard },
        outcome: FetchOutcome::Loaded(FetchedImage {
            raw: RawImage::solid(edge, edge, [10, 20, 30, 255]),
            full_width: edge << discard,
            full_height: edge << discard,
            aux: None,
            from_cache: false,
        }),
    });
}

fn not_found<G: GpuTextureLayer>(m: &TextureManager<RecordingFetchService, G>, id: Uuid, discard: u8) {
    let generation = m.find(id).unwrap().core().generation();
    m.completion_sender().send(FetchCompletion {
        ticket: FetchTicket { id, generation, discard },
        outcome: FetchOutcome::NotFound,
    });
}

/// Reports a fixed allocation size per texture so budgets are easy to exceed
#[derive(Default)]
struct FixedSizeLayer {
    bytes_per_texture: u64,
    next: u32,
    live: usize,
}

impl GpuTextureLayer for FixedSizeLayer {
    fn create(&mut self, image: &RawImage, discard_level: u8) -> TextureResult<GpuTexture> {
        self.next += 1;
        self.live += 1;
        Ok(GpuTexture {
            handle: GpuHandle(self.next),
            width: image.width,
            height: image.height,
            discard_level,
            bytes: self.bytes_per_texture,
        })
    }

    fn destroy(&mut self, _texture: GpuTexture) {
        self.live -= 1;
    }
}

#[test]
fn test_fetch_round_trip_to_desired_level() {
    let mut m = manager(StreamingSettings::default());
    let id = Uuid::new_v4();
    m.get_fetched_texture(id, TextureKind::Lod, BoostLevel::None, None);
    m.add_user(id, FaceId(1));

    let fired = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&fired);
    let handle = m
        .set_loaded_callback(
            id,
            Box::new(move |event| {
                assert!(event.success);
                assert_eq!(event.discard_level, Some(3));
                seen.fetch_add(1, Ordering::SeqCst);
                CallbackAction::Done
            }),
            3,
            false,
            false,
        )
        .unwrap();

    let mut now = Instant::now();
    let mut tick = |m: &mut TextureManager<_, _>| {
        now += FRAME;
        m.add_texture_stats(id, 600.0);
        m.update(now)
    };

    // unknown size: coarsest level first
    tick(&mut m);
    assert_eq!(m.fetch_service().last_request().unwrap().ticket.discard, 5);
    deliver(&m, id, 5, 8);
    tick(&mut m);
    assert_eq!(m.find(id).unwrap().core().full_width(), 256);
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    // 256x256 seen at ~600 px² wants discard 3
    tick(&mut m);
    let fetch = m.find(id).unwrap().fetch().unwrap();
    assert_eq!(fetch.desired_discard_level(), 3);
    assert_eq!(m.fetch_service().last_request().unwrap().ticket.discard, 3);

    deliver(&m, id, 3, 32);
    tick(&mut m);
    let fetch = m.find(id).unwrap().fetch().unwrap();
    assert_eq!(fetch.actual_discard_level(), Some(3));
    assert_eq!(fetch.fetch_state(), FetchState::Complete);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!handle.is_active());

    tick(&mut m);
    assert_eq!(m.find(id).unwrap().decode_priority(), 0.0);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(m.fetch_service().requests.len(), 2);
}

#[test]
fn test_callback_registered_after_load_still_fires() {
    let mut m = manager(StreamingSettings::default());
    let id = Uuid::new_v4();
    m.get_fetched_texture(id, TextureKind::Lod, BoostLevel::None, None);
    let start = Instant::now();
    m.update(start);
    deliver(&m, id, 5, 4);
    m.update(start + FRAME);
    assert_eq!(m.find(id).unwrap().fetch().unwrap().fetch_state(), FetchState::Complete);

    let fired = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&fired);
    m.set_loaded_callback(
        id,
        Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            CallbackAction::Done
        }),
        5,
        false,
        false,
    );
    m.update(start + FRAME * 2);
    m.update(start + FRAME * 3);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_asset_is_terminal() {
    let mut m = manager(StreamingSettings::default());
    let id = Uuid::new_v4();
    let placeholder = m.handle_for(id);
    m.get_fetched_texture(id, TextureKind::Fetched, BoostLevel::None, None);

    let failures = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&failures);
    m.set_loaded_callback(
        id,
        Box::new(move |event| {
            assert!(!event.success);
            seen.fetch_add(1, Ordering::SeqCst);
            CallbackAction::Keep
        }),
        0,
        false,
        false,
    );

    let start = Instant::now();
    m.update(start);
    not_found(&m, id, 5);
    m.update(start + FRAME);

    let texture = m.find(id).unwrap();
    assert!(texture.is_missing_asset());
    assert_eq!(texture.fetch().unwrap().fetch_state(), FetchState::Missing);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_ne!(m.handle_for(id), placeholder);

    for i in 2..10 {
        m.add_texture_stats(id, 1e6);
        m.update(start + FRAME * i);
    }
    assert_eq!(m.fetch_service().requests.len(), 1);
    assert_eq!(m.find(id).unwrap().decode_priority(), 0.0);
    assert_eq!(m.stats().missing_assets, 1);
}

#[test]
fn test_unknown_ids_are_ignored() {
    let mut m = manager(StreamingSettings::default());
    let id = Uuid::new_v4();
    assert!(!m.add_user(id, FaceId(1)));
    assert!(!m.remove_user(id, FaceId(1)));
    assert!(!m.add_texture_stats(id, 100.0));
    assert!(!m.bind(id));
    assert!(!m.set_boost_level(id, BoostLevel::Ui));
    assert!(!m.set_no_delete(id));
    assert!(!m.set_known_draw_size(id, 64, 64));
    assert!(!m.set_min_discard_level(id, 0));
    assert!(!m.set_is_missing_asset(id));
    assert!(!m.reset_identity(id));
    assert!(m
        .set_loaded_callback(id, Box::new(|_| CallbackAction::Done), 0, false, false)
        .is_none());
    assert_eq!(m.texture_count(), 0);
}

#[test]
fn test_repeated_ticks_issue_no_duplicate_requests() {
    let mut m = manager(StreamingSettings::default());
    let id = Uuid::new_v4();
    m.get_fetched_texture(id, TextureKind::Lod, BoostLevel::None, None);
    m.get_fetched_texture(id, TextureKind::Lod, BoostLevel::None, None);
    assert_eq!(m.texture_count(), 1);

    let start = Instant::now();
    for i in 0..5 {
        m.update(start + FRAME * i);
    }
    assert_eq!(m.fetch_service().requests.len(), 1);
    assert_eq!(m.find(id).unwrap().fetch().unwrap().in_flight_count(), 1);
}

#[test]
fn test_late_coarse_result_is_dropped() {
    let mut m = manager(StreamingSettings::default());
    let id = Uuid::new_v4();
    m.get_fetched_texture(id, TextureKind::Lod, BoostLevel::None, None);
    let start = Instant::now();

    m.update(start);
    m.set_min_discard_level(id, 1);
    m.update(start + FRAME);
    let levels: Vec<u8> = m.fetch_service().requests.iter().map(|r| r.ticket.discard).collect();
    assert_eq!(levels, vec![5, 1]);

    // the finer level arrives first
    deliver(&m, id, 1, 128);
    m.update(start + FRAME * 2);
    assert_eq!(m.find(id).unwrap().fetch().unwrap().actual_discard_level(), Some(1));

    deliver(&m, id, 5, 8);
    let report = m.update(start + FRAME * 3);
    assert_eq!(report.stale_completions, 1);
    let fetch = m.find(id).unwrap().fetch().unwrap();
    assert_eq!(fetch.actual_discard_level(), Some(1));
    assert_eq!(m.find(id).unwrap().core().discard_level(), Some(1));
}

#[test]
fn test_ui_boost_wins_the_only_slot() {
    let mut settings = StreamingSettings::default();
    settings.fetch.max_concurrent_fetches = 1;
    let mut m = manager(settings);

    let scenery = Uuid::new_v4();
    let button = Uuid::new_v4();
    m.get_fetched_texture(scenery, TextureKind::Lod, BoostLevel::None, None);
    m.get_fetched_texture(button, TextureKind::Lod, BoostLevel::Ui, None);
    m.add_texture_stats(scenery, 1e6);

    let report = m.update(Instant::now());
    assert_eq!(report.fetches_issued, 1);
    assert_eq!(report.pending, 2);
    assert_eq!(m.fetch_service().requests[0].ticket.id, button);
    assert_eq!(
        m.find(scenery).unwrap().fetch().unwrap().fetch_state(),
        FetchState::Queued
    );
}

#[test]
fn test_silent_fetch_releases_its_slot() {
    let mut settings = StreamingSettings::default();
    settings.fetch.max_concurrent_fetches = 1;
    settings.fetch.request_timeout_secs = 5;
    let mut m = manager(settings);

    let button = Uuid::new_v4();
    let scenery = Uuid::new_v4();
    m.get_fetched_texture(button, TextureKind::Lod, BoostLevel::Ui, None);
    m.get_fetched_texture(scenery, TextureKind::Lod, BoostLevel::None, None);

    let start = Instant::now();
    m.update(start);
    m.update(start + Duration::from_secs(4));
    assert_eq!(m.fetch_service().requests.len(), 1);
    assert_eq!(m.find(scenery).unwrap().fetch().unwrap().fetch_state(), FetchState::Queued);

    // the service never answers the button's request
    m.update(start + Duration::from_secs(6));
    let button_fetch = m.find(button).unwrap().fetch().unwrap();
    assert_eq!(button_fetch.fetch_state(), FetchState::Queued);
    assert_eq!(button_fetch.retries(), 1);
    assert_eq!(m.fetch_service().cancelled.len(), 1);
    assert_eq!(m.fetch_service().requests_for(scenery).len(), 1);
    assert_eq!(m.find(scenery).unwrap().fetch().unwrap().fetch_state(), FetchState::InFlight);
}

#[test]
fn test_eviction_under_pressure_spares_pinned() {
    let mut settings = StreamingSettings::default();
    settings.residency.inactive_after_secs = 1;
    settings.residency.deletion_candidate_after_secs = 2;
    let layer = FixedSizeLayer { bytes_per_texture: 40 * 1024 * 1024, ..FixedSizeLayer::default() };
    let mut m = manager_with(settings, layer);

    let start = Instant::now();
    let pinned = Uuid::new_v4();
    let idle: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
    for &id in idle.iter().chain(std::iter::once(&pinned)) {
        m.get_fetched_texture(id, TextureKind::Lod, BoostLevel::None, None);
    }
    m.set_no_delete(pinned);

    m.update(start);
    for &id in idle.iter().chain(std::iter::once(&pinned)) {
        deliver(&m, id, 5, 4);
    }
    let report = m.update(start + FRAME);
    assert_eq!(report.promotions, 3);
    assert_eq!(report.total_bytes, 120 * 1024 * 1024);
    assert!(!report.under_pressure);

    m.set_memory_caps(32, 32);
    let report = m.update(start + Duration::from_secs(5));
    assert_eq!(report.evicted, 2);
    assert!(m.contains(pinned));
    assert!(idle.iter().all(|id| !m.contains(*id)));
    assert_eq!(m.find(pinned).unwrap().core().state(), TextureState::NoDelete);

    // the pinned texture alone still exceeds the cap
    assert!(report.under_pressure);
    assert!(report.discard_bias > 0.0);
    assert_eq!(report.total_bytes, 40 * 1024 * 1024);
    assert_eq!(m.stats().evictions, 2);
}

#[test]
fn test_bound_never_exceeds_total() {
    let mut m = manager(StreamingSettings::default());
    let ids: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    for &id in &ids {
        m.get_fetched_texture(id, TextureKind::Lod, BoostLevel::None, None);
    }
    let start = Instant::now();
    m.update(start);
    for (i, &id) in ids.iter().enumerate() {
        deliver(&m, id, 5, 4 << (i % 3));
    }

    for frame in 1..20u32 {
        for (i, &id) in ids.iter().enumerate() {
            if (i as u32 + frame) % 3 == 0 {
                m.bind(id);
            }
        }
        let report = m.update(start + FRAME * frame);
        assert!(report.bound_bytes <= report.total_bytes);
        assert!(m.ledger().invariant_holds());
    }
    assert_eq!(m.ledger().corrections(), 0);
}

#[test]
fn test_pipeline_tester_sees_loads() {
    let mut settings = StreamingSettings::default();
    settings.enable_pipeline_tester = true;
    let mut m = manager(settings);
    let id = Uuid::new_v4();
    m.get_fetched_texture(id, TextureKind::Lod, BoostLevel::None, None);

    let start = Instant::now();
    m.update(start);
    deliver(&m, id, 5, 4);
    m.bind(id);
    m.update(start + FRAME);

    let session = m.tester().unwrap().session();
    assert_eq!(session.frames, 2);
    assert_eq!(session.total_bytes_loaded, 64);
    assert_eq!(session.fetch_count, 1);
}
