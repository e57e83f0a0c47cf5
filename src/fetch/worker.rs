//! Async fetch service backed by a tokio runtime
//!
//! Source I/O runs as tokio tasks, decoding runs on the blocking pool. Every
//! request ends with exactly one completion on the queue unless it was
//! cancelled first.

use super::source::{AssetSource, SourceError};
use super::{CompletionSender, FetchCompletion, FetchOutcome, FetchRequest, FetchService, FetchTicket, FetchedImage};
use crate::texture::types::{dimensions_at, RawImage};
use crate::texture::{TextureError, TextureResult};
use bytes::Bytes;
use image::imageops::FilterType;
use image::GenericImageView;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

pub struct AsyncFetchService {
    runtime: Handle,
    source: Arc<dyn AssetSource>,
    completions: CompletionSender,
    tasks: Arc<Mutex<HashMap<FetchTicket, AbortHandle>>>,
}

impl std::fmt::Debug for AsyncFetchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFetchService")
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

impl AsyncFetchService {
    pub fn new(runtime: Handle, source: Arc<dyn AssetSource>, completions: CompletionSender) -> Self {
        Self {
            runtime,
            source,
            completions,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Requests that have not reported back yet
    pub fn active_tasks(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }
}

impl FetchService for AsyncFetchService {
    fn request(&mut self, request: FetchRequest) {
        let FetchRequest { ticket, host, needs_aux, priority } = request;
        let source = Arc::clone(&self.source);
        let completions = self.completions.clone();
        let tasks = Arc::clone(&self.tasks);

        debug!("Fetching {} @ discard {} (priority {:.0})", ticket.id, ticket.discard, priority);

        // Hold the map while spawning so the task's own removal cannot run first
        let Ok(mut active) = self.tasks.lock() else {
            warn!("Fetch task table poisoned, dropping request for {}", ticket.id);
            return;
        };
        let handle = self.runtime.spawn(async move {
            let outcome = match source.fetch(ticket.id, ticket.discard, host).await {
                Ok(payload) => {
                    let from_cache = payload.from_cache;
                    let bytes = payload.bytes;
                    let discard = ticket.discard;
                    match tokio::task::spawn_blocking(move || decode_at_discard(&bytes, discard, needs_aux)).await {
                        Ok(Ok(image)) => FetchOutcome::Loaded(FetchedImage { from_cache, ..image }),
                        Ok(Err(e)) => FetchOutcome::Failed { reason: e.to_string() },
                        Err(e) => FetchOutcome::Failed { reason: format!("decode task: {}", e) },
                    }
                }
                Err(SourceError::NotFound) => FetchOutcome::NotFound,
                Err(SourceError::Transient { reason }) => FetchOutcome::Failed { reason },
            };

            if let Ok(mut active) = tasks.lock() {
                active.remove(&ticket);
            }
            if !completions.send(FetchCompletion { ticket, outcome }) {
                debug!("Completion for {} dropped, scheduler is gone", ticket.id);
            }
        });
        active.insert(ticket, handle.abort_handle());
    }

    fn cancel(&mut self, ticket: FetchTicket) {
        let handle = self.tasks.lock().ok().and_then(|mut active| active.remove(&ticket));
        if let Some(handle) = handle {
            debug!("Cancelling fetch of {} @ discard {}", ticket.id, ticket.discard);
            handle.abort();
        }
    }
}

/// Decode encoded image bytes and reduce them to the requested discard level.
/// With `needs_aux` the alpha channel (if any) is returned separately.
pub fn decode_at_discard(bytes: &[u8], discard: u8, needs_aux: bool) -> TextureResult<FetchedImage> {
    let decoded = image::load_from_memory(bytes).map_err(|e| TextureError::Decode { reason: e.to_string() })?;
    let (full_w, full_h) = decoded.dimensions();
    let (w, h) = dimensions_at(full_w, full_h, discard);
    let scaled = if (w, h) == (full_w, full_h) {
        decoded
    } else {
        decoded.resize_exact(w, h, FilterType::Triangle)
    };

    let has_alpha = scaled.color().has_alpha();
    let aux = if needs_aux && has_alpha {
        let alpha: Vec<u8> = scaled.to_rgba8().pixels().map(|p| p.0[3]).collect();
        Some(RawImage::new(w, h, 1, Bytes::from(alpha)))
    } else {
        None
    };

    let raw = if has_alpha {
        RawImage::new(w, h, 4, Bytes::from(scaled.to_rgba8().into_raw()))
    } else {
        RawImage::new(w, h, 3, Bytes::from(scaled.to_rgb8().into_raw()))
    };
    Ok(FetchedImage {
        raw,
        aux,
        full_width: full_w,
        full_height: full_h,
        from_cache: false,
    })
}
