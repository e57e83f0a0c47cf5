//! Loaded-image callbacks
//!
//! Registrations are typed closures paired with a cancel token. A record that
//! gets deleted drops its registrations, so no callback can outlive the
//! texture it was waiting on.

use super::types::RawImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// What a callback wants after firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Remove the registration
    Done,
    /// Keep listening for finer levels
    Keep,
}

/// Data handed to a loaded callback
#[derive(Debug)]
pub struct LoadedEvent<'a> {
    pub success: bool,
    pub id: Uuid,
    pub discard_level: Option<u8>,
    /// The registration's desired level has been reached (or can never be)
    pub is_final: bool,
    pub raw: Option<&'a RawImage>,
    pub aux: Option<&'a RawImage>,
}

pub type LoadedCallback = Box<dyn FnMut(&LoadedEvent<'_>) -> CallbackAction + Send>;

/// Cancel token returned to whoever registered a callback
#[derive(Debug, Clone)]
pub struct CallbackHandle {
    cancelled: Arc<AtomicBool>,
}

impl CallbackHandle {
    fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Prevent the callback from ever firing again
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// False once cancelled, fired for the last time, or dropped with its texture
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire)
    }
}

pub(crate) struct CallbackEntry {
    callback: LoadedCallback,
    handle: CallbackHandle,
    pub(crate) desired_discard: u8,
    last_used_discard: Option<u8>,
    pub(crate) needs_raw: bool,
}

impl std::fmt::Debug for CallbackEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackEntry")
            .field("desired_discard", &self.desired_discard)
            .field("last_used_discard", &self.last_used_discard)
            .field("needs_raw", &self.needs_raw)
            .field("active", &self.handle.is_active())
            .finish()
    }
}

/// Registrations waiting on one texture
#[derive(Debug, Default)]
pub struct CallbackList {
    entries: Vec<CallbackEntry>,
}

impl CallbackList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: LoadedCallback, desired_discard: u8, needs_raw: bool) -> CallbackHandle {
        let handle = CallbackHandle::new();
        self.entries.push(CallbackEntry {
            callback,
            handle: handle.clone(),
            desired_discard,
            last_used_discard: None,
            needs_raw,
        });
        handle
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.handle.is_active()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Any live registration wants the raw bitmap kept around
    pub fn wants_raw(&self) -> bool {
        self.entries.iter().any(|e| e.needs_raw && e.handle.is_active())
    }

    /// Some live registration would fire if `discard` were dispatched now
    pub fn would_fire(&self, discard: u8) -> bool {
        self.entries.iter().any(|entry| {
            entry.handle.is_active()
                && discard <= entry.desired_discard
                && entry.last_used_discard.map_or(true, |last| discard < last)
        })
    }

    /// Fire registrations satisfied by a newly promoted level. Returns how many fired.
    pub fn dispatch_loaded(
        &mut self,
        id: Uuid,
        discard: u8,
        raw: Option<&RawImage>,
        aux: Option<&RawImage>,
    ) -> usize {
        let mut fired = 0;
        self.entries.retain_mut(|entry| {
            if !entry.handle.is_active() {
                return false;
            }
            if discard > entry.desired_discard {
                return true;
            }
            if entry.last_used_discard.map_or(false, |last| discard >= last) {
                return true;
            }
            entry.last_used_discard = Some(discard);
            let event = LoadedEvent {
                success: true,
                id,
                discard_level: Some(discard),
                is_final: true,
                raw: if entry.needs_raw { raw } else { None },
                aux: if entry.needs_raw { aux } else { None },
            };
            fired += 1;
            match (entry.callback)(&event) {
                CallbackAction::Keep if entry.handle.is_active() => true,
                _ => {
                    entry.handle.cancel();
                    false
                }
            }
        });
        fired
    }

    /// Fire every registration with a failure and clear the list
    pub fn dispatch_failed(&mut self, id: Uuid) -> usize {
        let mut fired = 0;
        for mut entry in self.entries.drain(..) {
            if !entry.handle.is_active() {
                continue;
            }
            let event = LoadedEvent {
                success: false,
                id,
                discard_level: None,
                is_final: true,
                raw: None,
                aux: None,
            };
            (entry.callback)(&event);
            entry.handle.cancel();
            fired += 1;
        }
        fired
    }

    /// Drop every registration without firing
    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            entry.handle.cancel();
        }
    }
}

impl Drop for CallbackList {
    fn drop(&mut self) {
        self.clear();
    }
}
