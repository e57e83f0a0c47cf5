//! Texture fetch collaborators
//!
//! The scheduler issues [`FetchRequest`]s through a [`FetchService`] and
//! receives results through the [`CompletionQueue`]. Workers only ever send
//! `(ticket, outcome)` pairs; they never touch texture records.

use crate::texture::types::RawImage;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

pub mod source;
pub mod worker;

pub use source::{AssetSource, CacheDirSource, HttpAssetSource, LayeredSource, SourceError, SourcePayload};
pub use worker::AsyncFetchService;

/// Identifies one outstanding request. Generation guards against results for
/// a texture that was deleted or reset after the request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchTicket {
    pub id: Uuid,
    pub generation: u64,
    pub discard: u8,
}

/// Request handed to the fetch service
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub ticket: FetchTicket,
    pub priority: f32,
    /// Host we think might have this image (baked avatar textures)
    pub host: Option<SocketAddr>,
    pub needs_aux: bool,
}

/// Successful fetch payload
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedImage {
    pub raw: RawImage,
    pub aux: Option<RawImage>,
    /// Size of the source image before reduction to the requested level
    pub full_width: u32,
    pub full_height: u32,
    pub from_cache: bool,
}

/// Result of a fetch as reported by the service
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Loaded(FetchedImage),
    /// Authoritative "does not exist"
    NotFound,
    /// Timeout, connection error, decode error
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchCompletion {
    pub ticket: FetchTicket,
    pub outcome: FetchOutcome,
}

/// External network/cache fetch service
pub trait FetchService {
    /// Start fetching. Must not block.
    fn request(&mut self, request: FetchRequest);

    /// Best-effort cancellation. A completion may still arrive afterwards.
    fn cancel(&mut self, ticket: FetchTicket);
}

/// Sending half of the completion queue, cloned into fetch workers
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: Sender<FetchCompletion>,
}

impl CompletionSender {
    /// Returns false when the scheduler side is gone
    pub fn send(&self, completion: FetchCompletion) -> bool {
        self.tx.send(completion).is_ok()
    }
}

/// Thread-safe queue of fetch results, drained by the scheduler once per tick
#[derive(Debug)]
pub struct CompletionQueue {
    tx: Sender<FetchCompletion>,
    rx: Receiver<FetchCompletion>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> CompletionSender {
        CompletionSender { tx: self.tx.clone() }
    }

    /// Take everything that is ready without blocking
    pub fn drain(&self) -> Vec<FetchCompletion> {
        let mut ready = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(completion) => ready.push(completion),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        ready
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<FetchCompletion> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch service that only records what it was asked to do. Completions are
/// pushed by hand through a [`CompletionSender`].
#[derive(Debug, Default)]
pub struct RecordingFetchService {
    pub requests: Vec<FetchRequest>,
    pub cancelled: Vec<FetchTicket>,
}

impl RecordingFetchService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_request(&self) -> Option<&FetchRequest> {
        self.requests.last()
    }

    pub fn requests_for(&self, id: Uuid) -> Vec<&FetchRequest> {
        self.requests.iter().filter(|r| r.ticket.id == id).collect()
    }
}

impl FetchService for RecordingFetchService {
    fn request(&mut self, request: FetchRequest) {
        self.requests.push(request);
    }

    fn cancel(&mut self, ticket: FetchTicket) {
        self.cancelled.push(ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_queue_drains_in_order() {
        let queue = CompletionQueue::new();
        let sender = queue.sender();
        for discard in [4u8, 1, 2] {
            let ticket = FetchTicket { id: Uuid::nil(), generation: 1, discard };
            assert!(sender.send(FetchCompletion { ticket, outcome: FetchOutcome::NotFound }));
        }
        assert_eq!(queue.len(), 3);

        let drained: Vec<u8> = queue.drain().into_iter().map(|c| c.ticket.discard).collect();
        assert_eq!(drained, vec![4, 1, 2]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_sender_survives_across_threads() {
        let queue = CompletionQueue::new();
        let sender = queue.sender();
        let handle = std::thread::spawn(move || {
            let ticket = FetchTicket { id: Uuid::new_v4(), generation: 7, discard: 0 };
            sender.send(FetchCompletion {
                ticket,
                outcome: FetchOutcome::Failed { reason: "timeout".to_string() },
            })
        });
        assert!(handle.join().unwrap());
        let completion = queue.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(completion.ticket.generation, 7);
    }
}
