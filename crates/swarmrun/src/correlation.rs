//! # Request/Response Correlation
//!
//! Tracks requests that expect an answer and settles their handles.
//!
//! A request is registered *before* it is written, so a response can never
//! overtake its own bookkeeping. Each pending entry is removed from the map by
//! whichever of {response, timeout, disconnect} gets there first, and only the
//! remover settles the handle.
//!
//! ## Invariants
//! - Every handle settles exactly once.
//! - A response for an id that already timed out is dropped, not handed to
//!   the inbound handler.
//! - Registering an id that is still pending rejects the older handle with
//!   [`Error::Superseded`]; the new registration gets its own full timeout.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use swarmwire::Message;
use swarmwire::MessageId;
use swarmwire::Signature;

use crate::predict::Predictor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No response arrived within the response timeout.
    Timeout,
    /// The channel to the supervisor dropped while the request was in flight.
    ConnectionLost(String),
    /// The runtime shut down before the request settled.
    ChannelClosed,
    /// A newer request was registered under the same id.
    Superseded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Request timed out"),
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::ChannelClosed => write!(f, "Response channel closed"),
            Self::Superseded => write!(f, "Request superseded by a newer one with the same id"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A handle that settles with the response to one request.
#[must_use = "a pending result does nothing unless awaited"]
pub struct PendingResult {
    id: MessageId,
    rx: oneshot::Receiver<Result<Message>>,
}

impl PendingResult {
    /// Id of the request this handle answers.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    fn settled(id: MessageId, result: Result<Message>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { id, rx }
    }
}

impl Future for PendingResult {
    type Output = Result<Message>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(Error::ChannelClosed)))
    }
}

/// What the caller must do after [`Correlator::prepare`].
pub enum Prepared {
    /// The response was predicted; the handle is already settled.
    Predicted(PendingResult),
    /// The request must be written to the channel.
    Transmit(PendingResult),
}

/// Outcome of matching an inbound message against pending requests.
#[derive(Debug)]
pub enum Resolution {
    /// The message answered a pending request.
    Resolved,
    /// The message answered a request that already timed out.
    Late,
    /// Not a response; belongs to the inbound handler.
    Unmatched(Message),
}

struct Pending {
    generation: u64,
    signature: Signature,
    tx: oneshot::Sender<Result<Message>>,
    timer: Option<AbortHandle>,
}

/// Pending-request registry with response prediction.
pub struct Correlator {
    timeout: Duration,
    pending: DashMap<MessageId, Pending>,
    expired: DashMap<MessageId, Instant>,
    predictor: Mutex<Predictor>,
    generation: AtomicU64,
}

impl Correlator {
    pub fn new(timeout: Duration, threshold: u32) -> Arc<Self> {
        Arc::new(Self {
            timeout,
            pending: DashMap::new(),
            expired: DashMap::new(),
            predictor: Mutex::new(Predictor::new(threshold)),
            generation: AtomicU64::new(0),
        })
    }

    /// Registers `request` and returns its handle.
    ///
    /// Must be called from within a tokio runtime; the timeout is a spawned task.
    pub fn prepare(self: &Arc<Self>, request: &Message) -> Prepared {
        let signature = request.signature();
        let id = request.id.clone();

        if let Some(mut cached) = self.predicted(&signature) {
            debug!(id = %id, "response predicted");
            cached.id = id.clone();
            return Prepared::Predicted(PendingResult::settled(id, Ok(cached)));
        }

        let (tx, rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.pending.insert(
            id.clone(),
            Pending {
                generation,
                signature,
                tx,
                timer: None,
            },
        );
        self.expired.remove(&id);
        if let Some(previous) = previous {
            debug!(id = %id, "pending request superseded");
            if let Some(timer) = previous.timer {
                timer.abort();
            }
            let _ = previous.tx.send(Err(Error::Superseded));
        }

        let timer = tokio::spawn(Self::expire_after(
            Arc::downgrade(self),
            id.clone(),
            generation,
            self.timeout,
        ));
        match self.pending.get_mut(&id) {
            Some(mut entry) if entry.generation == generation => entry.timer = Some(timer.abort_handle()),
            _ => timer.abort(),
        }

        Prepared::Transmit(PendingResult { id, rx })
    }

    /// Matches an inbound message against pending requests.
    pub fn resolve(&self, response: Message) -> Resolution {
        let Some((_, pending)) = self.pending.remove(&response.id) else {
            if self.expired.remove(&response.id).is_some() {
                return Resolution::Late;
            }
            return Resolution::Unmatched(response);
        };

        if let Some(timer) = pending.timer {
            timer.abort();
        }
        if let Ok(mut predictor) = self.predictor.lock() {
            if predictor.observe(pending.signature, &response) {
                debug!(signature = %pending.signature, "response cached");
            }
        }
        let _ = pending.tx.send(Ok(response));
        Resolution::Resolved
    }

    /// Removes the registration for `id` and rejects its handle with `error`.
    pub fn cancel(&self, id: &MessageId, error: Error) {
        if let Some((_, pending)) = self.pending.remove(id) {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
            let _ = pending.tx.send(Err(error));
        }
    }

    /// Rejects every pending request with `error`.
    pub fn reject_all(&self, error: Error) {
        let keys: Vec<MessageId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.cancel(&key, error.clone());
        }
    }

    /// One decay step: ages predictions and forgets long-expired ids.
    pub fn decay(&self) {
        if let Ok(mut predictor) = self.predictor.lock() {
            predictor.decay();
        }
        let now = Instant::now();
        self.expired.retain(|_, expired_at| now.duration_since(*expired_at) < self.timeout);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether a response for `request` would currently be predicted.
    pub fn is_cached(&self, request: &Signature) -> bool {
        self.predictor
            .lock()
            .map(|p| p.is_cached(request))
            .unwrap_or(false)
    }

    fn predicted(&self, signature: &Signature) -> Option<Message> {
        let predictor = self.predictor.lock().ok()?;
        predictor.predict(signature).cloned()
    }

    async fn expire_after(me: Weak<Self>, id: MessageId, generation: u64, timeout: Duration) {
        tokio::time::sleep(timeout).await;
        let Some(me) = me.upgrade() else {
            return;
        };
        // only the registration this timer was started for
        if let Some((_, pending)) = me.pending.remove_if(&id, |_, p| p.generation == generation) {
            debug!(id = %id, "request timed out");
            me.expired.insert(id, Instant::now());
            let _ = pending.tx.send(Err(Error::Timeout));
        }
    }
}
