//! # Service Runtime
//!
//! The in-process side of a service: one channel to the supervisor, a writer
//! task that drains the outbound queue in order, a reader task that settles
//! responses and feeds everything else to the inbound handler, and a decay
//! task that ages the prediction table.
//!
//! ## Lifecycle
//! `start` sends `Identify` before anything else can be queued. The service
//! runs until [`Service::exit`] is called or the channel drops; a dropped
//! channel ends the service with [`EXIT_CONNECTION_LOST`]. There is no
//! reconnect.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use swarmwire::Address;
use swarmwire::Identify;
use swarmwire::InstanceId;
use swarmwire::Message;
use swarmwire::Transport;
use swarmwire::frame;
use swarmwire::transport;
use swarmwire::transport::TcpTransport;

use crate::config::RuntimeConfig;
use crate::correlation;
use crate::correlation::Correlator;
use crate::correlation::PendingResult;
use crate::correlation::Prepared;
use crate::correlation::Resolution;

/// Exit code used when the supervisor channel drops underneath the service.
pub const EXIT_CONNECTION_LOST: i32 = 3;

#[derive(Debug, Clone)]
pub enum Error {
    /// The supervisor could not be reached.
    Connect(transport::Error),
    /// The message could not be encoded.
    Wire(swarmwire::Error),
    /// The service has exited; nothing more can be sent.
    Closed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "Cannot reach supervisor: {}", e),
            Self::Wire(e) => write!(f, "Wire error: {}", e),
            Self::Closed => write!(f, "Service has exited"),
        }
    }
}

impl std::error::Error for Error {}

impl From<swarmwire::Error> for Error {
    fn from(e: swarmwire::Error) -> Self {
        Self::Wire(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Callback for inbound messages that are not responses.
///
/// Runs on the reader task: it must not block. Spawn a task to await requests.
pub type Handler = Arc<dyn Fn(&Service, Message) + Send + Sync>;

/// Cloneable handle to a running service.
#[derive(Clone)]
pub struct Service {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    id: InstanceId,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    correlator: Arc<Correlator>,
    handler: RwLock<Option<Handler>>,
    shutdown: CancellationToken,
    exit_code: OnceLock<i32>,
}

impl Service {
    /// Dials the supervisor and starts the service.
    pub async fn connect(name: impl Into<String>, config: &RuntimeConfig) -> Result<Self> {
        let transport = TcpTransport::connect(config.supervisor.as_str())
            .await
            .map_err(Error::Connect)?;
        Self::start(name, config, Arc::new(transport))
    }

    /// Starts the service over an already established channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        name: impl Into<String>,
        config: &RuntimeConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let name = name.into();
        let id = InstanceId::generate();
        let (outbound, queue) = mpsc::unbounded_channel();

        let identify = Message::to_supervisor(Identify {
            service_name: name.clone(),
            instance_id: id.to_string(),
        });
        // queued before any task exists, so it is always the first frame out
        let _ = outbound.send(frame::encode(&identify)?);

        let service = Self {
            inner: Arc::new(Inner {
                name,
                id,
                outbound,
                correlator: Correlator::new(config.response_timeout, config.prediction_threshold),
                handler: RwLock::new(None),
                shutdown: CancellationToken::new(),
                exit_code: OnceLock::new(),
            }),
        };

        info!(service = %service.name(), instance = %service.id(), "service starting");

        tokio::spawn(service.clone().write_loop(transport.clone(), queue));
        tokio::spawn(service.clone().read_loop(transport));
        tokio::spawn(service.clone().decay_loop(config.decay_period()));

        Ok(service)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn id(&self) -> &InstanceId {
        &self.inner.id
    }

    /// The address other services use to reach exactly this instance.
    pub fn address(&self) -> Address {
        Address::from(&self.inner.id)
    }

    /// Fire-and-forget: queues `message` for the writer. Keeps no state.
    pub fn send(&self, message: Message) -> Result<()> {
        self.enqueue(message)
    }

    /// Sends `message` and returns a handle that settles with its response.
    ///
    /// If the response is predicted, nothing is written and the handle is
    /// already settled.
    pub fn request(&self, message: Message) -> Result<PendingResult> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut message = message;
        message.sender = self.address();

        match self.inner.correlator.prepare(&message) {
            Prepared::Predicted(handle) => Ok(handle),
            Prepared::Transmit(handle) => {
                if let Err(e) = self.enqueue(message) {
                    self.inner.correlator.cancel(handle.id(), correlation::Error::ChannelClosed);
                    return Err(e);
                }
                Ok(handle)
            }
        }
    }

    /// Installs the inbound handler, replacing any previous one.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Service, Message) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.handler.write() {
            *slot = Some(Arc::new(handler));
        }
    }

    /// Sends `reply` as the response to `original`.
    pub fn respond(&self, original: &Message, reply: Message) -> Result<()> {
        self.enqueue(original.reply(reply))
    }

    /// Shuts the service down with `code`. Only the first call sets the code.
    pub fn exit(&self, code: i32) {
        let _ = self.inner.exit_code.set(code);
        if !self.inner.shutdown.is_cancelled() {
            info!(service = %self.name(), instance = %self.id(), code, "service exiting");
            self.inner.shutdown.cancel();
            self.inner.correlator.reject_all(correlation::Error::ChannelClosed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Waits for the service to exit and returns its exit code.
    pub async fn closed(&self) -> i32 {
        self.inner.shutdown.cancelled().await;
        self.inner.exit_code.get().copied().unwrap_or(0)
    }

    /// Requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_len()
    }

    fn enqueue(&self, mut message: Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if message.sender.is_supervisor() {
            message.sender = self.address();
        }
        let bytes = frame::encode(&message)?;
        self.inner.outbound.send(bytes).map_err(|_| Error::Closed)
    }

    fn lose_connection(&self, reason: String) {
        if self.is_closed() {
            return;
        }
        warn!(service = %self.name(), instance = %self.id(), reason = %reason, "supervisor channel lost");
        self.inner.correlator.reject_all(correlation::Error::ConnectionLost(reason));
        self.exit(EXIT_CONNECTION_LOST);
    }

    async fn write_loop(self, transport: Arc<dyn Transport>, mut queue: mpsc::UnboundedReceiver<Vec<u8>>) {
        let shutdown = self.inner.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                next = queue.recv() => {
                    let Some(bytes) = next else { break };
                    if let Err(e) = transport.send(&bytes).await {
                        self.lose_connection(e.to_string());
                        break;
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        // flush what was queued before the exit
        while let Ok(bytes) = queue.try_recv() {
            if transport.send(&bytes).await.is_err() {
                break;
            }
        }
        let _ = transport.close().await;
    }

    async fn read_loop(self, transport: Arc<dyn Transport>) {
        let shutdown = self.inner.shutdown.clone();
        loop {
            let next = tokio::select! {
                next = transport.recv() => next,
                _ = shutdown.cancelled() => return,
            };
            match next {
                Ok(Some(bytes)) => self.dispatch(&bytes),
                Ok(None) => {
                    self.lose_connection("closed by supervisor".into());
                    return;
                }
                Err(e) => {
                    self.lose_connection(e.to_string());
                    return;
                }
            }
        }
    }

    async fn decay_loop(self, period: Duration) {
        let shutdown = self.inner.shutdown.clone();
        let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticks.tick() => self.inner.correlator.decay(),
                _ = shutdown.cancelled() => return,
            }
        }
    }

    fn dispatch(&self, bytes: &[u8]) {
        let message = match frame::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(service = %self.name(), error = %e, "dropping undecodable frame");
                return;
            }
        };

        match self.inner.correlator.resolve(message) {
            Resolution::Resolved => {}
            Resolution::Late => debug!(service = %self.name(), "dropping late response"),
            Resolution::Unmatched(message) => {
                let handler = self.inner.handler.read().ok().and_then(|slot| slot.clone());
                match handler {
                    Some(handler) => handler(self, message),
                    None => debug!(service = %self.name(), id = %message.id, "no handler installed"),
                }
            }
        }
    }
}
