//! # Topology
//!
//! How many instances of each service should be running, and where that
//! number comes from.
//!
//! A [`TopologySource`] runs as its own task and reports through
//! [`TopologyEvent`]s; the supervisor only ever acts on the latest `Updated`
//! snapshot.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Desired instance count per service name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub services: BTreeMap<String, usize>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, service: impl Into<String>, count: usize) -> Self {
        self.services.insert(service.into(), count);
        self
    }

    /// Parses `{ "services": { "<name>": <count> } }`.
    ///
    /// A document without `services` is the empty topology.
    pub fn parse(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopologyEvent {
    Updated(Topology),
    Info(String),
    Error(String),
}

/// Produces topology snapshots until cancelled.
#[async_trait]
pub trait TopologySource: Send + 'static {
    async fn watch(self: Box<Self>, events: mpsc::UnboundedSender<TopologyEvent>, token: CancellationToken);
}

/// Reports one fixed topology.
pub struct StaticTopology(pub Topology);

#[async_trait]
impl TopologySource for StaticTopology {
    async fn watch(self: Box<Self>, events: mpsc::UnboundedSender<TopologyEvent>, _token: CancellationToken) {
        let _ = events.send(TopologyEvent::Updated(self.0));
    }
}

/// Polls a JSON file and reports a new snapshot whenever its mtime changes.
///
/// ## Defaults
/// - `first_poll = 1s`
/// - `period = 6s`
pub struct FileTopology {
    path: PathBuf,
    first_poll: Duration,
    period: Duration,
    last_modified: Option<SystemTime>,
}

impl FileTopology {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            first_poll: Duration::from_secs(1),
            period: Duration::from_secs(6),
            last_modified: None,
        }
    }

    pub fn with_first_poll(mut self, delay: Duration) -> Self {
        self.first_poll = delay;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// One poll: reports nothing when the file is unchanged.
    pub async fn poll(&mut self) -> Vec<TopologyEvent> {
        let unreadable = || {
            TopologyEvent::Error(format!(
                "Unable to read '{}'. Make sure the file is readable.",
                self.path.display()
            ))
        };

        let modified = match tokio::fs::metadata(&self.path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return vec![unreadable()],
        };
        if self.last_modified == Some(modified) {
            return Vec::new();
        }
        self.last_modified = Some(modified);

        let mut events = vec![TopologyEvent::Info(format!("Reading '{}'.", self.path.display()))];
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => events.push(match Topology::parse(&text) {
                Ok(topology) => TopologyEvent::Updated(topology),
                Err(e) => TopologyEvent::Error(format!(
                    "Error while parsing '{}'. The file content is not a valid topology: {}",
                    self.path.display(),
                    e
                )),
            }),
            Err(_) => events.push(unreadable()),
        }
        events
    }
}

#[async_trait]
impl TopologySource for FileTopology {
    async fn watch(mut self: Box<Self>, events: mpsc::UnboundedSender<TopologyEvent>, token: CancellationToken) {
        let start = tokio::time::Instant::now() + self.first_poll;
        let mut ticks = tokio::time::interval_at(start, self.period.max(Duration::from_millis(1)));
        loop {
            tokio::select! {
                _ = ticks.tick() => {}
                _ = token.cancelled() => return,
            }
            for event in self.poll().await {
                if events.send(event).is_err() {
                    return;
                }
            }
        }
    }
}
