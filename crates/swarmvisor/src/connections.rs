//! # Connection Registry
//!
//! Every service channel the supervisor holds, and who is on the other end.
//!
//! A connection starts unidentified. A well-formed `Identify` moves it into the
//! bucket of its service name and indexes its instance id; closing removes it
//! from wherever it is. Frames queued for a connection that closes are lost.
//!
//! ## Invariants
//! - An instance id maps to at most one connection.
//! - A connection appears in at most one name bucket.

use std::collections::HashMap;
use std::fmt;

use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use swarmwire::Address;
use swarmwire::AddressKind;
use swarmwire::Identify;
use swarmwire::InstanceId;

/// Strong type for connection identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnState {
    Unidentified,
    Identified { name: String, instance: InstanceId },
}

/// Why an `Identify` was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyError {
    UnknownConnection(ConnId),
    AlreadyIdentified(ConnId),
    EmptyName,
    BadInstanceId(String),
    DuplicateInstance(InstanceId),
}

impl fmt::Display for IdentifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownConnection(conn) => write!(f, "Unknown connection: {}", conn),
            Self::AlreadyIdentified(conn) => write!(f, "Connection already identified: {}", conn),
            Self::EmptyName => write!(f, "Service name is empty"),
            Self::BadInstanceId(raw) => write!(f, "Not an instance id: {:?}", raw),
            Self::DuplicateInstance(id) => write!(f, "Instance id already connected: {}", id),
        }
    }
}

impl std::error::Error for IdentifyError {}

struct Connection {
    state: ConnState,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    conns: HashMap<ConnId, Connection>,
    by_name: HashMap<String, Vec<ConnId>>,
    by_instance: HashMap<InstanceId, ConnId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh, unidentified connection.
    pub fn insert(&mut self, conn: ConnId, outbound: mpsc::UnboundedSender<Vec<u8>>) {
        self.conns.insert(
            conn,
            Connection {
                state: ConnState::Unidentified,
                outbound,
            },
        );
    }

    /// Moves `conn` from unidentified to identified.
    pub fn identify(&mut self, conn: ConnId, identify: &Identify) -> Result<(), IdentifyError> {
        if identify.service_name.is_empty() {
            return Err(IdentifyError::EmptyName);
        }
        let instance = InstanceId::parse(&identify.instance_id)
            .ok_or_else(|| IdentifyError::BadInstanceId(identify.instance_id.clone()))?;
        if self.by_instance.contains_key(&instance) {
            return Err(IdentifyError::DuplicateInstance(instance));
        }

        let entry = self.conns.get_mut(&conn).ok_or(IdentifyError::UnknownConnection(conn))?;
        if entry.state != ConnState::Unidentified {
            return Err(IdentifyError::AlreadyIdentified(conn));
        }

        entry.state = ConnState::Identified {
            name: identify.service_name.clone(),
            instance: instance.clone(),
        };
        self.by_name.entry(identify.service_name.clone()).or_default().push(conn);
        self.by_instance.insert(instance, conn);
        Ok(())
    }

    /// Forgets `conn`, returning the state it was in.
    pub fn remove(&mut self, conn: ConnId) -> Option<ConnState> {
        let entry = self.conns.remove(&conn)?;
        if let ConnState::Identified { name, instance } = &entry.state {
            self.by_instance.remove(instance);
            if let Some(bucket) = self.by_name.get_mut(name) {
                bucket.retain(|c| *c != conn);
                if bucket.is_empty() {
                    self.by_name.remove(name);
                }
            }
        }
        Some(entry.state)
    }

    /// Picks the connection a message for `recipient` goes to.
    ///
    /// A name picks uniformly among the identified instances of that service.
    pub fn resolve(&self, recipient: &Address) -> Option<ConnId> {
        match recipient.kind() {
            AddressKind::Supervisor => None,
            AddressKind::Instance(raw) => {
                let instance = InstanceId::parse(raw)?;
                self.by_instance.get(&instance).copied()
            }
            AddressKind::Name(name) => self
                .by_name
                .get(name)?
                .choose(&mut rand::thread_rng())
                .copied(),
        }
    }

    pub fn outbound(&self, conn: ConnId) -> Option<&mpsc::UnboundedSender<Vec<u8>>> {
        self.conns.get(&conn).map(|c| &c.outbound)
    }

    pub fn state(&self, conn: ConnId) -> Option<&ConnState> {
        self.conns.get(&conn).map(|c| &c.state)
    }

    /// Identified instances of `name`.
    pub fn instances(&self, name: &str) -> usize {
        self.by_name.get(name).map_or(0, Vec::len)
    }

    /// Identified instance counts per service name.
    pub fn census(&self) -> impl Iterator<Item = (&str, usize)> {
        self.by_name.iter().map(|(name, conns)| (name.as_str(), conns.len()))
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}
