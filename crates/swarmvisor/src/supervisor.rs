//! # Supervisor
//!
//! Accepts service connections, routes their messages, and keeps the number of
//! running processes in line with the topology.
//!
//! ## Architecture
//! ```text
//! accept loop ──► conn reader tasks ──┐
//!                                     │ Event
//! delayed ops ────────────────────────┤
//!                                     ▼
//! topology source ──► TopologyEvent ─► event loop ──► conn writer tasks
//!                                     ▲
//! process watchers ──► ProcessExit ───┘
//! ```
//! The event loop owns the connection registry, the process registry, the
//! reconciler, and the current topology. Nothing else touches them.
//!
//! ## Shutdown
//! Cancelling the token stops accepting, drops every connection, terminates
//! every child, and waits for their watchers.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use swarmwire::Transport;
use swarmwire::frame;
use swarmwire::transport::TcpTransport;

use crate::config::SupervisorConfig;
use crate::connections::ConnId;
use crate::connections::ConnectionRegistry;
use crate::error::Error;
use crate::error::Result;
use crate::process::Launcher;
use crate::process::ProcessExit;
use crate::process::ProcessRegistry;
use crate::reconcile::Op;
use crate::reconcile::Reconciler;
use crate::reconcile::Scheduled;
use crate::router;
use crate::router::Decision;
use crate::router::Instruction;
use crate::topology::Topology;
use crate::topology::TopologyEvent;
use crate::topology::TopologySource;

enum Event {
    Connected {
        conn: ConnId,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    },
    Frame {
        conn: ConnId,
        bytes: Vec<u8>,
    },
    Disconnected {
        conn: ConnId,
    },
    Due(Scheduled),
    Status(oneshot::Sender<Status>),
}

/// Snapshot of the supervisor's view of the world.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub connections: usize,
    pub identified: BTreeMap<String, usize>,
    pub processes: BTreeMap<String, usize>,
    pub topology: Topology,
}

pub struct Supervisor {
    config: SupervisorConfig,
    launcher: Arc<dyn Launcher>,
    topology: Box<dyn TopologySource>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, launcher: Arc<dyn Launcher>, topology: Box<dyn TopologySource>) -> Self {
        Self {
            config,
            launcher,
            topology,
        }
    }

    /// Binds the listener and starts every supervisor task.
    ///
    /// Runs until `token` is cancelled.
    pub async fn start(self, token: CancellationToken) -> Result<SupervisorHandle> {
        let listener = TcpListener::bind(self.config.listen.as_str()).await?;
        let addr = listener.local_addr()?;
        info!(addr = %addr, "supervisor listening");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let (topology_tx, topology_rx) = mpsc::unbounded_channel();

        tokio::spawn(self.topology.watch(topology_tx, token.clone()));
        tokio::spawn(accept_loop(listener, events_tx.clone(), token.clone()));

        let core = Core {
            connections: ConnectionRegistry::new(),
            processes: ProcessRegistry::new(self.launcher, exits_tx),
            reconciler: Reconciler::new(self.config.stagger),
            topology: Topology::default(),
            events: events_tx.clone(),
        };
        let task = tokio::spawn(core.run(self.config, events_rx, exits_rx, topology_rx, token.clone()));

        Ok(SupervisorHandle {
            addr,
            events: events_tx,
            token,
            task,
        })
    }
}

/// Control surface of a started supervisor.
pub struct SupervisorHandle {
    addr: SocketAddr,
    events: mpsc::UnboundedSender<Event>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn status(&self) -> Result<Status> {
        let (tx, rx) = oneshot::channel();
        self.events.send(Event::Status(tx)).map_err(|_| Error::Stopped)?;
        rx.await.map_err(|_| Error::Stopped)
    }

    /// Waits for the supervisor to finish after its token is cancelled.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "supervisor event loop failed");
        }
    }

    /// Cancels the supervisor and waits for it to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        self.join().await;
    }
}

struct Core {
    connections: ConnectionRegistry,
    processes: ProcessRegistry,
    reconciler: Reconciler,
    topology: Topology,
    events: mpsc::UnboundedSender<Event>,
}

impl Core {
    async fn run(
        mut self,
        config: SupervisorConfig,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut exits: mpsc::UnboundedReceiver<ProcessExit>,
        mut topology: mpsc::UnboundedReceiver<TopologyEvent>,
        token: CancellationToken,
    ) {
        let period = config.reconcile_period_clamped();
        let mut ticks = tokio::time::interval_at(Instant::now() + config.reconcile_grace, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(event) = events.recv() => self.on_event(event),
                Some(exit) = exits.recv() => self.processes.exited(&exit),
                Some(update) = topology.recv() => self.on_topology(update),
                _ = ticks.tick() => self.reconcile(),
            }
        }

        info!("supervisor shutting down");
        self.processes.shutdown().await;
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Connected { conn, outbound } => {
                debug!(conn = %conn, "connection opened");
                self.connections.insert(conn, outbound);
            }
            Event::Frame { conn, bytes } => self.on_frame(conn, bytes),
            Event::Disconnected { conn } => {
                if let Some(state) = self.connections.remove(conn) {
                    info!(conn = %conn, state = ?state, "connection closed");
                }
            }
            Event::Due(scheduled) => self.apply(scheduled),
            Event::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn on_frame(&mut self, conn: ConnId, bytes: Vec<u8>) {
        match router::decide(&self.connections, &bytes) {
            Decision::Deliver(target) => self.deliver(target, bytes),
            Decision::Undeliverable(recipient) => {
                debug!(conn = %conn, recipient = %recipient, "no route; frame dropped");
            }
            Decision::Instruction(instruction) => self.on_instruction(conn, instruction),
            Decision::Unrecognized(payload_type) => {
                warn!(conn = %conn, payload_type, "unrecognized instruction");
            }
            Decision::Malformed(e) => warn!(conn = %conn, error = %e, "malformed frame"),
        }
    }

    fn on_instruction(&mut self, conn: ConnId, instruction: Instruction) {
        match instruction {
            Instruction::Identify(identify) => match self.connections.identify(conn, &identify) {
                Ok(()) => info!(
                    conn = %conn,
                    service = %identify.service_name,
                    instance = %identify.instance_id,
                    "service identified"
                ),
                Err(e) => warn!(conn = %conn, error = %e, "identify refused"),
            },
            Instruction::Spawn(spawn) => {
                self.processes.spawn(&spawn.service);
            }
            Instruction::Kill(kill, request) => {
                let signalled = self.processes.kill(&kill.service);
                info!(service = %kill.service, signalled, "kill requested");

                let confirmation = router::kill_confirmation(&request, &kill.service)
                    .and_then(|reply| Ok((frame::encode(&reply)?, reply.recipient)));
                match confirmation {
                    Ok((bytes, recipient)) => match self.connections.resolve(&recipient) {
                        Some(target) => self.deliver(target, bytes),
                        None => debug!(recipient = %recipient, "kill confirmation undeliverable"),
                    },
                    Err(e) => warn!(error = %e, "cannot encode kill confirmation"),
                }
            }
        }
    }

    fn deliver(&self, target: ConnId, bytes: Vec<u8>) {
        let sent = self
            .connections
            .outbound(target)
            .map(|outbound| outbound.send(bytes).is_ok())
            .unwrap_or(false);
        if !sent {
            debug!(conn = %target, "delivery failed; frame dropped");
        }
    }

    fn on_topology(&mut self, update: TopologyEvent) {
        match update {
            TopologyEvent::Updated(topology) => {
                info!(services = ?topology.services, "topology updated");
                self.topology = topology;
                self.reconcile();
            }
            TopologyEvent::Info(message) => info!("{}", message),
            TopologyEvent::Error(message) => error!("{}", message),
        }
    }

    fn reconcile(&mut self) {
        let processes = &self.processes;
        let schedule = self.reconciler.reconcile(&self.topology, |service| processes.running(service));

        for scheduled in schedule {
            if scheduled.delay.is_zero() {
                self.apply(scheduled);
                continue;
            }
            let events = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(scheduled.delay).await;
                let _ = events.send(Event::Due(scheduled));
            });
        }
    }

    fn apply(&mut self, scheduled: Scheduled) {
        self.reconciler.settle(&scheduled);
        match scheduled.op {
            Op::Spawn => {
                self.processes.spawn(&scheduled.service);
            }
            Op::Stop => self.processes.stop(&scheduled.service),
        }
    }

    fn status(&self) -> Status {
        Status {
            connections: self.connections.len(),
            identified: self
                .connections
                .census()
                .map(|(name, count)| (name.to_string(), count))
                .collect(),
            processes: self
                .processes
                .census()
                .map(|(name, count)| (name.to_string(), count))
                .collect(),
            topology: self.topology.clone(),
        }
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<Event>, token: CancellationToken) {
    let mut next_id = 0;
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = token.cancelled() => return,
        };
        let stream = match accepted {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let transport = match TcpTransport::from_stream(stream) {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                warn!(error = %e, "cannot set up connection");
                continue;
            }
        };

        next_id += 1;
        let conn = ConnId(next_id);
        let (outbound, queue) = mpsc::unbounded_channel();
        if events.send(Event::Connected { conn, outbound }).is_err() {
            return;
        }
        debug!(conn = %conn, peer = %transport.peer_addr(), "accepted");

        tokio::spawn(read_conn(conn, transport.clone(), events.clone(), token.clone()));
        tokio::spawn(write_conn(transport, queue, token.clone()));
    }
}

async fn read_conn(
    conn: ConnId,
    transport: Arc<TcpTransport>,
    events: mpsc::UnboundedSender<Event>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            next = transport.recv() => next,
            _ = token.cancelled() => return,
        };
        match next {
            Ok(Some(bytes)) => {
                if events.send(Event::Frame { conn, bytes }).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(conn = %conn, error = %e, "read failed");
                break;
            }
        }
    }
    let _ = events.send(Event::Disconnected { conn });
}

async fn write_conn(transport: Arc<TcpTransport>, mut queue: mpsc::UnboundedReceiver<Vec<u8>>, token: CancellationToken) {
    loop {
        let next = tokio::select! {
            next = queue.recv() => next,
            _ = token.cancelled() => None,
        };
        let Some(bytes) = next else { break };
        if let Err(e) = transport.send(&bytes).await {
            debug!(peer = %transport.peer_addr(), error = %e, "write failed");
            break;
        }
    }
    let _ = transport.close().await;
}
