//! # Process Registry
//!
//! Launches service processes and keeps track of which are still alive.
//!
//! Every launched child gets a watcher task that owns it. The watcher waits for
//! the child to exit, or for its cancellation token to fire, in which case it
//! terminates the child first. Either way it reports the exit back to the
//! registry's owner, which then calls [`ProcessRegistry::exited`].
//!
//! ## Invariants
//! - `spawn`, `stop`, and `kill` never fail their caller; problems are logged.
//! - An entry leaves the registry only when its exit is reported.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Strong type for process identifiers within one registry.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcId(pub u64);

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

/// How a child process ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit"),
        }
    }
}

/// A running child, owned by its watcher.
#[async_trait]
pub trait ChildProcess: Send + 'static {
    fn pid(&self) -> Option<u32>;

    /// Asks the child to stop. Returns once the request is delivered.
    async fn terminate(&mut self) -> io::Result<()>;

    /// Waits for the child to exit.
    async fn wait(&mut self) -> io::Result<ExitReport>;
}

/// Starts one process for a service name.
pub trait Launcher: Send + Sync + 'static {
    fn launch(&self, service: &str) -> io::Result<Box<dyn ChildProcess>>;
}

/// Reported by a watcher when its child is gone.
#[derive(Clone, Debug)]
pub struct ProcessExit {
    pub service: String,
    pub proc: ProcId,
    /// The exit, or why it could not be observed.
    pub report: Result<ExitReport, String>,
}

struct Running {
    proc: ProcId,
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

/// Live processes per service name.
pub struct ProcessRegistry {
    launcher: Arc<dyn Launcher>,
    exits: mpsc::UnboundedSender<ProcessExit>,
    procs: HashMap<String, Vec<Running>>,
    next_id: u64,
}

impl ProcessRegistry {
    /// Creates a registry whose watchers report on `exits`.
    pub fn new(launcher: Arc<dyn Launcher>, exits: mpsc::UnboundedSender<ProcessExit>) -> Self {
        Self {
            launcher,
            exits,
            procs: HashMap::new(),
            next_id: 1,
        }
    }

    /// Launches one more instance of `service`.
    pub fn spawn(&mut self, service: &str) -> Option<ProcId> {
        info!(service, "spawning");

        let child = match self.launcher.launch(service) {
            Ok(child) => child,
            Err(e) => {
                error!(service, error = %e, "spawn failed");
                return None;
            }
        };

        let proc = ProcId(self.next_id);
        self.next_id += 1;

        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch(
            child,
            service.to_string(),
            proc,
            cancel.clone(),
            self.exits.clone(),
        ));

        self.procs.entry(service.to_string()).or_default().push(Running {
            proc,
            cancel,
            watcher,
        });
        Some(proc)
    }

    /// Terminates one arbitrary live instance of `service`.
    pub fn stop(&mut self, service: &str) {
        info!(service, "stopping");

        let Some(list) = self.procs.get(service) else {
            return;
        };
        let live: Vec<&Running> = list.iter().filter(|r| !r.cancel.is_cancelled()).collect();
        if let Some(victim) = live.choose(&mut rand::thread_rng()) {
            victim.cancel.cancel();
        }
    }

    /// Terminates every instance of `service`. Returns how many were signalled.
    pub fn kill(&mut self, service: &str) -> usize {
        info!(service, "killing");

        let Some(list) = self.procs.get(service) else {
            return 0;
        };
        let mut signalled = 0;
        for running in list.iter().filter(|r| !r.cancel.is_cancelled()) {
            running.cancel.cancel();
            signalled += 1;
        }
        signalled
    }

    /// Forgets a process whose watcher reported its exit.
    pub fn exited(&mut self, exit: &ProcessExit) {
        match &exit.report {
            Ok(report) => info!(service = %exit.service, proc = %exit.proc, code = ?report.code, signal = ?report.signal, "process exited"),
            Err(e) => warn!(service = %exit.service, proc = %exit.proc, error = %e, "process lost"),
        }

        if let Some(list) = self.procs.get_mut(&exit.service) {
            list.retain(|r| r.proc != exit.proc);
            if list.is_empty() {
                self.procs.remove(&exit.service);
            }
        }
    }

    /// Instances of `service` that are alive and not being stopped.
    pub fn running(&self, service: &str) -> usize {
        self.procs
            .get(service)
            .map_or(0, |list| list.iter().filter(|r| !r.cancel.is_cancelled()).count())
    }

    /// Live instance counts per service name.
    pub fn census(&self) -> impl Iterator<Item = (&str, usize)> {
        self.procs.keys().map(|name| (name.as_str(), self.running(name)))
    }

    /// Terminates every child and waits for the watchers to finish.
    pub async fn shutdown(&mut self) {
        let all: Vec<Running> = self.procs.drain().flat_map(|(_, list)| list).collect();
        if !all.is_empty() {
            info!(count = all.len(), "terminating children");
        }
        for running in &all {
            running.cancel.cancel();
        }
        for running in all {
            let _ = running.watcher.await;
        }
    }
}

async fn watch(
    mut child: Box<dyn ChildProcess>,
    service: String,
    proc: ProcId,
    cancel: CancellationToken,
    exits: mpsc::UnboundedSender<ProcessExit>,
) {
    let exited = tokio::select! {
        report = child.wait() => Some(report),
        _ = cancel.cancelled() => None,
    };

    let report = match exited {
        Some(report) => report,
        None => {
            if let Err(e) = child.terminate().await {
                warn!(service = %service, proc = %proc, error = %e, "terminate failed");
            }
            child.wait().await
        }
    };

    let _ = exits.send(ProcessExit {
        service,
        proc,
        report: report.map_err(|e| e.to_string()),
    });
}

/// Launches `<program> spawn <service> --port <port>`.
///
/// The child's stdout and stderr are re-emitted line by line as log events.
pub struct CommandLauncher {
    program: PathBuf,
    port: u16,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            program: program.into(),
            port,
        }
    }

    /// Launches children from the running executable.
    pub fn current_exe(port: u16) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, port))
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, service: &str) -> io::Result<Box<dyn ChildProcess>> {
        let mut child = Command::new(&self.program)
            .arg("spawn")
            .arg(service)
            .arg("--port")
            .arg(self.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pipe_lines(stdout, service.to_string()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pipe_lines(stderr, service.to_string()));
        }

        Ok(Box::new(OsChild(child)))
    }
}

/// Re-emits each line of a child's output. Returns how many lines it forwarded.
pub(crate) async fn pipe_lines(stream: impl AsyncRead + Unpin, service: String) -> usize {
    let mut lines = BufReader::new(stream).lines();
    let mut forwarded = 0;
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "swarm::child", service = %service, "{}", line);
        forwarded += 1;
    }
    forwarded
}

struct OsChild(tokio::process::Child);

#[async_trait]
impl ChildProcess for OsChild {
    fn pid(&self) -> Option<u32> {
        self.0.id()
    }

    async fn terminate(&mut self) -> io::Result<()> {
        self.0.start_kill()
    }

    async fn wait(&mut self) -> io::Result<ExitReport> {
        let status = self.0.wait().await?;
        Ok(ExitReport {
            code: status.code(),
            signal: exit_signal(&status),
        })
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
