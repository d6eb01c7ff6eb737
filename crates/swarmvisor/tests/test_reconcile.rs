//! Reconciliation against a launcher that only pretends to start processes.

use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use swarmrun::RuntimeConfig;
use swarmrun::Service;
use swarmvisor::ChildProcess;
use swarmvisor::ExitReport;
use swarmvisor::Launcher;
use swarmvisor::StaticTopology;
use swarmvisor::Supervisor;
use swarmvisor::SupervisorConfig;
use swarmvisor::Topology;
use swarmvisor::TopologyEvent;
use swarmvisor::TopologySource;
use swarmwire::KillService;
use swarmwire::Message;
use swarmwire::SpawnService;

struct PretendChild {
    exit: oneshot::Receiver<i32>,
    killed: bool,
    terminations: Arc<AtomicUsize>,
}

#[async_trait]
impl ChildProcess for PretendChild {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn terminate(&mut self) -> io::Result<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.killed = true;
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ExitReport> {
        if self.killed {
            return Ok(ExitReport { code: None, signal: Some(15) });
        }
        match (&mut self.exit).await {
            Ok(code) => Ok(ExitReport { code: Some(code), signal: None }),
            Err(_) => std::future::pending().await,
        }
    }
}

struct PretendLauncher {
    launches: mpsc::UnboundedSender<String>,
    alive: Mutex<Vec<oneshot::Sender<i32>>>,
    terminations: Arc<AtomicUsize>,
}

impl PretendLauncher {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let launcher = Arc::new(Self {
            launches: tx,
            alive: Mutex::new(Vec::new()),
            terminations: Arc::new(AtomicUsize::new(0)),
        });
        (launcher, rx)
    }

    /// Makes `count` children exit with a failure code.
    fn crash(&self, count: usize) {
        let mut alive = self.alive.lock().unwrap();
        for tx in alive.drain(..count) {
            let _ = tx.send(1);
        }
    }
}

impl Launcher for PretendLauncher {
    fn launch(&self, service: &str) -> io::Result<Box<dyn ChildProcess>> {
        let (tx, rx) = oneshot::channel();
        self.alive.lock().unwrap().push(tx);
        let _ = self.launches.send(service.to_string());
        Ok(Box::new(PretendChild {
            exit: rx,
            killed: false,
            terminations: self.terminations.clone(),
        }))
    }
}

fn config() -> SupervisorConfig {
    SupervisorConfig::default()
        .with_listen("127.0.0.1:0")
        .with_reconcile_grace(Duration::from_secs(5))
        .with_reconcile_period(Duration::from_secs(2))
        .with_stagger(Duration::from_secs(1))
}

fn elapsed_secs(start: Instant) -> u64 {
    (Instant::now() - start).as_secs()
}

/// Topology x=3 with nothing running: three spawns, one stagger unit apart.
/// Two crash: the next reconciliation brings them back.
#[tokio::test(start_paused = true)]
async fn test_spawns_staggered_and_respawns_crashed() {
    let (launcher, mut launches) = PretendLauncher::new();
    let topology = Box::new(StaticTopology(Topology::new().with("x", 3)));
    let start = Instant::now();

    let handle = Supervisor::new(config(), launcher.clone(), topology)
        .start(CancellationToken::new())
        .await
        .expect("supervisor starts");

    for expected in 0..3 {
        assert_eq!(launches.recv().await.as_deref(), Some("x"));
        assert_eq!(elapsed_secs(start), expected);
    }
    let status = handle.status().await.expect("status");
    assert_eq!(status.processes.get("x"), Some(&3));

    launcher.crash(2);

    // first periodic reconciliation runs after the grace delay
    assert_eq!(launches.recv().await.as_deref(), Some("x"));
    assert_eq!(elapsed_secs(start), 5);
    assert_eq!(launches.recv().await.as_deref(), Some("x"));
    assert_eq!(elapsed_secs(start), 6);

    // converged: later ticks schedule nothing
    let idle = tokio::time::timeout(Duration::from_secs(10), launches.recv()).await;
    assert!(idle.is_err(), "no further spawns expected");

    handle.shutdown().await;
}

/// Forwards whatever topology the test pushes.
struct ScriptedTopology(mpsc::UnboundedReceiver<Topology>);

#[async_trait]
impl TopologySource for ScriptedTopology {
    async fn watch(mut self: Box<Self>, events: mpsc::UnboundedSender<TopologyEvent>, token: CancellationToken) {
        loop {
            tokio::select! {
                next = self.0.recv() => match next {
                    Some(topology) => {
                        let _ = events.send(TopologyEvent::Updated(topology));
                    }
                    None => return,
                },
                _ = token.cancelled() => return,
            }
        }
    }
}

/// A shrinking topology stops the surplus.
#[tokio::test(start_paused = true)]
async fn test_surplus_instances_are_stopped() {
    let (launcher, mut launches) = PretendLauncher::new();
    let (script, rx) = mpsc::unbounded_channel();
    let config = config().with_stagger(Duration::ZERO);

    let handle = Supervisor::new(config, launcher.clone(), Box::new(ScriptedTopology(rx)))
        .start(CancellationToken::new())
        .await
        .expect("supervisor starts");

    script.send(Topology::new().with("x", 3)).unwrap();
    for _ in 0..3 {
        launches.recv().await.expect("spawn");
    }

    script.send(Topology::new().with("x", 1)).unwrap();
    let mut running = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        running = handle.status().await.expect("status").processes.get("x").copied();
        if running == Some(1) {
            break;
        }
    }
    assert_eq!(running, Some(1));

    // stops never trigger spawns
    let idle = tokio::time::timeout(Duration::from_secs(10), launches.recv()).await;
    assert!(idle.is_err());

    handle.shutdown().await;
}

/// Shutdown terminates every child before returning.
#[tokio::test(start_paused = true)]
async fn test_shutdown_terminates_children() {
    let (launcher, mut launches) = PretendLauncher::new();
    let topology = Box::new(StaticTopology(Topology::new().with("x", 2)));
    let token = CancellationToken::new();

    let handle = Supervisor::new(config().with_stagger(Duration::ZERO), launcher.clone(), topology)
        .start(token.clone())
        .await
        .expect("supervisor starts");

    launches.recv().await.expect("first spawn");
    launches.recv().await.expect("second spawn");

    token.cancel();
    handle.join().await;
    assert_eq!(launcher.terminations.load(Ordering::SeqCst), 2);
}

// ============================================================================
//  INSTRUCTIONS
// ============================================================================

/// Runs on real time: services talk to the supervisor over loopback TCP.
fn instruction_config() -> SupervisorConfig {
    config()
        .with_stagger(Duration::ZERO)
        .with_reconcile_grace(Duration::from_secs(60))
}

async fn client(addr: std::net::SocketAddr) -> Service {
    let config = RuntimeConfig::default()
        .with_supervisor(addr.to_string())
        .with_response_timeout(Duration::from_secs(2));
    Service::connect("cli", &config).await.expect("client connects")
}

#[tokio::test]
async fn test_kill_instruction_terminates_every_instance() {
    let (launcher, mut launches) = PretendLauncher::new();
    let topology = Box::new(StaticTopology(Topology::new().with("x", 2)));

    let handle = Supervisor::new(instruction_config(), launcher.clone(), topology)
        .start(CancellationToken::new())
        .await
        .expect("supervisor starts");
    launches.recv().await.expect("first spawn");
    launches.recv().await.expect("second spawn");

    let cli = client(handle.local_addr()).await;
    let pending = cli
        .request(Message::to_supervisor(KillService { service: "x".into() }))
        .unwrap();
    let response = pending.await.expect("confirmation");
    assert_eq!(response.payload.data::<String>().unwrap(), "'x' killed successfully.");

    for _ in 0..200 {
        if launcher.terminations.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(launcher.terminations.load(Ordering::SeqCst), 2);

    let status = handle.status().await.expect("status");
    assert_eq!(status.processes.get("x").copied().unwrap_or(0), 0);

    cli.exit(0);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_spawn_instruction_launches_service() {
    let (launcher, mut launches) = PretendLauncher::new();
    let topology = Box::new(StaticTopology(Topology::default()));

    let handle = Supervisor::new(instruction_config(), launcher.clone(), topology)
        .start(CancellationToken::new())
        .await
        .expect("supervisor starts");

    let cli = client(handle.local_addr()).await;
    cli.send(Message::to_supervisor(SpawnService { service: "y".into() }))
        .unwrap();

    let launched = tokio::time::timeout(Duration::from_secs(5), launches.recv())
        .await
        .expect("spawn instruction reaches the launcher");
    assert_eq!(launched.as_deref(), Some("y"));
    assert_eq!(handle.status().await.expect("status").processes.get("y"), Some(&1));

    cli.exit(0);
    handle.shutdown().await;
}
