//! Subcommand bodies.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use swarmrun::RuntimeConfig;
use swarmrun::Service;
use swarmvisor::CommandLauncher;
use swarmvisor::FileTopology;
use swarmvisor::StaticTopology;
use swarmvisor::Supervisor;
use swarmvisor::SupervisorConfig;
use swarmvisor::Topology;
use swarmvisor::TopologySource;
use swarmwire::KillService;
use swarmwire::Message;

use crate::catalog;

/// Fixed services win over the topology file.
pub fn topology_source(file: PathBuf, services: Vec<(String, usize)>) -> Box<dyn TopologySource> {
    if services.is_empty() {
        return Box::new(FileTopology::new(file));
    }
    let topology = services
        .into_iter()
        .fold(Topology::new(), |topology, (name, count)| topology.with(name, count));
    Box::new(StaticTopology(topology))
}

pub async fn serve(port: u16, file: PathBuf, services: Vec<(String, usize)>) -> Result<()> {
    let config = SupervisorConfig::default().with_listen(format!("127.0.0.1:{}", port));
    let launcher = CommandLauncher::current_exe(port).context("locating the swarm executable")?;
    let token = CancellationToken::new();

    let handle = Supervisor::new(config, Arc::new(launcher), topology_source(file, services))
        .start(token.clone())
        .await
        .with_context(|| format!("starting the supervisor on port {}", port))?;
    info!(addr = %handle.local_addr(), "supervisor ready");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

/// Runs a catalog service until its channel closes and returns its exit code.
pub async fn spawn(name: &str, host: &str, port: u16) -> Result<i32> {
    let Some(install) = catalog::lookup(name) else {
        bail!(
            "unknown service '{}' (known: {})",
            name,
            catalog::SERVICES.join(", ")
        );
    };

    let config = RuntimeConfig::default().with_supervisor(format!("{}:{}", host, port));
    let service = Service::connect(name, &config)
        .await
        .with_context(|| format!("connecting to the supervisor at {}", config.supervisor))?;
    install(&service);

    let code = tokio::select! {
        code = service.closed() => code,
        _ = tokio::signal::ctrl_c() => {
            service.exit(0);
            service.closed().await
        }
    };
    if code != 0 {
        warn!(service = %name, code, "service exiting");
    }
    Ok(code)
}

pub async fn kill(name: &str, host: &str, port: u16) -> Result<()> {
    // one-shot client, nothing worth predicting
    let config = RuntimeConfig::default()
        .with_supervisor(format!("{}:{}", host, port))
        .with_prediction_threshold(0);
    let client = Service::connect("swarm-cli", &config)
        .await
        .with_context(|| format!("connecting to the supervisor at {}", config.supervisor))?;

    println!("Killing '{}'...", name);
    let pending = client.request(Message::to_supervisor(KillService {
        service: name.to_string(),
    }))?;
    let outcome = pending.await;
    client.exit(0);
    client.closed().await;

    match outcome {
        Ok(response) => match response.payload.data::<String>() {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{:?}", response.payload),
        },
        Err(e) => bail!("no confirmation for '{}': {}", name, e),
    }
    Ok(())
}
