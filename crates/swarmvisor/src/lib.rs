//! # swarmvisor
//!
//! The supervisor: one listener every service dials, a router that forwards
//! frames between services by name or instance id, and a reconciler that keeps
//! the process count of each service at what the topology asks for.

pub mod config;
pub mod connections;
pub mod error;
pub mod process;
pub mod reconcile;
pub mod router;
pub mod supervisor;
pub mod topology;

pub use config::SupervisorConfig;
pub use connections::ConnId;
pub use connections::ConnectionRegistry;
pub use error::Error;
pub use error::Result;
pub use process::ChildProcess;
pub use process::CommandLauncher;
pub use process::ExitReport;
pub use process::Launcher;
pub use process::ProcessRegistry;
pub use supervisor::Status;
pub use supervisor::Supervisor;
pub use supervisor::SupervisorHandle;
pub use topology::FileTopology;
pub use topology::StaticTopology;
pub use topology::Topology;
pub use topology::TopologyEvent;
pub use topology::TopologySource;
