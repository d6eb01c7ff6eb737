//! # swarmrun
//!
//! Everything a service process needs to talk to its supervisor: the
//! [`Service`] runtime, request/response correlation with its timeout, and the
//! response predictor that short-circuits requests with a stable answer.

pub mod block;
pub mod config;
pub mod correlation;
pub mod predict;
pub mod service;

pub use block::wait_all;
pub use block::wait_for;
pub use config::RuntimeConfig;
pub use correlation::Correlator;
pub use correlation::PendingResult;
pub use predict::Predictor;
pub use service::EXIT_CONNECTION_LOST;
pub use service::Service;

#[cfg(test)]
mod tests;
