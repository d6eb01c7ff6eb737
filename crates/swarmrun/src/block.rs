//! Blocking waits for code that lives outside the async world.
//!
//! Both helpers take the runtime explicitly and must not be called from one of
//! its worker threads.

use std::time::Duration;

use futures::future::try_join_all;
use tokio::runtime::Runtime;

use swarmwire::Message;

use crate::correlation::Error;
use crate::correlation::PendingResult;
use crate::correlation::Result;

/// Blocks until `pending` settles or `limit` elapses.
pub fn wait_for(runtime: &Runtime, pending: PendingResult, limit: Duration) -> Result<Message> {
    runtime
        .block_on(async { tokio::time::timeout(limit, pending).await })
        .unwrap_or(Err(Error::Timeout))
}

/// Blocks until every handle settles, the first rejection, or `limit`.
pub fn wait_all(runtime: &Runtime, pending: Vec<PendingResult>, limit: Duration) -> Result<Vec<Message>> {
    runtime
        .block_on(async { tokio::time::timeout(limit, try_join_all(pending)).await })
        .unwrap_or(Err(Error::Timeout))
}
