//! Ties the protocol components together into a runnable agent: connection
//! lifecycle (C2/C3 wiring), instance registry (C4), call correlator (C5)
//! and dispatch state machine (C6).

pub mod adapter;
pub mod connection;
pub mod correlator;
pub mod dispatch;
pub mod instance_registry;

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::info;

use crate::config::AgentOptions;
use crate::identity::AgentIdentity;
use adapter::ExecutionAdapter;
use connection::AgentConnection;

/// Runs the agent until `shutdown` resolves (spec.md §5).
///
/// Mirrors the teacher's `MQTTHandle::start_connection` build → connect →
/// activate → run lifecycle, except reconnection on a dropped session is
/// left to rumqttc's own retry policy inside `run` (spec.md §7's
/// TransportError row) rather than looping at this layer, since a live
/// `AgentConnection::run` already owns the event loop for the process
/// lifetime.
pub async fn run(options: AgentOptions, identity: AgentIdentity, adapter: Arc<dyn ExecutionAdapter>, shutdown: oneshot::Receiver<()>) {
    info!(domain = %options.domain, "starting mqtt rpc agent");
    let connection = AgentConnection::build(options, identity, adapter);
    let connection = connection.connect().await;
    let connection = connection.announce().await;
    connection.run(shutdown).await;
}
