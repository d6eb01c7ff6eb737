//! # Built-in services
//!
//! The services `swarm spawn` knows how to run. Each entry installs a message
//! handler on a freshly started [`Service`].

use swarmrun::Service;
use swarmwire::Address;
use swarmwire::Message;
use tracing::warn;

/// Installs a service's behavior.
pub type Install = fn(&Service);

/// Names accepted by [`lookup`].
pub const SERVICES: &[&str] = &["echo", "incrementer"];

pub fn lookup(name: &str) -> Option<Install> {
    match name {
        "echo" => Some(echo),
        "incrementer" => Some(incrementer),
        _ => None,
    }
}

/// Answers every request with its own payload.
fn echo(service: &Service) {
    service.on_message(|svc, msg| {
        let reply = Message::new(msg.payload.clone(), Address::supervisor());
        if let Err(e) = svc.respond(&msg, reply) {
            warn!(error = %e, "echo reply failed");
        }
    });
}

/// Answers an integer `n` with `n + 1`.
fn incrementer(service: &Service) {
    service.on_message(|svc, msg| {
        let n = match msg.payload.data::<i64>() {
            Ok(n) => n,
            Err(e) => {
                warn!(sender = %msg.sender, error = %e, "incrementer expects an integer");
                return;
            }
        };
        let reply = match Message::value(&n.wrapping_add(1), Address::supervisor()) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "incrementer could not encode its answer");
                return;
            }
        };
        if let Err(e) = svc.respond(&msg, reply) {
            warn!(error = %e, "incrementer reply failed");
        }
    });
}
