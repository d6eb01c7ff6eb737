//! # Message Router
//!
//! Decides what happens to one inbound frame.
//!
//! Frames with a recipient are forwarded untouched after reading only their
//! addressing fields. Frames addressed to the supervisor are fully decoded and
//! turned into instructions.

use swarmwire::Address;
use swarmwire::Identify;
use swarmwire::KillService;
use swarmwire::Message;
use swarmwire::Payload;
use swarmwire::SpawnService;
use swarmwire::frame;

use crate::connections::ConnId;
use crate::connections::ConnectionRegistry;

/// An instruction addressed to the supervisor.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Identify(Identify),
    Spawn(SpawnService),
    /// Carries the whole message so the confirmation can be addressed to its sender.
    Kill(KillService, Message),
}

#[derive(Debug)]
pub enum Decision {
    /// Write the frame, as received, to this connection.
    Deliver(ConnId),
    /// Nothing answers to the recipient; the frame is dropped.
    Undeliverable(Address),
    /// Act on an instruction.
    Instruction(Instruction),
    /// Addressed to the supervisor, but not an instruction it knows.
    Unrecognized(&'static str),
    /// Not a frame this router can read.
    Malformed(swarmwire::Error),
}

/// Routes one inbound frame against the current connections.
pub fn decide(connections: &ConnectionRegistry, bytes: &[u8]) -> Decision {
    let route = match frame::peek_route(bytes) {
        Ok(route) => route,
        Err(e) => return Decision::Malformed(e),
    };

    if !route.recipient.is_supervisor() {
        return match connections.resolve(&route.recipient) {
            Some(conn) => Decision::Deliver(conn),
            None => Decision::Undeliverable(route.recipient),
        };
    }

    let message = match frame::decode(bytes) {
        Ok(message) => message,
        Err(e) => return Decision::Malformed(e),
    };

    let instruction = match &message.payload {
        Payload::Identify(identify) => Instruction::Identify(identify.clone()),
        Payload::SpawnService(spawn) => Instruction::Spawn(spawn.clone()),
        Payload::KillService(kill) => Instruction::Kill(kill.clone(), message.clone()),
        other => return Decision::Unrecognized(other.payload_type()),
    };
    Decision::Instruction(instruction)
}

/// Builds the confirmation for a kill instruction, addressed to its sender.
pub fn kill_confirmation(request: &Message, service: &str) -> swarmwire::Result<Message> {
    let text = format!("'{}' killed successfully.", service);
    Ok(request.reply(Message::value(&text, Address::supervisor())?))
}
