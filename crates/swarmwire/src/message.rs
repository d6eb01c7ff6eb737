//! # Message
//!
//! The unit exchanged between services and the supervisor.
//!
//! A response reuses the id of the request it answers, which is the only thing
//! the original sender needs to correlate it. The [`Signature`] is derived from
//! the payload and recipient and never leaves the process.

use std::fmt;

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use uuid::Uuid;

use crate::address::Address;
use crate::error::Result;
use crate::payload::Payload;

/// Globally unique, opaque message identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for MessageId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 over `(payloadType, payload, recipient)`.
///
/// Two messages with equal signatures are structurally the same request.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 32]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Payload,
    pub sender: Address,
    pub recipient: Address,
}

impl Message {
    /// Creates a message with a fresh id and an empty sender.
    pub fn new(payload: impl Into<Payload>, recipient: impl Into<Address>) -> Self {
        Self {
            id: MessageId::generate(),
            payload: payload.into(),
            sender: Address::supervisor(),
            recipient: recipient.into(),
        }
    }

    /// Creates a message addressed to the supervisor.
    pub fn to_supervisor(payload: impl Into<Payload>) -> Self {
        Self::new(payload, Address::supervisor())
    }

    /// Creates a message carrying `value` as a JSON payload.
    ///
    /// # Errors
    /// Fails when `value` cannot be serialized.
    pub fn value<T: Serialize + ?Sized>(value: &T, recipient: impl Into<Address>) -> Result<Self> {
        Ok(Self::new(Payload::value(value)?, recipient))
    }

    pub fn payload_type(&self) -> &'static str {
        self.payload.payload_type()
    }

    /// Turns `reply` into the response to this message.
    pub fn reply(&self, mut reply: Message) -> Message {
        reply.id = self.id.clone();
        reply.recipient = self.sender.clone();
        reply
    }

    pub fn signature(&self) -> Signature {
        let mut hasher = Sha256::new();
        hasher.update(self.payload_type().as_bytes());
        hasher.update(b":");
        // JSON objects serialize with sorted keys, so equal payloads hash equally.
        match self.payload.to_wire() {
            Ok((_, body)) => hasher.update(body.to_string().as_bytes()),
            Err(_) => hasher.update(b"?"),
        }
        hasher.update(b":");
        hasher.update(self.recipient.as_str().as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Signature(out)
    }
}

impl From<Payload> for Message {
    fn from(payload: Payload) -> Self {
        Message::new(payload, Address::supervisor())
    }
}
