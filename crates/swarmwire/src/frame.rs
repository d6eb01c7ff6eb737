//! # Wire Frames
//!
//! Encodes a [`Message`] as one self-describing JSON record:
//!
//! ```text
//! { "id": "...", "payloadType": "integer", "payload": 1, "sender": "...", "recipient": "..." }
//! ```
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`.
//! - **Forward Compatibility**: Unknown record fields are ignored.
//! - **Signature stays local**: it is recomputed on demand, never written.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::address::Address;
use crate::error::Error;
use crate::error::Result;
use crate::message::Message;
use crate::payload::Payload;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordOut<'a> {
    id: &'a str,
    payload_type: &'a str,
    payload: Value,
    sender: &'a str,
    recipient: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordIn {
    id: Option<String>,
    payload_type: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    recipient: String,
}

/// Routing header of a frame.
#[derive(Deserialize)]
struct HeaderIn {
    #[serde(default)]
    sender: String,
    #[serde(default)]
    recipient: String,
}

/// The addressing half of a frame, read without touching the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub sender: Address,
    pub recipient: Address,
}

/// Encodes a message into a frame body.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let (payload_type, payload) = message.payload.to_wire()?;
    let record = RecordOut {
        id: message.id.as_str(),
        payload_type,
        payload,
        sender: message.sender.as_str(),
        recipient: message.recipient.as_str(),
    };
    serde_json::to_vec(&record).map_err(|e| Error::Unserializable(e.to_string()))
}

/// Decodes a frame body into a message.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let record: RecordIn = serde_json::from_slice(bytes).map_err(|e| Error::Json(e.to_string()))?;

    let id = record.id.ok_or(Error::MissingField("id"))?;
    let payload_type = record.payload_type.ok_or(Error::MissingField("payloadType"))?;
    let payload = Payload::from_wire(&payload_type, record.payload)?;

    Ok(Message {
        id: id.into(),
        payload,
        sender: Address::new(record.sender),
        recipient: Address::new(record.recipient),
    })
}

/// Reads just the sender and recipient from a frame body.
///
/// Forwarding only needs these two fields; the original bytes are passed on as-is.
pub fn peek_route(bytes: &[u8]) -> Result<Route> {
    let header: HeaderIn = serde_json::from_slice(bytes).map_err(|e| Error::Json(e.to_string()))?;
    Ok(Route {
        sender: Address::new(header.sender),
        recipient: Address::new(header.recipient),
    })
}
