//! # swarmwire
//!
//! The vocabulary shared by the supervisor and its services: addresses, typed
//! payloads, messages, the JSON frame format, and the byte transports frames
//! travel over.

pub mod address;
pub mod error;
pub mod frame;
pub mod memory;
pub mod message;
pub mod payload;
pub mod transport;

pub use address::Address;
pub use address::AddressKind;
pub use address::InstanceId;
pub use error::Error;
pub use error::Result;
pub use message::Message;
pub use message::MessageId;
pub use message::Signature;
pub use payload::Identify;
pub use payload::KillService;
pub use payload::Payload;
pub use payload::SpawnService;
pub use transport::Transport;
