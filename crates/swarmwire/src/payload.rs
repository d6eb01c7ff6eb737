//! # Payloads
//!
//! A payload is a tagged union over the instructions the supervisor understands,
//! plain JSON values for application data, and opaque bytes.
//!
//! ## Invariants
//! - **Construction-time validation**: [`Payload::value`] serializes eagerly, so a
//!   value that cannot cross the wire is rejected before a message exists.
//! - **Self-describing tag**: [`Payload::payload_type`] is derived from the
//!   variant (and for JSON values, from the value's shape), never stored.

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;

pub const IDENTIFY: &str = "Identify";
pub const SPAWN_SERVICE: &str = "SpawnService";
pub const KILL_SERVICE: &str = "KillService";
pub const BYTES: &str = "bytes";

/// Announces the service name and instance id behind a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub service_name: String,
    pub instance_id: String,
}

/// Asks the supervisor to launch one more instance of `service`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnService {
    pub service: String,
}

/// Asks the supervisor to terminate every instance of `service`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillService {
    pub service: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Identify(Identify),
    SpawnService(SpawnService),
    KillService(KillService),
    Value(Value),
    Bytes(Vec<u8>),
}

impl Payload {
    /// Serializes `value` into a JSON payload.
    ///
    /// # Errors
    /// Returns `Error::Unserializable` when serde refuses the value.
    pub fn value<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Payload::Value)
            .map_err(|e| Error::Unserializable(e.to_string()))
    }

    pub fn null() -> Self {
        Payload::Value(Value::Null)
    }

    /// The type tag carried on the wire as `payloadType`.
    pub fn payload_type(&self) -> &'static str {
        match self {
            Payload::Identify(_) => IDENTIFY,
            Payload::SpawnService(_) => SPAWN_SERVICE,
            Payload::KillService(_) => KILL_SERVICE,
            Payload::Bytes(_) => BYTES,
            Payload::Value(v) => value_type(v),
        }
    }

    /// Decodes a JSON payload into `T`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        let Payload::Value(v) = self else {
            return Err(Error::TypeMismatch {
                expected: "json value".into(),
                found: self.payload_type().into(),
            });
        };
        T::deserialize(v).map_err(|e| Error::TypeMismatch {
            expected: std::any::type_name::<T>().into(),
            found: e.to_string(),
        })
    }

    /// Splits the payload into its wire tag and JSON body.
    pub fn to_wire(&self) -> Result<(&'static str, Value)> {
        let body = match self {
            Payload::Identify(i) => to_body(i)?,
            Payload::SpawnService(s) => to_body(s)?,
            Payload::KillService(k) => to_body(k)?,
            Payload::Bytes(b) => to_body(b)?,
            Payload::Value(v) => v.clone(),
        };
        Ok((self.payload_type(), body))
    }

    /// Rebuilds a payload from its wire tag and JSON body.
    pub fn from_wire(payload_type: &str, body: Value) -> Result<Self> {
        match payload_type {
            IDENTIFY => Ok(Payload::Identify(instruction(IDENTIFY, body)?)),
            SPAWN_SERVICE => Ok(Payload::SpawnService(instruction(SPAWN_SERVICE, body)?)),
            KILL_SERVICE => Ok(Payload::KillService(instruction(KILL_SERVICE, body)?)),
            BYTES => serde_json::from_value(body)
                .map(Payload::Bytes)
                .map_err(|e| Error::TypeMismatch { expected: BYTES.into(), found: e.to_string() }),
            declared => {
                let found = value_type(&body);
                if found != declared {
                    return Err(Error::TypeMismatch {
                        expected: declared.to_string(),
                        found: found.to_string(),
                    });
                }
                Ok(Payload::Value(body))
            }
        }
    }
}

impl From<Identify> for Payload {
    fn from(i: Identify) -> Self {
        Payload::Identify(i)
    }
}

impl From<SpawnService> for Payload {
    fn from(s: SpawnService) -> Self {
        Payload::SpawnService(s)
    }
}

impl From<KillService> for Payload {
    fn from(k: KillService) -> Self {
        Payload::KillService(k)
    }
}

/// Names the shape of a JSON value the way primitive types are named on the wire.
fn value_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "double",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn to_body<T: Serialize + ?Sized>(v: &T) -> Result<Value> {
    serde_json::to_value(v).map_err(|e| Error::Unserializable(e.to_string()))
}

fn instruction<T: DeserializeOwned>(kind: &str, body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| Error::MalformedInstruction {
        kind: kind.to_string(),
        details: e.to_string(),
    })
}
