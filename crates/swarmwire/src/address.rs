//! # Addressing
//!
//! Every message carries a sender and a recipient address. An address takes one
//! of three forms, told apart purely by syntax:
//!
//! - **empty**: the supervisor itself.
//! - **instance id**: exactly [`INSTANCE_ID_LEN`] lowercase or uppercase hex digits.
//! - **anything else**: a service name, resolved by the supervisor to one live
//!   instance of that name.
//!
//! Instance ids are generated by [`InstanceId::generate`], which always yields
//! the 32-digit form. Requiring the full length keeps short names such as
//! `cafe` or `deadbeef` in the name form.

use std::fmt;

use uuid::Uuid;

/// Length of a generated instance id.
pub const INSTANCE_ID_LEN: usize = 32;

/// A recipient or sender designator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

/// The resolved form of an [`Address`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressKind<'a> {
    Supervisor,
    Instance(&'a str),
    Name(&'a str),
}

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The empty address.
    pub fn supervisor() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_supervisor(&self) -> bool {
        self.0.is_empty()
    }

    pub fn kind(&self) -> AddressKind<'_> {
        if self.0.is_empty() {
            AddressKind::Supervisor
        } else if is_instance_token(&self.0) {
            AddressKind::Instance(&self.0)
        } else {
            AddressKind::Name(&self.0)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<supervisor>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&InstanceId> for Address {
    fn from(id: &InstanceId) -> Self {
        Self(id.0.clone())
    }
}

impl From<InstanceId> for Address {
    fn from(id: InstanceId) -> Self {
        Self(id.0)
    }
}

fn is_instance_token(raw: &str) -> bool {
    raw.len() == INSTANCE_ID_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Unique identity of one running service process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Accepts `raw` only when it has the instance-id address form.
    pub fn parse(raw: &str) -> Option<Self> {
        is_instance_token(raw).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
