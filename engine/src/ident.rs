//! Two-namespace identifiers.
//!
//! A record created on the client has no server identifier until the server
//! accepts it. Instead of an optional integer, references carry which
//! namespace they live in. A `Local` reference only becomes `Remote` through
//! the identifier reconciler's mapping table.

use crate::ServerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A stable client-minted handle for a locally created record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalHandle(String);

impl LocalHandle {
    /// Mint a fresh handle.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing handle value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference to an entity in either identifier space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "space", content = "id", rename_all = "lowercase")]
pub enum EntityRef {
    /// Minted on this client, not yet known to the server
    Local(LocalHandle),
    /// Issued by the server
    Remote(ServerId),
}

impl EntityRef {
    /// A fresh local reference.
    pub fn new_local() -> Self {
        EntityRef::Local(LocalHandle::generate())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, EntityRef::Local(_))
    }

    /// The server identifier, if this reference has been mapped.
    pub fn server_id(&self) -> Option<ServerId> {
        match self {
            EntityRef::Remote(id) => Some(*id),
            EntityRef::Local(_) => None,
        }
    }

    /// The local handle, if this reference is still local.
    pub fn local_handle(&self) -> Option<&LocalHandle> {
        match self {
            EntityRef::Local(handle) => Some(handle),
            EntityRef::Remote(_) => None,
        }
    }

    /// Whether this reference points at the given local handle.
    pub fn is_local_handle(&self, handle: &LocalHandle) -> bool {
        self.local_handle() == Some(handle)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Local(handle) => write!(f, "local:{handle}"),
            EntityRef::Remote(id) => write!(f, "{id}"),
        }
    }
}

impl From<LocalHandle> for EntityRef {
    fn from(handle: LocalHandle) -> Self {
        EntityRef::Local(handle)
    }
}
