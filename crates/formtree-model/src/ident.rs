// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier types for tree nodes.
//!
//! A node is addressed either by a [`ServerId`] (authoritative, assigned by the
//! persistence collaborator) or by a [`TempId`] (local, assigned optimistically
//! while a create is in flight). The two never collide: temp ids render with the
//! [`TEMP_PREFIX`] and `ServerId::new` refuses that prefix.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Display prefix reserved for temporary identifiers.
pub const TEMP_PREFIX: &str = "tmp-";

/// Errors raised while parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The identifier string was empty.
    #[error("identifier is empty")]
    Empty,
    /// A server id used the prefix reserved for temporary ids.
    #[error("server id uses reserved prefix `tmp-`: {0}")]
    ReservedPrefix(String),
    /// A `tmp-` identifier did not carry a valid counter.
    #[error("malformed temporary id: {0}")]
    MalformedTemp(String),
}

/// Authoritative identifier issued by the persistence collaborator.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerId(String);

/// Forms are created outside the engine, so their id is always authoritative.
pub type FormId = ServerId;

impl ServerId {
    /// Validate and wrap a server-issued identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdError::Empty);
        }
        if raw.starts_with(TEMP_PREFIX) {
            return Err(IdError::ReservedPrefix(raw));
        }
        Ok(Self(raw))
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServerId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServerId> for String {
    fn from(value: ServerId) -> Self {
        value.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locally generated, non-authoritative identifier.
///
/// Issued from a monotonically increasing counter by the mutation engine. A
/// temp id is only meaningful inside the replica that issued it and must never
/// be sent to the persistence collaborator.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TempId(u64);

impl TempId {
    /// Construct from a raw counter value.
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Underlying counter value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{TEMP_PREFIX}{}", self.0)
    }
}

/// Identifier of a Section, Field, or Subform.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodeId {
    /// Confirmed by the persistence collaborator.
    Server(ServerId),
    /// Pending confirmation.
    Temp(TempId),
}

impl NodeId {
    /// Parse the display form (`tmp-<n>` for temp ids, anything else is a server id).
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        match raw.strip_prefix(TEMP_PREFIX) {
            Some(counter) => counter
                .parse::<u64>()
                .map(|n| Self::Temp(TempId::from_raw(n)))
                .map_err(|_| IdError::MalformedTemp(raw.to_owned())),
            None => ServerId::new(raw).map(Self::Server),
        }
    }

    /// Convenience for fixtures and tests: a server id from a literal.
    pub fn server(raw: impl Into<String>) -> Result<Self, IdError> {
        ServerId::new(raw).map(Self::Server)
    }

    /// `true` when the id is a local temporary id.
    pub const fn is_temp(&self) -> bool {
        matches!(self, Self::Temp(_))
    }

    /// The authoritative id, if confirmed.
    pub fn as_server(&self) -> Option<&ServerId> {
        match self {
            Self::Server(id) => Some(id),
            Self::Temp(_) => None,
        }
    }

    /// The temporary id, if pending.
    pub const fn as_temp(&self) -> Option<TempId> {
        match self {
            Self::Temp(id) => Some(*id),
            Self::Server(_) => None,
        }
    }
}

impl From<ServerId> for NodeId {
    fn from(value: ServerId) -> Self {
        Self::Server(value)
    }
}

impl From<TempId> for NodeId {
    fn from(value: TempId) -> Self {
        Self::Temp(value)
    }
}

impl TryFrom<String> for NodeId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server(id) => id.fmt(f),
            Self::Temp(id) => id.fmt(f),
        }
    }
}

/// Server-side timestamp in unix milliseconds.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Wrap a unix-millisecond value.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Unix milliseconds.
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}
