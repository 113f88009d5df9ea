// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for the mutation engine.

use formtree_model::{FormId, NodeId, TempId};
use thiserror::Error;

use crate::journal::OpId;
use crate::order::OrderError;
use crate::remote::RemoteError;
use crate::resolve::ResolveError;

/// Phase-1 refusal. Nothing was applied and nothing will be sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntentError {
    /// The form is not loaded in the cache.
    #[error("form {0} is not loaded")]
    UnknownForm(FormId),
    /// The target (or the named parent) does not exist in the current snapshot.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// A reorder was not a full permutation of the current siblings.
    #[error(transparent)]
    Order(#[from] OrderError),
    /// A create would introduce an id that already exists.
    #[error("node {0} already exists")]
    Duplicate(NodeId),
}

impl IntentError {
    /// `NotFound` class: the caller acted on a stale handle; treat as a no-op.
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::Resolve(ResolveError::NotFound(_)))
    }
}

/// Failure of a submitted operation as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// Refused in phase 1.
    #[error("intent rejected: {0}")]
    Intent(#[from] IntentError),
    /// The collaborator refused; the tree has already been rolled back.
    #[error("{op} rejected remotely: {source}")]
    RemoteRejected {
        /// The rolled-back operation.
        op: OpId,
        /// What the collaborator said.
        source: RemoteError,
    },
    /// Dropped because the create it depended on was rolled back.
    #[error("{op} cancelled: parent {parent} was rolled back")]
    Cancelled {
        /// The dropped operation.
        op: OpId,
        /// Temp id of the node that no longer exists.
        parent: TempId,
    },
    /// The operation is not (or no longer) known to the engine.
    #[error("unknown operation {0}")]
    UnknownOp(OpId),
    /// The operation's request was already handed out.
    #[error("{0} is already in flight")]
    AlreadyDispatched(OpId),
}

impl MutationError {
    /// `true` for phase-1 no-ops caused by stale handles.
    pub const fn is_benign(&self) -> bool {
        match self {
            Self::Intent(err) => err.is_benign(),
            _ => false,
        }
    }
}
