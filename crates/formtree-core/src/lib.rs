// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Optimistic mutation engine for form-schema trees.
//!
//! Edits to a [`Form`](formtree_model::Form) are applied to the cached
//! snapshot immediately, sent to a [`FormRemote`] in the background, and then
//! either reconciled with the authoritative answer or rolled back precisely.
//!
//! # Modules
//!
//! - [`resolve`] - find any node by id, plus mutable container access
//! - [`order`] - dense sibling ordering (insert, remove, reorder)
//! - [`cache`] - versioned snapshot store with change listeners
//! - [`remote`] - the persistence collaborator port
//! - [`engine`] - the apply/dispatch/settle protocol
#![forbid(unsafe_code)]

pub mod cache;
mod edit;
pub mod engine;
mod error;
pub mod intent;
mod journal;
pub mod order;
pub mod remote;
pub mod resolve;

pub use cache::{FormCache, Listener, SnapshotStore, SubscriptionId};
pub use edit::{reconcile, Applied, Edit, NodePatch, Siblings};
pub use engine::{Dispatch, Engine, Outcome, PendingOp, Ticket};
pub use error::{IntentError, MutationError};
pub use intent::Intent;
pub use journal::{Blocker, OpId, OpStatus};
pub use remote::{Confirmation, FormRemote, RejectKind, RemoteCall, RemoteError, RemoteParent};
pub use resolve::{locate, locate_container, Located, ResolveError};

pub use formtree_app_core::settings::{DispatchPolicy, EngineSettings};
