// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Form-schema tree model shared by the mutation engine and its tools.
//!
//! Pure data: a [`Form`] owns ordered [`Section`]s, which own ordered
//! [`Field`]s and [`Subform`]s; subforms nest without a depth limit. No
//! behavior lives here beyond shape, drafts/patches, and read-only traversal.
#![forbid(unsafe_code)]

mod ident;
mod node;
mod patch;
mod walk;

pub use ident::{FormId, IdError, NodeId, ServerId, TempId, Timestamp, TEMP_PREFIX};
pub use node::{
    Container, Field, FieldKind, Form, FormMeta, Node, NodeKind, NodeRef, ParentRef, Section,
    Subform,
};
pub use patch::{
    FieldDraft, FieldPatch, FormPatch, SectionDraft, SectionPatch, SubformDraft, SubformPatch,
};
pub use walk::{subtree_ids, InvariantViolation, Visit, Walk};
