// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Port to the persistence collaborator.
//!
//! The engine never talks to a transport directly. It describes each request
//! as a [`RemoteCall`] and hands it to a [`FormRemote`] implementation. Every
//! id on this boundary is a [`ServerId`]: a temporary id has no way to reach
//! the collaborator.

use formtree_model::{
    Field, FieldDraft, FieldPatch, Form, FormId, FormMeta, FormPatch, NodeId, ParentRef, Section,
    SectionDraft, SectionPatch, ServerId, Subform, SubformDraft, SubformPatch,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Confirmed owner of a field or subform, as the collaborator sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RemoteParent {
    /// A section.
    Section(ServerId),
    /// A subform.
    Subform(ServerId),
}

impl RemoteParent {
    /// Server id of the container.
    pub fn id(&self) -> &ServerId {
        match self {
            Self::Section(id) | Self::Subform(id) => id,
        }
    }
}

impl From<RemoteParent> for ParentRef {
    fn from(value: RemoteParent) -> Self {
        match value {
            RemoteParent::Section(id) => Self::Section(NodeId::Server(id)),
            RemoteParent::Subform(id) => Self::Subform(NodeId::Server(id)),
        }
    }
}

/// Category of a collaborator-side rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    /// Payload failed server validation.
    Validation,
    /// Caller lacks permission.
    Authorization,
    /// Concurrent modification or constraint conflict.
    Conflict,
    /// Target no longer exists server-side.
    Missing,
    /// Anything else.
    Other,
}

impl std::fmt::Display for RejectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::Conflict => "conflict",
            Self::Missing => "missing",
            Self::Other => "other",
        })
    }
}

/// Failure reported by (or on the way to) the collaborator.
///
/// All variants are treated the same by the engine: the pending operation is
/// rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The collaborator refused the request.
    #[error("{kind} rejection: {message}")]
    Rejected {
        /// Category.
        kind: RejectKind,
        /// Human-readable reason.
        message: String,
    },
    /// No answer within the configured limit.
    #[error("request timed out")]
    Timeout,
    /// The request never completed (connection dropped, decode failure, ...).
    #[error("transport failure: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Shorthand for a rejection.
    pub fn rejected(kind: RejectKind, message: impl Into<String>) -> Self {
        Self::Rejected {
            kind,
            message: message.into(),
        }
    }
}

/// Persistence collaborator.
///
/// Each method is one atomic server-side operation. Creates take the desired
/// position among the new node's siblings and return the authoritative node
/// (real id, timestamps).
#[allow(async_fn_in_trait)]
pub trait FormRemote {
    /// Fetch the authoritative tree.
    async fn fetch_form(&self, form: &FormId) -> Result<Form, RemoteError>;
    /// Edit form-level metadata.
    async fn update_form(&self, form: &FormId, patch: &FormPatch) -> Result<FormMeta, RemoteError>;

    /// Create a section.
    async fn create_section(
        &self,
        form: &FormId,
        draft: &SectionDraft,
        order: u32,
    ) -> Result<Section, RemoteError>;
    /// Patch a section.
    async fn update_section(&self, id: &ServerId, patch: &SectionPatch)
        -> Result<Section, RemoteError>;
    /// Delete a section and everything below it.
    async fn delete_section(&self, id: &ServerId) -> Result<(), RemoteError>;
    /// Persist a full section permutation.
    async fn reorder_sections(&self, form: &FormId, ids: &[ServerId]) -> Result<(), RemoteError>;

    /// Create a field.
    async fn create_field(
        &self,
        parent: &RemoteParent,
        draft: &FieldDraft,
        order: u32,
    ) -> Result<Field, RemoteError>;
    /// Patch a field.
    async fn update_field(&self, id: &ServerId, patch: &FieldPatch) -> Result<Field, RemoteError>;
    /// Delete a field.
    async fn delete_field(&self, id: &ServerId) -> Result<(), RemoteError>;
    /// Persist a full field permutation under one container.
    async fn reorder_fields(&self, parent: &RemoteParent, ids: &[ServerId])
        -> Result<(), RemoteError>;

    /// Create a subform.
    async fn create_subform(
        &self,
        parent: &RemoteParent,
        draft: &SubformDraft,
        order: u32,
    ) -> Result<Subform, RemoteError>;
    /// Patch a subform.
    async fn update_subform(&self, id: &ServerId, patch: &SubformPatch)
        -> Result<Subform, RemoteError>;
    /// Delete a subform and everything below it.
    async fn delete_subform(&self, id: &ServerId) -> Result<(), RemoteError>;
    /// Persist a full subform permutation under one container.
    async fn reorder_subforms(&self, parent: &RemoteParent, ids: &[ServerId])
        -> Result<(), RemoteError>;
}

/// One fully resolved collaborator request.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// `update_form`.
    UpdateForm {
        /// Target form.
        form: FormId,
        /// Metadata patch.
        patch: FormPatch,
    },
    /// `create_section`.
    CreateSection {
        /// Owning form.
        form: FormId,
        /// Content.
        draft: SectionDraft,
        /// Requested position.
        order: u32,
    },
    /// `update_section`.
    UpdateSection {
        /// Target.
        id: ServerId,
        /// Patch.
        patch: SectionPatch,
    },
    /// `delete_section`.
    DeleteSection {
        /// Target.
        id: ServerId,
    },
    /// `reorder_sections`.
    ReorderSections {
        /// Owning form.
        form: FormId,
        /// Full permutation.
        ids: Vec<ServerId>,
    },
    /// `create_field`.
    CreateField {
        /// Owner.
        parent: RemoteParent,
        /// Content.
        draft: FieldDraft,
        /// Requested position.
        order: u32,
    },
    /// `update_field`.
    UpdateField {
        /// Target.
        id: ServerId,
        /// Patch.
        patch: FieldPatch,
    },
    /// `delete_field`.
    DeleteField {
        /// Target.
        id: ServerId,
    },
    /// `reorder_fields`.
    ReorderFields {
        /// Owner.
        parent: RemoteParent,
        /// Full permutation.
        ids: Vec<ServerId>,
    },
    /// `create_subform`.
    CreateSubform {
        /// Owner.
        parent: RemoteParent,
        /// Content.
        draft: SubformDraft,
        /// Requested position.
        order: u32,
    },
    /// `update_subform`.
    UpdateSubform {
        /// Target.
        id: ServerId,
        /// Patch.
        patch: SubformPatch,
    },
    /// `delete_subform`.
    DeleteSubform {
        /// Target.
        id: ServerId,
    },
    /// `reorder_subforms`.
    ReorderSubforms {
        /// Owner.
        parent: RemoteParent,
        /// Full permutation.
        ids: Vec<ServerId>,
    },
}

impl RemoteCall {
    /// Collaborator operation name (`create_field`, `reorder_sections`, ...).
    pub const fn label(&self) -> &'static str {
        match self {
            Self::UpdateForm { .. } => "update_form",
            Self::CreateSection { .. } => "create_section",
            Self::UpdateSection { .. } => "update_section",
            Self::DeleteSection { .. } => "delete_section",
            Self::ReorderSections { .. } => "reorder_sections",
            Self::CreateField { .. } => "create_field",
            Self::UpdateField { .. } => "update_field",
            Self::DeleteField { .. } => "delete_field",
            Self::ReorderFields { .. } => "reorder_fields",
            Self::CreateSubform { .. } => "create_subform",
            Self::UpdateSubform { .. } => "update_subform",
            Self::DeleteSubform { .. } => "delete_subform",
            Self::ReorderSubforms { .. } => "reorder_subforms",
        }
    }

    /// Perform the request against `remote`.
    pub async fn send<R: FormRemote>(&self, remote: &R) -> Result<Confirmation, RemoteError> {
        Ok(match self {
            Self::UpdateForm { form, patch } => {
                Confirmation::Form(remote.update_form(form, patch).await?)
            }
            Self::CreateSection { form, draft, order } => {
                Confirmation::Section(remote.create_section(form, draft, *order).await?)
            }
            Self::UpdateSection { id, patch } => {
                Confirmation::Section(remote.update_section(id, patch).await?)
            }
            Self::DeleteSection { id } => {
                remote.delete_section(id).await?;
                Confirmation::Ack
            }
            Self::ReorderSections { form, ids } => {
                remote.reorder_sections(form, ids).await?;
                Confirmation::Ack
            }
            Self::CreateField {
                parent,
                draft,
                order,
            } => Confirmation::Field(remote.create_field(parent, draft, *order).await?),
            Self::UpdateField { id, patch } => {
                Confirmation::Field(remote.update_field(id, patch).await?)
            }
            Self::DeleteField { id } => {
                remote.delete_field(id).await?;
                Confirmation::Ack
            }
            Self::ReorderFields { parent, ids } => {
                remote.reorder_fields(parent, ids).await?;
                Confirmation::Ack
            }
            Self::CreateSubform {
                parent,
                draft,
                order,
            } => Confirmation::Subform(remote.create_subform(parent, draft, *order).await?),
            Self::UpdateSubform { id, patch } => {
                Confirmation::Subform(remote.update_subform(id, patch).await?)
            }
            Self::DeleteSubform { id } => {
                remote.delete_subform(id).await?;
                Confirmation::Ack
            }
            Self::ReorderSubforms { parent, ids } => {
                remote.reorder_subforms(parent, ids).await?;
                Confirmation::Ack
            }
        })
    }
}

/// Successful collaborator answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// Authoritative form metadata.
    Form(FormMeta),
    /// Authoritative section (children may be omitted).
    Section(Section),
    /// Authoritative field.
    Field(Field),
    /// Authoritative subform (children may be omitted).
    Subform(Subform),
    /// Accepted without a payload (deletes, reorders).
    Ack,
}

impl Confirmation {
    /// Id of the authoritative node, if the answer carries one.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Self::Section(s) => Some(&s.id),
            Self::Field(f) => Some(&f.id),
            Self::Subform(s) => Some(&s.id),
            Self::Form(_) | Self::Ack => None,
        }
    }
}
