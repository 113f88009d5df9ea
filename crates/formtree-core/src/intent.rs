// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Caller-facing authoring intents.
//!
//! An [`Intent`] says what the caller wants; the engine turns it into an
//! [`Edit`] (the same request with a temporary id assigned for creates) and
//! records that in the journal. Targets may name temporary ids handed out by
//! earlier creates.

use formtree_model::{
    FieldDraft, FieldPatch, FormPatch, NodeId, NodeKind, ParentRef, SectionDraft, SectionPatch,
    SubformDraft, SubformPatch, TempId,
};
use serde::{Deserialize, Serialize};

use crate::edit::{Edit, NodePatch, Siblings};

/// One mutating request against a form.
///
/// Create positions are clamped to `[0, len]`; `None` appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Intent {
    /// Edit form-level metadata.
    UpdateForm {
        /// Metadata patch.
        patch: FormPatch,
    },
    /// Create a section.
    CreateSection {
        /// Content.
        draft: SectionDraft,
        /// Target position.
        #[serde(default)]
        at: Option<usize>,
    },
    /// Patch a section.
    UpdateSection {
        /// Target.
        id: NodeId,
        /// Patch.
        patch: SectionPatch,
    },
    /// Delete a section with everything below it.
    DeleteSection {
        /// Target.
        id: NodeId,
    },
    /// Apply a full section permutation.
    ReorderSections {
        /// Every section id, in the new order.
        ids: Vec<NodeId>,
    },
    /// Create a field.
    CreateField {
        /// Owner.
        parent: ParentRef,
        /// Content.
        draft: FieldDraft,
        /// Target position.
        #[serde(default)]
        at: Option<usize>,
    },
    /// Patch a field.
    UpdateField {
        /// Target.
        id: NodeId,
        /// Patch.
        patch: FieldPatch,
    },
    /// Delete a field.
    DeleteField {
        /// Target.
        id: NodeId,
    },
    /// Apply a full field permutation under one container.
    ReorderFields {
        /// Owner.
        parent: ParentRef,
        /// Every field id of the owner, in the new order.
        ids: Vec<NodeId>,
    },
    /// Create a subform.
    CreateSubform {
        /// Owner.
        parent: ParentRef,
        /// Content.
        draft: SubformDraft,
        /// Target position.
        #[serde(default)]
        at: Option<usize>,
    },
    /// Patch a subform.
    UpdateSubform {
        /// Target.
        id: NodeId,
        /// Patch.
        patch: SubformPatch,
    },
    /// Delete a subform with everything below it.
    DeleteSubform {
        /// Target.
        id: NodeId,
    },
    /// Apply a full subform permutation under one container.
    ReorderSubforms {
        /// Owner.
        parent: ParentRef,
        /// Every subform id of the owner, in the new order.
        ids: Vec<NodeId>,
    },
}

impl Intent {
    /// `true` for the three create intents (they consume a temporary id).
    pub const fn is_create(&self) -> bool {
        matches!(
            self,
            Self::CreateSection { .. } | Self::CreateField { .. } | Self::CreateSubform { .. }
        )
    }

    /// Concrete edit. `next_temp` is called once, and only for creates.
    pub(crate) fn into_edit(self, next_temp: impl FnOnce() -> TempId) -> Edit {
        let at = |at: Option<usize>| at.unwrap_or(usize::MAX);
        match self {
            Self::UpdateForm { patch } => Edit::UpdateForm(patch),
            Self::CreateSection { draft, at: pos } => Edit::CreateSection {
                id: next_temp().into(),
                draft,
                at: at(pos),
            },
            Self::CreateField { parent, draft, at: pos } => Edit::CreateField {
                id: next_temp().into(),
                parent,
                draft,
                at: at(pos),
            },
            Self::CreateSubform { parent, draft, at: pos } => Edit::CreateSubform {
                id: next_temp().into(),
                parent,
                draft,
                at: at(pos),
            },
            Self::UpdateSection { id, patch } => Edit::Update {
                id,
                patch: NodePatch::Section(patch),
            },
            Self::UpdateField { id, patch } => Edit::Update {
                id,
                patch: NodePatch::Field(patch),
            },
            Self::UpdateSubform { id, patch } => Edit::Update {
                id,
                patch: NodePatch::Subform(patch),
            },
            Self::DeleteSection { id } => Edit::Delete {
                id,
                kind: NodeKind::Section,
            },
            Self::DeleteField { id } => Edit::Delete {
                id,
                kind: NodeKind::Field,
            },
            Self::DeleteSubform { id } => Edit::Delete {
                id,
                kind: NodeKind::Subform,
            },
            Self::ReorderSections { ids } => Edit::Reorder {
                siblings: Siblings::Sections,
                ids,
            },
            Self::ReorderFields { parent, ids } => Edit::Reorder {
                siblings: Siblings::Fields(parent),
                ids,
            },
            Self::ReorderSubforms { parent, ids } => Edit::Reorder {
                siblings: Siblings::Subforms(parent),
                ids,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use formtree_model::FieldKind;

    #[test]
    fn script_json_shape() {
        let raw = r#"[
            {"op": "create_field",
             "parent": {"kind": "subform", "id": "sf-1"},
             "draft": {"kind": "number", "label": "Qty"},
             "at": 1},
            {"op": "reorder_sections", "ids": ["c", "a", "b"]},
            {"op": "delete_subform", "id": "tmp-3"}
        ]"#;
        let script: Vec<Intent> = serde_json::from_str(raw).unwrap();
        assert_eq!(
            script[0],
            Intent::CreateField {
                parent: ParentRef::Subform(NodeId::parse("sf-1").unwrap()),
                draft: FieldDraft::new(FieldKind::Number, "Qty"),
                at: Some(1),
            }
        );
        assert!(script[0].is_create());
        assert!(!script[1].is_create());
        assert_eq!(
            script[2],
            Intent::DeleteSubform {
                id: NodeId::from(TempId::from_raw(3))
            }
        );
    }

    #[test]
    fn missing_position_appends() {
        let intent = Intent::CreateSection {
            draft: SectionDraft::new("Tail"),
            at: None,
        };
        match intent.into_edit(|| TempId::from_raw(1)) {
            Edit::CreateSection { at, id, .. } => {
                assert_eq!(at, usize::MAX);
                assert_eq!(id.to_string(), "tmp-1");
            }
            other => panic!("unexpected edit {other:?}"),
        }
    }
}
