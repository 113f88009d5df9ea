// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Concrete tree edits and authoritative reconciliation.
//!
//! [`Edit::apply`] is the speculative half of every mutation. It resolves and
//! validates against the incoming snapshot first and only then copies the path
//! to the mutation site, so a rejected edit leaves the snapshot pointer
//! untouched.
//!
//! [`reconcile`] is the authoritative half: it folds a collaborator answer into
//! whatever snapshot is current, in place, without moving the node.

use std::sync::Arc;

use formtree_model::{
    subtree_ids, Container, FieldDraft, FieldPatch, Form, FormId, FormPatch, NodeId, NodeKind,
    ParentRef, SectionDraft, SectionPatch, ServerId, SubformDraft, SubformPatch, TempId,
};

use crate::error::IntentError;
use crate::order::{check_permutation, insert_at, remove_at, reorder, Ordered};
use crate::remote::{Confirmation, RemoteCall, RemoteParent};
use crate::resolve::{
    container, container_mut, locate, locate_container, node_mut, Collection, NodeMut, Owner,
    ResolveError,
};

/// Patch addressed at one node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodePatch {
    /// Section patch.
    Section(SectionPatch),
    /// Field patch.
    Field(FieldPatch),
    /// Subform patch.
    Subform(SubformPatch),
}

impl NodePatch {
    /// Kind of node the patch applies to.
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Section(_) => NodeKind::Section,
            Self::Field(_) => NodeKind::Field,
            Self::Subform(_) => NodeKind::Subform,
        }
    }

    /// `true` when nothing would change.
    pub const fn is_empty(&self) -> bool {
        match self {
            Self::Section(p) => p.is_empty(),
            Self::Field(p) => p.is_empty(),
            Self::Subform(p) => p.is_empty(),
        }
    }
}

/// Sibling collection targeted by a reorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Siblings {
    /// The form's sections.
    Sections,
    /// Fields of a container.
    Fields(ParentRef),
    /// Subforms of a container.
    Subforms(ParentRef),
}

/// A journaled mutation with every id fixed.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    /// Form-level metadata.
    UpdateForm(FormPatch),
    /// New section under the form.
    CreateSection {
        /// Temp id until confirmed, then the server id.
        id: NodeId,
        /// Content.
        draft: SectionDraft,
        /// Position (clamped on apply).
        at: usize,
    },
    /// New field under a container.
    CreateField {
        /// Temp id until confirmed, then the server id.
        id: NodeId,
        /// Owner.
        parent: ParentRef,
        /// Content.
        draft: FieldDraft,
        /// Position (clamped on apply).
        at: usize,
    },
    /// New subform under a container.
    CreateSubform {
        /// Temp id until confirmed, then the server id.
        id: NodeId,
        /// Owner.
        parent: ParentRef,
        /// Content.
        draft: SubformDraft,
        /// Position (clamped on apply).
        at: usize,
    },
    /// Scalar patch on one node.
    Update {
        /// Target.
        id: NodeId,
        /// Patch.
        patch: NodePatch,
    },
    /// Remove a node and its subtree.
    Delete {
        /// Target.
        id: NodeId,
        /// Expected kind of the target.
        kind: NodeKind,
    },
    /// Full permutation of one sibling collection.
    Reorder {
        /// Which collection.
        siblings: Siblings,
        /// New order.
        ids: Vec<NodeId>,
    },
}

/// What a successful apply did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// Effective index of an inserted node.
    pub index: Option<usize>,
    /// Ids removed by a delete, pre-order, target first.
    pub removed: Vec<NodeId>,
}

impl Edit {
    /// Short operation name for logs.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::UpdateForm(_) => "update_form",
            Self::CreateSection { .. } => "create_section",
            Self::CreateField { .. } => "create_field",
            Self::CreateSubform { .. } => "create_subform",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Reorder { .. } => "reorder",
        }
    }

    /// Temp id this edit introduces into the tree, if it is an unconfirmed create.
    pub const fn created(&self) -> Option<TempId> {
        match self {
            Self::CreateSection { id, .. }
            | Self::CreateField { id, .. }
            | Self::CreateSubform { id, .. } => id.as_temp(),
            _ => None,
        }
    }

    /// The single node this edit is about (creates, updates, deletes).
    pub const fn subject(&self) -> Option<&NodeId> {
        match self {
            Self::CreateSection { id, .. }
            | Self::CreateField { id, .. }
            | Self::CreateSubform { id, .. }
            | Self::Update { id, .. }
            | Self::Delete { id, .. } => Some(id),
            Self::UpdateForm(_) | Self::Reorder { .. } => None,
        }
    }

    /// Temp ids this edit depends on (excluding the one it creates).
    pub fn temp_refs(&self) -> Vec<TempId> {
        let ids: Vec<&NodeId> = match self {
            Self::UpdateForm(_) | Self::CreateSection { .. } => Vec::new(),
            Self::CreateField { parent, .. } | Self::CreateSubform { parent, .. } => {
                vec![parent.id()]
            }
            Self::Update { id, .. } | Self::Delete { id, .. } => vec![id],
            Self::Reorder { siblings, ids } => {
                let mut all: Vec<&NodeId> = ids.iter().collect();
                if let Siblings::Fields(parent) | Siblings::Subforms(parent) = siblings {
                    all.push(parent.id());
                }
                all
            }
        };
        ids.into_iter().filter_map(NodeId::as_temp).collect()
    }

    /// Replace every occurrence of `from` with `to`.
    pub fn rewrite(&mut self, from: &NodeId, to: &NodeId) {
        let swap = |id: &mut NodeId| {
            if *id == *from {
                id.clone_from(to);
            }
        };
        let swap_parent = |parent: &mut ParentRef| {
            if parent.id() == from {
                *parent = parent.with_id(to.clone());
            }
        };
        match self {
            Self::UpdateForm(_) => {}
            Self::CreateSection { id, .. } | Self::Update { id, .. } | Self::Delete { id, .. } => {
                swap(id);
            }
            Self::CreateField { id, parent, .. } | Self::CreateSubform { id, parent, .. } => {
                swap(id);
                swap_parent(parent);
            }
            Self::Reorder { siblings, ids } => {
                ids.iter_mut().for_each(swap);
                if let Siblings::Fields(parent) | Siblings::Subforms(parent) = siblings {
                    swap_parent(parent);
                }
            }
        }
    }

    /// Pin a create to the index it actually landed on.
    pub(crate) fn settle_position(&mut self, index: usize) {
        if let Self::CreateSection { at, .. }
        | Self::CreateField { at, .. }
        | Self::CreateSubform { at, .. } = self
        {
            *at = index;
        }
    }

    /// Apply speculatively. On `Err` the snapshot pointer is unchanged.
    pub fn apply(&self, form: &mut Arc<Form>) -> Result<Applied, IntentError> {
        match self {
            Self::UpdateForm(patch) => {
                if !patch.is_empty() {
                    patch.apply(Arc::make_mut(form));
                }
                Ok(Applied::default())
            }
            Self::CreateSection { id, draft, at } => {
                ensure_absent(form, id)?;
                let section = draft.to_section(id.clone(), form.id.clone(), 0);
                let index = insert_at(&mut Arc::make_mut(form).sections, Arc::new(section), *at);
                Ok(Applied {
                    index: Some(index),
                    removed: Vec::new(),
                })
            }
            Self::CreateField {
                id,
                parent,
                draft,
                at,
            } => {
                ensure_absent(form, id)?;
                let field = Arc::new(draft.to_field(id.clone(), parent.clone(), 0));
                let index =
                    with_container(form, parent, |c| insert_at(c.fields_mut(), field, *at))?;
                Ok(Applied {
                    index: Some(index),
                    removed: Vec::new(),
                })
            }
            Self::CreateSubform {
                id,
                parent,
                draft,
                at,
            } => {
                ensure_absent(form, id)?;
                let subform = Arc::new(draft.to_subform(id.clone(), parent.clone(), 0));
                let index =
                    with_container(form, parent, |c| insert_at(c.subforms_mut(), subform, *at))?;
                Ok(Applied {
                    index: Some(index),
                    removed: Vec::new(),
                })
            }
            Self::Update { id, patch } => {
                let location = locate(form, id)?.expect_kind(patch.kind())?.location;
                if patch.is_empty() {
                    return Ok(Applied::default());
                }
                match (node_mut(Arc::make_mut(form), &location), patch) {
                    (Some(NodeMut::Section(node)), NodePatch::Section(p)) => p.apply(node),
                    (Some(NodeMut::Field(node)), NodePatch::Field(p)) => p.apply(node),
                    (Some(NodeMut::Subform(node)), NodePatch::Subform(p)) => p.apply(node),
                    _ => return Err(ResolveError::NotFound(id.clone()).into()),
                }
                Ok(Applied::default())
            }
            Self::Delete { id, kind } => {
                let located = locate(form, id)?.expect_kind(*kind)?;
                let removed = subtree_ids(located.node);
                let location = located.location;
                let tree = Arc::make_mut(form);
                let gone = match (&location.owner, location.collection) {
                    (Owner::Form, Collection::Sections) => {
                        remove_at(&mut tree.sections, location.index).is_some()
                    }
                    (Owner::Container(path), Collection::Fields) => container_mut(tree, path)
                        .and_then(|c| remove_at(c.fields_mut(), location.index))
                        .is_some(),
                    (Owner::Container(path), Collection::Subforms) => container_mut(tree, path)
                        .and_then(|c| remove_at(c.subforms_mut(), location.index))
                        .is_some(),
                    _ => false,
                };
                if gone {
                    Ok(Applied {
                        index: None,
                        removed,
                    })
                } else {
                    Err(ResolveError::NotFound(id.clone()).into())
                }
            }
            Self::Reorder { siblings, ids } => {
                match siblings {
                    Siblings::Sections => {
                        check_permutation(&form.sections, ids)?;
                        if !already_ordered(&form.sections, ids) {
                            reorder(&mut Arc::make_mut(form).sections, ids)?;
                        }
                    }
                    Siblings::Fields(parent) => {
                        let current = read_container(form, parent)?;
                        check_permutation(current.fields(), ids)?;
                        if !already_ordered(current.fields(), ids) {
                            with_container(form, parent, |c| reorder(c.fields_mut(), ids))??;
                        }
                    }
                    Siblings::Subforms(parent) => {
                        let current = read_container(form, parent)?;
                        check_permutation(current.subforms(), ids)?;
                        if !already_ordered(current.subforms(), ids) {
                            with_container(form, parent, |c| reorder(c.subforms_mut(), ids))??;
                        }
                    }
                }
                Ok(Applied::default())
            }
        }
    }

    /// Build the collaborator request; `Err` names a temp id that is still unresolved.
    pub fn to_call(&self, form: &FormId) -> Result<RemoteCall, TempId> {
        Ok(match self {
            Self::UpdateForm(patch) => RemoteCall::UpdateForm {
                form: form.clone(),
                patch: patch.clone(),
            },
            Self::CreateSection { draft, at, .. } => RemoteCall::CreateSection {
                form: form.clone(),
                draft: draft.clone(),
                order: position(*at),
            },
            Self::CreateField {
                parent, draft, at, ..
            } => RemoteCall::CreateField {
                parent: remote_parent(parent)?,
                draft: draft.clone(),
                order: position(*at),
            },
            Self::CreateSubform {
                parent, draft, at, ..
            } => RemoteCall::CreateSubform {
                parent: remote_parent(parent)?,
                draft: draft.clone(),
                order: position(*at),
            },
            Self::Update { id, patch } => {
                let id = server(id)?;
                match patch {
                    NodePatch::Section(patch) => RemoteCall::UpdateSection {
                        id,
                        patch: patch.clone(),
                    },
                    NodePatch::Field(patch) => RemoteCall::UpdateField {
                        id,
                        patch: patch.clone(),
                    },
                    NodePatch::Subform(patch) => RemoteCall::UpdateSubform {
                        id,
                        patch: patch.clone(),
                    },
                }
            }
            Self::Delete { id, kind } => {
                let id = server(id)?;
                match kind {
                    NodeKind::Section => RemoteCall::DeleteSection { id },
                    NodeKind::Field => RemoteCall::DeleteField { id },
                    NodeKind::Subform => RemoteCall::DeleteSubform { id },
                }
            }
            Self::Reorder { siblings, ids } => {
                let ids = ids.iter().map(server).collect::<Result<Vec<_>, _>>()?;
                match siblings {
                    Siblings::Sections => RemoteCall::ReorderSections {
                        form: form.clone(),
                        ids,
                    },
                    Siblings::Fields(parent) => RemoteCall::ReorderFields {
                        parent: remote_parent(parent)?,
                        ids,
                    },
                    Siblings::Subforms(parent) => RemoteCall::ReorderSubforms {
                        parent: remote_parent(parent)?,
                        ids,
                    },
                }
            }
        })
    }
}

fn position(at: usize) -> u32 {
    u32::try_from(at).unwrap_or(u32::MAX)
}

fn server(id: &NodeId) -> Result<ServerId, TempId> {
    match id {
        NodeId::Server(id) => Ok(id.clone()),
        NodeId::Temp(temp) => Err(*temp),
    }
}

fn remote_parent(parent: &ParentRef) -> Result<RemoteParent, TempId> {
    let id = server(parent.id())?;
    Ok(match parent {
        ParentRef::Section(_) => RemoteParent::Section(id),
        ParentRef::Subform(_) => RemoteParent::Subform(id),
    })
}

fn ensure_absent(form: &Form, id: &NodeId) -> Result<(), IntentError> {
    match locate(form, id) {
        Ok(_) => Err(IntentError::Duplicate(id.clone())),
        Err(ResolveError::NotFound(_)) => Ok(()),
    }
}

fn read_container<'a>(
    form: &'a Form,
    parent: &ParentRef,
) -> Result<&'a dyn Container, IntentError> {
    let path = locate_container(form, parent)?;
    container(form, &path).ok_or_else(|| ResolveError::NotFound(parent.id().clone()).into())
}

/// Resolve `parent`, then run `f` on a path-copied mutable handle.
fn with_container<R>(
    form: &mut Arc<Form>,
    parent: &ParentRef,
    f: impl FnOnce(&mut dyn Container) -> R,
) -> Result<R, IntentError> {
    let path = locate_container(form, parent)?;
    let target = container_mut(Arc::make_mut(form), &path)
        .ok_or_else(|| ResolveError::NotFound(parent.id().clone()))?;
    Ok(f(target))
}

fn already_ordered<T: Ordered>(siblings: &[Arc<T>], ids: &[NodeId]) -> bool {
    siblings.iter().zip(ids).all(|(node, id)| node.id() == id)
}

/// Fold an authoritative answer into `form`.
///
/// `target` is the id the node currently has in `form` (its temp id for an
/// unconfirmed create). The node keeps its position and children; its id
/// becomes the authoritative one and children's parent references follow. When
/// `scalars` is false only the id changes, so newer local edits to the same
/// node stay visible.
///
/// Returns `false` when the target is gone (benign: deleted locally meanwhile).
pub fn reconcile(
    form: &mut Arc<Form>,
    target: Option<&NodeId>,
    confirmation: &Confirmation,
    scalars: bool,
) -> bool {
    let (kind, new_id) = match confirmation {
        Confirmation::Ack => return true,
        Confirmation::Form(meta) => {
            if scalars && form.meta() != *meta {
                Arc::make_mut(form).apply_meta(meta);
            }
            return true;
        }
        Confirmation::Section(s) => (NodeKind::Section, &s.id),
        Confirmation::Field(f) => (NodeKind::Field, &f.id),
        Confirmation::Subform(s) => (NodeKind::Subform, &s.id),
    };
    let Some(target) = target else {
        return false;
    };
    let Ok(located) = locate(form, target).and_then(|l| l.expect_kind(kind)) else {
        return false;
    };
    let location = located.location;
    let Some(node) = node_mut(Arc::make_mut(form), &location) else {
        return false;
    };
    match (node, confirmation) {
        (NodeMut::Section(node), Confirmation::Section(auth)) => {
            if scalars {
                node.adopt_scalars(auth);
            }
            node.id.clone_from(new_id);
            adopt_children(node);
        }
        (NodeMut::Subform(node), Confirmation::Subform(auth)) => {
            if scalars {
                node.adopt_scalars(auth);
            }
            node.id.clone_from(new_id);
            adopt_children(node);
        }
        (NodeMut::Field(node), Confirmation::Field(auth)) => {
            if scalars {
                node.adopt_scalars(auth);
            }
            node.id.clone_from(new_id);
        }
        _ => return false,
    }
    true
}

// Point direct children at their container's (possibly new) id.
fn adopt_children(container: &mut dyn Container) {
    let parent = container.as_parent();
    for field in container.fields_mut() {
        if field.parent != parent {
            Arc::make_mut(field).parent = parent.clone();
        }
    }
    for subform in container.subforms_mut() {
        if subform.parent != parent {
            Arc::make_mut(subform).parent = parent.clone();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use formtree_model::{Field, FieldKind, Section, Subform};

    fn nid(raw: &str) -> NodeId {
        NodeId::parse(raw).unwrap()
    }

    fn temp(n: u64) -> NodeId {
        NodeId::from(TempId::from_raw(n))
    }

    /// s1 { f1, f2, sf1 { f3 } }
    fn sample() -> Arc<Form> {
        let form_id = ServerId::new("form").unwrap();
        let s1 = ParentRef::Section(nid("s1"));
        let mut sf1 = Subform::new(nid("sf1"), s1.clone(), "Lines");
        sf1.fields.push(Arc::new(Field::new(
            nid("f3"),
            ParentRef::Subform(nid("sf1")),
            FieldKind::Number,
            "Qty",
        )));
        let mut section = Section::new(nid("s1"), form_id.clone(), "Main");
        let mut f2 = Field::new(nid("f2"), s1.clone(), FieldKind::Text, "B");
        f2.order = 1;
        section.fields.push(Arc::new(Field::new(nid("f1"), s1, FieldKind::Text, "A")));
        section.fields.push(Arc::new(f2));
        section.subforms.push(Arc::new(sf1));
        let mut form = Form::new(form_id, "Order");
        form.sections.push(Arc::new(section));
        Arc::new(form)
    }

    #[test]
    fn create_field_lands_at_clamped_index() {
        let mut form = sample();
        let edit = Edit::CreateField {
            id: temp(1),
            parent: ParentRef::Section(nid("s1")),
            draft: FieldDraft::new(FieldKind::Text, "Name"),
            at: 0,
        };
        let applied = edit.apply(&mut form).unwrap();
        assert_eq!(applied.index, Some(0));
        let labels: Vec<&str> = form.sections[0].fields.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, ["Name", "A", "B"]);
        assert!(form.check_invariants().is_empty());
    }

    #[test]
    fn failed_edits_keep_the_pointer() {
        let mut form = sample();
        let before = Arc::clone(&form);

        let missing = Edit::Delete {
            id: nid("nope"),
            kind: NodeKind::Field,
        };
        assert!(missing.apply(&mut form).unwrap_err().is_benign());

        let wrong_kind = Edit::Delete {
            id: nid("sf1"),
            kind: NodeKind::Field,
        };
        assert!(wrong_kind.apply(&mut form).is_err());

        let partial = Edit::Reorder {
            siblings: Siblings::Fields(ParentRef::Section(nid("s1"))),
            ids: vec![nid("f2")],
        };
        assert!(matches!(partial.apply(&mut form), Err(IntentError::Order(_))));
        assert!(Arc::ptr_eq(&before, &form));
    }

    #[test]
    fn delete_reports_whole_subtree() {
        let mut form = sample();
        let applied = Edit::Delete {
            id: nid("sf1"),
            kind: NodeKind::Subform,
        }
        .apply(&mut form)
        .unwrap();
        assert_eq!(applied.removed, vec![nid("sf1"), nid("f3")]);
        assert!(!form.contains(&nid("f3")));
    }

    #[test]
    fn identity_reorder_is_a_noop() {
        let mut form = sample();
        let before = Arc::clone(&form);
        Edit::Reorder {
            siblings: Siblings::Fields(ParentRef::Section(nid("s1"))),
            ids: vec![nid("f1"), nid("f2")],
        }
        .apply(&mut form)
        .unwrap();
        assert!(Arc::ptr_eq(&before, &form));
    }

    #[test]
    fn temp_refs_and_rewrite() {
        let mut edit = Edit::CreateField {
            id: temp(2),
            parent: ParentRef::Subform(temp(1)),
            draft: FieldDraft::new(FieldKind::Date, "When"),
            at: 0,
        };
        assert_eq!(edit.temp_refs(), vec![TempId::from_raw(1)]);
        assert_eq!(edit.created(), Some(TempId::from_raw(2)));
        assert_eq!(edit.to_call(&ServerId::new("form").unwrap()), Err(TempId::from_raw(1)));

        edit.rewrite(&temp(1), &nid("sf-100"));
        assert!(edit.temp_refs().is_empty());
        match edit.to_call(&ServerId::new("form").unwrap()).unwrap() {
            RemoteCall::CreateField { parent, order, .. } => {
                assert_eq!(parent, RemoteParent::Subform(ServerId::new("sf-100").unwrap()));
                assert_eq!(order, 0);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn reconcile_swaps_id_and_reparents_children() {
        let mut form = sample();
        // Pretend sf1 is still temporary.
        Edit::CreateSubform {
            id: temp(5),
            parent: ParentRef::Section(nid("s1")),
            draft: SubformDraft::new("Pending"),
            at: 9,
        }
        .apply(&mut form)
        .unwrap();
        Edit::CreateField {
            id: temp(6),
            parent: ParentRef::Subform(temp(5)),
            draft: FieldDraft::new(FieldKind::Text, "Child"),
            at: 0,
        }
        .apply(&mut form)
        .unwrap();

        let mut authoritative = Subform::new(
            nid("sf-100"),
            ParentRef::Section(nid("s1")),
            "Pending (server)",
        );
        authoritative.order = 1;
        assert!(reconcile(
            &mut form,
            Some(&temp(5)),
            &Confirmation::Subform(authoritative),
            true,
        ));

        let sub = &form.sections[0].subforms[1];
        assert_eq!(sub.id, nid("sf-100"));
        assert_eq!(sub.name, "Pending (server)");
        assert_eq!(sub.fields[0].parent, ParentRef::Subform(nid("sf-100")));
        assert!(form.check_invariants().is_empty());
        assert!(!reconcile(
            &mut form,
            Some(&temp(5)),
            &Confirmation::Subform(Subform::new(nid("x"), ParentRef::Section(nid("s1")), "x")),
            true,
        ));
    }
}
