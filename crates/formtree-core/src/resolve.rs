// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Path resolution inside a form tree.
//!
//! [`locate`] finds a node by id and reports exactly which collection holds it
//! and at which index, so callers can splice without searching again. Search
//! order is depth-first with children before the next sibling; an explicit
//! stack keeps deep nesting off the call stack.
//!
//! Mutable access ([`container_mut`], [`node_mut`]) is copy-on-write: every
//! `Arc` on the path from the form root to the target is `make_mut`-ed, all
//! other subtrees stay shared with the previous snapshot.

use std::sync::Arc;

use formtree_model::{
    Container, Field, Form, NodeId, NodeKind, NodeRef, ParentRef, Section, Subform,
};
use thiserror::Error;

/// Resolution failure. Benign: callers holding a stale id treat it as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No node with this id (and of the requested kind) exists in the snapshot.
    #[error("node not found: {0}")]
    NotFound(NodeId),
}

/// Index path from the form root down to a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerPath {
    /// Index into `form.sections`.
    pub section: usize,
    /// Successive indices into `subforms` collections below that section.
    pub subforms: Vec<usize>,
}

impl ContainerPath {
    /// Nesting depth below the section (0 for the section itself).
    pub fn depth(&self) -> usize {
        self.subforms.len()
    }
}

/// Owner of a sibling collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    /// The form root (owns sections).
    Form,
    /// A section or subform.
    Container(ContainerPath),
}

/// Which sibling collection of the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// `form.sections`.
    Sections,
    /// A container's `fields`.
    Fields,
    /// A container's `subforms`.
    Subforms,
}

/// Exact slot a node occupies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    /// Owner of the sibling collection.
    pub owner: Owner,
    /// Collection within the owner.
    pub collection: Collection,
    /// Index within the collection.
    pub index: usize,
}

impl Location {
    /// Path to this node when it is itself a container.
    pub fn child_path(&self) -> Option<ContainerPath> {
        match (&self.owner, self.collection) {
            (Owner::Form, Collection::Sections) => Some(ContainerPath {
                section: self.index,
                subforms: Vec::new(),
            }),
            (Owner::Container(path), Collection::Subforms) => {
                let mut child = path.clone();
                child.subforms.push(self.index);
                Some(child)
            }
            _ => None,
        }
    }
}

/// A resolved node plus its slot.
#[derive(Debug, Clone)]
pub struct Located<'a> {
    /// The node.
    pub node: NodeRef<'a>,
    /// Where it lives.
    pub location: Location,
    /// Length of the sibling collection holding it.
    pub sibling_count: usize,
}

impl Located<'_> {
    /// A node of another kind under the requested id counts as not found.
    pub fn expect_kind(self, expected: NodeKind) -> Result<Self, ResolveError> {
        if self.node.kind() == expected {
            Ok(self)
        } else {
            Err(ResolveError::NotFound(self.node.id().clone()))
        }
    }
}

/// Find `id` anywhere in `form`.
pub fn locate<'a>(form: &'a Form, id: &NodeId) -> Result<Located<'a>, ResolveError> {
    let mut stack: Vec<Located<'a>> = form
        .sections
        .iter()
        .enumerate()
        .rev()
        .map(|(index, section)| Located {
            node: NodeRef::Section(section),
            location: Location {
                owner: Owner::Form,
                collection: Collection::Sections,
                index,
            },
            sibling_count: form.sections.len(),
        })
        .collect();

    while let Some(entry) = stack.pop() {
        if entry.node.id() == id {
            return Ok(entry);
        }
        let (Some(container), Some(path)) = (entry.node.as_container(), entry.location.child_path())
        else {
            continue;
        };
        push_children(&mut stack, container, &path);
    }
    Err(ResolveError::NotFound(id.clone()))
}

fn push_children<'a>(
    stack: &mut Vec<Located<'a>>,
    container: &'a dyn Container,
    path: &ContainerPath,
) {
    let subforms = container.subforms();
    for (index, subform) in subforms.iter().enumerate().rev() {
        stack.push(Located {
            node: NodeRef::Subform(subform),
            location: Location {
                owner: Owner::Container(path.clone()),
                collection: Collection::Subforms,
                index,
            },
            sibling_count: subforms.len(),
        });
    }
    let fields = container.fields();
    for (index, field) in fields.iter().enumerate().rev() {
        stack.push(Located {
            node: NodeRef::Field(field),
            location: Location {
                owner: Owner::Container(path.clone()),
                collection: Collection::Fields,
                index,
            },
            sibling_count: fields.len(),
        });
    }
}

/// Resolve the container a parent reference names, checking its kind.
pub fn locate_container(form: &Form, parent: &ParentRef) -> Result<ContainerPath, ResolveError> {
    let located = locate(form, parent.id())?.expect_kind(parent.kind())?;
    located
        .location
        .child_path()
        .ok_or_else(|| ResolveError::NotFound(parent.id().clone()))
}

/// Borrow the container at `path`.
pub fn container<'a>(form: &'a Form, path: &ContainerPath) -> Option<&'a dyn Container> {
    let section: &'a Section = form.sections.get(path.section)?;
    let mut current: &'a dyn Container = section;
    for &index in &path.subforms {
        let next: &'a Subform = current.subforms().get(index)?;
        current = next;
    }
    Some(current)
}

/// Borrow a container at `path` mutably, copying every node on the way down.
///
/// `None` if the path does not fit the tree (paths must come from a fresh
/// resolution against the same snapshot).
pub fn container_mut<'a>(
    form: &'a mut Form,
    path: &ContainerPath,
) -> Option<&'a mut dyn Container> {
    let section: &'a mut Section = Arc::make_mut(form.sections.get_mut(path.section)?);
    let mut current: &'a mut dyn Container = section;
    for &index in &path.subforms {
        let parent = current;
        let next: &'a mut Arc<Subform> = parent.subforms_mut().get_mut(index)?;
        let sub: &'a mut Subform = Arc::make_mut(next);
        current = sub;
    }
    Some(current)
}

/// Mutable view of a single node.
#[derive(Debug)]
pub enum NodeMut<'a> {
    /// A section.
    Section(&'a mut Section),
    /// A field.
    Field(&'a mut Field),
    /// A subform.
    Subform(&'a mut Subform),
}

impl NodeMut<'_> {
    /// Discriminator.
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Section(_) => NodeKind::Section,
            Self::Field(_) => NodeKind::Field,
            Self::Subform(_) => NodeKind::Subform,
        }
    }
}

/// Borrow the node at `location` mutably (copy-on-write along the path).
pub fn node_mut<'a>(form: &'a mut Form, location: &Location) -> Option<NodeMut<'a>> {
    match (&location.owner, location.collection) {
        (Owner::Form, Collection::Sections) => form
            .sections
            .get_mut(location.index)
            .map(|s| NodeMut::Section(Arc::make_mut(s))),
        (Owner::Container(path), Collection::Fields) => container_mut(form, path)?
            .fields_mut()
            .get_mut(location.index)
            .map(|f| NodeMut::Field(Arc::make_mut(f))),
        (Owner::Container(path), Collection::Subforms) => container_mut(form, path)?
            .subforms_mut()
            .get_mut(location.index)
            .map(|s| NodeMut::Subform(Arc::make_mut(s))),
        _ => None,
    }
}
