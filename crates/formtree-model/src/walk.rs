// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic traversal and structural invariant checks.
//!
//! Visit order is depth-first pre-order: a section, its fields, then each of
//! its subforms fully (fields, then child subforms) before the next sibling.
//! Walks use an explicit stack so pathological nesting depth cannot overflow
//! the call stack.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::ident::NodeId;
use crate::node::{Container, Form, NodeRef, ParentRef};

/// One visited node.
#[derive(Debug, Clone, Copy)]
pub struct Visit<'a> {
    /// The node.
    pub node: NodeRef<'a>,
    /// 0 for sections, +1 per containment level.
    pub depth: usize,
}

/// Pre-order iterator over every node of a form.
pub struct Walk<'a> {
    stack: Vec<Visit<'a>>,
}

impl<'a> Walk<'a> {
    fn push_children(&mut self, container: &'a dyn Container, depth: usize) {
        // Reverse push so fields pop before subforms and lower orders first.
        for subform in container.subforms().iter().rev() {
            self.stack.push(Visit {
                node: NodeRef::Subform(subform),
                depth,
            });
        }
        for field in container.fields().iter().rev() {
            self.stack.push(Visit {
                node: NodeRef::Field(field),
                depth,
            });
        }
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = Visit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let visit = self.stack.pop()?;
        if let Some(container) = visit.node.as_container() {
            self.push_children(container, visit.depth + 1);
        }
        Some(visit)
    }
}

impl Form {
    /// Walk every section, field, and subform in deterministic pre-order.
    pub fn walk(&self) -> Walk<'_> {
        let stack = self
            .sections
            .iter()
            .rev()
            .map(|section| Visit {
                node: NodeRef::Section(section),
                depth: 0,
            })
            .collect();
        Walk { stack }
    }

    /// Number of nodes below the form root.
    pub fn node_count(&self) -> usize {
        self.walk().count()
    }

    /// `true` if any node carries `id`.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.walk().any(|v| v.node.id() == id)
    }

    /// Every node id in walk order.
    pub fn ids(&self) -> Vec<NodeId> {
        self.walk().map(|v| v.node.id().clone()).collect()
    }

    /// Collect every violated structural invariant. Empty means healthy.
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();

        check_dense(&self.sections, "form.sections", |s| s.order, &mut out);
        for section in &self.sections {
            if section.form_id != self.id {
                out.push(InvariantViolation::ParentMismatch {
                    id: section.id.clone(),
                    expected: self.id.to_string(),
                    found: section.form_id.to_string(),
                });
            }
        }

        for visit in self.walk() {
            let id = visit.node.id();
            if !seen.insert(id.clone()) {
                out.push(InvariantViolation::DuplicateId(id.clone()));
            }
            let Some(container) = visit.node.as_container() else {
                continue;
            };
            let expected = container.as_parent();
            check_dense(container.fields(), "fields", |f| f.order, &mut out);
            check_dense(container.subforms(), "subforms", |s| s.order, &mut out);
            for field in container.fields() {
                check_parent(&field.id, &field.parent, &expected, &mut out);
            }
            for subform in container.subforms() {
                check_parent(&subform.id, &subform.parent, &expected, &mut out);
            }
        }
        out
    }
}

fn check_dense<T>(
    siblings: &[Arc<T>],
    collection: &'static str,
    order: impl Fn(&T) -> u32,
    out: &mut Vec<InvariantViolation>,
) {
    let found: Vec<u32> = siblings.iter().map(|s| order(&**s)).collect();
    let dense = found
        .iter()
        .enumerate()
        .all(|(i, o)| u32::try_from(i).is_ok_and(|i| i == *o));
    if !dense {
        out.push(InvariantViolation::OrderGap { collection, found });
    }
}

fn check_parent(
    id: &NodeId,
    parent: &ParentRef,
    expected: &ParentRef,
    out: &mut Vec<InvariantViolation>,
) {
    if parent != expected {
        out.push(InvariantViolation::ParentMismatch {
            id: id.clone(),
            expected: expected.to_string(),
            found: parent.to_string(),
        });
    }
}

/// A broken structural invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// Sibling `order` values are not exactly `0..n`.
    #[error("{collection} orders are not dense: {found:?}")]
    OrderGap {
        /// Collection label.
        collection: &'static str,
        /// Observed order values in storage order.
        found: Vec<u32>,
    },
    /// A node id occurs more than once in the tree.
    #[error("node {0} appears more than once")]
    DuplicateId(NodeId),
    /// A node's parent reference disagrees with the collection holding it.
    #[error("node {id} is stored under {expected} but points at {found}")]
    ParentMismatch {
        /// Offending node.
        id: NodeId,
        /// Container that holds it.
        expected: String,
        /// Parent it claims.
        found: String,
    },
}

/// Ids of `node` and every node below it, pre-order.
pub fn subtree_ids(node: NodeRef<'_>) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(next) = stack.pop() {
        out.push(next.id().clone());
        if let Some(container) = next.as_container() {
            stack.extend(container.subforms().iter().rev().map(|s| NodeRef::Subform(s)));
            stack.extend(container.fields().iter().rev().map(|f| NodeRef::Field(f)));
        }
    }
    out
}
