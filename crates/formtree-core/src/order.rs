// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dense sibling ordering.
//!
//! Every sibling collection keeps `order == position` for all members, so the
//! values are always a permutation of `0..n`. All operations re-sequence the
//! whole collection after they splice; only siblings whose order actually
//! changes are copied, so untouched siblings stay shared with older snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use formtree_model::{Field, NodeId, Section, Subform};
use thiserror::Error;

/// A node that lives in an ordered sibling collection.
pub trait Ordered: Clone {
    /// Node id.
    fn id(&self) -> &NodeId;
    /// Current position value.
    fn order(&self) -> u32;
    /// Overwrite the position value.
    fn set_order(&mut self, order: u32);
}

macro_rules! impl_ordered {
    ($($ty:ty),*) => {$(
        impl Ordered for $ty {
            fn id(&self) -> &NodeId {
                &self.id
            }
            fn order(&self) -> u32 {
                self.order
            }
            fn set_order(&mut self, order: u32) {
                self.order = order;
            }
        }
    )*};
}

impl_ordered!(Section, Field, Subform);

/// Why a reorder request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The requested id list is not a permutation of the current siblings.
    #[error("invalid permutation: {0}")]
    InvalidPermutation(PermutationDefect),
}

/// Specific defect in a reorder id list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermutationDefect {
    /// Different number of ids than siblings.
    #[error("expected {expected} ids, got {got}")]
    LengthMismatch {
        /// Current sibling count.
        expected: usize,
        /// Ids supplied.
        got: usize,
    },
    /// An id that is not a current sibling.
    #[error("{0} is not a sibling")]
    Unknown(NodeId),
    /// An id listed twice.
    #[error("{0} listed twice")]
    Duplicate(NodeId),
}

fn position(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

/// Assign `order = position` to every sibling, copying only those that change.
pub fn resequence<T: Ordered>(siblings: &mut [Arc<T>]) {
    for (index, node) in siblings.iter_mut().enumerate() {
        let pos = position(index);
        if node.order() != pos {
            Arc::make_mut(node).set_order(pos);
        }
    }
}

/// Insert `node` at `index` (clamped to `0..=len`); returns the effective index.
pub fn insert_at<T: Ordered>(siblings: &mut Vec<Arc<T>>, node: Arc<T>, index: usize) -> usize {
    let index = index.min(siblings.len());
    siblings.insert(index, node);
    resequence(siblings);
    index
}

/// Remove the sibling at `index` and close the gap. `None` when out of range.
pub fn remove_at<T: Ordered>(siblings: &mut Vec<Arc<T>>, index: usize) -> Option<Arc<T>> {
    if index >= siblings.len() {
        return None;
    }
    let removed = siblings.remove(index);
    resequence(siblings);
    Some(removed)
}

/// Check that `ids` is exactly a permutation of the sibling ids.
pub fn check_permutation<T: Ordered>(
    siblings: &[Arc<T>],
    ids: &[NodeId],
) -> Result<(), OrderError> {
    if ids.len() != siblings.len() {
        return Err(OrderError::InvalidPermutation(
            PermutationDefect::LengthMismatch {
                expected: siblings.len(),
                got: ids.len(),
            },
        ));
    }
    let current: HashSet<&NodeId> = siblings.iter().map(|s| s.id()).collect();
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !current.contains(id) {
            return Err(OrderError::InvalidPermutation(PermutationDefect::Unknown(
                id.clone(),
            )));
        }
        if !seen.insert(id) {
            return Err(OrderError::InvalidPermutation(PermutationDefect::Duplicate(
                id.clone(),
            )));
        }
    }
    Ok(())
}

/// Rebuild the collection in the order given by `ids` and re-sequence.
///
/// Rejected without touching `siblings` unless `ids` is a full permutation.
pub fn reorder<T: Ordered>(siblings: &mut Vec<Arc<T>>, ids: &[NodeId]) -> Result<(), OrderError> {
    check_permutation(siblings, ids)?;
    if siblings.len() < 2 {
        resequence(siblings);
        return Ok(());
    }
    let mut pool: HashMap<NodeId, Arc<T>> = siblings
        .drain(..)
        .map(|node| (node.id().clone(), node))
        .collect();
    siblings.extend(ids.iter().filter_map(|id| pool.remove(id)));
    resequence(siblings);
    Ok(())
}

/// `true` when orders are exactly `0..n` in storage order.
pub fn is_dense<T: Ordered>(siblings: &[Arc<T>]) -> bool {
    siblings
        .iter()
        .enumerate()
        .all(|(index, node)| node.order() == position(index))
}
