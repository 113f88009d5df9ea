// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-form log of unsettled operations.
//!
//! The journal holds every operation issued since the oldest one that is still
//! unsettled, in issuance order. Each entry keeps the snapshot it was applied
//! on, so a failure can be undone precisely:
//!
//! 1. restore the failed entry's `before` snapshot;
//! 2. replay every later entry on top of it, confirmed ones with their
//!    authoritative values and pending ones speculatively;
//! 3. cancel later entries that depend on a temp id the failure removed, and
//!    keep cascading through whatever those cancelled entries created.
//!
//! With nothing applied after the failed entry this degenerates to restoring
//! the exact prior `Arc<Form>`.

use std::collections::HashSet;
use std::sync::Arc;

use formtree_app_core::settings::DispatchPolicy;
use formtree_model::{Form, NodeId, ServerId, TempId};
use tracing::warn;

use crate::edit::{reconcile, Edit};
use crate::remote::Confirmation;

/// Engine-issued operation identifier.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(u64);

impl OpId {
    /// Construct from a raw counter value.
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Underlying counter value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Lifecycle of a journaled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpStatus {
    /// Applied locally, not yet sent.
    Pending,
    /// Sent, awaiting the collaborator.
    InFlight,
    /// Confirmed; kept only until every earlier entry settles.
    Confirmed,
}

impl OpStatus {
    /// `true` until the collaborator has answered successfully.
    pub const fn is_unsettled(self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }
}

/// Why an operation cannot be dispatched yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blocker {
    /// It references a node whose create is not confirmed.
    Temp(TempId),
    /// An earlier operation on the same form is still unsettled.
    Earlier(OpId),
}

/// An operation dropped because something it depended on was rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cancellation {
    pub op: OpId,
    pub parent: TempId,
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub op: OpId,
    pub edit: Edit,
    pub before: Arc<Form>,
    pub status: OpStatus,
    pub confirmation: Option<Confirmation>,
}

impl Entry {
    fn replay(&self, state: &mut Arc<Form>) {
        if let Err(err) = self.edit.apply(state) {
            warn!(op = %self.op, edit = self.edit.label(), error = %err, "replay skipped");
            return;
        }
        if let Some(confirmation) = &self.confirmation {
            reconcile(state, self.edit.subject(), confirmation, true);
        }
    }
}

/// Result of confirming one entry.
#[derive(Debug, Clone, Default)]
pub(crate) struct Confirmed {
    pub alias: Option<(TempId, ServerId)>,
    pub found: bool,
}

/// Result of rolling back one entry.
#[derive(Debug)]
pub(crate) struct RolledBack {
    pub replayed: usize,
    pub cancelled: Vec<Cancellation>,
}

#[derive(Debug, Default)]
pub(crate) struct Journal {
    entries: Vec<Entry>,
}

impl Journal {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn position(&self, op: OpId) -> Option<usize> {
        self.entries.iter().position(|e| e.op == op)
    }

    pub fn get(&self, op: OpId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.op == op)
    }

    pub fn get_mut(&mut self, op: OpId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.op == op)
    }

    /// First reason `op` must wait, if any.
    pub fn blocker(&self, op: OpId, policy: DispatchPolicy) -> Option<Blocker> {
        let index = self.position(op)?;
        if policy == DispatchPolicy::SerializePerForm {
            if let Some(earlier) = self.entries[..index].iter().find(|e| e.status.is_unsettled()) {
                return Some(Blocker::Earlier(earlier.op));
            }
        }
        self.entries[index].edit.temp_refs().first().copied().map(Blocker::Temp)
    }

    /// Fold the answer for entry `index` into `current` and into every later
    /// entry, then mark it confirmed.
    ///
    /// A create whose authoritative node is already in the entry's `before`
    /// (a refresh landed while the request was in flight) is not renamed in
    /// place: the temp node is dropped by rebuilding from that snapshot, and
    /// later entries replay against the real node.
    pub fn confirm(
        &mut self,
        index: usize,
        confirmation: Confirmation,
        current: &mut Arc<Form>,
    ) -> Confirmed {
        let target = self.entries[index].edit.subject().cloned();
        let created = self.entries[index].edit.created();
        let real = confirmation.node_id().cloned();
        let shadows = |later: &Entry| {
            later.status.is_unsettled()
                && match &confirmation {
                    Confirmation::Form(_) => matches!(later.edit, Edit::UpdateForm(_)),
                    _ => target.is_some() && later.edit.subject() == target.as_ref(),
                }
        };
        // A newer unsettled edit of the same node keeps its local scalars.
        let shadowed = self.entries[index + 1..].iter().any(shadows);
        let already_there = created.is_some()
            && real
                .as_ref()
                .is_some_and(|id| self.entries[index].before.contains(id));

        let mut out = Confirmed {
            alias: None,
            found: true,
        };
        if let (Some(temp), Some(NodeId::Server(server))) = (created, &real) {
            let from = NodeId::Temp(temp);
            let to = NodeId::Server(server.clone());
            for later in &mut self.entries[index..] {
                later.edit.rewrite(&from, &to);
            }
            out.alias = Some((temp, server.clone()));
        }

        if already_there {
            let mut state = Arc::clone(&self.entries[index].before);
            reconcile(&mut state, real.as_ref(), &confirmation, true);
            for later in &mut self.entries[index + 1..] {
                later.before = Arc::clone(&state);
                later.replay(&mut state);
            }
            *current = state;
        } else {
            out.found = reconcile(current, target.as_ref(), &confirmation, !shadowed);
            // Pre-images up to the first shadowing edit see the authoritative
            // scalars; past it they keep that edit's local values.
            let mut scalars = true;
            let mut pending = Vec::with_capacity(self.entries.len() - index - 1);
            for later in &self.entries[index + 1..] {
                pending.push(scalars);
                if shadows(later) {
                    scalars = false;
                }
            }
            for (later, scalars) in self.entries[index + 1..].iter_mut().zip(pending) {
                reconcile(&mut later.before, target.as_ref(), &confirmation, scalars);
            }
        }

        let entry = &mut self.entries[index];
        entry.status = OpStatus::Confirmed;
        entry.confirmation = Some(confirmation);
        self.prune();
        out
    }

    /// Remove entry `index` and rebuild `current` without its effect.
    pub fn rollback(&mut self, index: usize, current: &mut Arc<Form>) -> (Entry, RolledBack) {
        let failed = self.entries.remove(index);
        let mut dead: HashSet<TempId> = failed.edit.created().into_iter().collect();
        let mut state = Arc::clone(&failed.before);
        let mut report = RolledBack {
            replayed: 0,
            cancelled: Vec::new(),
        };

        let later: Vec<Entry> = self.entries.drain(index..).collect();
        for mut entry in later {
            let orphaned = entry.edit.temp_refs().into_iter().find(|t| dead.contains(t));
            if let Some(parent) = orphaned {
                dead.extend(entry.edit.created());
                report.cancelled.push(Cancellation {
                    op: entry.op,
                    parent,
                });
                continue;
            }
            entry.before = Arc::clone(&state);
            entry.replay(&mut state);
            report.replayed += 1;
            self.entries.push(entry);
        }

        *current = state;
        self.prune();
        (failed, report)
    }

    /// Re-apply every unsettled entry on top of a fresh authoritative snapshot.
    pub fn rebase(&mut self, server: Arc<Form>) -> Arc<Form> {
        self.entries.retain(|e| e.status.is_unsettled());
        let mut state = server;
        for entry in &mut self.entries {
            entry.before = Arc::clone(&state);
            entry.replay(&mut state);
        }
        state
    }

    fn prune(&mut self) {
        let settled = self
            .entries
            .iter()
            .take_while(|e| e.status == OpStatus::Confirmed)
            .count();
        self.entries.drain(..settled);
    }
}
