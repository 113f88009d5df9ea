// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Optimistic mutation engine.
//!
//! Every mutation runs the same three-phase protocol, exposed as explicit
//! steps so it can be driven (and tested) without a transport:
//!
//! 1. [`Engine::apply`]: speculative apply. Validates, assigns a temp id for
//!    creates, patches the cache (subscribers see the change before `apply`
//!    returns) and journals the operation.
//! 2. [`Engine::next_request`]: the collaborator request, once every id it
//!    needs is authoritative and the dispatch policy allows it.
//! 3. [`Engine::confirm`] or [`Engine::reject`]: reconcile in place, or roll
//!    back precisely that operation (cascading to dependents).
//!
//! [`Engine::submit`] runs all three against the configured [`FormRemote`].
//!
//! Lock order is engine state, then cache. Cache listeners run while the
//! engine state lock is held, so they must not call back into the engine.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use formtree_app_core::settings::EngineSettings;
use formtree_model::{Form, FormId, NodeId, ServerId, TempId};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::{FormCache, SubscriptionId};
use crate::error::{IntentError, MutationError};
use crate::intent::Intent;
use crate::journal::{Blocker, Entry, Journal, OpId, OpStatus};
use crate::remote::{Confirmation, FormRemote, RemoteCall, RemoteError};

/// Receipt for a speculatively applied operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    /// Operation id; pass to the later phases.
    pub op: OpId,
    /// Form the operation belongs to.
    pub form: FormId,
    /// Temp id of the node a create introduced.
    pub created: Option<TempId>,
    /// Effective index of a created node.
    pub index: Option<usize>,
    /// Ids removed by a delete (target first, then its subtree).
    pub removed: Vec<NodeId>,
}

impl Ticket {
    /// The created node's id as it currently appears in the tree.
    pub fn created_id(&self) -> Option<NodeId> {
        self.created.map(NodeId::Temp)
    }
}

/// Answer of [`Engine::next_request`].
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Send this request.
    Ready(RemoteCall),
    /// Not yet; ask again after the next settle.
    Blocked(Blocker),
    /// The operation was dropped by a cascading rollback.
    Cancelled {
        /// Temp id of the rolled-back node it depended on.
        parent: TempId,
    },
}

/// Successful end of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Operation id.
    pub op: OpId,
    /// What the collaborator returned.
    pub confirmation: Confirmation,
    /// Temp id now known by its server id (creates).
    pub alias: Option<(TempId, ServerId)>,
    /// `false` if the node had already been removed locally (nothing to reconcile).
    pub reconciled: bool,
}

/// Introspection record for an unsettled operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOp {
    /// Operation id.
    pub op: OpId,
    /// Owning form.
    pub form: FormId,
    /// Edit name (`create_field`, `delete`, ...).
    pub label: &'static str,
    /// Current status.
    pub status: OpStatus,
    /// Temp id introduced by a create.
    pub created: Option<TempId>,
}

#[derive(Debug, Default)]
struct State {
    next_temp: u64,
    next_op: u64,
    journals: HashMap<FormId, Journal>,
    owners: HashMap<OpId, FormId>,
    aliases: HashMap<TempId, ServerId>,
    /// Unread cancellation notices, oldest first.
    cancelled: VecDeque<Cancellation>,
}

#[derive(Debug)]
struct Cancellation {
    op: OpId,
    form: FormId,
    parent: TempId,
}

impl State {
    fn allocate_temp(&mut self) -> TempId {
        self.next_temp += 1;
        TempId::from_raw(self.next_temp)
    }

    fn allocate_op(&mut self) -> OpId {
        self.next_op += 1;
        OpId::from_raw(self.next_op)
    }

    fn locate(&self, op: OpId) -> Result<FormId, MutationError> {
        self.owners
            .get(&op)
            .cloned()
            .ok_or(MutationError::UnknownOp(op))
    }

    fn forget(&mut self, form: &FormId) {
        if let Some(journal) = self.journals.remove(form) {
            for entry in journal.entries() {
                self.owners.remove(&entry.op);
            }
        }
        self.cancelled.retain(|c| &c.form != form);
    }

    fn record_cancellation(&mut self, notice: Cancellation, cap: usize) {
        while self.cancelled.len() >= cap.max(1) {
            if let Some(dropped) = self.cancelled.pop_front() {
                debug!(op = %dropped.op, "cancellation notice discarded unread");
            }
        }
        self.cancelled.push_back(notice);
    }

    fn take_cancellation(&mut self, op: OpId) -> Option<TempId> {
        let index = self.cancelled.iter().position(|c| c.op == op)?;
        self.cancelled.remove(index).map(|c| c.parent)
    }

    fn drop_if_idle(&mut self, form: &FormId) {
        if self.journals.get(form).is_some_and(Journal::is_empty) {
            self.journals.remove(form);
        }
    }
}

struct Shared<R> {
    remote: R,
    cache: FormCache,
    settings: EngineSettings,
    state: Mutex<State>,
    settled: Notify,
}

/// Optimistic mutation engine over a [`FormCache`].
///
/// Cheap to clone; clones drive the same state.
pub struct Engine<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for Engine<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R> std::fmt::Debug for Engine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cache", &self.shared.cache)
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

impl<R: FormRemote> Engine<R> {
    /// Engine with a fresh cache.
    pub fn new(remote: R, settings: EngineSettings) -> Self {
        Self::with_cache(remote, FormCache::new(), settings)
    }

    /// Engine driving an existing cache.
    pub fn with_cache(remote: R, cache: FormCache, settings: EngineSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                remote,
                cache,
                settings,
                state: Mutex::new(State::default()),
                settled: Notify::new(),
            }),
        }
    }

    /// The cache this engine writes to.
    pub fn cache(&self) -> &FormCache {
        &self.shared.cache
    }

    /// Active settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    /// The persistence collaborator.
    pub fn remote(&self) -> &R {
        &self.shared.remote
    }

    /// Current snapshot of `form`.
    pub fn snapshot(&self, form: &FormId) -> Option<Arc<Form>> {
        self.shared.cache.get(form)
    }

    /// Listen for changes to `form`. See [`FormCache::subscribe`].
    pub fn subscribe(
        &self,
        form: FormId,
        listener: impl Fn(&FormId, &Arc<Form>, u64) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.cache.subscribe(form, listener)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── hydration ────────────────────────────────────────────────────────

    /// Install an authoritative snapshot. Unsettled local operations are
    /// replayed on top of it; returns how many.
    pub fn hydrate(&self, form: Form) -> usize {
        let mut state = self.state();
        let id = form.id.clone();
        let server = Arc::new(form);
        let (snapshot, replayed) = match state.journals.get_mut(&id) {
            Some(journal) => (journal.rebase(server), journal.len()),
            None => (server, 0),
        };
        self.shared.cache.insert(id.clone(), snapshot);
        info!(form = %id, replayed, "hydrated");
        replayed
    }

    /// Fetch `form` from the collaborator and [`hydrate`](Self::hydrate) it.
    pub async fn load(&self, form: &FormId) -> Result<usize, RemoteError> {
        let fetched = match self.shared.settings.remote_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.shared.remote.fetch_form(form))
                .await
                .unwrap_or(Err(RemoteError::Timeout)),
            None => self.shared.remote.fetch_form(form).await,
        };
        Ok(self.hydrate(fetched?))
    }

    // ── phase 1 ──────────────────────────────────────────────────────────

    /// Speculatively apply `intent` to `form`.
    ///
    /// On error nothing changed: no snapshot, no journal entry, no request.
    pub fn apply(&self, form: &FormId, intent: Intent) -> Result<Ticket, IntentError> {
        let mut state = self.state();
        let mut edit = intent.into_edit(|| state.allocate_temp());
        for temp in edit.temp_refs() {
            if let Some(real) = state.aliases.get(&temp) {
                edit.rewrite(&NodeId::Temp(temp), &NodeId::Server(real.clone()));
            }
        }

        let (before, applied) = self
            .shared
            .cache
            .patch(form, |snapshot| {
                let before = Arc::clone(snapshot);
                match edit.apply(snapshot) {
                    Ok(applied) => Ok((before, applied)),
                    Err(err) => {
                        *snapshot = before;
                        Err(err)
                    }
                }
            })
            .ok_or_else(|| IntentError::UnknownForm(form.clone()))?
            .inspect_err(|err| {
                debug!(form = %form, edit = edit.label(), error = %err, "intent refused");
            })?;

        if let Some(index) = applied.index {
            edit.settle_position(index);
        }
        let op = state.allocate_op();
        let created = edit.created();
        debug!(%op, form = %form, edit = edit.label(), ?created, "applied");

        let journal = state.journals.entry(form.clone()).or_default();
        journal.push(Entry {
            op,
            edit,
            before,
            status: OpStatus::Pending,
            confirmation: None,
        });
        if journal.len() > self.shared.settings.max_journal_len {
            warn!(form = %form, len = journal.len(), "journal is growing; is anything driving it?");
        }
        state.owners.insert(op, form.clone());

        Ok(Ticket {
            op,
            form: form.clone(),
            created,
            index: applied.index,
            removed: applied.removed,
        })
    }

    // ── phase 2 ──────────────────────────────────────────────────────────

    /// Request for `op`, or why it cannot be sent yet.
    ///
    /// `Ready` marks the operation in flight; it is handed out exactly once.
    /// `Cancelled` is also reported once. Unread cancellations are capped at
    /// `max_journal_len` (oldest discarded) and dropped with their form's
    /// journal; a discarded one reads as `UnknownOp`.
    pub fn next_request(&self, op: OpId) -> Result<Dispatch, MutationError> {
        let mut state = self.state();
        if let Some(parent) = state.take_cancellation(op) {
            return Ok(Dispatch::Cancelled { parent });
        }
        let form = state.locate(op)?;
        let policy = self.shared.settings.dispatch;
        let journal = state
            .journals
            .get_mut(&form)
            .ok_or(MutationError::UnknownOp(op))?;
        if let Some(blocker) = journal.blocker(op, policy) {
            return Ok(Dispatch::Blocked(blocker));
        }
        let entry = journal.get_mut(op).ok_or(MutationError::UnknownOp(op))?;
        if entry.status != OpStatus::Pending {
            return Err(MutationError::AlreadyDispatched(op));
        }
        match entry.edit.to_call(&form) {
            Ok(call) => {
                entry.status = OpStatus::InFlight;
                debug!(%op, call = call.label(), "dispatching");
                Ok(Dispatch::Ready(call))
            }
            Err(temp) => Ok(Dispatch::Blocked(Blocker::Temp(temp))),
        }
    }

    // ── phase 3 ──────────────────────────────────────────────────────────

    /// Commit `op` with the collaborator's answer.
    pub fn confirm(&self, op: OpId, confirmation: Confirmation) -> Result<Outcome, MutationError> {
        let mut state = self.state();
        let form = state.locate(op)?;
        let journal = state
            .journals
            .get_mut(&form)
            .ok_or(MutationError::UnknownOp(op))?;
        let index = journal.position(op).ok_or(MutationError::UnknownOp(op))?;

        let answer = confirmation.clone();
        let Some(done) = self
            .shared
            .cache
            .patch(&form, |snapshot| journal.confirm(index, answer, snapshot))
        else {
            state.forget(&form);
            return Err(MutationError::UnknownOp(op));
        };

        if let Some((temp, real)) = &done.alias {
            state.aliases.insert(*temp, real.clone());
        }
        state.owners.remove(&op);
        state.drop_if_idle(&form);
        drop(state);
        self.shared.settled.notify_waiters();

        if !done.found {
            debug!(%op, "confirmed target no longer in tree");
        }
        debug!(%op, alias = ?done.alias, "confirmed");
        Ok(Outcome {
            op,
            confirmation,
            alias: done.alias,
            reconciled: done.found,
        })
    }

    /// Roll back `op` after a collaborator failure and return the error to surface.
    ///
    /// Later operations that depended on a node `op` created are cancelled;
    /// everything else applied after `op` is kept.
    pub fn reject(&self, op: OpId, error: RemoteError) -> MutationError {
        let mut state = self.state();
        let Ok(form) = state.locate(op) else {
            return MutationError::UnknownOp(op);
        };
        let Some(journal) = state.journals.get_mut(&form) else {
            return MutationError::UnknownOp(op);
        };
        let Some(index) = journal.position(op) else {
            return MutationError::UnknownOp(op);
        };

        let rolled = self
            .shared
            .cache
            .patch(&form, |snapshot| journal.rollback(index, snapshot));
        state.owners.remove(&op);
        match rolled {
            Some((_, report)) => {
                for cancelled in &report.cancelled {
                    warn!(op = %cancelled.op, parent = %cancelled.parent, "cancelled by rollback");
                    state.owners.remove(&cancelled.op);
                    let notice = Cancellation {
                        op: cancelled.op,
                        form: form.clone(),
                        parent: cancelled.parent,
                    };
                    state.record_cancellation(notice, self.shared.settings.max_journal_len);
                }
                warn!(
                    %op,
                    %error,
                    replayed = report.replayed,
                    cancelled = report.cancelled.len(),
                    "rolled back"
                );
            }
            None => state.forget(&form),
        }
        state.drop_if_idle(&form);
        drop(state);
        self.shared.settled.notify_waiters();

        MutationError::RemoteRejected { op, source: error }
    }

    // ── async driver ─────────────────────────────────────────────────────

    /// Apply `intent`, then drive it to completion against the collaborator.
    ///
    /// Dropping the returned future abandons the operation in flight; use
    /// [`spawn_submit`](Self::spawn_submit) to let it finish unobserved.
    #[instrument(skip_all, fields(form = %form))]
    pub async fn submit(&self, form: &FormId, intent: Intent) -> Result<Outcome, MutationError> {
        let ticket = self.apply(form, intent)?;
        self.drive(ticket.op).await
    }

    /// Wait until `op` may be sent, send it, then confirm or roll back.
    pub async fn drive(&self, op: OpId) -> Result<Outcome, MutationError> {
        let call = loop {
            let notified = self.shared.settled.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();
            match self.next_request(op)? {
                Dispatch::Ready(call) => break call,
                Dispatch::Blocked(blocker) => {
                    debug!(%op, ?blocker, "waiting");
                    notified.await;
                }
                Dispatch::Cancelled { parent } => {
                    return Err(MutationError::Cancelled { op, parent });
                }
            }
        };

        let response = match self.shared.settings.remote_timeout() {
            Some(limit) => tokio::time::timeout(limit, call.send(&self.shared.remote))
                .await
                .unwrap_or(Err(RemoteError::Timeout)),
            None => call.send(&self.shared.remote).await,
        };
        match response {
            Ok(confirmation) => self.confirm(op, confirmation),
            Err(error) => Err(self.reject(op, error)),
        }
    }

    /// Apply `intent` now and drive it on the current `LocalSet`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `tokio::task::LocalSet`.
    pub fn spawn_submit(
        &self,
        form: &FormId,
        intent: Intent,
    ) -> Result<(Ticket, JoinHandle<Result<Outcome, MutationError>>), IntentError>
    where
        R: 'static,
    {
        let ticket = self.apply(form, intent)?;
        let engine = self.clone();
        let op = ticket.op;
        let handle = tokio::task::spawn_local(async move { engine.drive(op).await });
        Ok((ticket, handle))
    }

    // ── introspection ────────────────────────────────────────────────────

    /// Unsettled operations on `form`, in issuance order.
    pub fn pending(&self, form: &FormId) -> Vec<PendingOp> {
        let state = self.state();
        state
            .journals
            .get(form)
            .map(|journal| {
                journal
                    .entries()
                    .filter(|e| e.status.is_unsettled())
                    .map(|e| PendingOp {
                        op: e.op,
                        form: form.clone(),
                        label: e.edit.label(),
                        status: e.status,
                        created: e.edit.created(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Operation that created `temp`, while it is unconfirmed.
    pub fn pending_by_temp(&self, temp: TempId) -> Option<OpId> {
        let state = self.state();
        let found = state
            .journals
            .values()
            .flat_map(Journal::entries)
            .find(|e| e.edit.created() == Some(temp))
            .map(|e| e.op);
        drop(state);
        found
    }

    /// Server id a confirmed temp id was replaced by.
    pub fn resolve_alias(&self, temp: TempId) -> Option<ServerId> {
        self.state().aliases.get(&temp).cloned()
    }

    /// Status of `op`, `None` once settled (or unknown).
    pub fn status(&self, op: OpId) -> Option<OpStatus> {
        let state = self.state();
        let form = state.owners.get(&op)?;
        state.journals.get(form)?.get(op).map(|e| e.status)
    }
}
