// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory persistence collaborator.
//!
//! [`MemoryRemote`] keeps its own authoritative copy of every seeded form and
//! applies each request to it with the same edit logic the engine uses, so
//! `fetch_form` after a run shows what a real backend would hold. Server ids
//! are issued as `s-N`, `f-N`, `sf-N` from 100 upward.
//!
//! Two hooks make races reproducible:
//! - [`fail_next`](MemoryRemote::fail_next) queues an error for the next call
//!   with a given label;
//! - [`hold_next`](MemoryRemote::hold_next) parks the next call with a given
//!   label until its [`Gate`] is opened.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use formtree_core::resolve::{node_mut, NodeMut};
use formtree_core::{
    locate, Edit, FormRemote, IntentError, NodePatch, RejectKind, RemoteError, RemoteParent,
    Siblings,
};
use formtree_model::{
    Field, FieldDraft, FieldPatch, Form, FormId, FormMeta, FormPatch, Node, NodeId, NodeKind,
    Section, SectionDraft, SectionPatch, ServerId, Subform, SubformDraft, SubformPatch, Timestamp,
};
use tokio::sync::Semaphore;

/// Releases one held call.
#[derive(Debug, Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    /// Let the held call proceed.
    pub fn open(&self) {
        self.0.add_permits(1);
    }
}

#[derive(Default)]
struct Inner {
    forms: HashMap<FormId, Arc<Form>>,
    issued: u64,
    clock: u64,
    failures: HashMap<&'static str, VecDeque<RemoteError>>,
    gates: HashMap<&'static str, VecDeque<Arc<Semaphore>>>,
    calls: Vec<&'static str>,
    finished: Vec<&'static str>,
}

impl Inner {
    fn issue(&mut self, prefix: &str) -> Result<ServerId, RemoteError> {
        let n = 100 + self.issued;
        self.issued += 1;
        ServerId::new(format!("{prefix}-{n}")).map_err(|e| RemoteError::Transport(e.to_string()))
    }

    fn tick(&mut self) -> Timestamp {
        self.clock += 1;
        Timestamp::from_millis(1_700_000_000_000 + self.clock)
    }

    fn owner_of(&self, id: &NodeId) -> Result<FormId, RemoteError> {
        self.forms
            .iter()
            .find(|(_, form)| form.contains(id))
            .map(|(key, _)| key.clone())
            .ok_or_else(|| missing(id))
    }

    /// Run `edit` on form `key` and stamp `subject` with a fresh timestamp.
    fn commit(
        &mut self,
        key: &FormId,
        edit: &Edit,
        subject: Option<&NodeId>,
        created: bool,
    ) -> Result<Arc<Form>, RemoteError> {
        let now = self.tick();
        let form = self
            .forms
            .get_mut(key)
            .ok_or_else(|| missing(&format_args!("form {key}")))?;
        edit.apply(form).map_err(refusal)?;
        if let Some(id) = subject {
            stamp(form, id, now, created);
        }
        Ok(Arc::clone(form))
    }
}

fn missing(what: &dyn std::fmt::Display) -> RemoteError {
    RemoteError::rejected(RejectKind::Missing, format!("{what} does not exist"))
}

fn refusal(err: IntentError) -> RemoteError {
    let kind = match &err {
        IntentError::Resolve(_) | IntentError::UnknownForm(_) => RejectKind::Missing,
        IntentError::Order(_) => RejectKind::Validation,
        IntentError::Duplicate(_) => RejectKind::Conflict,
    };
    RemoteError::rejected(kind, err.to_string())
}

fn stamp(form: &mut Arc<Form>, id: &NodeId, now: Timestamp, created: bool) {
    let Ok(located) = locate(form, id) else {
        return;
    };
    let location = located.location;
    let created_at = created.then_some(now);
    match node_mut(Arc::make_mut(form), &location) {
        Some(NodeMut::Section(s)) => {
            s.created_at = created_at.or(s.created_at);
            s.updated_at = Some(now);
        }
        Some(NodeMut::Field(f)) => {
            f.created_at = created_at.or(f.created_at);
            f.updated_at = Some(now);
        }
        Some(NodeMut::Subform(s)) => {
            s.created_at = created_at.or(s.created_at);
            s.updated_at = Some(now);
        }
        None => {}
    }
}

fn fetch_node(form: &Form, id: &NodeId) -> Result<Node, RemoteError> {
    locate(form, id)
        .map(|l| l.node.to_node())
        .map_err(|e| RemoteError::rejected(RejectKind::Missing, e.to_string()))
}

fn mismatch(id: &NodeId, kind: NodeKind) -> RemoteError {
    RemoteError::rejected(RejectKind::Missing, format!("{id} is not a {kind}"))
}

fn order_index(order: u32) -> usize {
    usize::try_from(order).unwrap_or(usize::MAX)
}

fn server_ids(ids: &[ServerId]) -> Vec<NodeId> {
    ids.iter().cloned().map(NodeId::Server).collect()
}

/// In-memory [`FormRemote`] with scripted failures and call gates.
///
/// Clones share state.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryRemote")
            .field("forms", &inner.forms.len())
            .field("calls", &inner.calls)
            .finish_non_exhaustive()
    }
}

impl MemoryRemote {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend holding `form`.
    pub fn with_form(form: Form) -> Self {
        let remote = Self::new();
        remote.seed(form);
        remote
    }

    /// Store (or replace) the authoritative copy of `form`.
    pub fn seed(&self, form: Form) {
        self.lock().forms.insert(form.id.clone(), Arc::new(form));
    }

    /// Authoritative copy of `form`.
    pub fn form(&self, form: &FormId) -> Option<Arc<Form>> {
        self.lock().forms.get(form).cloned()
    }

    /// Fail the next call labelled `label` (`create_field`, `delete_section`, ...).
    pub fn fail_next(&self, label: &'static str, error: RemoteError) {
        self.lock().failures.entry(label).or_default().push_back(error);
    }

    /// Park the next call labelled `label` until the returned gate opens.
    pub fn hold_next(&self, label: &'static str) -> Gate {
        let gate = Arc::new(Semaphore::new(0));
        self.lock()
            .gates
            .entry(label)
            .or_default()
            .push_back(Arc::clone(&gate));
        Gate(gate)
    }

    /// Labels of every call received, in arrival order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    /// Labels of every call that has returned, in completion order.
    pub fn finished(&self) -> Vec<&'static str> {
        self.lock().finished.clone()
    }

    /// How many calls labelled `label` have arrived.
    pub fn call_count(&self, label: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == label).count()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self, label: &'static str) -> Result<(), RemoteError> {
        let gate = {
            let mut inner = self.lock();
            inner.calls.push(label);
            inner.gates.get_mut(label).and_then(VecDeque::pop_front)
        };
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        let mut inner = self.lock();
        inner.finished.push(label);
        match inner.failures.get_mut(label).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn update_node(&self, id: &ServerId, patch: NodePatch) -> Result<Node, RemoteError> {
        let mut inner = self.lock();
        let id = NodeId::Server(id.clone());
        let key = inner.owner_of(&id)?;
        let edit = Edit::Update {
            id: id.clone(),
            patch,
        };
        let form = inner.commit(&key, &edit, Some(&id), false)?;
        fetch_node(&form, &id)
    }

    fn delete_node(&self, id: &ServerId, kind: NodeKind) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        let id = NodeId::Server(id.clone());
        let key = inner.owner_of(&id)?;
        inner.commit(&key, &Edit::Delete { id, kind }, None, false)?;
        Ok(())
    }

    fn create_child(
        &self,
        prefix: &str,
        parent: &RemoteParent,
        build: impl FnOnce(NodeId) -> Edit,
    ) -> Result<Node, RemoteError> {
        let mut inner = self.lock();
        let key = inner.owner_of(&NodeId::Server(parent.id().clone()))?;
        let id = NodeId::Server(inner.issue(prefix)?);
        let form = inner.commit(&key, &build(id.clone()), Some(&id), true)?;
        fetch_node(&form, &id)
    }

    fn reorder(
        &self,
        key: Option<&FormId>,
        siblings: Siblings,
        ids: &[ServerId],
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        let key = match (key, &siblings) {
            (Some(form), _) => form.clone(),
            (None, Siblings::Fields(parent) | Siblings::Subforms(parent)) => {
                inner.owner_of(parent.id())?
            }
            (None, Siblings::Sections) => {
                return Err(RemoteError::rejected(RejectKind::Validation, "no form given"));
            }
        };
        let edit = Edit::Reorder {
            siblings,
            ids: server_ids(ids),
        };
        inner.commit(&key, &edit, None, false)?;
        Ok(())
    }
}

impl FormRemote for MemoryRemote {
    async fn fetch_form(&self, form: &FormId) -> Result<Form, RemoteError> {
        self.enter("fetch_form").await?;
        self.form(form)
            .map(|f| (*f).clone())
            .ok_or_else(|| missing(&format_args!("form {form}")))
    }

    async fn update_form(&self, form: &FormId, patch: &FormPatch) -> Result<FormMeta, RemoteError> {
        self.enter("update_form").await?;
        let mut inner = self.lock();
        let now = inner.tick();
        let mut updated = inner.commit(form, &Edit::UpdateForm(patch.clone()), None, false)?;
        Arc::make_mut(&mut updated).updated_at = Some(now);
        let meta = updated.meta();
        inner.forms.insert(form.clone(), updated);
        Ok(meta)
    }

    async fn create_section(
        &self,
        form: &FormId,
        draft: &SectionDraft,
        order: u32,
    ) -> Result<Section, RemoteError> {
        self.enter("create_section").await?;
        let mut inner = self.lock();
        let id = NodeId::Server(inner.issue("s")?);
        let edit = Edit::CreateSection {
            id: id.clone(),
            draft: draft.clone(),
            at: order_index(order),
        };
        let updated = inner.commit(form, &edit, Some(&id), true)?;
        match fetch_node(&updated, &id)? {
            Node::Section(s) => Ok(s),
            _ => Err(mismatch(&id, NodeKind::Section)),
        }
    }

    async fn update_section(
        &self,
        id: &ServerId,
        patch: &SectionPatch,
    ) -> Result<Section, RemoteError> {
        self.enter("update_section").await?;
        match self.update_node(id, NodePatch::Section(patch.clone()))? {
            Node::Section(s) => Ok(s),
            other => Err(mismatch(other.id(), NodeKind::Section)),
        }
    }

    async fn delete_section(&self, id: &ServerId) -> Result<(), RemoteError> {
        self.enter("delete_section").await?;
        self.delete_node(id, NodeKind::Section)
    }

    async fn reorder_sections(&self, form: &FormId, ids: &[ServerId]) -> Result<(), RemoteError> {
        self.enter("reorder_sections").await?;
        self.reorder(Some(form), Siblings::Sections, ids)
    }

    async fn create_field(
        &self,
        parent: &RemoteParent,
        draft: &FieldDraft,
        order: u32,
    ) -> Result<Field, RemoteError> {
        self.enter("create_field").await?;
        let node = self.create_child("f", parent, |id| Edit::CreateField {
            id,
            parent: parent.clone().into(),
            draft: draft.clone(),
            at: order_index(order),
        })?;
        match node {
            Node::Field(f) => Ok(f),
            other => Err(mismatch(other.id(), NodeKind::Field)),
        }
    }

    async fn update_field(&self, id: &ServerId, patch: &FieldPatch) -> Result<Field, RemoteError> {
        self.enter("update_field").await?;
        match self.update_node(id, NodePatch::Field(patch.clone()))? {
            Node::Field(f) => Ok(f),
            other => Err(mismatch(other.id(), NodeKind::Field)),
        }
    }

    async fn delete_field(&self, id: &ServerId) -> Result<(), RemoteError> {
        self.enter("delete_field").await?;
        self.delete_node(id, NodeKind::Field)
    }

    async fn reorder_fields(
        &self,
        parent: &RemoteParent,
        ids: &[ServerId],
    ) -> Result<(), RemoteError> {
        self.enter("reorder_fields").await?;
        self.reorder(None, Siblings::Fields(parent.clone().into()), ids)
    }

    async fn create_subform(
        &self,
        parent: &RemoteParent,
        draft: &SubformDraft,
        order: u32,
    ) -> Result<Subform, RemoteError> {
        self.enter("create_subform").await?;
        let node = self.create_child("sf", parent, |id| Edit::CreateSubform {
            id,
            parent: parent.clone().into(),
            draft: draft.clone(),
            at: order_index(order),
        })?;
        match node {
            Node::Subform(s) => Ok(s),
            other => Err(mismatch(other.id(), NodeKind::Subform)),
        }
    }

    async fn update_subform(
        &self,
        id: &ServerId,
        patch: &SubformPatch,
    ) -> Result<Subform, RemoteError> {
        self.enter("update_subform").await?;
        match self.update_node(id, NodePatch::Subform(patch.clone()))? {
            Node::Subform(s) => Ok(s),
            other => Err(mismatch(other.id(), NodeKind::Subform)),
        }
    }

    async fn delete_subform(&self, id: &ServerId) -> Result<(), RemoteError> {
        self.enter("delete_subform").await?;
        self.delete_node(id, NodeKind::Subform)
    }

    async fn reorder_subforms(
        &self,
        parent: &RemoteParent,
        ids: &[ServerId],
    ) -> Result<(), RemoteError> {
        self.enter("reorder_subforms").await?;
        self.reorder(None, Siblings::Subforms(parent.clone().into()), ids)
    }
}

/// Yield to the scheduler until `ready` holds (or give up after a bounded
/// number of turns). Lets spawned tasks make progress on a single-threaded
/// runtime.
pub async fn until(ready: impl Fn() -> bool) -> bool {
    for _ in 0..1_000 {
        if ready() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    ready()
}
