// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, clippy::unwrap_used, clippy::panic)]
//! Interleavings of in-flight operations on one form.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use formtree_core::{
    locate, Blocker, Confirmation, Dispatch, DispatchPolicy, Engine, EngineSettings, Intent,
    IntentError, MutationError, OpId, OpStatus, RemoteCall, RemoteError,
};
use formtree_dry_tests::{nid, until, FormBuilder, MemoryRemote};
use formtree_model::{
    FieldDraft, FieldKind, FieldPatch, Form, FormId, NodeId, ParentRef, ServerId, SubformDraft,
};

fn form_id() -> FormId {
    ServerId::new("form-1").unwrap()
}

fn base() -> Form {
    FormBuilder::new("form-1", "Intake")
        .section("s1", "Main", |s| {
            s.field("f1", FieldKind::Text, "Name")
                .field("f2", FieldKind::Date, "Due")
        })
        .build()
        .unwrap()
}

fn engine(policy: DispatchPolicy) -> (Engine<MemoryRemote>, MemoryRemote) {
    let remote = MemoryRemote::with_form(base());
    let settings = EngineSettings {
        dispatch: policy,
        ..EngineSettings::default()
    };
    let engine = Engine::new(remote.clone(), settings);
    engine.hydrate(base());
    (engine, remote)
}

fn rename(id: &str, label: &str) -> Intent {
    Intent::UpdateField {
        id: nid(id).unwrap(),
        patch: FieldPatch {
            label: Some(label.into()),
            ..FieldPatch::default()
        },
    }
}

fn add_field(parent: ParentRef, label: &str) -> Intent {
    Intent::CreateField {
        parent,
        draft: FieldDraft::new(FieldKind::Text, label),
        at: None,
    }
}

fn s1() -> ParentRef {
    ParentRef::Section(nid("s1").unwrap())
}

fn ready(engine: &Engine<MemoryRemote>, op: OpId) -> RemoteCall {
    match engine.next_request(op).unwrap() {
        Dispatch::Ready(call) => call,
        other => panic!("{op} not ready: {other:?}"),
    }
}

fn label_of(form: &Form, id: &NodeId) -> String {
    match locate(form, id).unwrap().node.to_node() {
        formtree_model::Node::Field(f) => f.label,
        other => panic!("not a field: {other:?}"),
    }
}

// ── 1. selective rollback ───────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn failed_update_keeps_later_unrelated_create() {
    let (engine, remote) = engine(DispatchPolicy::Concurrent);
    let a = engine.apply(&form_id(), rename("f1", "Full name")).unwrap();
    let b = engine.apply(&form_id(), add_field(s1(), "Phone")).unwrap();

    let call_a = ready(&engine, a.op);
    let call_b = ready(&engine, b.op);
    let confirmation = call_b.send(&remote).await.unwrap();
    engine.confirm(b.op, confirmation).unwrap();

    remote.fail_next("update_field", RemoteError::Timeout);
    let err = call_a.send(&remote).await.unwrap_err();
    let surfaced = engine.reject(a.op, err);
    assert!(matches!(surfaced, MutationError::RemoteRejected { op, .. } if op == a.op));

    let snapshot = engine.snapshot(&form_id()).unwrap();
    assert_eq!(label_of(&snapshot, &nid("f1").unwrap()), "Name");
    let phone = locate(&snapshot, &nid("f-100").unwrap()).unwrap();
    assert_eq!(phone.location.index, 2);
    assert!(snapshot.check_invariants().is_empty());
    assert_eq!(*remote.form(&form_id()).unwrap(), *snapshot);
}

#[tokio::test(flavor = "current_thread")]
async fn rollback_of_sole_operation_restores_pointer() {
    let (engine, remote) = engine(DispatchPolicy::SerializePerForm);
    let before = engine.snapshot(&form_id()).unwrap();
    remote.fail_next("delete_field", RemoteError::Transport("eof".into()));
    let err = engine
        .submit(
            &form_id(),
            Intent::DeleteField {
                id: nid("f2").unwrap(),
            },
        )
        .await
        .unwrap_err();
    assert!(!err.is_benign());
    assert!(Arc::ptr_eq(&before, &engine.snapshot(&form_id()).unwrap()));
}

// ── 2. dispatch policy ──────────────────────────────────────────────────

#[test]
fn serialize_policy_holds_later_requests() {
    let (engine, _remote) = engine(DispatchPolicy::SerializePerForm);
    let a = engine.apply(&form_id(), rename("f1", "A")).unwrap();
    let b = engine.apply(&form_id(), rename("f2", "B")).unwrap();

    assert_eq!(
        engine.next_request(b.op).unwrap(),
        Dispatch::Blocked(Blocker::Earlier(a.op))
    );
    let call = ready(&engine, a.op);
    assert_eq!(call.label(), "update_field");
    assert_eq!(engine.status(a.op), Some(OpStatus::InFlight));
    assert_eq!(
        engine.next_request(a.op),
        Err(MutationError::AlreadyDispatched(a.op))
    );

    let mut field = formtree_model::Field::new(nid("f1").unwrap(), s1(), FieldKind::Text, "A");
    field.updated_at = Some(formtree_model::Timestamp::from_millis(9));
    engine.confirm(a.op, Confirmation::Field(field)).unwrap();
    assert!(matches!(engine.next_request(b.op).unwrap(), Dispatch::Ready(_)));
    assert_eq!(engine.status(a.op), None);
}

#[test]
fn concurrent_policy_still_waits_for_temp_parents() {
    let (engine, _remote) = engine(DispatchPolicy::Concurrent);
    let parent = engine
        .apply(
            &form_id(),
            Intent::CreateSubform {
                parent: s1(),
                draft: SubformDraft::new("Lines"),
                at: None,
            },
        )
        .unwrap();
    let child = engine
        .apply(
            &form_id(),
            add_field(ParentRef::Subform(parent.created_id().unwrap()), "Item"),
        )
        .unwrap();
    assert_eq!(
        engine.next_request(child.op).unwrap(),
        Dispatch::Blocked(Blocker::Temp(parent.created.unwrap()))
    );
    assert_eq!(engine.pending_by_temp(parent.created.unwrap()), Some(parent.op));
}

#[test]
fn cancellation_notices_are_read_once_and_bounded() {
    let remote = MemoryRemote::with_form(base());
    let settings = EngineSettings {
        dispatch: DispatchPolicy::Concurrent,
        max_journal_len: 2,
        ..EngineSettings::default()
    };
    let engine = Engine::new(remote, settings);
    engine.hydrate(base());
    let parent = engine
        .apply(
            &form_id(),
            Intent::CreateSubform {
                parent: s1(),
                draft: SubformDraft::new("Lines"),
                at: None,
            },
        )
        .unwrap();
    let temp = parent.created.unwrap();
    let children: Vec<OpId> = ["A", "B", "C"]
        .into_iter()
        .map(|label| {
            let intent = add_field(ParentRef::Subform(parent.created_id().unwrap()), label);
            engine.apply(&form_id(), intent).unwrap().op
        })
        .collect();

    ready(&engine, parent.op);
    let _ = engine.reject(parent.op, RemoteError::Timeout);
    for op in &children {
        assert_eq!(engine.status(*op), None);
    }

    // Only the two newest notices are kept.
    assert!(matches!(
        engine.next_request(children[0]),
        Err(MutationError::UnknownOp(op)) if op == children[0]
    ));
    for &op in &children[1..] {
        assert_eq!(
            engine.next_request(op).unwrap(),
            Dispatch::Cancelled { parent: temp }
        );
        assert!(matches!(
            engine.next_request(op),
            Err(MutationError::UnknownOp(_))
        ));
    }
}

// ── 3. temp-id dependencies end to end ──────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn child_request_waits_for_parent_id() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (engine, remote) = engine(DispatchPolicy::Concurrent);
            let gate = remote.hold_next("create_subform");

            let (parent, parent_task) = engine
                .spawn_submit(
                    &form_id(),
                    Intent::CreateSubform {
                        parent: s1(),
                        draft: SubformDraft::new("Lines"),
                        at: Some(0),
                    },
                )
                .unwrap();
            let temp = parent.created_id().unwrap();
            let (_, child_task) = engine
                .spawn_submit(&form_id(), add_field(ParentRef::Subform(temp.clone()), "Item"))
                .unwrap();

            assert!(until(|| remote.call_count("create_subform") == 1).await);
            assert_eq!(remote.calls(), ["create_subform"]);
            assert!(engine.snapshot(&form_id()).unwrap().contains(&temp));

            gate.open();
            let parent_outcome = parent_task.await.unwrap().unwrap();
            let child_outcome = child_task.await.unwrap().unwrap();

            let real = ServerId::new("sf-100").unwrap();
            assert_eq!(parent_outcome.alias, Some((parent.created.unwrap(), real.clone())));
            assert_eq!(engine.resolve_alias(parent.created.unwrap()), Some(real.clone()));
            assert!(child_outcome.reconciled);

            let snapshot = engine.snapshot(&form_id()).unwrap();
            let lines = &snapshot.sections[0].subforms[0];
            assert_eq!(lines.id, NodeId::Server(real.clone()));
            assert_eq!(lines.fields[0].parent, ParentRef::Subform(NodeId::Server(real)));
            assert!(!lines.fields[0].id.is_temp());
            assert_eq!(*remote.form(&form_id()).unwrap(), *snapshot);
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn stale_temp_handle_is_rewritten_after_confirm() {
    let (engine, remote) = engine(DispatchPolicy::SerializePerForm);
    let ticket = engine.apply(&form_id(), add_field(s1(), "Phone")).unwrap();
    engine.drive(ticket.op).await.unwrap();

    // The caller still holds the temp id.
    let temp = ticket.created_id().unwrap();
    let update = Intent::UpdateField {
        id: temp,
        patch: FieldPatch {
            required: Some(true),
            ..FieldPatch::default()
        },
    };
    engine.submit(&form_id(), update).await.unwrap();
    let stored = remote.form(&form_id()).unwrap();
    match locate(&stored, &nid("f-100").unwrap()).unwrap().node.to_node() {
        formtree_model::Node::Field(f) => assert!(f.required),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn delete_while_create_in_flight() {
    let (engine, remote) = engine(DispatchPolicy::Concurrent);
    let create = engine.apply(&form_id(), add_field(s1(), "Phone")).unwrap();
    let call = ready(&engine, create.op);
    let temp = create.created_id().unwrap();

    let delete = engine
        .apply(&form_id(), Intent::DeleteField { id: temp.clone() })
        .unwrap();
    assert!(!engine.snapshot(&form_id()).unwrap().contains(&temp));
    assert_eq!(
        engine.next_request(delete.op).unwrap(),
        Dispatch::Blocked(Blocker::Temp(create.created.unwrap()))
    );

    let outcome = engine
        .confirm(create.op, call.send(&remote).await.unwrap())
        .unwrap();
    assert!(!outcome.reconciled);
    let follow_up = ready(&engine, delete.op);
    assert_eq!(
        follow_up,
        RemoteCall::DeleteField {
            id: ServerId::new("f-100").unwrap()
        }
    );
    engine
        .confirm(delete.op, follow_up.send(&remote).await.unwrap())
        .unwrap();
    assert_eq!(*remote.form(&form_id()).unwrap(), *engine.snapshot(&form_id()).unwrap());
}

// ── 4. newer local edits win over older confirmations ───────────────────

#[tokio::test(flavor = "current_thread")]
async fn confirmation_does_not_clobber_newer_pending_edit() {
    let (engine, remote) = engine(DispatchPolicy::Concurrent);
    let first = engine.apply(&form_id(), rename("f1", "First")).unwrap();
    let second = engine.apply(&form_id(), rename("f1", "Second")).unwrap();

    let call = ready(&engine, first.op);
    engine
        .confirm(first.op, call.send(&remote).await.unwrap())
        .unwrap();
    let snapshot = engine.snapshot(&form_id()).unwrap();
    assert_eq!(label_of(&snapshot, &nid("f1").unwrap()), "Second");

    remote.fail_next("update_field", RemoteError::Timeout);
    let call = ready(&engine, second.op);
    let err = call.send(&remote).await.unwrap_err();
    engine.reject(second.op, err);
    let snapshot = engine.snapshot(&form_id()).unwrap();
    assert_eq!(label_of(&snapshot, &nid("f1").unwrap()), "First");
    assert_eq!(*snapshot, *remote.form(&form_id()).unwrap());
}

#[tokio::test(flavor = "current_thread")]
async fn serialized_rejection_keeps_earlier_confirmed_values() {
    let (engine, remote) = engine(DispatchPolicy::SerializePerForm);
    let first = engine.apply(&form_id(), rename("f1", "First")).unwrap();
    let second = engine.apply(&form_id(), rename("f1", "Second")).unwrap();

    engine.drive(first.op).await.unwrap();
    remote.fail_next("update_field", RemoteError::Timeout);
    engine.drive(second.op).await.unwrap_err();

    let snapshot = engine.snapshot(&form_id()).unwrap();
    let server = remote.form(&form_id()).unwrap();
    assert_eq!(label_of(&snapshot, &nid("f1").unwrap()), "First");
    assert!(server.sections[0].fields[0].updated_at.is_some());
    assert_eq!(*snapshot, *server);
}

// ── 5. timeouts ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unanswered_request_times_out_and_rolls_back() {
    let remote = MemoryRemote::with_form(base());
    let settings = EngineSettings {
        remote_timeout_ms: Some(50),
        ..EngineSettings::default()
    };
    let engine = Engine::new(remote.clone(), settings);
    engine.hydrate(base());
    let before = engine.snapshot(&form_id()).unwrap();
    let _gate = remote.hold_next("create_field");

    let err = engine
        .submit(&form_id(), add_field(s1(), "Never"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MutationError::RemoteRejected {
            source: RemoteError::Timeout,
            ..
        }
    ));
    assert!(Arc::ptr_eq(&before, &engine.snapshot(&form_id()).unwrap()));
}

// ── 6. hydration and loading ────────────────────────────────────────────

#[test]
fn hydrate_replays_pending_work() {
    let (engine, _remote) = engine(DispatchPolicy::SerializePerForm);
    let ticket = engine.apply(&form_id(), add_field(s1(), "Phone")).unwrap();

    let mut server = base();
    server.name = "Renamed elsewhere".into();
    assert_eq!(engine.hydrate(server), 1);

    let snapshot = engine.snapshot(&form_id()).unwrap();
    assert_eq!(snapshot.name, "Renamed elsewhere");
    assert!(snapshot.contains(&ticket.created_id().unwrap()));
}

#[tokio::test(flavor = "current_thread")]
async fn refresh_during_create_does_not_duplicate_the_node() {
    let (engine, remote) = engine(DispatchPolicy::Concurrent);
    let ticket = engine.apply(&form_id(), add_field(s1(), "Phone")).unwrap();
    let call = ready(&engine, ticket.op);
    let answer = call.send(&remote).await.unwrap();

    // The server already holds f-100; the local create is replayed beside it.
    assert_eq!(engine.load(&form_id()).await.unwrap(), 1);
    let refreshed = engine.snapshot(&form_id()).unwrap();
    assert!(refreshed.contains(&nid("f-100").unwrap()));
    assert!(refreshed.contains(&ticket.created_id().unwrap()));

    let outcome = engine.confirm(ticket.op, answer).unwrap();
    assert!(outcome.reconciled);
    let snapshot = engine.snapshot(&form_id()).unwrap();
    assert!(snapshot.check_invariants().is_empty());
    assert!(!snapshot.contains(&ticket.created_id().unwrap()));
    let real = nid("f-100").unwrap();
    assert_eq!(snapshot.ids().iter().filter(|id| **id == real).count(), 1);
    assert_eq!(*snapshot, *remote.form(&form_id()).unwrap());
}

#[tokio::test(flavor = "current_thread")]
async fn refresh_during_create_moves_pending_children_to_real_node() {
    let (engine, remote) = engine(DispatchPolicy::Concurrent);
    let parent = engine
        .apply(
            &form_id(),
            Intent::CreateSubform {
                parent: s1(),
                draft: SubformDraft::new("Lines"),
                at: None,
            },
        )
        .unwrap();
    let child = engine
        .apply(
            &form_id(),
            add_field(ParentRef::Subform(parent.created_id().unwrap()), "Qty"),
        )
        .unwrap();
    let answer = ready(&engine, parent.op).send(&remote).await.unwrap();
    assert_eq!(engine.load(&form_id()).await.unwrap(), 2);

    engine.confirm(parent.op, answer).unwrap();
    let snapshot = engine.snapshot(&form_id()).unwrap();
    assert!(snapshot.check_invariants().is_empty());
    let lines = &snapshot.sections[0].subforms;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].id, nid("sf-100").unwrap());
    assert_eq!(lines[0].fields[0].id, child.created_id().unwrap());

    engine.drive(child.op).await.unwrap();
    assert_eq!(*engine.snapshot(&form_id()).unwrap(), *remote.form(&form_id()).unwrap());
}

#[tokio::test(flavor = "current_thread")]
async fn load_fetches_authoritative_tree() {
    let remote = MemoryRemote::with_form(base());
    let engine = Engine::new(remote.clone(), EngineSettings::default());
    assert_eq!(engine.load(&form_id()).await.unwrap(), 0);
    assert_eq!(*engine.snapshot(&form_id()).unwrap(), base());

    let missing = ServerId::new("form-404").unwrap();
    assert!(engine.load(&missing).await.is_err());
    assert!(engine.snapshot(&missing).is_none());
}

// ── 7. phase-1 refusals ─────────────────────────────────────────────────

#[test]
fn stale_and_unknown_targets_are_refused_without_effect() {
    let (engine, _remote) = engine(DispatchPolicy::SerializePerForm);
    let version = engine.cache().version(&form_id());

    let stale = engine.apply(&form_id(), rename("gone", "x")).unwrap_err();
    assert!(stale.is_benign());
    assert!(MutationError::from(stale).is_benign());

    let wrong_kind = engine
        .apply(
            &form_id(),
            Intent::DeleteSubform {
                id: nid("f1").unwrap(),
            },
        )
        .unwrap_err();
    assert!(wrong_kind.is_benign());

    let unknown = ServerId::new("nope").unwrap();
    assert_eq!(
        engine.apply(&unknown, rename("f1", "x")),
        Err(IntentError::UnknownForm(unknown))
    );

    assert_eq!(engine.cache().version(&form_id()), version);
    assert!(engine.pending(&form_id()).is_empty());
}

// ── 8. notifications ────────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn every_visible_change_notifies_once() {
    let (engine, remote) = engine(DispatchPolicy::SerializePerForm);
    let hits = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&hits);
    engine.subscribe(form_id(), move |_, _, _| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    engine
        .submit(&form_id(), add_field(s1(), "Phone"))
        .await
        .unwrap();
    // apply + reconcile
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    remote.fail_next("update_field", RemoteError::Timeout);
    let _ = engine.submit(&form_id(), rename("f1", "x")).await;
    // apply + rollback
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    // A no-op patch changes nothing and stays silent.
    engine
        .apply(
            &form_id(),
            Intent::UpdateField {
                id: nid("f1").unwrap(),
                patch: FieldPatch::default(),
            },
        )
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}
