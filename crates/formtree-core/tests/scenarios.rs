// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, clippy::unwrap_used, clippy::panic)]
//! End-to-end authoring flows against the in-memory collaborator.

use std::sync::Arc;

use formtree_core::{
    locate, Dispatch, Engine, EngineSettings, Intent, IntentError, MutationError, RejectKind,
    RemoteError,
};
use formtree_dry_tests::{nid, FormBuilder, MemoryRemote};
use formtree_model::{
    FieldDraft, FieldKind, Form, FormId, NodeId, ParentRef, ServerId, SubformDraft,
};

fn form_id() -> FormId {
    ServerId::new("form-1").unwrap()
}

fn orders(form: &Form, parent: &NodeId) -> Vec<(String, u32)> {
    let container = locate(form, parent).unwrap().node.as_container().unwrap();
    container
        .fields()
        .iter()
        .map(|f| (f.label.clone(), f.order))
        .collect()
}

fn engine_with(form: Form) -> (Engine<MemoryRemote>, MemoryRemote) {
    let remote = MemoryRemote::with_form(form.clone());
    let engine = Engine::new(remote.clone(), EngineSettings::default());
    engine.hydrate(form);
    (engine, remote)
}

// ── 1. insert at the head, then confirm ─────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn insert_at_head_then_confirm_keeps_position() {
    let form = FormBuilder::new("form-1", "Intake")
        .section("s1", "Main", |s| {
            s.field("f1", FieldKind::Text, "First")
                .field("f2", FieldKind::Text, "Second")
        })
        .build()
        .unwrap();
    let (engine, _remote) = engine_with(form);
    let s1 = nid("s1").unwrap();

    let ticket = engine
        .apply(
            &form_id(),
            Intent::CreateField {
                parent: ParentRef::Section(s1.clone()),
                draft: FieldDraft::new(FieldKind::Text, "Name"),
                at: Some(0),
            },
        )
        .unwrap();
    let temp = ticket.created_id().unwrap();
    let speculative = engine.snapshot(&form_id()).unwrap();
    assert_eq!(
        orders(&speculative, &s1),
        [("Name".into(), 0), ("First".into(), 1), ("Second".into(), 2)]
    );
    assert_eq!(locate(&speculative, &temp).unwrap().location.index, 0);

    let outcome = engine.drive(ticket.op).await.unwrap();
    assert_eq!(
        outcome.alias,
        Some((ticket.created.unwrap(), ServerId::new("f-100").unwrap()))
    );

    let settled = engine.snapshot(&form_id()).unwrap();
    assert!(locate(&settled, &temp).is_err());
    let real = locate(&settled, &nid("f-100").unwrap()).unwrap();
    assert_eq!(real.location.index, 0);
    assert_eq!(
        orders(&settled, &s1),
        [("Name".into(), 0), ("First".into(), 1), ("Second".into(), 2)]
    );
    assert!(settled.check_invariants().is_empty());
    assert!(engine.pending(&form_id()).is_empty());
}

// ── 2. out-of-range insert into a subform, then reject ──────────────────

#[tokio::test(flavor = "current_thread")]
async fn rejected_append_reverts_to_prior_snapshot() {
    let form = FormBuilder::new("form-1", "Order")
        .section("s1", "Main", |s| {
            s.subform("sf1", "Line Items", |sf| sf.field("f1", FieldKind::Text, "Item"))
        })
        .build()
        .unwrap();
    let (engine, remote) = engine_with(form);
    let before = engine.snapshot(&form_id()).unwrap();
    let sf1 = nid("sf1").unwrap();

    let ticket = engine
        .apply(
            &form_id(),
            Intent::CreateField {
                parent: ParentRef::Subform(sf1.clone()),
                draft: FieldDraft::new(FieldKind::Number, "Qty"),
                at: Some(1),
            },
        )
        .unwrap();
    assert_eq!(ticket.index, Some(1));
    assert_eq!(
        orders(&engine.snapshot(&form_id()).unwrap(), &sf1),
        [("Item".into(), 0), ("Qty".into(), 1)]
    );

    remote.fail_next(
        "create_field",
        RemoteError::rejected(RejectKind::Validation, "label taken"),
    );
    let err = engine.drive(ticket.op).await.unwrap_err();
    assert!(matches!(
        err,
        MutationError::RemoteRejected {
            source: RemoteError::Rejected {
                kind: RejectKind::Validation,
                ..
            },
            ..
        }
    ));

    let after = engine.snapshot(&form_id()).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(orders(&after, &sf1), [("Item".into(), 0)]);
}

// ── 3. section permutation ──────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn reorder_sections_and_reject_partial_permutation() {
    let form = FormBuilder::new("form-1", "Survey")
        .section("a", "A", |s| s)
        .section("b", "B", |s| s)
        .section("c", "C", |s| s)
        .build()
        .unwrap();
    let (engine, remote) = engine_with(form);
    let ids = |raw: &[&str]| raw.iter().map(|r| nid(r).unwrap()).collect::<Vec<_>>();

    engine
        .submit(&form_id(), Intent::ReorderSections { ids: ids(&["c", "a", "b"]) })
        .await
        .unwrap();
    let snapshot = engine.snapshot(&form_id()).unwrap();
    let seen: Vec<(String, u32)> = snapshot
        .sections
        .iter()
        .map(|s| (s.id.to_string(), s.order))
        .collect();
    assert_eq!(seen, [("c".into(), 0), ("a".into(), 1), ("b".into(), 2)]);
    assert_eq!(*remote.form(&form_id()).unwrap(), *snapshot);

    let version = engine.cache().version(&form_id());
    let err = engine
        .apply(&form_id(), Intent::ReorderSections { ids: ids(&["a", "b"]) })
        .unwrap_err();
    assert!(matches!(err, IntentError::Order(_)));
    assert!(Arc::ptr_eq(&snapshot, &engine.snapshot(&form_id()).unwrap()));
    assert_eq!(engine.cache().version(&form_id()), version);
    assert!(engine.pending(&form_id()).is_empty());
    assert_eq!(remote.call_count("reorder_sections"), 1);
}

// ── 4. recursive delete ─────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn delete_subform_removes_whole_subtree() {
    let form = FormBuilder::new("form-1", "Claims")
        .section("s1", "Main", |s| {
            s.subform("keep-a", "Before", |sf| sf)
                .subform("doomed", "Doomed", |sf| {
                    sf.field("d1", FieldKind::Text, "One")
                        .field("d2", FieldKind::Text, "Two")
                        .subform("child", "Child", |c| c.field("d3", FieldKind::Text, "Three"))
                })
                .subform("keep-b", "After", |sf| sf)
        })
        .build()
        .unwrap();
    let (engine, _remote) = engine_with(form);

    let ticket = engine
        .apply(
            &form_id(),
            Intent::DeleteSubform {
                id: nid("doomed").unwrap(),
            },
        )
        .unwrap();
    let removed: Vec<String> = ticket.removed.iter().map(ToString::to_string).collect();
    assert_eq!(removed, ["doomed", "d1", "d2", "child", "d3"]);

    let snapshot = engine.snapshot(&form_id()).unwrap();
    for id in &ticket.removed {
        assert!(!snapshot.contains(id));
    }
    let siblings: Vec<(String, u32)> = snapshot.sections[0]
        .subforms
        .iter()
        .map(|s| (s.id.to_string(), s.order))
        .collect();
    assert_eq!(siblings, [("keep-a".into(), 0), ("keep-b".into(), 1)]);
    assert!(snapshot.check_invariants().is_empty());

    engine.drive(ticket.op).await.unwrap();
    assert!(engine.pending(&form_id()).is_empty());
}

// ── 5. cascading rollback through a pending parent ──────────────────────

#[tokio::test(flavor = "current_thread")]
async fn child_of_failed_parent_is_cancelled() {
    let form = FormBuilder::new("form-1", "Intake")
        .section("s1", "Main", |s| s)
        .build()
        .unwrap();
    let (engine, remote) = engine_with(form);
    let before = engine.snapshot(&form_id()).unwrap();

    let parent = engine
        .apply(
            &form_id(),
            Intent::CreateSubform {
                parent: ParentRef::Section(nid("s1").unwrap()),
                draft: SubformDraft::new("Lines"),
                at: None,
            },
        )
        .unwrap();
    let sub = parent.created_id().unwrap();
    let child = engine
        .apply(
            &form_id(),
            Intent::CreateField {
                parent: ParentRef::Subform(sub.clone()),
                draft: FieldDraft::new(FieldKind::Text, "Item"),
                at: None,
            },
        )
        .unwrap();
    let snapshot = engine.snapshot(&form_id()).unwrap();
    assert!(snapshot.contains(&sub));
    assert!(snapshot.contains(&child.created_id().unwrap()));
    assert_eq!(engine.pending(&form_id()).len(), 2);

    remote.fail_next("create_subform", RemoteError::Transport("reset".into()));
    assert!(matches!(
        engine.drive(parent.op).await,
        Err(MutationError::RemoteRejected { .. })
    ));
    assert_eq!(
        engine.next_request(child.op).unwrap(),
        Dispatch::Cancelled {
            parent: parent.created.unwrap()
        }
    );

    assert_eq!(*engine.snapshot(&form_id()).unwrap(), *before);
    assert!(engine.pending(&form_id()).is_empty());
    assert_eq!(remote.calls(), ["create_subform"]);
}

#[tokio::test(flavor = "current_thread")]
async fn driving_a_cancelled_child_reports_its_parent() {
    let form = FormBuilder::new("form-1", "Intake")
        .section("s1", "Main", |s| s)
        .build()
        .unwrap();
    let (engine, remote) = engine_with(form);

    let parent = engine
        .apply(
            &form_id(),
            Intent::CreateSubform {
                parent: ParentRef::Section(nid("s1").unwrap()),
                draft: SubformDraft::new("Lines"),
                at: None,
            },
        )
        .unwrap();
    let child = engine
        .apply(
            &form_id(),
            Intent::CreateField {
                parent: ParentRef::Subform(parent.created_id().unwrap()),
                draft: FieldDraft::new(FieldKind::Text, "Item"),
                at: None,
            },
        )
        .unwrap();

    remote.fail_next("create_subform", RemoteError::Timeout);
    let (first, second) = tokio::join!(engine.drive(parent.op), engine.drive(child.op));
    assert!(matches!(
        first,
        Err(MutationError::RemoteRejected {
            source: RemoteError::Timeout,
            ..
        })
    ));
    assert_eq!(
        second,
        Err(MutationError::Cancelled {
            op: child.op,
            parent: parent.created.unwrap()
        })
    );
}
