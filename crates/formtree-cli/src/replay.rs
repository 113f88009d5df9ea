// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `formtree replay`: drive a script of intents through the engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use formtree_app_core::settings::EngineSettings;
use formtree_core::{Engine, Intent, MutationError, RejectKind, RemoteError};
use formtree_dry_tests::MemoryRemote;
use formtree_model::{Form, FormId};
use serde::Serialize;
use tokio::task::LocalSet;
use tracing::info;

/// Call kinds `--fail` accepts.
const CALLS: [&str; 14] = [
    "fetch_form",
    "update_form",
    "create_section",
    "update_section",
    "delete_section",
    "reorder_sections",
    "create_field",
    "update_field",
    "delete_field",
    "reorder_fields",
    "create_subform",
    "update_subform",
    "delete_subform",
    "reorder_subforms",
];

/// Outcome of one scripted intent.
#[derive(Debug, Serialize)]
pub struct Step {
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    op: Option<String>,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// What `replay` prints.
#[derive(Debug, Serialize)]
pub struct Report {
    form: Form,
    notifications: u64,
    steps: Vec<Step>,
}

fn call_label(raw: &str) -> Result<&'static str> {
    CALLS
        .iter()
        .copied()
        .find(|c| *c == raw)
        .with_context(|| {
            format!(
                "unknown call kind `{raw}` (expected one of: {})",
                CALLS.join(", ")
            )
        })
}

/// Seed an in-memory collaborator with `form`, submit every intent, report.
pub async fn run(
    form: Form,
    script: Vec<Intent>,
    fail: &[String],
    settings: EngineSettings,
) -> Result<Report> {
    let remote = MemoryRemote::with_form(form.clone());
    for raw in fail {
        remote.fail_next(
            call_label(raw)?,
            RemoteError::rejected(RejectKind::Other, "scripted failure"),
        );
    }

    let form_id = form.id.clone();
    let engine = Engine::new(remote, settings);
    engine.hydrate(form);

    let notifications = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&notifications);
    engine.subscribe(form_id.clone(), move |_, _, _| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    let steps = LocalSet::new()
        .run_until(submit_all(&engine, &form_id, script))
        .await;
    let snapshot = engine
        .snapshot(&form_id)
        .context("form disappeared from the cache")?;
    info!(steps = steps.len(), "replay finished");

    Ok(Report {
        form: (*snapshot).clone(),
        notifications: notifications.load(Ordering::Relaxed),
        steps,
    })
}

async fn submit_all(
    engine: &Engine<MemoryRemote>,
    form: &FormId,
    script: Vec<Intent>,
) -> Vec<Step> {
    let mut steps = Vec::with_capacity(script.len());
    let mut running = Vec::new();
    for (index, intent) in script.into_iter().enumerate() {
        match engine.spawn_submit(form, intent) {
            Ok((ticket, handle)) => running.push((index, ticket.op, handle)),
            Err(err) => steps.push(Step {
                index,
                op: None,
                outcome: if err.is_benign() { "skipped" } else { "refused" },
                detail: Some(err.to_string()),
            }),
        }
    }

    for (index, op, handle) in running {
        let (outcome, detail) = match handle.await {
            Ok(Ok(done)) => (
                "confirmed",
                done.alias.map(|(temp, real)| format!("{temp} -> {real}")),
            ),
            Ok(Err(err @ MutationError::Cancelled { .. })) => ("cancelled", Some(err.to_string())),
            Ok(Err(err)) => ("rolled_back", Some(err.to_string())),
            Err(join) => ("aborted", Some(join.to_string())),
        };
        steps.push(Step {
            index,
            op: Some(op.to_string()),
            outcome,
            detail,
        });
    }
    steps.sort_by_key(|s| s.index);
    steps
}
