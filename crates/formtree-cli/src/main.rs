// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! formtree CLI entrypoint.
//!
//! Developer commands for form-schema trees:
//!
//! - `formtree replay --form form.json --script intents.json` submits every
//!   scripted intent through the optimistic engine against an in-memory
//!   collaborator seeded with the form, then prints a JSON report (final tree,
//!   per-intent outcome, notification count).
//! - `formtree check --form form.json` verifies structural invariants and
//!   exits non-zero on the first broken tree.
//!
//! Logs go to stderr; `RUST_LOG` overrides the level, `--verbose` defaults it
//! to `debug`.

// The CLI is expected to print to stdout/stderr.
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod replay;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use formtree_app_core::config::ConfigService;
use formtree_app_core::settings::{DispatchPolicy, EngineSettings};
use formtree_config_fs::FsConfigStore;
use formtree_model::Form;
use serde::de::DeserializeOwned;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "formtree developer CLI")]
struct Args {
    /// Log at debug level (unless RUST_LOG is set)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON intent script against a form
    Replay {
        /// Form snapshot (JSON)
        #[arg(long)]
        form: PathBuf,
        /// Array of intents (JSON)
        #[arg(long)]
        script: PathBuf,
        /// Make the next call of this kind fail (repeatable), e.g. `create_field`
        #[arg(long = "fail", value_name = "CALL")]
        fail: Vec<String>,
        /// Override the configured dispatch policy
        #[arg(long, value_enum)]
        dispatch: Option<Dispatch>,
        /// Read engine settings from this directory instead of the platform config dir
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
    /// Check structural invariants of a form
    Check {
        /// Form snapshot (JSON)
        #[arg(long)]
        form: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Dispatch {
    /// One request in flight per form
    Serialize,
    /// Requests overlap; only temp-id dependencies wait
    Concurrent,
}

impl From<Dispatch> for DispatchPolicy {
    fn from(value: Dispatch) -> Self {
        match value {
            Dispatch::Serialize => Self::SerializePerForm,
            Dispatch::Concurrent => Self::Concurrent,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    match args.cmd {
        Command::Replay {
            form,
            script,
            fail,
            dispatch,
            config_dir,
        } => {
            let mut settings = load_settings(config_dir.as_deref())?;
            if let Some(dispatch) = dispatch {
                settings.dispatch = dispatch.into();
            }
            let form: Form = read_json(&form)?;
            let script = read_json(&script)?;
            let report = replay::run(form, script, &fail, settings).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Check { form } => check(&form),
    }
}

fn check(path: &Path) -> Result<()> {
    let form: Form = read_json(path)?;
    let violations = form.check_invariants();
    if violations.is_empty() {
        println!("ok: {} nodes", form.node_count());
        return Ok(());
    }
    for violation in &violations {
        eprintln!("violation: {violation}");
    }
    bail!("{} invariant violation(s) in {}", violations.len(), path.display())
}

fn load_settings(config_dir: Option<&Path>) -> Result<EngineSettings> {
    let store = match config_dir {
        Some(dir) => FsConfigStore::at(dir)
            .with_context(|| format!("opening config dir {}", dir.display()))?,
        None => match FsConfigStore::new() {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "no platform config dir; using default settings");
                return Ok(EngineSettings::default());
            }
        },
    };
    EngineSettings::load(&ConfigService::new(store)).context("loading engine settings")
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
}
