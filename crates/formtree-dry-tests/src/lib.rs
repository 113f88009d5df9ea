// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for formtree crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`fixtures`] - Form tree builder
//! - [`remote`] - In-memory persistence collaborator with scripted failures and gates

pub mod config;
pub mod fixtures;
pub mod remote;

pub use config::InMemoryConfigStore;
pub use fixtures::{nid, ContainerBuilder, FormBuilder};
pub use remote::{until, Gate, MemoryRemote};
