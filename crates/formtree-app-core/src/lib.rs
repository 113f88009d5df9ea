// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for formtree tools (config storage, engine settings).
//! Keeps adapters thin and transport-agnostic.

pub mod config;
pub mod settings;
