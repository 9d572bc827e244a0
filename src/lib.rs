// SPDX-License-Identifier: MIT

//! Stridesync: step-count synchronization and reconciliation backend.
//!
//! This crate ingests step activity from the Fitbit Web API through
//! webhooks and scheduled polling, and reconciles overlapping readings
//! from multiple connected providers into one authoritative per-user
//! daily total.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use db::Store;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Store,
}
