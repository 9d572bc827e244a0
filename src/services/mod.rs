// SPDX-License-Identifier: MIT

//! Services module - business logic layer.

pub mod backfill;
pub mod fitbit;
pub mod notifications;
pub mod poller;
pub mod queue;
pub mod reconcile;
pub mod subscriptions;
pub mod tokens;

pub use backfill::BackfillService;
pub use fitbit::FitbitClient;
pub use notifications::NotificationProcessor;
pub use poller::StepsPoller;
pub use queue::QueueWorker;
pub use reconcile::ReconciliationEngine;
pub use subscriptions::SubscriptionService;
pub use tokens::{RefreshLocks, TokenCache, TokenService};
