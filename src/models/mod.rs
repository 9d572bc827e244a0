// SPDX-License-Identifier: MIT

//! Data models for the application.

pub mod account;
pub mod job;
pub mod notification;
pub mod reading;
pub mod subscription;

pub use account::{LinkedAccount, PROVIDER_FITBIT};
pub use job::{backoff, JobStatus, QueuedJob, JOB_TYPE_NOTIFICATION, MAX_JOB_RETRIES};
pub use notification::{CollectionType, WebhookNotification};
pub use reading::{AccountReading, DailyTotal, Granularity, RawReading};
pub use subscription::Subscription;
