// SPDX-License-Identifier: MIT

//! Queued webhook job model and retry backoff schedule.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Job type for Fitbit webhook notifications.
pub const JOB_TYPE_NOTIFICATION: &str = "fitbit_notification";

/// Retryable jobs are abandoned after this many attempts.
pub const MAX_JOB_RETRIES: i32 = 3;

/// Job lifecycle: pending -> processing -> completed | pending (retry) | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A durable job created by the webhook gateway and consumed by the worker.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueuedJob {
    pub id: i64,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub retries: i32,
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Delay before a job with the given retry count becomes eligible again.
///
/// Tiers: 1 minute, 5 minutes, then 15 minutes for any further retries.
pub fn backoff(retries: i32) -> Duration {
    match retries {
        i32::MIN..=0 => Duration::zero(),
        1 => Duration::minutes(1),
        2 => Duration::minutes(5),
        _ => Duration::minutes(15),
    }
}

impl QueuedJob {
    /// Earliest instant at which the worker may pick this job up again.
    pub fn eligible_at(&self) -> DateTime<Utc> {
        self.updated_at + backoff(self.retries)
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        now >= self.eligible_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(retries: i32, updated_at: DateTime<Utc>) -> QueuedJob {
        QueuedJob {
            id: 1,
            job_type: JOB_TYPE_NOTIFICATION.to_string(),
            payload: serde_json::json!({}),
            status: JobStatus::Pending,
            retries,
            error: None,
            processed_at: None,
            created_at: updated_at,
            updated_at,
        }
    }

    #[test]
    fn test_backoff_tiers() {
        assert_eq!(backoff(0), Duration::zero());
        assert_eq!(backoff(1), Duration::minutes(1));
        assert_eq!(backoff(2), Duration::minutes(5));
        assert_eq!(backoff(3), Duration::minutes(15));
        // Saturates at the last tier
        assert_eq!(backoff(7), Duration::minutes(15));
    }

    #[test]
    fn test_fresh_job_is_immediately_eligible() {
        let now = Utc::now();
        assert!(job_with(0, now).is_eligible(now));
    }

    #[test]
    fn test_eligibility_respects_backoff() {
        let now = Utc::now();

        let retried_once = job_with(1, now);
        assert!(!retried_once.is_eligible(now + Duration::seconds(59)));
        assert!(retried_once.is_eligible(now + Duration::minutes(1)));

        let retried_twice = job_with(2, now);
        assert!(!retried_twice.is_eligible(now + Duration::minutes(4)));
        assert!(retried_twice.is_eligible(now + Duration::minutes(5)));

        let retried_thrice = job_with(3, now);
        assert!(!retried_thrice.is_eligible(now + Duration::minutes(14)));
        assert!(retried_thrice.is_eligible(now + Duration::minutes(15)));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Failed).unwrap(),
            "\"failed\""
        );
    }
}
