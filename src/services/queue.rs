// SPDX-License-Identifier: MIT

//! Job queue worker.
//!
//! Claims the oldest eligible pending job, dispatches it, and records the
//! outcome. Retry backoff lives in the claim predicate (no scheduler); a
//! bounded batch per invocation keeps a backlog from starving the other
//! loops sharing the process.

use crate::db::Store;
use crate::error::{categorize, AppError, ErrorKind};
use crate::models::{backoff, QueuedJob, WebhookNotification, JOB_TYPE_NOTIFICATION, MAX_JOB_RETRIES};
use crate::services::notifications::NotificationProcessor;
use chrono::{Duration, Utc};
use validator::Validate;

/// Jobs processed per worker invocation.
const BATCH_SIZE: usize = 10;

/// Jobs stuck in `processing` longer than this are returned to `pending`.
const STUCK_JOB_RECLAIM_MINUTES: i64 = 10;

/// Counters for one worker invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct QueueWorker {
    store: Store,
    processor: NotificationProcessor,
}

impl QueueWorker {
    pub fn new(store: Store, processor: NotificationProcessor) -> Self {
        Self { store, processor }
    }

    /// Process up to one batch of jobs. Never propagates job failures.
    pub async fn run_batch(&self) -> BatchStats {
        let cutoff = Utc::now() - Duration::minutes(STUCK_JOB_RECLAIM_MINUTES);
        match self.store.reclaim_stuck_jobs(cutoff).await {
            Ok(0) => {}
            Ok(count) => tracing::warn!(count, "Requeued jobs stuck in processing"),
            Err(e) => tracing::error!(error = %e, "Failed to reclaim stuck jobs"),
        }

        let mut stats = BatchStats::default();

        for _ in 0..BATCH_SIZE {
            match self.process_next().await {
                Ok(Some(succeeded)) => {
                    stats.processed += 1;
                    if succeeded {
                        stats.succeeded += 1;
                    } else {
                        stats.failed += 1;
                    }
                }
                Ok(None) => break, // queue drained
                Err(e) => {
                    tracing::error!(error = %e, "Queue iteration failed");
                    break;
                }
            }
        }

        if stats.processed > 0 {
            tracing::info!(
                processed = stats.processed,
                succeeded = stats.succeeded,
                failed = stats.failed,
                "Completed queue batch"
            );
        } else {
            tracing::debug!("No pending jobs to process");
        }

        stats
    }

    /// Claim and run one job. `Ok(None)` means nothing was eligible.
    async fn process_next(&self) -> Result<Option<bool>, AppError> {
        let Some(job) = self.store.claim_next_job().await? else {
            return Ok(None);
        };

        tracing::info!(
            job_id = job.id,
            job_type = %job.job_type,
            attempt = job.retries + 1,
            max_retries = MAX_JOB_RETRIES,
            "Processing job"
        );

        if job.job_type != JOB_TYPE_NOTIFICATION {
            self.record_failure(
                &job,
                ErrorKind::Validation,
                &format!("Unknown job type: {}", job.job_type),
            )
            .await?;
            return Ok(Some(false));
        }

        // Re-validate the payload; a malformed one can never succeed.
        let notification = match parse_payload(&job) {
            Ok(n) => n,
            Err(msg) => {
                tracing::error!(job_id = job.id, error = %msg, "Invalid job payload");
                self.record_failure(&job, ErrorKind::Validation, &msg).await?;
                return Ok(Some(false));
            }
        };

        let result = if notification.collection_type.is_account_state() {
            self.processor
                .handle_access_revoked(&notification.owner_id)
                .await
        } else {
            self.processor.process(&notification).await
        };

        match result {
            Ok(()) => {
                self.store.complete_job(job.id).await?;
                tracing::info!(job_id = job.id, "Job completed");
                Ok(Some(true))
            }
            Err(e) => {
                let kind = categorize(&e);
                tracing::error!(job_id = job.id, kind = %kind, error = %e, "Job processing failed");
                self.record_failure(&job, kind, &e.to_string()).await?;
                Ok(Some(false))
            }
        }
    }

    /// Record a failure: terminal kinds fail immediately, retryable kinds
    /// requeue until the retry budget runs out.
    async fn record_failure(
        &self,
        job: &QueuedJob,
        kind: ErrorKind,
        message: &str,
    ) -> Result<(), AppError> {
        let annotated = format!("[{}] {}", kind, message);

        if !kind.is_retryable() {
            self.store.fail_job(job.id, job.retries, &annotated).await?;
            tracing::error!(
                job_id = job.id,
                kind = %kind,
                error = message,
                "Job failed permanently (non-retryable)"
            );
            return Ok(());
        }

        let retries = job.retries + 1;
        if retries >= MAX_JOB_RETRIES {
            self.store.fail_job(job.id, retries, &annotated).await?;
            tracing::error!(
                job_id = job.id,
                retries,
                kind = %kind,
                error = message,
                "Job failed permanently after retries"
            );
        } else {
            self.store.requeue_job(job.id, retries, &annotated).await?;
            tracing::warn!(
                job_id = job.id,
                attempt = retries,
                max_retries = MAX_JOB_RETRIES,
                retry_in_minutes = backoff(retries).num_minutes(),
                kind = %kind,
                error = message,
                "Job failed, will retry"
            );
        }
        Ok(())
    }
}

/// Deserialize and schema-validate a job payload.
fn parse_payload(job: &QueuedJob) -> Result<WebhookNotification, String> {
    let notification: WebhookNotification = serde_json::from_value(job.payload.clone())
        .map_err(|e| format!("Invalid payload schema: {}", e))?;
    notification
        .validate()
        .map_err(|e| format!("Invalid payload schema: {}", e))?;
    Ok(notification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    fn job_with_payload(payload: serde_json::Value) -> QueuedJob {
        QueuedJob {
            id: 1,
            job_type: JOB_TYPE_NOTIFICATION.to_string(),
            payload,
            status: JobStatus::Processing,
            retries: 0,
            error: None,
            processed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_payload_accepts_valid_notification() {
        let job = job_with_payload(serde_json::json!({
            "collectionType": "activities",
            "date": "2024-01-15",
            "ownerId": "ABC",
            "ownerType": "user",
            "subscriptionId": "7-activities"
        }));
        let n = parse_payload(&job).unwrap();
        assert_eq!(n.owner_id, "ABC");
    }

    #[test]
    fn test_parse_payload_rejects_schema_garbage() {
        let job = job_with_payload(serde_json::json!({"collectionType": "activities"}));
        assert!(parse_payload(&job).is_err());

        let job = job_with_payload(serde_json::json!({
            "collectionType": "activities",
            "date": "not-a-date",
            "ownerId": "ABC",
            "ownerType": "user",
            "subscriptionId": "7-activities"
        }));
        assert!(parse_payload(&job).is_err());
    }
}
