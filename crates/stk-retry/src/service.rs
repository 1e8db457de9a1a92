//! The retry queue itself: an in-memory job table keyed by sale, with
//! dedup on enqueue, FIFO claiming under the concurrency cap, and counters
//! for the operator surface. Durability comes from the sync audit log, not
//! from this table; a restart rebuilds it via recovery.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use stk_schemas::SaleLine;

use crate::job::{AttemptOutcome, JobStatus, RetryJob};
use crate::policy::RetryPolicy;

/// Everything needed to open a job for a sale.
#[derive(Debug, Clone)]
pub struct NewRetry {
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub lines: Vec<SaleLine>,
    pub applied_items: Vec<Uuid>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    pub total_jobs: usize,
    pub pending_jobs: usize,
    pub processing_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualRetryError {
    NotFound { sale_id: Uuid },
    InFlight { sale_id: Uuid },
    AlreadyCompleted { sale_id: Uuid },
}

impl fmt::Display for ManualRetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualRetryError::NotFound { sale_id } => {
                write!(f, "no retry job for sale {sale_id}")
            }
            ManualRetryError::InFlight { sale_id } => {
                write!(f, "retry job for sale {sale_id} is already running")
            }
            ManualRetryError::AlreadyCompleted { sale_id } => {
                write!(f, "retry job for sale {sale_id} already completed")
            }
        }
    }
}

impl std::error::Error for ManualRetryError {}

pub struct RetryService {
    policy: RetryPolicy,
    jobs: Mutex<BTreeMap<Uuid, RetryJob>>,
}

impl RetryService {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            jobs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Open a job for a sale. An active (pending or processing) job for the
    /// same sale wins over the new one; a settled job is replaced with a
    /// fresh attempt budget. Returns whether a job was opened.
    pub fn enqueue(&self, new: NewRetry, now: DateTime<Utc>) -> bool {
        let mut jobs = self.lock();
        if let Some(existing) = jobs.get(&new.sale_id) {
            if existing.status.is_active() {
                tracing::debug!(sale_id = %new.sale_id, "retry already queued for sale");
                return false;
            }
        }
        tracing::info!(sale_id = %new.sale_id, reason = %new.reason, "retry queued");
        jobs.insert(
            new.sale_id,
            RetryJob::new(
                new.sale_id,
                new.store_id,
                new.lines,
                new.applied_items,
                new.reason,
                now,
            ),
        );
        true
    }

    /// Claim up to `policy.concurrency` due jobs, oldest first, marking each
    /// `Processing`. Returned snapshots are what the worker executes.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Vec<RetryJob> {
        let mut jobs = self.lock();
        // FIFO by creation time; sale id only breaks exact ties.
        let mut due: Vec<(DateTime<Utc>, Uuid)> = jobs
            .values()
            .filter(|j| j.is_due(&self.policy, now))
            .map(|j| (j.created_at, j.sale_id))
            .collect();
        due.sort();
        due.truncate(self.policy.concurrency);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, sale_id) in due {
            if let Some(job) = jobs.get_mut(&sale_id) {
                if job.pick_up(now).is_ok() {
                    claimed.push(job.clone());
                }
            }
        }
        claimed
    }

    /// Operator-triggered run: claims the job right now, backoff ignored.
    pub fn claim_manual(
        &self,
        sale_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RetryJob, ManualRetryError> {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(&sale_id)
            .ok_or(ManualRetryError::NotFound { sale_id })?;
        match job.pick_up_manual(now) {
            Ok(()) => Ok(job.clone()),
            Err(e) if e.from == JobStatus::Processing => {
                Err(ManualRetryError::InFlight { sale_id })
            }
            Err(_) => Err(ManualRetryError::AlreadyCompleted { sale_id }),
        }
    }

    /// Fold an attempt outcome back into the job. `None` means the queue no
    /// longer tracks the sale or the job was not running.
    pub fn settle(&self, sale_id: Uuid, outcome: &AttemptOutcome) -> Option<JobStatus> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(&sale_id)?;
        match job.settle(outcome, self.policy.max_attempts) {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(%sale_id, error = %e, "retry settle rejected");
                None
            }
        }
    }

    pub fn get(&self, sale_id: Uuid) -> Option<RetryJob> {
        self.lock().get(&sale_id).cloned()
    }

    pub fn stats(&self) -> RetryStats {
        let jobs = self.lock();
        let mut stats = RetryStats {
            total_jobs: jobs.len(),
            pending_jobs: 0,
            processing_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending_jobs += 1,
                JobStatus::Processing => stats.processing_jobs += 1,
                JobStatus::Completed => stats.completed_jobs += 1,
                JobStatus::Failed => stats.failed_jobs += 1,
            }
        }
        stats
    }

    /// Every tracked job, newest first, for the operator listing.
    pub fn jobs_newest_first(&self) -> Vec<RetryJob> {
        let mut all: Vec<RetryJob> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.sale_id.cmp(&a.sale_id)));
        all
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Uuid, RetryJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn line() -> SaleLine {
        SaleLine {
            product_id: Uuid::new_v4(),
            product_name: "Croffle".into(),
            quantity: 1,
        }
    }

    fn new_retry(sale_id: Uuid) -> NewRetry {
        NewRetry {
            sale_id,
            store_id: Uuid::new_v4(),
            lines: vec![line()],
            applied_items: Vec::new(),
            reason: "concurrent update detected".into(),
        }
    }

    fn transient() -> AttemptOutcome {
        AttemptOutcome::Retry {
            detail: "still conflicting".into(),
            applied_items: Vec::new(),
        }
    }

    #[test]
    fn enqueue_dedups_active_jobs_per_sale() {
        let service = RetryService::new(RetryPolicy::default());
        let sale = Uuid::new_v4();
        let now = Utc::now();

        assert!(service.enqueue(new_retry(sale), now));
        assert!(!service.enqueue(new_retry(sale), now), "pending job blocks");
        assert_eq!(service.stats().total_jobs, 1);
    }

    #[test]
    fn settled_jobs_are_replaced_by_a_fresh_enqueue() {
        let service = RetryService::new(RetryPolicy::default());
        let sale = Uuid::new_v4();
        let now = Utc::now();

        service.enqueue(new_retry(sale), now);
        service.claim_due(now);
        service.settle(sale, &AttemptOutcome::Completed { items_deducted: 1 });

        assert!(service.enqueue(new_retry(sale), now));
        let job = service.get(sale).expect("job");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0, "fresh job gets a fresh budget");
    }

    #[test]
    fn claim_is_fifo_and_capped_by_concurrency() {
        let service = RetryService::new(RetryPolicy::default());
        let t0 = Utc::now();
        let mut sales = Vec::new();
        for i in 0..5 {
            let sale = Uuid::new_v4();
            sales.push(sale);
            service.enqueue(new_retry(sale), t0 + Duration::milliseconds(i));
        }

        let first = service.claim_due(t0 + Duration::seconds(1));
        assert_eq!(first.len(), 3);
        let claimed: Vec<Uuid> = first.iter().map(|j| j.sale_id).collect();
        assert_eq!(claimed, sales[..3].to_vec(), "oldest three first");

        let second = service.claim_due(t0 + Duration::seconds(1));
        assert_eq!(second.len(), 2, "remainder on the next scan");
    }

    #[test]
    fn claim_skips_jobs_still_inside_their_backoff() {
        let service = RetryService::new(RetryPolicy::default());
        let sale = Uuid::new_v4();
        let t0 = Utc::now();
        service.enqueue(new_retry(sale), t0);

        let claimed = service.claim_due(t0);
        assert_eq!(claimed.len(), 1);
        service.settle(sale, &transient());

        // 2s backoff after one attempt.
        assert!(service.claim_due(t0 + Duration::seconds(1)).is_empty());
        assert_eq!(service.claim_due(t0 + Duration::seconds(2)).len(), 1);
    }

    #[test]
    fn budget_exhaustion_fails_the_job() {
        let policy = RetryPolicy {
            base_delay_ms: 0,
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let service = RetryService::new(policy);
        let sale = Uuid::new_v4();
        let now = Utc::now();
        service.enqueue(new_retry(sale), now);

        for _ in 0..2 {
            assert_eq!(service.claim_due(now).len(), 1);
            assert_eq!(service.settle(sale, &transient()), Some(JobStatus::Pending));
        }
        assert_eq!(service.claim_due(now).len(), 1);
        assert_eq!(service.settle(sale, &transient()), Some(JobStatus::Failed));
        assert!(service.claim_due(now).is_empty(), "failed jobs are not scanned");
    }

    #[test]
    fn manual_retry_ignores_backoff_and_lifts_failures() {
        let policy = RetryPolicy {
            base_delay_ms: 0,
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let service = RetryService::new(policy);
        let sale = Uuid::new_v4();
        let now = Utc::now();
        service.enqueue(new_retry(sale), now);
        service.claim_due(now);
        service.settle(sale, &transient());
        assert_eq!(service.get(sale).map(|j| j.status), Some(JobStatus::Failed));

        let job = service.claim_manual(sale, now).expect("manual claim");
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn manual_retry_reports_missing_running_and_completed_jobs() {
        let service = RetryService::new(RetryPolicy::default());
        let now = Utc::now();
        let missing = Uuid::new_v4();
        assert_eq!(
            service.claim_manual(missing, now),
            Err(ManualRetryError::NotFound { sale_id: missing })
        );

        let sale = Uuid::new_v4();
        service.enqueue(new_retry(sale), now);
        service.claim_due(now);
        assert_eq!(
            service.claim_manual(sale, now),
            Err(ManualRetryError::InFlight { sale_id: sale })
        );

        service.settle(sale, &AttemptOutcome::Completed { items_deducted: 1 });
        assert_eq!(
            service.claim_manual(sale, now),
            Err(ManualRetryError::AlreadyCompleted { sale_id: sale })
        );
    }

    #[test]
    fn stats_count_jobs_by_status() {
        let service = RetryService::new(RetryPolicy {
            base_delay_ms: 0,
            ..RetryPolicy::default()
        });
        let now = Utc::now();
        let completed = Uuid::new_v4();
        let running = Uuid::new_v4();
        let pending = Uuid::new_v4();
        for sale in [completed, running, pending] {
            service.enqueue(new_retry(sale), now);
        }
        service.claim_due(now); // claims all three (concurrency 3)
        service.settle(completed, &AttemptOutcome::Completed { items_deducted: 1 });
        service.settle(pending, &transient());

        let stats = service.stats();
        assert_eq!(stats.total_jobs, 3);
        assert_eq!(stats.completed_jobs, 1);
        assert_eq!(stats.processing_jobs, 1);
        assert_eq!(stats.pending_jobs, 1);
        assert_eq!(stats.failed_jobs, 0);
    }

    #[test]
    fn job_listing_is_newest_first() {
        let service = RetryService::new(RetryPolicy::default());
        let t0 = Utc::now();
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        service.enqueue(new_retry(older), t0);
        service.enqueue(new_retry(newer), t0 + Duration::seconds(1));

        let listing = service.jobs_newest_first();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].sale_id, newer);
        assert_eq!(listing[1].sale_id, older);
    }
}
