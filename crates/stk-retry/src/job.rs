//! Retry job lifecycle.
//!
//! # Invariants
//!
//! - A job runs only from `Pending` (manual runs also lift `Failed`).
//! - `attempts` counts pick-ups, never skipping: every execution was
//!   preceded by exactly one `pick_up`.
//! - `Completed` and `Failed` are terminal for the scan loop; only a manual
//!   run leaves `Failed`.
//! - Item ids applied by any attempt accumulate on the job, so the next
//!   attempt deducts the remainder only.
//!
//! All logic is pure deterministic: no IO, no clock, no randomness; the
//! caller supplies `now`.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stk_schemas::{DeductionReport, DeductionRequest, SaleLine};

use crate::policy::RetryPolicy;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Active jobs block a re-enqueue of the same sale.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

// ---------------------------------------------------------------------------
// Attempt outcome
// ---------------------------------------------------------------------------

/// What one executed attempt came back as. Built by the caller from the
/// deduction report; the queue never inspects reports itself.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// Every remaining item applied; the sale is settled.
    Completed { items_deducted: u32 },
    /// Transient failure, worth another attempt if the budget allows.
    Retry {
        detail: String,
        applied_items: Vec<Uuid>,
    },
    /// Data failure no amount of retrying can fix.
    Terminal {
        detail: String,
        applied_items: Vec<Uuid>,
    },
}

impl AttemptOutcome {
    /// Classify a deduction report. Duplicates count as completed: the sale
    /// is settled, whoever settled it.
    pub fn from_report(report: &DeductionReport) -> Self {
        if report.success {
            return AttemptOutcome::Completed {
                items_deducted: report.deducted.len() as u32,
            };
        }
        let detail = report
            .errors
            .iter()
            .map(|e| e.message.clone())
            .collect::<Vec<_>>()
            .join("; ");
        let applied_items = report.applied_item_ids();
        if report.has_retryable_errors() {
            AttemptOutcome::Retry {
                detail,
                applied_items,
            }
        } else {
            AttemptOutcome::Terminal {
                detail,
                applied_items,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Transition error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: JobStatus,
    pub event: &'static str,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "retry job cannot {} from status '{}'",
            self.event,
            self.from.as_str()
        )
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryJob {
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub lines: Vec<SaleLine>,
    /// Item ids already deducted on earlier attempts; retries exclude them.
    pub applied_items: Vec<Uuid>,
    pub attempts: u32,
    pub status: JobStatus,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl RetryJob {
    pub fn new(
        sale_id: Uuid,
        store_id: Uuid,
        lines: Vec<SaleLine>,
        applied_items: Vec<Uuid>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sale_id,
            store_id,
            lines,
            applied_items,
            attempts: 0,
            status: JobStatus::Pending,
            reason: reason.into(),
            created_at: now,
            last_attempt_at: None,
        }
    }

    /// Backoff gate. A never-attempted job is due immediately; otherwise the
    /// policy delay for the attempts made so far must have elapsed.
    pub fn is_due(&self, policy: &RetryPolicy, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        match self.last_attempt_at {
            None => true,
            Some(last) => {
                let delay = Duration::milliseconds(policy.delay_ms(self.attempts) as i64);
                now >= last + delay
            }
        }
    }

    /// Claim for execution: `Pending` only.
    pub fn pick_up(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Pending {
            return Err(TransitionError {
                from: self.status,
                event: "pick up",
            });
        }
        self.begin_attempt(now);
        Ok(())
    }

    /// Operator-driven claim: ignores backoff, and also lifts `Failed` jobs
    /// for another go.
    pub fn pick_up_manual(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match self.status {
            JobStatus::Pending | JobStatus::Failed => {
                self.begin_attempt(now);
                Ok(())
            }
            from => Err(TransitionError {
                from,
                event: "manually run",
            }),
        }
    }

    /// Apply the attempt result. Transient failures fall back to `Pending`
    /// until the attempt budget runs out; terminal ones fail immediately.
    pub fn settle(
        &mut self,
        outcome: &AttemptOutcome,
        max_attempts: u32,
    ) -> Result<JobStatus, TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(TransitionError {
                from: self.status,
                event: "settle",
            });
        }
        match outcome {
            AttemptOutcome::Completed { .. } => {
                self.status = JobStatus::Completed;
            }
            AttemptOutcome::Retry {
                detail,
                applied_items,
            } => {
                self.merge_applied(applied_items);
                self.reason = detail.clone();
                self.status = if self.attempts >= max_attempts {
                    JobStatus::Failed
                } else {
                    JobStatus::Pending
                };
            }
            AttemptOutcome::Terminal {
                detail,
                applied_items,
            } => {
                self.merge_applied(applied_items);
                self.reason = detail.clone();
                self.status = JobStatus::Failed;
            }
        }
        Ok(self.status)
    }

    /// The deduction request this job re-runs: the original sale, lines and
    /// all. Exclusions ride separately via `applied_items`.
    pub fn to_request(&self) -> DeductionRequest {
        DeductionRequest {
            sale_id: self.sale_id,
            store_id: self.store_id,
            lines: self.lines.clone(),
        }
    }

    fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.attempts += 1;
        self.last_attempt_at = Some(now);
    }

    fn merge_applied(&mut self, items: &[Uuid]) {
        for id in items {
            if !self.applied_items.contains(id) {
                self.applied_items.push(*id);
            }
        }
    }
}
