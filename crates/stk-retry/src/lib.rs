//! stk-retry
//!
//! Retry queue for failed stock deductions:
//! - jobs move pending -> processing -> {completed | pending | failed}
//! - exponential backoff between attempts, capped, with a bounded budget
//! - the scan loop claims a small batch per tick and joins it before the
//!   next scan
//! - the queue itself is in-memory; restarts rebuild it from the sync
//!   audit log

pub mod job;
pub mod policy;
pub mod service;
pub mod worker;

pub use job::{AttemptOutcome, JobStatus, RetryJob, TransitionError};
pub use policy::RetryPolicy;
pub use service::{ManualRetryError, NewRetry, RetryService, RetryStats};
pub use worker::{recover_from_audit, run_due_batch, spawn_retry_worker, RECOVERY_REASON};
