//! stk-audit
//!
//! Sync Audit Log: append-only JSONL record of every deduction attempt
//! outcome, one canonical JSON line per attempt. The retry queue reads this
//! log on startup to reconstruct unresolved work; the log, not a job table,
//! is the durable state.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use stk_schemas::{SyncOutcome, STK_ID_NAMESPACE};

/// Default on-disk location when `STK_AUDIT_LOG` is not set.
pub const DEFAULT_AUDIT_PATH: &str = "stockkeep_audit.jsonl";
/// How far back startup recovery scans.
pub const RECOVERY_WINDOW_HOURS: i64 = 24;
/// Cap on re-enqueued sales per recovery pass.
pub const RECOVERY_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Sink seam
// ---------------------------------------------------------------------------

/// Where attempt outcomes go. The JSONL log below is the default; `stk-db`
/// offers a Postgres-backed implementation of the same trait.
#[async_trait]
pub trait SyncAuditSink: Send + Sync {
    async fn record_outcome(&self, outcome: SyncOutcome) -> Result<()>;

    /// Latest-outcome-per-sale view of still-unresolved sales inside the
    /// window, newest first, at most `limit`. A sale whose newest record is
    /// a success variant is resolved and never returned.
    async fn recent_unresolved(
        &self,
        now: DateTime<Utc>,
        window_hours: i64,
        limit: usize,
    ) -> Result<Vec<SyncOutcome>>;
}

// Shared sinks delegate, so one log can serve the coordinator, the retry
// worker, and startup recovery at once.
#[async_trait]
impl<T: SyncAuditSink + ?Sized> SyncAuditSink for std::sync::Arc<T> {
    async fn record_outcome(&self, outcome: SyncOutcome) -> Result<()> {
        (**self).record_outcome(outcome).await
    }

    async fn recent_unresolved(
        &self,
        now: DateTime<Utc>,
        window_hours: i64,
        limit: usize,
    ) -> Result<Vec<SyncOutcome>> {
        (**self).recent_unresolved(now, window_hours, limit).await
    }
}

// ---------------------------------------------------------------------------
// JSONL log
// ---------------------------------------------------------------------------

/// One appended line. `record_id` is derived deterministically from the
/// outcome identity plus the sequence counter, no RNG in the log path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub record_id: Uuid,
    pub seq: u64,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Append-only JSONL sync log. Keys inside each line are sorted so the same
/// record always serializes byte-identically.
pub struct SyncAuditLog {
    path: PathBuf,
    seq: Mutex<u64>,
}

impl SyncAuditLog {
    /// Open (or create) the log, restoring the sequence counter from the
    /// number of lines already present so restarts keep seq monotone.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {parent:?}"))?;
            }
        }
        let existing = match fs::read_to_string(&path) {
            Ok(content) => content.lines().filter(|l| !l.trim().is_empty()).count() as u64,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e).with_context(|| format!("read audit log {path:?}")),
        };
        Ok(Self {
            path,
            seq: Mutex::new(existing),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one outcome; returns the written record.
    pub fn append(&self, outcome: SyncOutcome) -> Result<SyncRecord> {
        let seq = {
            let mut guard = self.seq.lock().unwrap_or_else(|e| e.into_inner());
            let s = *guard;
            *guard += 1;
            s
        };
        let record = SyncRecord {
            record_id: derive_record_id(&outcome, seq),
            seq,
            outcome,
        };
        let line = canonical_json_line(&record)?;
        append_line(&self.path, &line)?;
        Ok(record)
    }

    /// All records in file order. Lines that fail to parse are skipped with
    /// a warning rather than poisoning the whole scan.
    pub fn scan(&self) -> Result<Vec<SyncRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("read audit log {:?}", self.path)),
        };
        let mut out = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<SyncRecord>(trimmed) {
                Ok(r) => out.push(r),
                Err(e) => {
                    tracing::warn!(line = i + 1, error = %e, "skipping unparseable audit line");
                }
            }
        }
        Ok(out)
    }

    /// Latest record per sale, unresolved only, inside the window, newest
    /// first, truncated to `limit`.
    pub fn unresolved_since(
        &self,
        now: DateTime<Utc>,
        window_hours: i64,
        limit: usize,
    ) -> Result<Vec<SyncOutcome>> {
        let cutoff = now - Duration::hours(window_hours);
        let mut latest: BTreeMap<Uuid, SyncRecord> = BTreeMap::new();
        for record in self.scan()? {
            match latest.get(&record.outcome.sale_id) {
                Some(prev) if prev.seq >= record.seq => {}
                _ => {
                    latest.insert(record.outcome.sale_id, record);
                }
            }
        }
        let mut unresolved: Vec<SyncRecord> = latest
            .into_values()
            .filter(|r| r.outcome.status.is_unresolved() && r.outcome.ts_utc >= cutoff)
            .collect();
        unresolved.sort_by(|a, b| b.outcome.ts_utc.cmp(&a.outcome.ts_utc).then(b.seq.cmp(&a.seq)));
        unresolved.truncate(limit);
        Ok(unresolved.into_iter().map(|r| r.outcome).collect())
    }
}

#[async_trait]
impl SyncAuditSink for SyncAuditLog {
    async fn record_outcome(&self, outcome: SyncOutcome) -> Result<()> {
        self.append(outcome)?;
        Ok(())
    }

    async fn recent_unresolved(
        &self,
        now: DateTime<Utc>,
        window_hours: i64,
        limit: usize,
    ) -> Result<Vec<SyncOutcome>> {
        self.unresolved_since(now, window_hours, limit)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn derive_record_id(outcome: &SyncOutcome, seq: u64) -> Uuid {
    let seed = format!(
        "audit:{}:{}:{}:{}",
        outcome.sale_id,
        outcome.attempt,
        outcome.status.as_str(),
        seq
    );
    Uuid::new_v5(&STK_ID_NAMESPACE, seed.as_bytes())
}

/// Compact JSON with recursively sorted keys. One record == one line.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize sync record failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {path:?}"))?;
    f.write_all(line.as_bytes()).context("write audit line")?;
    f.write_all(b"\n").context("write newline")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
