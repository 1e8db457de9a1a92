//! The deduction coordinator drives one sale through seven stages:
//! idempotency lookup, bulk recipe/mapping reads, per-item aggregation, the
//! all-or-nothing sufficiency gate, per-item conditional writes, detached
//! movement logging, and the final idempotency + audit records.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use stk_audit::SyncAuditSink;
use stk_ledger::{CasOutcome, MovementEntry, MovementSink, StockLevel, StockStore};
use stk_schemas::{
    DeductedLine, DeductionReport, DeductionRequest, RecipeComponent, SaleLine, SyncOutcome,
    SyncStatus,
};

use crate::errors::{DeductionError, SystemFault};
use crate::plan::{self, PlannedCas};
use crate::traits::{CatalogStore, IdempotencyRecord, IdempotencyStore, MappingStore};

pub struct DeductionCoordinator<C, M, S, V, I, A> {
    catalog: C,
    mappings: M,
    stock: S,
    movements: Arc<V>,
    idempotency: I,
    audit: A,
}

impl<C, M, S, V, I, A> DeductionCoordinator<C, M, S, V, I, A>
where
    C: CatalogStore,
    M: MappingStore,
    S: StockStore,
    V: MovementSink + 'static,
    I: IdempotencyStore,
    A: SyncAuditSink,
{
    pub fn new(catalog: C, mappings: M, stock: S, movements: V, idempotency: I, audit: A) -> Self {
        Self {
            catalog,
            mappings,
            stock,
            movements: Arc::new(movements),
            idempotency,
            audit,
        }
    }

    /// First-attempt entry point.
    pub async fn deduct(&self, request: &DeductionRequest) -> DeductionReport {
        self.deduct_with_attempt(request, 1).await
    }

    /// Run one attempt. `attempt` starts at 1; the retry queue passes its
    /// own count so audit records distinguish fresh failures from retried
    /// ones.
    pub async fn deduct_with_attempt(
        &self,
        request: &DeductionRequest,
        attempt: u32,
    ) -> DeductionReport {
        self.deduct_excluding(request, attempt, &[]).await
    }

    /// Retry entry point: `applied` holds item ids that deducted on earlier
    /// attempts of this sale. Their needs are dropped from the plan, so a
    /// retried partial only ever touches the remainder.
    pub async fn deduct_excluding(
        &self,
        request: &DeductionRequest,
        attempt: u32,
        applied: &[Uuid],
    ) -> DeductionReport {
        let started = Instant::now();

        // A replayed sale must never touch stock again.
        match self.idempotency.lookup(request.sale_id).await {
            Ok(None) => {}
            Ok(Some(prior)) => {
                tracing::info!(sale_id = %request.sale_id, "duplicate deduction ignored");
                return duplicate_report(request, &prior, started);
            }
            Err(fault) => {
                return self
                    .finish(
                        request,
                        attempt,
                        started,
                        applied,
                        Vec::new(),
                        vec![fault_error("idempotency lookup failed", fault)],
                        Vec::new(),
                    )
                    .await;
            }
        }

        // Bulk reads. A failure here is systemic: nothing was attempted yet,
        // so the whole request aborts retryably.
        let mapping_rows = match self.mappings.mappings_for_store(request.store_id).await {
            Ok(rows) => rows,
            Err(fault) => {
                return self
                    .finish(
                        request,
                        attempt,
                        started,
                        applied,
                        Vec::new(),
                        vec![fault_error("mapping read failed", fault)],
                        Vec::new(),
                    )
                    .await;
            }
        };

        let mut errors: Vec<DeductionError> = Vec::new();
        let mut lined: Vec<(SaleLine, Vec<RecipeComponent>)> =
            Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            match self
                .catalog
                .recipe_for_product(request.store_id, line.product_id)
                .await
            {
                Ok(Some(recipe)) => lined.push((line.clone(), recipe)),
                Ok(None) => errors.push(DeductionError::RecipeMissing {
                    product_id: line.product_id,
                    product: line.product_name.clone(),
                }),
                Err(fault) => {
                    return self
                        .finish(
                            request,
                            attempt,
                            started,
                            applied,
                            Vec::new(),
                            vec![fault_error("catalog read failed", fault)],
                            Vec::new(),
                        )
                        .await;
                }
            }
        }

        let (mut needs, plan_errors) = plan::aggregate_needs(&lined, &mapping_rows);
        errors.extend(plan_errors);
        if !applied.is_empty() {
            needs.retain(|item_id, _| !applied.contains(item_id));
        }

        // Read current levels for every needed item. The versions read here
        // condition the writes below.
        let mut levels: BTreeMap<Uuid, StockLevel> = BTreeMap::new();
        for item_id in needs.keys() {
            match self.stock.fetch(request.store_id, *item_id).await {
                Ok(Some(level)) if level.active => {
                    levels.insert(*item_id, level);
                }
                Ok(_) => {} // absent or archived rows surface as vanished below
                Err(e) => {
                    return self
                        .finish(
                            request,
                            attempt,
                            started,
                            applied,
                            Vec::new(),
                            vec![DeductionError::System {
                                detail: format!("stock read failed: {e}"),
                            }],
                            Vec::new(),
                        )
                        .await;
                }
            }
        }

        let check = plan::check_sufficiency(&needs, &levels);
        for err in &check.vanished {
            if let DeductionError::ItemVanished { item_id } = err {
                if let Some(need) = needs.get(item_id) {
                    tracing::warn!(
                        item_id = %item_id,
                        ingredients = ?need.labels,
                        "needed item is missing or inactive"
                    );
                }
            }
        }
        errors.extend(check.vanished);

        // All-or-nothing gate: one short item rejects every write.
        if !check.shortfalls.is_empty() {
            errors.extend(check.shortfalls);
            return self
                .finish(request, attempt, started, applied, Vec::new(), errors, Vec::new())
                .await;
        }

        // Independent CAS per item, conditioned on the version read above.
        // Failures here do not roll back siblings; they become retryable
        // errors on the report.
        let now = Utc::now();
        let mut deducted: Vec<DeductedLine> = Vec::new();
        let mut movement_entries: Vec<MovementEntry> = Vec::new();
        for PlannedCas { level, need_milli } in check.planned {
            let target = level.qty_milli - need_milli;
            match self
                .stock
                .conditional_update(request.store_id, level.item_id, target, level.version)
                .await
            {
                Ok(CasOutcome::Applied { new_version }) => {
                    movement_entries.push(MovementEntry::deduction(
                        request.sale_id,
                        &level,
                        need_milli,
                        now,
                    ));
                    deducted.push(DeductedLine {
                        item_id: level.item_id,
                        name: level.name.clone(),
                        qty_milli: need_milli,
                        previous_qty_milli: level.qty_milli,
                        new_qty_milli: target,
                        new_version,
                    });
                }
                Ok(CasOutcome::Conflict { actual_version }) => {
                    tracing::warn!(
                        item_id = %level.item_id,
                        read_version = level.version,
                        actual_version,
                        "stock level moved between read and write"
                    );
                    errors.push(DeductionError::ConcurrencyConflict {
                        item_id: level.item_id,
                        name: level.name.clone(),
                    });
                }
                Ok(CasOutcome::Missing) => {
                    errors.push(DeductionError::ItemVanished {
                        item_id: level.item_id,
                    });
                }
                Err(e) => {
                    errors.push(DeductionError::System {
                        detail: format!("stock write failed for {}: {e}", level.item_id),
                    });
                }
            }
        }

        // Movement logging rides a detached task: a slow or broken movement
        // sink must not turn an applied deduction into a reported failure.
        // Entries carry deterministic ids, so a crashed task redelivering
        // later cannot double-insert.
        if !movement_entries.is_empty() {
            let sink = Arc::clone(&self.movements);
            tokio::spawn(async move {
                for entry in movement_entries {
                    let movement_id = entry.movement_id;
                    if let Err(e) = sink.record(entry).await {
                        tracing::warn!(%movement_id, error = %e, "movement entry not recorded");
                    }
                }
            });
        }

        self.finish(request, attempt, started, applied, deducted, errors, Vec::new())
            .await
    }

    /// Common tail: idempotency record (full success only, and only now,
    /// after the fan-out), audit append, report assembly. Neither record
    /// failing can fail the attempt; both downgrade to warnings.
    async fn finish(
        &self,
        request: &DeductionRequest,
        attempt: u32,
        started: Instant,
        applied: &[Uuid],
        deducted: Vec<DeductedLine>,
        errors: Vec<DeductionError>,
        mut warnings: Vec<String>,
    ) -> DeductionReport {
        if errors.is_empty() {
            let record = IdempotencyRecord {
                sale_id: request.sale_id,
                store_id: request.store_id,
                completed_at: Utc::now(),
                items_deducted: deducted.len() as u32,
            };
            if let Err(fault) = self.idempotency.record(record).await {
                tracing::warn!(sale_id = %request.sale_id, error = %fault, "idempotency record failed");
                warnings.push(format!("idempotency record failed: {}", fault.detail));
            }
        }

        let status = attempt_status(&deducted, &errors, attempt);
        let error_details = if errors.is_empty() {
            None
        } else {
            Some(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };
        // Cumulative applied set: prior attempts plus this one. The audit
        // record must let recovery resume with only the remainder.
        let mut applied_items: Vec<Uuid> = applied.to_vec();
        for line in &deducted {
            if !applied_items.contains(&line.item_id) {
                applied_items.push(line.item_id);
            }
        }
        let outcome = SyncOutcome {
            sale_id: request.sale_id,
            store_id: request.store_id,
            status,
            attempt,
            items_processed: deducted.len() as u32,
            duration_ms: started.elapsed().as_millis() as u64,
            error_details,
            lines: request.lines.clone(),
            applied_items,
            ts_utc: Utc::now(),
        };
        if let Err(e) = self.audit.record_outcome(outcome).await {
            tracing::warn!(sale_id = %request.sale_id, error = %e, "audit append failed");
            warnings.push(format!("audit append failed: {e}"));
        }

        DeductionReport {
            sale_id: request.sale_id,
            store_id: request.store_id,
            success: errors.is_empty(),
            duplicate: false,
            deducted,
            errors: errors.iter().map(DeductionError::to_report).collect(),
            warnings,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn attempt_status(deducted: &[DeductedLine], errors: &[DeductionError], attempt: u32) -> SyncStatus {
    let base = if errors.is_empty() {
        SyncStatus::Success
    } else if deducted.is_empty() {
        SyncStatus::Failed
    } else {
        SyncStatus::Partial
    };
    if attempt > 1 {
        base.as_retry()
    } else {
        base
    }
}

fn duplicate_report(
    request: &DeductionRequest,
    prior: &IdempotencyRecord,
    started: Instant,
) -> DeductionReport {
    DeductionReport {
        sale_id: request.sale_id,
        store_id: request.store_id,
        success: true,
        duplicate: true,
        deducted: Vec::new(),
        errors: Vec::new(),
        warnings: vec![format!(
            "sale already deducted at {} ({} items); no stock was touched",
            prior.completed_at, prior.items_deducted
        )],
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

fn fault_error(stage: &str, fault: SystemFault) -> DeductionError {
    DeductionError::System {
        detail: format!("{stage}: {}", fault.detail),
    }
}
