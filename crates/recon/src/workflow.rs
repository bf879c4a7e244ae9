//! fetch → reconcile → apply → verify, against any [`RecordStore`].
//!
//! Safe to re-run: the plan is recomputed from current data each time, so a
//! second run only retries whatever the first run failed to write.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::ReconConfig;
use crate::decode::{decode_employees, decode_responses};
use crate::engine::reconcile;
use crate::model::{Employee, ReconReport, RepairField, RepairOp, SkippedRecord, SurveyResponse};
use crate::store::{RecordStore, StoreError};

/// Typed contents of both tables at one point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub employees: Vec<Employee>,
    pub responses: Vec<SurveyResponse>,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum OpStatus {
    Applied,
    Failed(String),
    Skipped(String),
    NotAttempted,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpOutcome {
    pub op: RepairOp,
    pub status: OpStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub remaining_repairs: usize,
    pub orphaned: usize,
    pub ambiguous: usize,
    pub plan_fingerprint: String,
    /// No repairs left after re-reading the store.
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemediationOutcome {
    pub dry_run: bool,
    pub report: ReconReport,
    pub outcomes: Vec<OpOutcome>,
    pub verification: Option<Verification>,
}

impl RemediationOutcome {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status == OpStatus::Applied).count()
    }

    /// Ops that were planned but did not land (failed, skipped, not attempted).
    pub fn unapplied(&self) -> usize {
        self.outcomes.len() - self.applied()
    }
}

/// Fetch and decode both tables.
pub fn fetch_snapshot<S: RecordStore>(store: &S, config: &ReconConfig) -> Result<Snapshot, StoreError> {
    info!(table = %config.tables.employees, "fetching employees");
    let employee_rows = store.fetch_all(&config.tables.employees)?;
    info!(table = %config.tables.responses, "fetching survey responses");
    let response_rows = store.fetch_all(&config.tables.responses)?;

    let (employees, mut skipped) = decode_employees(&employee_rows, &config.columns.employees);
    let (responses, skipped_responses) = decode_responses(&response_rows, &config.columns.responses);
    skipped.extend(skipped_responses);

    info!(
        employees = employees.len(),
        responses = responses.len(),
        skipped = skipped.len(),
        "snapshot loaded"
    );
    Ok(Snapshot { employees, responses, skipped })
}

/// Fetch and reconcile without writing anything.
pub fn inspect<S: RecordStore>(store: &S, config: &ReconConfig) -> Result<ReconReport, StoreError> {
    let snapshot = fetch_snapshot(store, config)?;
    Ok(reconcile(&snapshot.employees, &snapshot.responses, config, snapshot.skipped))
}

/// Write a plan in chunks of `batch_size`, one store write per field per chunk.
///
/// Within a chunk, link repairs are written before level resyncs. Never
/// returns early on a failed write: every op gets an outcome, and a failed
/// batch fails every op in it. A fatal error (auth, read-only) marks the rest
/// `NotAttempted`. A level resync is skipped when the link repair for the same
/// response did not land.
pub fn apply_plan<S: RecordStore>(
    store: &S,
    config: &ReconConfig,
    plan: &[RepairOp],
    batch_size: usize,
) -> Vec<OpOutcome> {
    let table = &config.tables.responses;
    let columns = &config.columns.responses;
    let batch_size = batch_size.max(1);
    let batches = plan.len().div_ceil(batch_size);

    let mut statuses: Vec<Option<OpStatus>> = vec![None; plan.len()];
    let mut failed_links: HashSet<&str> = HashSet::new();
    let mut aborted: Option<StoreError> = None;

    for (n, start) in (0..plan.len()).step_by(batch_size).enumerate() {
        let chunk = start..(start + batch_size).min(plan.len());
        let mut chunk_failed = false;

        for field in [RepairField::EmployeeRef, RepairField::Level] {
            let mut members = Vec::new();
            for i in chunk.clone().filter(|&i| plan[i].field == field) {
                if aborted.is_some() {
                    statuses[i] = Some(OpStatus::NotAttempted);
                } else if field == RepairField::Level
                    && failed_links.contains(plan[i].target_response_id.as_str())
                {
                    statuses[i] = Some(OpStatus::Skipped("link repair for this response failed".into()));
                } else {
                    members.push(i);
                }
            }
            if members.is_empty() {
                continue;
            }

            let column = columns.column_for(field);
            let rows: Vec<Map<String, Value>> = members
                .iter()
                .map(|&i| {
                    let mut row = Map::new();
                    row.insert(columns.id.clone(), Value::String(plan[i].target_response_id.clone()));
                    row.insert(column.to_string(), Value::String(plan[i].new_value.clone()));
                    row
                })
                .collect();

            match store.update_many(table, &columns.id, &rows) {
                Ok(()) => {
                    for &i in &members {
                        statuses[i] = Some(OpStatus::Applied);
                    }
                }
                Err(e) => {
                    warn!(batch = n + 1, field = %field, rows = members.len(), error = %e, "batch write failed");
                    chunk_failed = true;
                    let msg = e.to_string();
                    for &i in &members {
                        if field == RepairField::EmployeeRef {
                            failed_links.insert(plan[i].target_response_id.as_str());
                        }
                        statuses[i] = Some(OpStatus::Failed(msg.clone()));
                    }
                    if e.is_fatal() {
                        aborted = Some(e);
                    }
                }
            }
        }
        if !chunk_failed && aborted.is_none() {
            info!(batch = n + 1, batches, ops = chunk.len(), "batch written");
        }
    }

    if let Some(err) = aborted {
        warn!(error = %err, "stopped applying repairs");
    }
    plan.iter()
        .zip(statuses)
        .map(|(op, status)| OpOutcome { op: op.clone(), status: status.unwrap_or(OpStatus::NotAttempted) })
        .collect()
}

/// Re-read the store and check that nothing is left to repair.
pub fn verify<S: RecordStore>(store: &S, config: &ReconConfig) -> Result<Verification, StoreError> {
    let report = inspect(store, config)?;
    let verification = Verification {
        remaining_repairs: report.plan.len(),
        orphaned: report.orphans.len(),
        ambiguous: report.ambiguous.len(),
        plan_fingerprint: report.meta.plan_fingerprint.clone(),
        verified: report.plan.is_empty(),
    };
    if verification.verified {
        info!("verification passed: no repairs remaining");
    } else {
        warn!(remaining = verification.remaining_repairs, "verification found repairs remaining");
    }
    Ok(verification)
}

/// Why [`remediate`] stopped before producing an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationError {
    Store(StoreError),
    /// The current plan is not the one the caller reviewed. Nothing was written.
    PlanMismatch { expected: String, actual: String },
}

impl std::fmt::Display for RemediationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::PlanMismatch { expected, actual } => {
                write!(f, "plan fingerprint {actual} does not match expected {expected}")
            }
        }
    }
}

impl std::error::Error for RemediationError {}

impl From<StoreError> for RemediationError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Full cycle using `config.repair` for dry-run and batch size.
///
/// With `expected_plan`, the freshly computed plan fingerprint must match it
/// (dry runs included) or nothing is written.
pub fn remediate<S: RecordStore>(
    store: &S,
    config: &ReconConfig,
    expected_plan: Option<&str>,
) -> Result<RemediationOutcome, RemediationError> {
    let report = inspect(store, config)?;
    let dry_run = config.repair.dry_run;

    if let Some(expected) = expected_plan.map(str::trim) {
        if expected != report.meta.plan_fingerprint {
            warn!(expected, actual = %report.meta.plan_fingerprint, "plan changed since review");
            return Err(RemediationError::PlanMismatch {
                expected: expected.to_string(),
                actual: report.meta.plan_fingerprint.clone(),
            });
        }
    }

    if dry_run || report.plan.is_empty() {
        if dry_run {
            info!(repairs = report.plan.len(), "dry run: plan not applied");
        }
        return Ok(RemediationOutcome { dry_run, report, outcomes: Vec::new(), verification: None });
    }

    let outcomes = apply_plan(store, config, &report.plan, config.repair.batch_size);
    let verification = verify(store, config)?;
    Ok(RemediationOutcome { dry_run, report, outcomes, verification: Some(verification) })
}
