//! `ssync report | repair | analytics | validate`.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use surveysync_recon::analytics::{DepartmentAnalytics, LevelAnalytics};
use surveysync_recon::decode::load_snapshot_table;
use surveysync_recon::model::{Level, ReconReport, RepairOp};
use surveysync_recon::store::{MemoryStore, RecordStore, StoreError};
use surveysync_recon::workflow::{inspect, remediate, OpStatus, RemediationError, RemediationOutcome};
use surveysync_recon::ReconConfig;
use surveysync_store_client::{resolve_credentials, ClientOptions, StoreClient};
use tracing::info;

use crate::exit_codes::{
    EXIT_DEFECTS, EXIT_ERROR, EXIT_PLAN_MISMATCH, EXIT_REPAIR_PARTIAL, EXIT_SNAPSHOT,
    EXIT_VERIFY_FAILED,
};
use crate::{load_config_file, CliError, Globals};

// ---------------------------------------------------------------------------
// Store selection
// ---------------------------------------------------------------------------

/// Where rows come from: the hosted store or an exported snapshot directory.
pub(crate) enum Backend {
    Remote(StoreClient),
    Snapshot(MemoryStore),
}

impl RecordStore for Backend {
    fn fetch_all(&self, table: &str) -> Result<Vec<Value>, StoreError> {
        match self {
            Backend::Remote(client) => client.fetch_all(table),
            Backend::Snapshot(store) => store.fetch_all(table),
        }
    }

    fn update(
        &self,
        table: &str,
        id_column: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        match self {
            Backend::Remote(client) => client.update(table, id_column, id, fields),
            Backend::Snapshot(store) => store.update(table, id_column, id, fields),
        }
    }

    fn update_many(
        &self,
        table: &str,
        id_column: &str,
        rows: &[Map<String, Value>],
    ) -> Result<(), StoreError> {
        match self {
            Backend::Remote(client) => client.update_many(table, id_column, rows),
            Backend::Snapshot(store) => store.update_many(table, id_column, rows),
        }
    }
}

pub(crate) fn remote_client(globals: &Globals, config: &ReconConfig) -> Result<StoreClient, CliError> {
    let creds = resolve_credentials(globals.url.as_deref(), globals.api_key.as_deref())
        .map_err(CliError::store)?;
    let client = StoreClient::new(creds, ClientOptions::from(&config.store)).map_err(CliError::store)?;
    Ok(client
        .with_order_column(&config.tables.employees, &config.columns.employees.id)
        .with_order_column(&config.tables.responses, &config.columns.responses.id))
}

fn open_snapshot(dir: &Path, config: &ReconConfig) -> Result<MemoryStore, CliError> {
    if !dir.is_dir() {
        return Err(CliError::new(
            EXIT_SNAPSHOT,
            format!("snapshot directory not found: {}", dir.display()),
        ));
    }
    let employees = load_snapshot_table(dir, &config.tables.employees)?;
    let responses = load_snapshot_table(dir, &config.tables.responses)?;
    info!(dir = %dir.display(), "loaded snapshot");
    Ok(MemoryStore::read_only()
        .with_table(&config.tables.employees, employees)
        .with_table(&config.tables.responses, responses))
}

fn open_backend(
    globals: &Globals,
    config: &ReconConfig,
    snapshot: Option<&Path>,
) -> Result<Backend, CliError> {
    match snapshot {
        Some(dir) => open_snapshot(dir, config).map(Backend::Snapshot),
        None => remote_client(globals, config).map(Backend::Remote),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CliError::new(EXIT_ERROR, format!("JSON serialization error: {e}")))
}

// ---------------------------------------------------------------------------
// report
// ---------------------------------------------------------------------------

pub fn cmd_report(
    globals: &Globals,
    json_output: bool,
    output_file: Option<PathBuf>,
    snapshot: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = globals.load_config()?;
    let backend = open_backend(globals, &config, snapshot.as_deref())?;
    let report = inspect(&backend, &config).map_err(CliError::store)?;

    let json_str = to_json(&report)?;
    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::new(EXIT_ERROR, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        println!("{json_str}");
    } else {
        print_report(&report);
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(CliError::new(EXIT_DEFECTS, ""))
    }
}

fn print_report(report: &ReconReport) {
    let s = &report.summary;
    println!("{} employees, {} responses ({} badge matching)", s.employees, s.responses, report.meta.normalization);
    println!(
        "matched {}, orphaned {}, ambiguous {} ({} responses), malformed {}",
        s.matched, s.orphaned, s.ambiguous, s.ambiguous_responses, s.malformed_responses,
    );
    println!("unlinked {}, level drift {}, repairs {}", s.unlinked, s.level_drift, s.repairs);

    if !report.orphans.is_empty() {
        println!();
        println!("orphaned responses:");
        for o in &report.orphans {
            match &o.referenced_employee_id {
                Some(emp) => println!("  {}  badge={:?}  (employee_ref points at {})", o.response_id, o.badge_number, emp),
                None => println!("  {}  badge={:?}", o.response_id, o.badge_number),
            }
        }
    }

    if !report.ambiguous.is_empty() {
        println!();
        println!("ambiguous badges (manual resolution):");
        for a in &report.ambiguous {
            println!(
                "  {}  employees={}  responses={}",
                a.badge_number,
                a.employee_ids.join(","),
                if a.response_ids.is_empty() { "-".to_string() } else { a.response_ids.join(",") },
            );
        }
    }

    if !report.skipped.is_empty() {
        println!();
        println!("skipped records:");
        for sk in &report.skipped {
            println!(
                "  {}  {}  {}",
                sk.table,
                sk.record_id.as_deref().unwrap_or("(no id)"),
                sk.reason,
            );
        }
    }

    if !report.plan.is_empty() {
        println!();
        println!("repair plan ({}):", report.meta.plan_fingerprint);
        for op in &report.plan {
            println!("  {}", describe_op(op));
        }
    }

    if s.case_mismatches + s.status_drift + s.duplicate_submissions > 0 {
        println!();
        println!(
            "notes: {} case-only badge matches, {} status drift, {} duplicate submissions",
            s.case_mismatches, s.status_drift, s.duplicate_submissions,
        );
    }
}

fn describe_op(op: &RepairOp) -> String {
    format!(
        "{}  {}  {} -> {}",
        op.target_response_id,
        op.field,
        op.old_value.as_deref().unwrap_or("(null)"),
        op.new_value,
    )
}

// ---------------------------------------------------------------------------
// repair
// ---------------------------------------------------------------------------

pub struct RepairArgs {
    pub apply: bool,
    pub dry_run: bool,
    pub batch_size: Option<usize>,
    pub expect_plan: Option<String>,
    pub json: bool,
    pub snapshot: Option<PathBuf>,
}

pub fn cmd_repair(globals: &Globals, args: RepairArgs) -> Result<(), CliError> {
    if args.apply && args.snapshot.is_some() {
        return Err(CliError::args("--apply cannot be combined with --snapshot")
            .with_hint("snapshot directories are read-only; drop --snapshot to write to the store"));
    }

    let mut config = globals.load_config()?;
    if let Some(n) = args.batch_size {
        if n == 0 {
            return Err(CliError::args("--batch-size must be at least 1"));
        }
        config.repair.batch_size = n;
    }
    if args.snapshot.is_some() || args.dry_run {
        config.repair.dry_run = true;
    } else if args.apply {
        config.repair.dry_run = false;
    }

    let backend = open_backend(globals, &config, args.snapshot.as_deref())?;
    let outcome = remediate(&backend, &config, args.expect_plan.as_deref()).map_err(|e| match e {
        RemediationError::Store(e) => CliError::store(e),
        mismatch @ RemediationError::PlanMismatch { .. } => CliError::new(EXIT_PLAN_MISMATCH, mismatch.to_string())
            .with_hint("the data changed since the plan was reviewed; run `ssync repair` to see the current plan"),
    })?;
    emit_outcome(&outcome, args.json)?;

    let unapplied = outcome.unapplied();
    if unapplied > 0 {
        return Err(CliError::new(
            EXIT_REPAIR_PARTIAL,
            format!("{} of {} repairs did not apply", unapplied, outcome.outcomes.len()),
        )
        .with_hint("re-run `ssync repair --apply`; only the remaining repairs will be planned"));
    }
    if let Some(v) = &outcome.verification {
        if !v.verified {
            return Err(CliError::new(
                EXIT_VERIFY_FAILED,
                format!("{} repairs still pending after apply", v.remaining_repairs),
            ));
        }
    }
    Ok(())
}

fn emit_outcome(outcome: &RemediationOutcome, json_output: bool) -> Result<(), CliError> {
    if json_output {
        println!("{}", to_json(outcome)?);
        return Ok(());
    }

    let report = &outcome.report;
    if report.plan.is_empty() {
        println!("nothing to repair ({} orphaned, {} ambiguous)", report.summary.orphaned, report.summary.ambiguous);
        return Ok(());
    }

    if outcome.dry_run {
        println!("dry run: {} repairs planned ({})", report.plan.len(), report.meta.plan_fingerprint);
        for op in &report.plan {
            println!("  {}", describe_op(op));
        }
        println!("apply with: ssync repair --apply --expect-plan {}", report.meta.plan_fingerprint);
        return Ok(());
    }

    for o in &outcome.outcomes {
        let status = match &o.status {
            OpStatus::Applied => "applied".to_string(),
            OpStatus::Failed(msg) => format!("FAILED: {msg}"),
            OpStatus::Skipped(msg) => format!("skipped: {msg}"),
            OpStatus::NotAttempted => "not attempted".to_string(),
        };
        println!("  {}  [{}]", describe_op(&o.op), status);
    }
    println!("applied {} of {}", outcome.applied(), outcome.outcomes.len());
    if let Some(v) = &outcome.verification {
        if v.verified {
            println!("verified: no repairs remaining");
        } else {
            println!("verification: {} repairs remaining", v.remaining_repairs);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// analytics
// ---------------------------------------------------------------------------

pub fn cmd_analytics(
    globals: &Globals,
    json_output: bool,
    snapshot: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = globals.load_config()?;
    let backend = open_backend(globals, &config, snapshot.as_deref())?;
    let report = inspect(&backend, &config).map_err(CliError::store)?;

    if json_output {
        let body = serde_json::json!({
            "levels": &report.analytics,
            "overall_rate": report.analytics.overall_rate(),
            "departments": &report.departments,
        });
        println!("{}", to_json(&body)?);
    } else {
        print_analytics(&report.analytics, &report.departments);
    }
    Ok(())
}

fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => "n/a".to_string(),
    }
}

fn print_analytics(levels: &LevelAnalytics, departments: &[DepartmentAnalytics]) {
    println!("{:<16} {:>9} {:>7} {:>8}", "level", "submitted", "total", "rate");
    for level in [Level::Managerial, Level::NonManagerial] {
        println!(
            "{:<16} {:>9} {:>7} {:>8}",
            level.as_str(),
            levels.submitted(level),
            levels.total(level),
            format_rate(levels.rate(level)),
        );
    }
    if levels.unclassified_total > 0 {
        println!(
            "{:<16} {:>9} {:>7} {:>8}",
            "(unclassified)",
            levels.unclassified_submitted,
            levels.unclassified_total,
            "",
        );
    }
    println!("{:<16} {:>9} {:>7} {:>8}", "overall", "", "", format_rate(levels.overall_rate()));

    if departments.is_empty() {
        return;
    }
    println!();
    println!("{:<24} {:>9} {:>7} {:>8}", "department", "submitted", "total", "rate");
    for d in departments {
        println!("{:<24} {:>9} {:>7} {:>8}", d.department, d.submitted, d.total, format_rate(d.rate));
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config_file(&config_path)?;
    println!("config OK: {}", config_path.display());
    println!("  tables:        employees={} responses={}", config.tables.employees, config.tables.responses);
    println!("  matching:      {}", config.matching.badge_normalization);
    println!("  repair:        dry_run={} batch_size={}", config.repair.dry_run, config.repair.batch_size);
    println!("  link column:   {}", config.columns.responses.employee_ref);
    Ok(())
}
