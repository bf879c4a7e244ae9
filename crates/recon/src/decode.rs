//! Untyped store rows → typed records.
//!
//! Rows come from the REST layer (JSON objects) or from a snapshot directory
//! (JSON array or CSV export). Decoding never fails the batch: a row that
//! cannot carry an identity is returned as a [`SkippedRecord`].

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{EmployeeColumns, ResponseColumns};
use crate::error::ReconError;
use crate::model::{
    Employee, Level, RecordTable, SkipReason, SkippedRecord, SubmissionStatus, SurveyResponse,
};

/// Text form of a scalar cell. `null` and empty strings are `None`.
fn cell(obj: &Map<String, Value>, column: &str) -> Option<String> {
    match obj.get(column)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Postgres text form: "2025-03-04 09:15:00.123+00"
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn row_object<'a>(
    row: &'a Value,
    table: RecordTable,
    id_column: &str,
    skipped: &mut Vec<SkippedRecord>,
) -> Option<(&'a Map<String, Value>, String)> {
    let Some(obj) = row.as_object() else {
        skipped.push(SkippedRecord { table, record_id: None, reason: SkipReason::NotAnObject });
        return None;
    };
    let Some(id) = cell(obj, id_column) else {
        skipped.push(SkippedRecord { table, record_id: None, reason: SkipReason::MissingId });
        return None;
    };
    Some((obj, id))
}

/// Decode employee rows. A missing badge decodes to an empty string and is
/// flagged later by the engine.
pub fn decode_employees(
    rows: &[Value],
    columns: &EmployeeColumns,
) -> (Vec<Employee>, Vec<SkippedRecord>) {
    let mut employees = Vec::with_capacity(rows.len());
    let mut skipped = Vec::new();

    for row in rows {
        let Some((obj, id)) = row_object(row, RecordTable::Employees, &columns.id, &mut skipped)
        else {
            continue;
        };

        let level_raw = cell(obj, &columns.level);
        let level = level_raw.as_deref().and_then(Level::parse);
        if level.is_none() {
            debug!(employee = %id, raw = ?level_raw, "employee level not recognised");
        }

        let status = cell(obj, &columns.status)
            .as_deref()
            .and_then(SubmissionStatus::parse)
            .unwrap_or_default();

        employees.push(Employee {
            id,
            badge_number: cell(obj, &columns.badge_number).unwrap_or_default(),
            name: cell(obj, &columns.name).unwrap_or_default(),
            department: cell(obj, &columns.department).unwrap_or_default(),
            level,
            level_label: level.and(level_raw.map(|s| s.trim().to_string())),
            status,
            email: cell(obj, &columns.email),
        });
    }

    (employees, skipped)
}

/// Decode survey response rows. Every unmapped column is kept in `answers`.
pub fn decode_responses(
    rows: &[Value],
    columns: &ResponseColumns,
) -> (Vec<SurveyResponse>, Vec<SkippedRecord>) {
    let mut responses = Vec::with_capacity(rows.len());
    let mut skipped = Vec::new();

    for row in rows {
        let Some((obj, id)) = row_object(row, RecordTable::Responses, &columns.id, &mut skipped)
        else {
            continue;
        };

        let answers: BTreeMap<String, Value> = obj
            .iter()
            .filter(|(k, _)| !columns.is_mapped(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        responses.push(SurveyResponse {
            id,
            badge_number: cell(obj, &columns.badge_number).unwrap_or_default(),
            employee_ref: cell(obj, &columns.employee_ref),
            name: cell(obj, &columns.name).unwrap_or_default(),
            department: cell(obj, &columns.department).unwrap_or_default(),
            level: cell(obj, &columns.level).as_deref().and_then(Level::parse),
            answers,
            created_at: cell(obj, &columns.created_at).as_deref().and_then(parse_timestamp),
        });
    }

    (responses, skipped)
}

// ---------------------------------------------------------------------------
// Snapshot loading
// ---------------------------------------------------------------------------

/// Parse a JSON array of row objects.
pub fn rows_from_json(data: &str, file: &str) -> Result<Vec<Value>, ReconError> {
    let value: Value = serde_json::from_str(data).map_err(|e| ReconError::Snapshot {
        file: file.into(),
        message: e.to_string(),
    })?;
    match value {
        Value::Array(rows) => Ok(rows),
        _ => Err(ReconError::Snapshot {
            file: file.into(),
            message: "expected a JSON array of rows".into(),
        }),
    }
}

/// Parse a CSV export (header row required). Empty cells become `null`.
pub fn rows_from_csv(data: &str, file: &str) -> Result<Vec<Value>, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ReconError::Snapshot { file: file.into(), message: e.to_string() })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| ReconError::Snapshot { file: file.into(), message: e.to_string() })?;
        let mut obj = Map::new();
        for (i, h) in headers.iter().enumerate() {
            let value = match record.get(i) {
                Some(v) if !v.is_empty() => Value::String(v.to_string()),
                _ => Value::Null,
            };
            obj.insert(h.clone(), value);
        }
        rows.push(Value::Object(obj));
    }

    Ok(rows)
}

/// Load `<table>.json` or, failing that, `<table>.csv` from `dir`.
pub fn load_snapshot_table(dir: &Path, table: &str) -> Result<Vec<Value>, ReconError> {
    let json_path = dir.join(format!("{table}.json"));
    if json_path.exists() {
        let data = std::fs::read_to_string(&json_path)
            .map_err(|e| ReconError::Io(format!("cannot read {}: {e}", json_path.display())))?;
        return rows_from_json(&data, &json_path.display().to_string());
    }

    let csv_path = dir.join(format!("{table}.csv"));
    if csv_path.exists() {
        let data = std::fs::read_to_string(&csv_path)
            .map_err(|e| ReconError::Io(format!("cannot read {}: {e}", csv_path.display())))?;
        return rows_from_csv(&data, &csv_path.display().to_string());
    }

    Err(ReconError::Snapshot {
        file: dir.join(table).display().to_string(),
        message: format!("no {table}.json or {table}.csv in snapshot directory"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_employee_row() {
        let rows = vec![json!({
            "id": 7,
            "badge_number": "MTI001",
            "name": "Ana",
            "department": "HR",
            "level": "Non-Managerial",
            "status": "Submitted",
            "email": null,
        })];
        let (emps, skipped) = decode_employees(&rows, &EmployeeColumns::default());
        assert!(skipped.is_empty());
        assert_eq!(emps[0].id, "7");
        assert_eq!(emps[0].level, Some(Level::NonManagerial));
        assert_eq!(emps[0].status, SubmissionStatus::Submitted);
        assert!(emps[0].email.is_none());
    }

    #[test]
    fn rows_without_id_are_skipped() {
        let rows = vec![json!({"badge_number": "MTI001"}), json!("junk"), json!({"id": "E2"})];
        let (emps, skipped) = decode_employees(&rows, &EmployeeColumns::default());
        assert_eq!(emps.len(), 1);
        assert_eq!(emps[0].badge_number, "");
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].reason, SkipReason::MissingId);
        assert_eq!(skipped[1].reason, SkipReason::NotAnObject);
    }

    #[test]
    fn response_answers_keep_unmapped_columns() {
        let rows = vec![json!({
            "id": "R1",
            "badge_number": "MTI001",
            "employee_id": null,
            "level": "managerial",
            "hr_q1": 4,
            "hr_feedback": "ok",
            "created_at": "2025-03-04T09:15:00Z",
        })];
        let (resps, skipped) = decode_responses(&rows, &ResponseColumns::default());
        assert!(skipped.is_empty());
        let r = &resps[0];
        assert!(r.employee_ref.is_none());
        assert_eq!(r.level, Some(Level::Managerial));
        assert_eq!(r.answers.len(), 2);
        assert_eq!(r.answers["hr_q1"], json!(4));
        assert!(r.created_at.is_some());
    }

    #[test]
    fn postgres_timestamp_form() {
        assert!(parse_timestamp("2025-03-04 09:15:00.123+00").is_some());
        assert!(parse_timestamp("2025-03-04 09:15:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn csv_empty_cells_are_null() {
        let csv = "id,badge_number,employee_id\nR1,MTI001,\n";
        let rows = rows_from_csv(csv, "survey_responses.csv").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["employee_id"], Value::Null);
        assert_eq!(rows[0]["badge_number"], "MTI001");
    }

    #[test]
    fn json_snapshot_must_be_array() {
        let err = rows_from_json("{\"id\": 1}", "employees.json").unwrap_err();
        assert!(err.to_string().contains("employees.json"));
    }

    #[test]
    fn snapshot_prefers_json_then_csv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("employees.csv"), "id,badge_number\nE1,MTI001\n").unwrap();
        let rows = load_snapshot_table(dir.path(), "employees").unwrap();
        assert_eq!(rows.len(), 1);

        std::fs::write(dir.path().join("employees.json"), "[]").unwrap();
        let rows = load_snapshot_table(dir.path(), "employees").unwrap();
        assert!(rows.is_empty());

        let err = load_snapshot_table(dir.path(), "survey_responses").unwrap_err();
        assert!(matches!(err, ReconError::Snapshot { .. }));
    }
}
