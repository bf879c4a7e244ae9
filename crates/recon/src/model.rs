use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analytics::{DepartmentAnalytics, LevelAnalytics};
use crate::config::BadgeNormalization;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Level {
    #[serde(rename = "Managerial")]
    Managerial,
    #[serde(rename = "Non-Managerial")]
    NonManagerial,
}

impl Level {
    /// Lenient parse of the stored level spelling.
    ///
    /// Accepts `Managerial`, `managerial`, `Non-Managerial`, `non_managerial`,
    /// `NonManagerial`, `Non Managerial`.
    pub fn parse(raw: &str) -> Option<Self> {
        let folded: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "managerial" => Some(Self::Managerial),
            "nonmanagerial" => Some(Self::NonManagerial),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Managerial => "Managerial",
            Self::NonManagerial => "Non-Managerial",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
    #[default]
    NotSubmitted,
}

impl SubmissionStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        let folded: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "submitted" | "completed" | "done" => Some(Self::Submitted),
            "notsubmitted" | "pending" | "" => Some(Self::NotSubmitted),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// HR master record. Source of truth for `level`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Employee {
    pub id: String,
    pub badge_number: String,
    pub name: String,
    pub department: String,
    pub level: Option<Level>,
    /// Level text as stored in the roster, kept only when it parses.
    /// Level resyncs write this back verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_label: Option<String>,
    pub status: SubmissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// One survey submission. `level`, `name` and `department` are denormalized
/// copies taken at submission time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyResponse {
    pub id: String,
    pub badge_number: String,
    pub employee_ref: Option<String>,
    pub name: String,
    pub department: String,
    pub level: Option<Level>,
    /// Section-scoped scores and free-text answers, keyed by store column.
    pub answers: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Skipped records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordTable {
    Employees,
    Responses,
}

impl std::fmt::Display for RecordTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Employees => write!(f, "employees"),
            Self::Responses => write!(f, "responses"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Row was not a JSON object.
    NotAnObject,
    /// Row has no usable `id`.
    MissingId,
    /// Row has no usable badge number (the join key).
    MissingBadge,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "row is not an object"),
            Self::MissingId => write!(f, "missing id"),
            Self::MissingBadge => write!(f, "missing badge number"),
        }
    }
}

/// A record excluded from matching (MalformedRecord).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub table: RecordTable,
    pub record_id: Option<String>,
    pub reason: SkipReason,
}

// ---------------------------------------------------------------------------
// Findings (borrowed views returned by the engine)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct UnlinkedResponse<'a> {
    pub response: &'a SurveyResponse,
    pub matched_employee: &'a Employee,
}

#[derive(Debug, Clone, Copy)]
pub struct LevelDrift<'a> {
    pub response: &'a SurveyResponse,
    pub current_level: Option<Level>,
    pub correct_level: Level,
    /// The employee's own spelling of `correct_level`.
    pub correct_label: &'a str,
}

// ---------------------------------------------------------------------------
// Repair plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairField {
    EmployeeRef,
    Level,
}

impl std::fmt::Display for RepairField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmployeeRef => write!(f, "employee_ref"),
            Self::Level => write!(f, "level"),
        }
    }
}

/// `update responses set <field> = <new_value> where id = <target_response_id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairOp {
    pub target_response_id: String,
    pub field: RepairField,
    pub new_value: String,
    /// Value observed when the plan was built. Audit only.
    pub old_value: Option<String>,
}

// ---------------------------------------------------------------------------
// Report entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct OrphanEntry {
    pub response_id: String,
    pub badge_number: String,
    pub name: String,
    /// Set when `employee_ref` still points at an existing employee, which
    /// usually means the badge number was mistyped on one side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_employee_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnlinkedEntry {
    pub response_id: String,
    pub badge_number: String,
    pub current_ref: Option<String>,
    pub employee_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelDriftEntry {
    pub response_id: String,
    pub badge_number: String,
    pub current_level: Option<Level>,
    pub correct_level: Level,
}

/// Several employees share one badge number. Never repaired automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousMatch {
    pub badge_number: String,
    pub employee_ids: Vec<String>,
    pub response_ids: Vec<String>,
}

/// Badge spelled differently on the two sides but equal after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseMismatch {
    pub response_id: String,
    pub response_badge: String,
    pub employee_id: String,
    pub employee_badge: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusDrift {
    pub employee_id: String,
    pub badge_number: String,
    pub recorded: SubmissionStatus,
    pub observed: SubmissionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateSubmission {
    pub employee_id: String,
    pub badge_number: String,
    pub response_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconSummary {
    pub employees: usize,
    pub responses: usize,
    pub matched: usize,
    pub orphaned: usize,
    pub unlinked: usize,
    pub level_drift: usize,
    /// Badge numbers held by more than one employee.
    pub ambiguous: usize,
    /// Responses whose badge is one of those badges.
    pub ambiguous_responses: usize,
    pub skipped: usize,
    /// Responses excluded from matching because they have no badge.
    pub malformed_responses: usize,
    pub case_mismatches: usize,
    pub status_drift: usize,
    pub duplicate_submissions: usize,
    pub repairs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub engine_version: String,
    pub run_at: String,
    pub normalization: BadgeNormalization,
    pub plan_fingerprint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconReport {
    pub meta: ReconMeta,
    pub summary: ReconSummary,
    pub orphans: Vec<OrphanEntry>,
    pub unlinked: Vec<UnlinkedEntry>,
    pub level_drift: Vec<LevelDriftEntry>,
    pub ambiguous: Vec<AmbiguousMatch>,
    pub skipped: Vec<SkippedRecord>,
    pub case_mismatches: Vec<CaseMismatch>,
    pub status_drift: Vec<StatusDrift>,
    pub duplicate_submissions: Vec<DuplicateSubmission>,
    pub analytics: LevelAnalytics,
    pub departments: Vec<DepartmentAnalytics>,
    pub plan: Vec<RepairOp>,
}

impl ReconReport {
    /// Nothing to repair and nothing that needs a human.
    pub fn is_clean(&self) -> bool {
        self.plan.is_empty()
            && self.orphans.is_empty()
            && self.ambiguous.is_empty()
            && self.skipped.is_empty()
    }
}
