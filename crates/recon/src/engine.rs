use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::analytics::{department_analytics_with, level_analytics_with};
use crate::config::{BadgeNormalization, ReconConfig};
use crate::evidence::{compute_summary, plan_fingerprint};
use crate::matcher::{is_blank, BadgeIndex, MatchOutcome};
use crate::model::{
    AmbiguousMatch, CaseMismatch, DuplicateSubmission, Employee, Level, LevelDrift,
    LevelDriftEntry, OrphanEntry, ReconMeta, ReconReport, RecordTable, RepairField, RepairOp,
    SkipReason, SkippedRecord, StatusDrift, SubmissionStatus, SurveyResponse, UnlinkedEntry,
    UnlinkedResponse,
};

/// One reconciliation pass over two materialized collections.
///
/// Pure: holds borrowed inputs and a badge index, never mutates either side.
pub struct Reconciler<'a> {
    employees: &'a [Employee],
    responses: &'a [SurveyResponse],
    index: BadgeIndex<'a>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        employees: &'a [Employee],
        responses: &'a [SurveyResponse],
        normalization: BadgeNormalization,
    ) -> Self {
        Self {
            employees,
            responses,
            index: BadgeIndex::build(employees, normalization),
        }
    }

    fn outcomes(&self) -> impl Iterator<Item = (&'a SurveyResponse, MatchOutcome<'a>)> + '_ {
        self.responses.iter().map(move |r| (r, self.index.lookup(r)))
    }

    fn matched(&self) -> impl Iterator<Item = (&'a SurveyResponse, &'a Employee)> + '_ {
        self.outcomes().filter_map(|(r, outcome)| match outcome {
            MatchOutcome::Matched(emp) => Some((r, emp)),
            _ => None,
        })
    }

    pub fn matched_count(&self) -> usize {
        self.matched().count()
    }

    /// Responses whose badge has no employee, in input order.
    pub fn orphaned(&self) -> Vec<&'a SurveyResponse> {
        self.outcomes()
            .filter(|(_, outcome)| *outcome == MatchOutcome::Orphaned)
            .map(|(r, _)| r)
            .collect()
    }

    /// Matched responses whose `employee_ref` is null or points elsewhere.
    pub fn unlinked(&self) -> Vec<UnlinkedResponse<'a>> {
        self.matched()
            .filter(|(r, emp)| r.employee_ref.as_deref() != Some(emp.id.as_str()))
            .map(|(response, matched_employee)| UnlinkedResponse { response, matched_employee })
            .collect()
    }

    /// Matched responses whose level disagrees with the employee's level.
    /// Employees with an unknown level produce no drift.
    pub fn level_drift(&self) -> Vec<LevelDrift<'a>> {
        self.matched()
            .filter_map(|(r, emp)| {
                let correct_level = emp.level?;
                (r.level != Some(correct_level)).then_some(LevelDrift {
                    response: r,
                    current_level: r.level,
                    correct_level,
                    correct_label: emp.level_label.as_deref().unwrap_or(correct_level.as_str()),
                })
            })
            .collect()
    }

    /// Link repairs first, then level resyncs, each in response input order.
    pub fn repair_plan(&self) -> Vec<RepairOp> {
        let mut plan: Vec<RepairOp> = self
            .unlinked()
            .into_iter()
            .map(|u| RepairOp {
                target_response_id: u.response.id.clone(),
                field: RepairField::EmployeeRef,
                new_value: u.matched_employee.id.clone(),
                old_value: u.response.employee_ref.clone(),
            })
            .collect();

        plan.extend(self.level_drift().into_iter().map(|d| RepairOp {
            target_response_id: d.response.id.clone(),
            field: RepairField::Level,
            new_value: d.correct_label.to_string(),
            old_value: d.current_level.map(|l| l.as_str().to_string()),
        }));

        plan
    }

    /// Badges held by several employees, with the responses stuck on them.
    pub fn ambiguous(&self) -> Vec<AmbiguousMatch> {
        let normalization = self.index.normalization();
        let mut stuck: HashMap<String, Vec<String>> = HashMap::new();
        for (r, outcome) in self.outcomes() {
            if outcome == MatchOutcome::Ambiguous {
                stuck
                    .entry(normalization.normalize(&r.badge_number))
                    .or_default()
                    .push(r.id.clone());
            }
        }

        self.index
            .ambiguous_badges()
            .map(|(badge, emps)| {
                let response_ids = stuck.remove(badge).unwrap_or_default();
                warn!(
                    badge = %badge,
                    employees = emps.len(),
                    responses = response_ids.len(),
                    "badge number shared by several employees; needs manual resolution"
                );
                AmbiguousMatch {
                    badge_number: badge.to_string(),
                    employee_ids: emps.iter().map(|e| e.id.clone()).collect(),
                    response_ids,
                }
            })
            .collect()
    }

    /// Records without a join key: employees first, then responses.
    pub fn skipped(&self) -> Vec<SkippedRecord> {
        let employees = self.index.malformed_employees().iter().map(|e| SkippedRecord {
            table: RecordTable::Employees,
            record_id: Some(e.id.clone()),
            reason: SkipReason::MissingBadge,
        });
        let responses = self
            .responses
            .iter()
            .filter(|r| is_blank(&r.badge_number))
            .map(|r| SkippedRecord {
                table: RecordTable::Responses,
                record_id: Some(r.id.clone()),
                reason: SkipReason::MissingBadge,
            });
        employees.chain(responses).collect()
    }

    /// Matches that only succeeded because of normalization.
    pub fn case_mismatches(&self) -> Vec<CaseMismatch> {
        self.matched()
            .filter(|(r, emp)| r.badge_number != emp.badge_number)
            .map(|(r, emp)| {
                debug!(
                    response = %r.id,
                    response_badge = %r.badge_number,
                    employee_badge = %emp.badge_number,
                    "badge matched only after normalization"
                );
                CaseMismatch {
                    response_id: r.id.clone(),
                    response_badge: r.badge_number.clone(),
                    employee_id: emp.id.clone(),
                    employee_badge: emp.badge_number.clone(),
                }
            })
            .collect()
    }

    /// Employees whose recorded status disagrees with the responses on file.
    /// Employees without a badge or on a shared badge are not judged.
    pub fn status_drift(&self) -> Vec<StatusDrift> {
        let submitted: HashSet<&str> = self.matched().map(|(_, emp)| emp.id.as_str()).collect();
        let ambiguous: HashSet<&str> = self
            .index
            .ambiguous_badges()
            .flat_map(|(_, emps)| emps.iter().map(|e| e.id.as_str()))
            .collect();

        self.employees
            .iter()
            .filter(|e| !is_blank(&e.badge_number) && !ambiguous.contains(e.id.as_str()))
            .filter_map(|e| {
                let observed = if submitted.contains(e.id.as_str()) {
                    SubmissionStatus::Submitted
                } else {
                    SubmissionStatus::NotSubmitted
                };
                (observed != e.status).then(|| StatusDrift {
                    employee_id: e.id.clone(),
                    badge_number: e.badge_number.clone(),
                    recorded: e.status,
                    observed,
                })
            })
            .collect()
    }

    /// Employees with more than one matched response, by employee id.
    pub fn duplicate_submissions(&self) -> Vec<DuplicateSubmission> {
        let mut groups: BTreeMap<&str, (&Employee, Vec<String>)> = BTreeMap::new();
        for (r, emp) in self.matched() {
            groups
                .entry(emp.id.as_str())
                .or_insert_with(|| (emp, Vec::new()))
                .1
                .push(r.id.clone());
        }
        groups
            .into_values()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(emp, response_ids)| DuplicateSubmission {
                employee_id: emp.id.clone(),
                badge_number: emp.badge_number.clone(),
                response_ids,
            })
            .collect()
    }

    /// Full report. `decode_skipped` carries rows dropped before decoding.
    pub fn report(&self, decode_skipped: Vec<SkippedRecord>) -> ReconReport {
        let orphans: Vec<OrphanEntry> = self
            .orphaned()
            .into_iter()
            .map(|r| OrphanEntry {
                response_id: r.id.clone(),
                badge_number: r.badge_number.clone(),
                name: r.name.clone(),
                referenced_employee_id: r
                    .employee_ref
                    .as_deref()
                    .and_then(|id| self.index.employee_by_id(id))
                    .map(|e| e.id.clone()),
            })
            .collect();

        let unlinked: Vec<UnlinkedEntry> = self
            .unlinked()
            .into_iter()
            .map(|u| UnlinkedEntry {
                response_id: u.response.id.clone(),
                badge_number: u.response.badge_number.clone(),
                current_ref: u.response.employee_ref.clone(),
                employee_id: u.matched_employee.id.clone(),
            })
            .collect();

        let level_drift: Vec<LevelDriftEntry> = self
            .level_drift()
            .into_iter()
            .map(|d| LevelDriftEntry {
                response_id: d.response.id.clone(),
                badge_number: d.response.badge_number.clone(),
                current_level: d.current_level,
                correct_level: d.correct_level,
            })
            .collect();

        let mut skipped = decode_skipped;
        skipped.extend(self.skipped());

        let plan = self.repair_plan();
        let mut report = ReconReport {
            meta: ReconMeta {
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: chrono::Utc::now().to_rfc3339(),
                normalization: self.index.normalization(),
                plan_fingerprint: plan_fingerprint(&plan),
            },
            summary: Default::default(),
            orphans,
            unlinked,
            level_drift,
            ambiguous: self.ambiguous(),
            skipped,
            case_mismatches: self.case_mismatches(),
            status_drift: self.status_drift(),
            duplicate_submissions: self.duplicate_submissions(),
            analytics: level_analytics_with(&self.index, self.employees, self.responses),
            departments: department_analytics_with(&self.index, self.employees, self.responses),
            plan,
        };
        report.summary = compute_summary(
            &report,
            self.employees.len(),
            self.responses.len(),
            self.matched_count(),
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Free functions (default normalization)
// ---------------------------------------------------------------------------

pub fn find_orphaned_responses<'a>(
    employees: &'a [Employee],
    responses: &'a [SurveyResponse],
) -> Vec<&'a SurveyResponse> {
    Reconciler::new(employees, responses, BadgeNormalization::default()).orphaned()
}

pub fn find_unlinked_responses<'a>(
    employees: &'a [Employee],
    responses: &'a [SurveyResponse],
) -> Vec<UnlinkedResponse<'a>> {
    Reconciler::new(employees, responses, BadgeNormalization::default()).unlinked()
}

pub fn find_level_drift<'a>(
    employees: &'a [Employee],
    responses: &'a [SurveyResponse],
) -> Vec<LevelDrift<'a>> {
    Reconciler::new(employees, responses, BadgeNormalization::default()).level_drift()
}

pub fn build_repair_plan(employees: &[Employee], responses: &[SurveyResponse]) -> Vec<RepairOp> {
    Reconciler::new(employees, responses, BadgeNormalization::default()).repair_plan()
}

/// Apply a plan in memory. Ops naming an unknown response id are ignored.
pub fn apply_repairs(responses: &[SurveyResponse], plan: &[RepairOp]) -> Vec<SurveyResponse> {
    let mut out = responses.to_vec();
    let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, r) in out.iter().enumerate() {
        positions.entry(r.id.clone()).or_default().push(i);
    }

    for op in plan {
        let Some(targets) = positions.get(&op.target_response_id) else {
            continue;
        };
        for &i in targets {
            match op.field {
                RepairField::EmployeeRef => out[i].employee_ref = Some(op.new_value.clone()),
                RepairField::Level => out[i].level = Level::parse(&op.new_value),
            }
        }
    }

    out
}

/// Reconcile with the configured normalization and produce the full report.
pub fn reconcile(
    employees: &[Employee],
    responses: &[SurveyResponse],
    config: &ReconConfig,
    decode_skipped: Vec<SkippedRecord>,
) -> ReconReport {
    let report = Reconciler::new(employees, responses, config.matching.badge_normalization)
        .report(decode_skipped);
    let s = &report.summary;
    info!(
        employees = s.employees,
        responses = s.responses,
        matched = s.matched,
        orphaned = s.orphaned,
        unlinked = s.unlinked,
        level_drift = s.level_drift,
        ambiguous = s.ambiguous,
        skipped = s.skipped,
        repairs = s.repairs,
        "reconciliation complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn emp(id: &str, badge: &str, level: Level) -> Employee {
        Employee {
            id: id.into(),
            badge_number: badge.into(),
            name: format!("emp {id}"),
            department: "HR".into(),
            level: Some(level),
            level_label: None,
            status: SubmissionStatus::NotSubmitted,
            email: None,
        }
    }

    fn resp(id: &str, badge: &str, employee_ref: Option<&str>, level: Option<Level>) -> SurveyResponse {
        SurveyResponse {
            id: id.into(),
            badge_number: badge.into(),
            employee_ref: employee_ref.map(String::from),
            name: format!("resp {id}"),
            department: "HR".into(),
            level,
            answers: BTreeMap::new(),
            created_at: None,
        }
    }

    #[test]
    fn orphans_keep_input_order() {
        let emps = vec![emp("E1", "B1", Level::Managerial)];
        let resps = vec![
            resp("R3", "X3", None, None),
            resp("R1", "B1", None, None),
            resp("R2", "X2", None, None),
        ];
        let ids: Vec<_> = find_orphaned_responses(&emps, &resps).into_iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["R3", "R2"]);
    }

    #[test]
    fn stale_ref_is_unlinked() {
        let emps = vec![emp("E1", "B1", Level::Managerial), emp("E2", "B2", Level::Managerial)];
        let resps = vec![
            resp("R1", "B1", Some("E2"), Some(Level::Managerial)),
            resp("R2", "B2", Some("E2"), Some(Level::Managerial)),
        ];
        let unlinked = find_unlinked_responses(&emps, &resps);
        assert_eq!(unlinked.len(), 1);
        assert_eq!(unlinked[0].response.id, "R1");
        assert_eq!(unlinked[0].matched_employee.id, "E1");
    }

    #[test]
    fn orphans_never_drift() {
        let emps = vec![emp("E1", "B1", Level::Managerial)];
        let resps = vec![resp("R1", "NOPE", None, Some(Level::NonManagerial))];
        assert!(find_level_drift(&emps, &resps).is_empty());
        assert!(build_repair_plan(&emps, &resps).is_empty());
    }

    #[test]
    fn plan_orders_links_before_levels() {
        let emps = vec![emp("E1", "B1", Level::Managerial), emp("E2", "B2", Level::NonManagerial)];
        let resps = vec![
            resp("R1", "B1", Some("E1"), Some(Level::NonManagerial)),
            resp("R2", "B2", None, Some(Level::NonManagerial)),
        ];
        let plan = build_repair_plan(&emps, &resps);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].field, RepairField::EmployeeRef);
        assert_eq!(plan[0].target_response_id, "R2");
        assert_eq!(plan[1].field, RepairField::Level);
        assert_eq!(plan[1].target_response_id, "R1");
        assert_eq!(plan[1].new_value, "Managerial");
        assert_eq!(plan[1].old_value.as_deref(), Some("Non-Managerial"));
    }

    #[test]
    fn level_resync_copies_roster_spelling() {
        let mut e1 = emp("E1", "B1", Level::NonManagerial);
        e1.level_label = Some("Non Managerial".into());
        let emps = vec![e1];
        let resps = vec![resp("R1", "B1", Some("E1"), Some(Level::Managerial))];

        let plan = build_repair_plan(&emps, &resps);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].new_value, "Non Managerial");

        // spelling alone is not drift
        let repaired = apply_repairs(&resps, &plan);
        assert_eq!(repaired[0].level, Some(Level::NonManagerial));
        assert!(build_repair_plan(&emps, &repaired).is_empty());
    }

    #[test]
    fn applying_plan_clears_it() {
        let emps = vec![emp("E1", "B1", Level::Managerial)];
        let resps = vec![resp("R1", "b1", Some("STALE"), None)];
        let plan = build_repair_plan(&emps, &resps);
        assert_eq!(plan.len(), 2);
        let repaired = apply_repairs(&resps, &plan);
        assert!(build_repair_plan(&emps, &repaired).is_empty());
        // stored badge keeps its original casing
        assert_eq!(repaired[0].badge_number, "b1");
    }

    #[test]
    fn apply_ignores_unknown_targets() {
        let resps = vec![resp("R1", "B1", None, None)];
        let plan = vec![RepairOp {
            target_response_id: "R9".into(),
            field: RepairField::EmployeeRef,
            new_value: "E1".into(),
            old_value: None,
        }];
        assert_eq!(apply_repairs(&resps, &plan), resps);
    }

    #[test]
    fn ambiguous_lists_stuck_responses() {
        let emps = vec![emp("E1", "B2", Level::Managerial), emp("E2", "B2", Level::NonManagerial)];
        let resps = vec![resp("R1", "B2", None, None)];
        let rec = Reconciler::new(&emps, &resps, BadgeNormalization::UpperTrim);
        let amb = rec.ambiguous();
        assert_eq!(amb.len(), 1);
        assert_eq!(amb[0].employee_ids, vec!["E1", "E2"]);
        assert_eq!(amb[0].response_ids, vec!["R1"]);
        assert!(rec.repair_plan().is_empty());
        assert!(rec.orphaned().is_empty());
    }

    #[test]
    fn blank_badges_are_skipped_not_orphaned() {
        let emps = vec![emp("E1", "", Level::Managerial)];
        let resps = vec![resp("R1", " ", None, None)];
        let rec = Reconciler::new(&emps, &resps, BadgeNormalization::UpperTrim);
        assert!(rec.orphaned().is_empty());
        let skipped = rec.skipped();
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].table, RecordTable::Employees);
        assert_eq!(skipped[1].table, RecordTable::Responses);
        assert_eq!(skipped[1].reason, SkipReason::MissingBadge);
    }

    #[test]
    fn case_mismatch_reported_but_linked() {
        let emps = vec![emp("E1", "MTI240266", Level::Managerial)];
        let resps = vec![resp("R1", "mti240266", None, Some(Level::Managerial))];
        let rec = Reconciler::new(&emps, &resps, BadgeNormalization::UpperTrim);
        assert_eq!(rec.case_mismatches().len(), 1);
        assert_eq!(rec.repair_plan().len(), 1);
    }

    #[test]
    fn status_and_duplicates() {
        let mut submitted_without_response = emp("E2", "B2", Level::Managerial);
        submitted_without_response.status = SubmissionStatus::Submitted;
        let emps = vec![emp("E1", "B1", Level::Managerial), submitted_without_response];
        let resps = vec![
            resp("R1", "B1", Some("E1"), Some(Level::Managerial)),
            resp("R2", "B1", Some("E1"), Some(Level::Managerial)),
        ];
        let rec = Reconciler::new(&emps, &resps, BadgeNormalization::UpperTrim);

        let drift = rec.status_drift();
        assert_eq!(drift.len(), 2);
        assert_eq!(drift[0].employee_id, "E1");
        assert_eq!(drift[0].observed, SubmissionStatus::Submitted);
        assert_eq!(drift[1].employee_id, "E2");
        assert_eq!(drift[1].observed, SubmissionStatus::NotSubmitted);

        let dups = rec.duplicate_submissions();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].response_ids, vec!["R1", "R2"]);
    }

    #[test]
    fn report_hints_at_mistyped_badge() {
        let emps = vec![emp("E1", "MTI001", Level::Managerial)];
        let resps = vec![resp("R1", "MTI00I", Some("E1"), None)];
        let report = reconcile(&emps, &resps, &ReconConfig::default(), Vec::new());
        assert_eq!(report.orphans.len(), 1);
        assert_eq!(report.orphans[0].referenced_employee_id.as_deref(), Some("E1"));
        assert!(!report.is_clean());
    }
}
