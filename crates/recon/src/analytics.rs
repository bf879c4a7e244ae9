//! Completion counts by employee level and department.
//!
//! Responses are bucketed by the matched *employee's* level, never by the
//! response's own denormalized copy. A response counts toward "submitted"
//! only when its badge resolves to exactly one employee; each employee counts
//! once however many responses they sent.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::config::BadgeNormalization;
use crate::matcher::{BadgeIndex, MatchOutcome};
use crate::model::{Employee, Level, SurveyResponse};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LevelAnalytics {
    pub managerial_submitted: usize,
    pub managerial_total: usize,
    pub non_managerial_submitted: usize,
    pub non_managerial_total: usize,
    /// Employees whose level is missing or unrecognised.
    pub unclassified_submitted: usize,
    pub unclassified_total: usize,
    /// `None` when there are no managerial employees.
    pub managerial_rate: Option<f64>,
    /// `None` when there are no non-managerial employees.
    pub non_managerial_rate: Option<f64>,
}

impl LevelAnalytics {
    pub fn submitted(&self, level: Level) -> usize {
        match level {
            Level::Managerial => self.managerial_submitted,
            Level::NonManagerial => self.non_managerial_submitted,
        }
    }

    pub fn total(&self, level: Level) -> usize {
        match level {
            Level::Managerial => self.managerial_total,
            Level::NonManagerial => self.non_managerial_total,
        }
    }

    /// Completion rate in `[0, 1]`, or `None` when the level has no employees.
    pub fn rate(&self, level: Level) -> Option<f64> {
        completion_rate(self.submitted(level), self.total(level))
    }

    pub fn overall_rate(&self) -> Option<f64> {
        completion_rate(
            self.managerial_submitted + self.non_managerial_submitted + self.unclassified_submitted,
            self.managerial_total + self.non_managerial_total + self.unclassified_total,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentAnalytics {
    pub department: String,
    pub submitted: usize,
    pub total: usize,
    pub rate: Option<f64>,
}

pub fn completion_rate(submitted: usize, total: usize) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some((submitted.min(total)) as f64 / total as f64)
}

/// Ids of employees with at least one uniquely matched response.
fn submitted_ids<'a>(index: &BadgeIndex<'a>, responses: &[SurveyResponse]) -> HashSet<&'a str> {
    responses
        .iter()
        .filter_map(|r| match index.lookup(r) {
            MatchOutcome::Matched(emp) => Some(emp.id.as_str()),
            _ => None,
        })
        .collect()
}

pub fn compute_level_analytics(
    employees: &[Employee],
    responses: &[SurveyResponse],
) -> LevelAnalytics {
    let index = BadgeIndex::build(employees, BadgeNormalization::default());
    level_analytics_with(&index, employees, responses)
}

pub fn level_analytics_with(
    index: &BadgeIndex<'_>,
    employees: &[Employee],
    responses: &[SurveyResponse],
) -> LevelAnalytics {
    let submitted = submitted_ids(index, responses);
    let mut out = LevelAnalytics::default();

    for emp in employees {
        let done = submitted.contains(emp.id.as_str());
        let (sub, total) = match emp.level {
            Some(Level::Managerial) => (&mut out.managerial_submitted, &mut out.managerial_total),
            Some(Level::NonManagerial) => {
                (&mut out.non_managerial_submitted, &mut out.non_managerial_total)
            }
            None => (&mut out.unclassified_submitted, &mut out.unclassified_total),
        };
        *total += 1;
        if done {
            *sub += 1;
        }
    }

    out.managerial_rate = out.rate(Level::Managerial);
    out.non_managerial_rate = out.rate(Level::NonManagerial);
    out
}

pub fn compute_department_analytics(
    employees: &[Employee],
    responses: &[SurveyResponse],
) -> Vec<DepartmentAnalytics> {
    let index = BadgeIndex::build(employees, BadgeNormalization::default());
    department_analytics_with(&index, employees, responses)
}

/// Per-department counts, sorted by department name.
pub fn department_analytics_with(
    index: &BadgeIndex<'_>,
    employees: &[Employee],
    responses: &[SurveyResponse],
) -> Vec<DepartmentAnalytics> {
    let submitted = submitted_ids(index, responses);
    let mut groups: BTreeMap<String, (usize, usize)> = BTreeMap::new();

    for emp in employees {
        let dept = match emp.department.trim() {
            "" => "(none)".to_string(),
            d => d.to_string(),
        };
        let entry = groups.entry(dept).or_insert((0, 0));
        entry.1 += 1;
        if submitted.contains(emp.id.as_str()) {
            entry.0 += 1;
        }
    }

    groups
        .into_iter()
        .map(|(department, (submitted, total))| DepartmentAnalytics {
            department,
            submitted,
            total,
            rate: completion_rate(submitted, total),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SubmissionStatus;

    fn emp(id: &str, badge: &str, level: Option<Level>, dept: &str) -> Employee {
        Employee {
            id: id.into(),
            badge_number: badge.into(),
            name: id.into(),
            department: dept.into(),
            level,
            level_label: None,
            status: SubmissionStatus::NotSubmitted,
            email: None,
        }
    }

    fn resp(id: &str, badge: &str, level: Option<Level>) -> SurveyResponse {
        SurveyResponse {
            id: id.into(),
            badge_number: badge.into(),
            employee_ref: None,
            name: String::new(),
            department: String::new(),
            level,
            answers: BTreeMap::new(),
            created_at: None,
        }
    }

    #[test]
    fn counts_by_employee_level_not_response_level() {
        let emps = vec![
            emp("E1", "B1", Some(Level::Managerial), "HR"),
            emp("E2", "B2", Some(Level::NonManagerial), "HR"),
            emp("E3", "B3", Some(Level::NonManagerial), "SCM"),
        ];
        // R1 claims NonManagerial but E1 is Managerial
        let resps = vec![resp("R1", "B1", Some(Level::NonManagerial)), resp("R2", "B3", None)];
        let a = compute_level_analytics(&emps, &resps);
        assert_eq!(a.managerial_submitted, 1);
        assert_eq!(a.managerial_total, 1);
        assert_eq!(a.non_managerial_submitted, 1);
        assert_eq!(a.non_managerial_total, 2);
        assert_eq!(a.rate(Level::Managerial), Some(1.0));
        assert_eq!(a.rate(Level::NonManagerial), Some(0.5));
    }

    #[test]
    fn empty_level_has_no_rate() {
        let emps = vec![emp("E1", "B1", Some(Level::NonManagerial), "HR")];
        let a = compute_level_analytics(&emps, &[]);
        assert_eq!(a.managerial_total, 0);
        assert_eq!(a.rate(Level::Managerial), None);
        assert_eq!(a.managerial_rate, None);
        assert_eq!(a.non_managerial_rate, Some(0.0));

        let none = compute_level_analytics(&[], &[]);
        assert_eq!(none.overall_rate(), None);
    }

    #[test]
    fn duplicate_responses_count_once() {
        let emps = vec![emp("E1", "B1", Some(Level::Managerial), "HR")];
        let resps = vec![resp("R1", "B1", None), resp("R2", "b1", None)];
        let a = compute_level_analytics(&emps, &resps);
        assert_eq!(a.managerial_submitted, 1);
        assert_eq!(a.rate(Level::Managerial), Some(1.0));
    }

    #[test]
    fn orphans_and_ambiguous_do_not_count() {
        let emps = vec![
            emp("E1", "B1", Some(Level::Managerial), "HR"),
            emp("E2", "B1", Some(Level::Managerial), "HR"),
        ];
        let resps = vec![resp("R1", "B1", None), resp("R2", "NOPE", None)];
        let a = compute_level_analytics(&emps, &resps);
        assert_eq!(a.managerial_submitted, 0);
        assert_eq!(a.managerial_total, 2);
    }

    #[test]
    fn unclassified_employees_tracked_separately() {
        let emps = vec![emp("E1", "B1", None, "HR")];
        let a = compute_level_analytics(&emps, &[resp("R1", "B1", None)]);
        assert_eq!(a.unclassified_total, 1);
        assert_eq!(a.unclassified_submitted, 1);
        assert_eq!(a.overall_rate(), Some(1.0));
    }

    #[test]
    fn departments_sorted_with_blank_bucket() {
        let emps = vec![
            emp("E1", "B1", Some(Level::Managerial), "SCM"),
            emp("E2", "B2", Some(Level::Managerial), ""),
            emp("E3", "B3", Some(Level::Managerial), "Environmental"),
        ];
        let depts = compute_department_analytics(&emps, &[resp("R1", "B1", None)]);
        let names: Vec<_> = depts.iter().map(|d| d.department.as_str()).collect();
        assert_eq!(names, vec!["(none)", "Environmental", "SCM"]);
        assert_eq!(depts[2].submitted, 1);
        assert_eq!(depts[2].rate, Some(1.0));
        assert_eq!(depts[0].rate, Some(0.0));
    }
}
