use std::collections::{BTreeMap, HashMap};

use crate::config::BadgeNormalization;
use crate::model::{Employee, SurveyResponse};

/// Where a response lands after badge lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome<'a> {
    /// Exactly one employee carries this badge.
    Matched(&'a Employee),
    /// No employee carries this badge.
    Orphaned,
    /// Two or more employees carry this badge.
    Ambiguous,
    /// The response has no badge to look up.
    Malformed,
}

pub(crate) fn is_blank(badge: &str) -> bool {
    badge.trim().is_empty()
}

/// Employees indexed by normalized badge number.
///
/// `id` values are never compared across tables; only the badge joins.
pub struct BadgeIndex<'a> {
    normalization: BadgeNormalization,
    by_badge: BTreeMap<String, Vec<&'a Employee>>,
    by_id: HashMap<&'a str, &'a Employee>,
    malformed: Vec<&'a Employee>,
}

impl<'a> BadgeIndex<'a> {
    pub fn build(employees: &'a [Employee], normalization: BadgeNormalization) -> Self {
        let mut by_badge: BTreeMap<String, Vec<&'a Employee>> = BTreeMap::new();
        let mut by_id = HashMap::with_capacity(employees.len());
        let mut malformed = Vec::new();

        for emp in employees {
            by_id.insert(emp.id.as_str(), emp);
            if is_blank(&emp.badge_number) {
                malformed.push(emp);
                continue;
            }
            by_badge
                .entry(normalization.normalize(&emp.badge_number))
                .or_default()
                .push(emp);
        }

        Self { normalization, by_badge, by_id, malformed }
    }

    pub fn normalization(&self) -> BadgeNormalization {
        self.normalization
    }

    pub fn lookup(&self, response: &SurveyResponse) -> MatchOutcome<'a> {
        if is_blank(&response.badge_number) {
            return MatchOutcome::Malformed;
        }
        match self.by_badge.get(&self.normalization.normalize(&response.badge_number)) {
            None => MatchOutcome::Orphaned,
            Some(emps) if emps.len() == 1 => MatchOutcome::Matched(emps[0]),
            Some(_) => MatchOutcome::Ambiguous,
        }
    }

    pub fn employee_by_id(&self, id: &str) -> Option<&'a Employee> {
        self.by_id.get(id).copied()
    }

    /// Badges held by more than one employee, in badge order.
    pub fn ambiguous_badges(&self) -> impl Iterator<Item = (&str, &[&'a Employee])> {
        self.by_badge
            .iter()
            .filter(|(_, emps)| emps.len() > 1)
            .map(|(badge, emps)| (badge.as_str(), emps.as_slice()))
    }

    /// Employees without a badge number, in input order.
    pub fn malformed_employees(&self) -> &[&'a Employee] {
        &self.malformed
    }
}
