use crate::model::{RecordTable, ReconReport, ReconSummary, RepairOp, SkipReason};

/// Compute summary counts from a built report.
pub fn compute_summary(
    report: &ReconReport,
    employees: usize,
    responses: usize,
    matched: usize,
) -> ReconSummary {
    ReconSummary {
        employees,
        responses,
        matched,
        orphaned: report.orphans.len(),
        unlinked: report.unlinked.len(),
        level_drift: report.level_drift.len(),
        ambiguous: report.ambiguous.len(),
        ambiguous_responses: report.ambiguous.iter().map(|a| a.response_ids.len()).sum(),
        skipped: report.skipped.len(),
        malformed_responses: report
            .skipped
            .iter()
            .filter(|s| s.table == RecordTable::Responses && s.reason == SkipReason::MissingBadge)
            .count(),
        case_mismatches: report.case_mismatches.len(),
        status_drift: report.status_drift.len(),
        duplicate_submissions: report.duplicate_submissions.len(),
        repairs: report.plan.len(),
    }
}

/// `blake3:<hex>` over the canonical JSON of the plan.
///
/// Two runs over unchanged data produce the same fingerprint, so an operator
/// can insist that the plan being applied is the one they reviewed.
pub fn plan_fingerprint(plan: &[RepairOp]) -> String {
    let bytes = serde_json::to_vec(plan).unwrap_or_default();
    format!("blake3:{}", blake3::hash(&bytes).to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RepairField;

    fn op(id: &str, field: RepairField, value: &str) -> RepairOp {
        RepairOp {
            target_response_id: id.into(),
            field,
            new_value: value.into(),
            old_value: None,
        }
    }

    #[test]
    fn fingerprint_is_stable_and_order_sensitive() {
        let a = vec![op("R1", RepairField::EmployeeRef, "E1"), op("R1", RepairField::Level, "Managerial")];
        let b = vec![op("R1", RepairField::Level, "Managerial"), op("R1", RepairField::EmployeeRef, "E1")];
        assert_eq!(plan_fingerprint(&a), plan_fingerprint(&a.clone()));
        assert_ne!(plan_fingerprint(&a), plan_fingerprint(&b));
        assert!(plan_fingerprint(&a).starts_with("blake3:"));
        assert_eq!(plan_fingerprint(&a).len(), 7 + 64);
    }

    #[test]
    fn empty_plan_has_fingerprint() {
        assert_eq!(plan_fingerprint(&[]), plan_fingerprint(&Vec::new()));
    }
}
