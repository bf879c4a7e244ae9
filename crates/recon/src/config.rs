use serde::{Deserialize, Serialize};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Process-wide settings, parsed once at start and passed down explicitly.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub tables: TablesConfig,
    pub matching: MatchingConfig,
    pub repair: RepairConfig,
    pub store: StoreSettings,
    pub columns: ColumnsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    pub employees: String,
    pub responses: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            employees: "employees".into(),
            responses: "survey_responses".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// How badge numbers are compared. Stored values are never rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeNormalization {
    /// Trim surrounding whitespace and uppercase before comparing.
    #[default]
    UpperTrim,
    /// Compare the stored strings byte for byte.
    Exact,
}

impl BadgeNormalization {
    pub fn normalize(&self, badge: &str) -> String {
        match self {
            Self::UpperTrim => badge.trim().to_uppercase(),
            Self::Exact => badge.to_string(),
        }
    }
}

impl std::fmt::Display for BadgeNormalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpperTrim => write!(f, "upper_trim"),
            Self::Exact => write!(f, "exact"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub badge_normalization: BadgeNormalization,
}

// ---------------------------------------------------------------------------
// Repair + Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Compute the plan without applying it.
    pub dry_run: bool,
    /// Number of updates sent per chunk.
    pub batch_size: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            batch_size: 50,
        }
    }
}

/// Transport settings for the remote store. Credentials live elsewhere.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub page_size: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ColumnsConfig {
    pub employees: EmployeeColumns,
    pub responses: ResponseColumns,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmployeeColumns {
    pub id: String,
    pub badge_number: String,
    pub name: String,
    pub department: String,
    pub level: String,
    pub status: String,
    pub email: String,
}

impl Default for EmployeeColumns {
    fn default() -> Self {
        Self {
            id: "id".into(),
            badge_number: "badge_number".into(),
            name: "name".into(),
            department: "department".into(),
            level: "level".into(),
            status: "status".into(),
            email: "email".into(),
        }
    }
}

impl EmployeeColumns {
    fn all(&self) -> [(&'static str, &str); 7] {
        [
            ("id", self.id.as_str()),
            ("badge_number", self.badge_number.as_str()),
            ("name", self.name.as_str()),
            ("department", self.department.as_str()),
            ("level", self.level.as_str()),
            ("status", self.status.as_str()),
            ("email", self.email.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponseColumns {
    pub id: String,
    pub badge_number: String,
    pub employee_ref: String,
    pub name: String,
    pub department: String,
    pub level: String,
    pub created_at: String,
}

impl Default for ResponseColumns {
    fn default() -> Self {
        Self {
            id: "id".into(),
            badge_number: "badge_number".into(),
            employee_ref: "employee_id".into(),
            name: "name".into(),
            department: "department".into(),
            level: "level".into(),
            created_at: "created_at".into(),
        }
    }
}

impl ResponseColumns {
    fn all(&self) -> [(&'static str, &str); 7] {
        [
            ("id", self.id.as_str()),
            ("badge_number", self.badge_number.as_str()),
            ("employee_ref", self.employee_ref.as_str()),
            ("name", self.name.as_str()),
            ("department", self.department.as_str()),
            ("level", self.level.as_str()),
            ("created_at", self.created_at.as_str()),
        ]
    }

    /// True when `column` is one of the mapped (non-answer) columns.
    pub fn is_mapped(&self, column: &str) -> bool {
        self.all().iter().any(|(_, c)| *c == column)
    }

    /// Store column that a repair field writes to.
    pub fn column_for(&self, field: crate::model::RepairField) -> &str {
        match field {
            crate::model::RepairField::EmployeeRef => &self.employee_ref,
            crate::model::RepairField::Level => &self.level,
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.tables.employees.trim().is_empty() || self.tables.responses.trim().is_empty() {
            return Err(ReconError::ConfigValidation(
                "table names must not be empty".into(),
            ));
        }
        if self.tables.employees == self.tables.responses {
            return Err(ReconError::ConfigValidation(format!(
                "employees and responses cannot share table '{}'",
                self.tables.employees
            )));
        }

        if self.repair.batch_size == 0 {
            return Err(ReconError::ConfigValidation(
                "repair.batch_size must be at least 1".into(),
            ));
        }
        if self.store.page_size == 0 {
            return Err(ReconError::ConfigValidation(
                "store.page_size must be at least 1".into(),
            ));
        }

        for (field, column) in self.columns.employees.all() {
            if column.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "columns.employees.{field} must not be empty"
                )));
            }
        }
        for (field, column) in self.columns.responses.all() {
            if column.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!(
                    "columns.responses.{field} must not be empty"
                )));
            }
        }

        let r = &self.columns.responses;
        if r.employee_ref == r.id || r.level == r.id || r.employee_ref == r.level {
            return Err(ReconError::ConfigValidation(
                "columns.responses: id, employee_ref and level must be distinct columns".into(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
