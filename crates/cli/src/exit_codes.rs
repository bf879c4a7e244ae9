//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success / data clean                     |
//! | 1       | Universal        | Defects found (`report`)                 |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 60-69   | survey           | Config, store and repair codes           |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use surveysync_recon::store::StoreError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed, nothing to report.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure (output file unwritable, etc.).
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Reconciliation found defects (orphans, ambiguous badges, pending repairs,
/// skipped records). Like `diff(1)`, exit 1 means "not clean."
pub const EXIT_DEFECTS: u8 = 1;

/// Usage error - bad arguments, conflicting options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Survey (60-69)
// =============================================================================

/// Config file unreadable, unparsable, or failed validation.
pub const EXIT_INVALID_CONFIG: u8 = 60;

/// No store credentials (no flag, env var, or saved file).
pub const EXIT_STORE_NOT_AUTH: u8 = 61;

/// Credentials rejected by the store (401/403) or read-only target.
pub const EXIT_STORE_AUTH: u8 = 62;

/// Store upstream error (4xx/5xx), timeout, or network failure after retries.
pub const EXIT_STORE_UPSTREAM: u8 = 63;

/// Some repair operations did not land (failed, skipped, or not attempted).
pub const EXIT_REPAIR_PARTIAL: u8 = 64;

/// Every operation landed but re-reading the store still finds repairs.
pub const EXIT_VERIFY_FAILED: u8 = 65;

/// `--expect-plan` fingerprint differs from the freshly computed plan.
pub const EXIT_PLAN_MISMATCH: u8 = 66;

/// Snapshot directory missing a table or holding unreadable data.
pub const EXIT_SNAPSHOT: u8 = 67;

/// Map a StoreError to its exit code.
pub fn store_exit_code(err: &StoreError) -> u8 {
    match err {
        StoreError::NotAuthenticated => EXIT_STORE_NOT_AUTH,
        StoreError::Auth(..) | StoreError::ReadOnly(_) => EXIT_STORE_AUTH,
        StoreError::Network(_)
        | StoreError::Http(..)
        | StoreError::Parse(_)
        | StoreError::Timeout(_) => EXIT_STORE_UPSTREAM,
    }
}
