//! `surveysync-recon`: employee / survey-response reconciliation engine.
//!
//! Pure engine: receives materialized records, returns findings and a repair
//! plan. Store access goes through the [`store::RecordStore`] trait; no HTTP
//! or CLI dependencies here.

pub mod analytics;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod matcher;
pub mod model;
pub mod store;
pub mod workflow;

pub use analytics::{compute_department_analytics, compute_level_analytics, LevelAnalytics};
pub use config::ReconConfig;
pub use engine::{
    apply_repairs, build_repair_plan, find_level_drift, find_orphaned_responses,
    find_unlinked_responses, reconcile, Reconciler,
};
pub use error::ReconError;
pub use model::{Employee, Level, RepairOp, ReconReport, SurveyResponse};
pub use store::{MemoryStore, RecordStore, StoreError};
pub use workflow::{remediate, RemediationError, RemediationOutcome};
