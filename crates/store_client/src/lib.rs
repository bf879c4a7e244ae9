//! Store client: the hosted Postgres REST layer behind [`RecordStore`].
//!
//! Blocking reqwest, no async runtime. Owns credentials on disk, pagination,
//! and retry with backoff. Everything about reconciliation lives in
//! `surveysync-recon`.
//!
//! [`RecordStore`]: surveysync_recon::store::RecordStore

mod auth;
mod client;

pub use auth::{
    credentials_file_path, delete_credentials, load_credentials, resolve_credentials,
    save_credentials, StoreCredentials, ENV_API_KEY, ENV_URL,
};
pub use client::{ClientOptions, StoreClient};
