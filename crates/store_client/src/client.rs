//! REST client for the hosted store (PostgREST dialect).
//!
//! Blocking reqwest client (no Tokio runtime required). Reads page through
//! `limit`/`offset`. Single-row writes are a `PATCH`; batched writes are one
//! upsert `POST` per batch, merged on the id column.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use serde_json::{Map, Value};
use surveysync_recon::config::StoreSettings;
use surveysync_recon::store::{RecordStore, StoreError};
use tracing::{debug, warn};

use crate::auth::StoreCredentials;

const USER_AGENT: &str = concat!("ssync/", env!("CARGO_PKG_VERSION"));

/// Transport knobs. Built from the `[store]` config section.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub page_size: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    /// First retry delay; doubles on each attempt.
    pub retry_backoff: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&StoreSettings::default())
    }
}

impl From<&StoreSettings> for ClientOptions {
    fn from(s: &StoreSettings) -> Self {
        Self {
            page_size: s.page_size.max(1),
            timeout: Duration::from_secs(s.timeout_secs),
            max_retries: s.max_retries,
            retry_backoff: Duration::from_millis(s.retry_backoff_ms),
        }
    }
}

/// Store client (blocking).
#[derive(Clone)]
pub struct StoreClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    options: ClientOptions,
    /// Per-table sort column for stable pagination; `id` when unset.
    order_columns: HashMap<String, String>,
}

impl StoreClient {
    pub fn new(creds: StoreCredentials, options: ClientOptions) -> Result<Self, StoreError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(options.timeout)
            .build()
            .map_err(|e| StoreError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: creds.url.trim_end_matches('/').to_string(),
            api_key: creds.api_key,
            options,
            order_columns: HashMap::new(),
        })
    }

    /// Sort `table` by `column` when paging.
    pub fn with_order_column(mut self, table: &str, column: &str) -> Self {
        self.order_columns.insert(table.to_string(), column.to_string());
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        req.header("apikey", &self.api_key).bearer_auth(&self.api_key)
    }

    fn order_for(&self, table: &str) -> String {
        let column = self.order_columns.get(table).map(String::as_str).unwrap_or("id");
        format!("{column}.asc")
    }

    /// Fetch one row of `table` to check URL, key and table name.
    pub fn probe(&self, table: &str) -> Result<(), StoreError> {
        let url = self.table_url(table);
        let resp = self.send_with_retry(|http| {
            self.authed(http.get(&url)).query(&[("select", "*"), ("limit", "1")])
        })?;
        parse_rows(resp).map(|_| ())
    }

    fn fetch_page(&self, table: &str, offset: usize) -> Result<Vec<Value>, StoreError> {
        let url = self.table_url(table);
        let order = self.order_for(table);
        let limit = self.options.page_size.to_string();
        let offset = offset.to_string();
        let resp = self.send_with_retry(|http| {
            self.authed(http.get(&url)).query(&[
                ("select", "*"),
                ("order", order.as_str()),
                ("limit", limit.as_str()),
                ("offset", offset.as_str()),
            ])
        })?;
        parse_rows(resp)
    }

    /// Send with retry + exponential backoff.
    ///
    /// `build_request` is called once per attempt. 401/403 and other 4xx
    /// (except 429) fail immediately; 429, 5xx and transport errors retry.
    fn send_with_retry(
        &self,
        build_request: impl Fn(&reqwest::blocking::Client) -> reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response, StoreError> {
        let max_retries = self.options.max_retries;
        let mut backoff = self.options.retry_backoff;
        let mut attempt = 0u32;

        loop {
            let last = attempt == max_retries;
            match build_request(&self.http).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();

                    if (200..300).contains(&status) {
                        return Ok(resp);
                    }

                    // Auth errors: fail immediately
                    if status == 401 || status == 403 {
                        return Err(StoreError::Auth(status, error_message(resp, status)));
                    }

                    // Other 4xx (not 429): fail immediately
                    if (400..500).contains(&status) && status != 429 {
                        return Err(StoreError::Http(status, error_message(resp, status)));
                    }

                    // Retryable: 429, 5xx
                    if last {
                        let what = if status == 429 { "rate limited" } else { "upstream error" };
                        return Err(StoreError::Http(
                            status,
                            format!("{what} after {} attempts", max_retries + 1),
                        ));
                    }

                    // Respect Retry-After for 429
                    let wait = if status == 429 {
                        resp.headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.trim().parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or(backoff)
                    } else {
                        backoff
                    };
                    warn!(attempt = attempt + 1, max_retries, wait_ms = wait.as_millis() as u64, status, "retrying request");
                    thread::sleep(wait);
                }
                Err(e) => {
                    // Network/timeout errors: retry
                    if last {
                        return Err(if e.is_timeout() {
                            StoreError::Timeout(format!("{e} (after {} attempts)", max_retries + 1))
                        } else {
                            StoreError::Network(format!("{e} (after {} attempts)", max_retries + 1))
                        });
                    }
                    warn!(attempt = attempt + 1, max_retries, wait_ms = backoff.as_millis() as u64, error = %e, "retrying request");
                    thread::sleep(backoff);
                }
            }
            backoff *= 2;
            attempt += 1;
        }
    }
}

/// PostgREST error bodies carry `message` (and sometimes `hint`).
fn error_message(resp: reqwest::blocking::Response, status: u16) -> String {
    let body: Value = resp.json().unwrap_or(Value::Null);
    let message = body
        .get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("request failed with status {status}"));
    match body.get("hint").and_then(Value::as_str) {
        Some(hint) if !hint.is_empty() => format!("{message} ({hint})"),
        _ => message,
    }
}

fn parse_rows(resp: reqwest::blocking::Response) -> Result<Vec<Value>, StoreError> {
    let text = resp.text().map_err(|e| StoreError::Network(format!("failed to read response body: {e}")))?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(rows)) => Ok(rows),
        Ok(_) => Err(StoreError::Parse("expected a JSON array of rows".into())),
        Err(e) => Err(StoreError::Parse(format!(
            "{e} (body: {})",
            text.chars().take(200).collect::<String>()
        ))),
    }
}

impl RecordStore for StoreClient {
    fn fetch_all(&self, table: &str) -> Result<Vec<Value>, StoreError> {
        let mut rows = Vec::new();
        loop {
            let page = self.fetch_page(table, rows.len())?;
            let n = page.len();
            rows.extend(page);
            debug!(table, page_rows = n, total = rows.len(), "fetched page");
            if n < self.options.page_size {
                return Ok(rows);
            }
        }
    }

    fn update(
        &self,
        table: &str,
        id_column: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let url = self.table_url(table);
        let filter = format!("eq.{id}");
        debug!(table, id, "patching row");
        self.send_with_retry(|http| {
            self.authed(http.patch(&url))
                .query(&[(id_column, filter.as_str())])
                .header("Prefer", "return=minimal")
                .json(fields)
        })?;
        Ok(())
    }

    fn update_many(
        &self,
        table: &str,
        id_column: &str,
        rows: &[Map<String, Value>],
    ) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = self.table_url(table);
        debug!(table, rows = rows.len(), "upserting batch");
        self.send_with_retry(|http| {
            self.authed(http.post(&url))
                .query(&[("on_conflict", id_column)])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(rows)
        })?;
        Ok(())
    }
}
