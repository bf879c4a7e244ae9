//! Store seam: the two capabilities reconciliation needs from a backend.
//!
//! The engine never talks to a store itself. Callers fetch through a
//! [`RecordStore`], hand plain rows to the engine, and write the returned
//! repair plan back through the same trait.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde_json::{Map, Value};

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No credentials configured
    NotAuthenticated,
    /// Credentials rejected (401 / 403)
    Auth(u16, String),
    /// Network error (connect, reset, TLS)
    Network(String),
    /// HTTP error with status code
    Http(u16, String),
    /// Response body could not be parsed
    Parse(String),
    /// Request timed out or retries exhausted on a slow upstream
    Timeout(String),
    /// The store does not accept writes (snapshot directories)
    ReadOnly(String),
}

impl StoreError {
    /// Errors after which further writes are pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::Auth(..) | Self::ReadOnly(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotAuthenticated => {
                write!(f, "Not authenticated: run `ssync login` or set SURVEYSYNC_API_KEY")
            }
            StoreError::Auth(code, msg) => write!(f, "Authentication failed (HTTP {}): {}", code, msg),
            StoreError::Network(msg) => write!(f, "Network error: {}", msg),
            StoreError::Http(code, msg) => write!(f, "HTTP {}: {}", code, msg),
            StoreError::Parse(msg) => write!(f, "Parse error: {}", msg),
            StoreError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            StoreError::ReadOnly(msg) => write!(f, "Read-only store: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Read-all / update access to a relational store.
pub trait RecordStore {
    /// Every row of `table`, as JSON objects.
    fn fetch_all(&self, table: &str) -> Result<Vec<Value>, StoreError>;

    /// `update <table> set <fields> where <id_column> = <id>`
    fn update(
        &self,
        table: &str,
        id_column: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError>;

    /// Write a batch of partial rows, each carrying its own `id_column`.
    ///
    /// Backends that can send a batch as one request override this. The
    /// default issues one [`update`](Self::update) per row and stops at
    /// the first error.
    fn update_many(
        &self,
        table: &str,
        id_column: &str,
        rows: &[Map<String, Value>],
    ) -> Result<(), StoreError> {
        for row in rows {
            let (id, fields) = split_row(row, id_column)?;
            self.update(table, id_column, &id, &fields)?;
        }
        Ok(())
    }
}

impl<S: RecordStore + ?Sized> RecordStore for &S {
    fn fetch_all(&self, table: &str) -> Result<Vec<Value>, StoreError> {
        (**self).fetch_all(table)
    }

    fn update(
        &self,
        table: &str,
        id_column: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        (**self).update(table, id_column, id, fields)
    }

    fn update_many(
        &self,
        table: &str,
        id_column: &str,
        rows: &[Map<String, Value>],
    ) -> Result<(), StoreError> {
        (**self).update_many(table, id_column, rows)
    }
}

/// Separate a batch row into its id and the fields to write.
fn split_row(row: &Map<String, Value>, id_column: &str) -> Result<(String, Map<String, Value>), StoreError> {
    let id = match row.get(id_column) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(StoreError::Parse(format!("batch row has no \"{id_column}\""))),
    };
    let mut fields = row.clone();
    fields.remove(id_column);
    Ok((id, fields))
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    tables: BTreeMap<String, Vec<Value>>,
    fetch_failures: HashMap<String, StoreError>,
    update_failures: HashMap<String, StoreError>,
    updates: usize,
    write_requests: usize,
}

/// In-memory tables. Used for snapshot runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that refuses every update.
    pub fn read_only() -> Self {
        Self { read_only: true, ..Self::default() }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_table(self, table: &str, rows: Vec<Value>) -> Self {
        self.state().tables.insert(table.to_string(), rows);
        self
    }

    /// Make every fetch of `table` fail with `err`.
    pub fn fail_fetch(&self, table: &str, err: StoreError) {
        self.state().fetch_failures.insert(table.to_string(), err);
    }

    /// Make every update of the row with this id fail with `err`.
    pub fn fail_update(&self, id: &str, err: StoreError) {
        self.state().update_failures.insert(id.to_string(), err);
    }

    /// Current contents of `table`.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    /// Number of rows written so far.
    pub fn update_count(&self) -> usize {
        self.state().updates
    }

    /// Number of write calls that reached the store (one per row for
    /// `update`, one per batch for `update_many`), failed ones included.
    pub fn write_requests(&self) -> usize {
        self.state().write_requests
    }
}

impl MemoryState {
    fn patch(&mut self, table: &str, id_column: &str, id: &str, fields: &Map<String, Value>) -> Result<(), StoreError> {
        let rows = self
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::Http(404, format!("relation \"{table}\" does not exist")))?;
        for row in rows.iter_mut().filter(|r| id_matches(r, id_column, id)) {
            if let Some(obj) = row.as_object_mut() {
                for (k, v) in fields {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        self.updates += 1;
        Ok(())
    }
}

fn id_matches(row: &Value, id_column: &str, id: &str) -> bool {
    match row.get(id_column) {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

impl RecordStore for MemoryStore {
    fn fetch_all(&self, table: &str) -> Result<Vec<Value>, StoreError> {
        let state = self.state();
        if let Some(err) = state.fetch_failures.get(table) {
            return Err(err.clone());
        }
        state
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::Http(404, format!("relation \"{table}\" does not exist")))
    }

    fn update(
        &self,
        table: &str,
        id_column: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        state.write_requests += 1;
        if self.read_only {
            return Err(StoreError::ReadOnly(format!("cannot update {table} {id}")));
        }
        if let Some(err) = state.update_failures.get(id) {
            return Err(err.clone());
        }
        state.patch(table, id_column, id, fields)
    }

    /// All-or-nothing, like a single upsert request.
    fn update_many(
        &self,
        table: &str,
        id_column: &str,
        rows: &[Map<String, Value>],
    ) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut state = self.state();
        state.write_requests += 1;
        if self.read_only {
            return Err(StoreError::ReadOnly(format!("cannot update {} rows of {table}", rows.len())));
        }
        let batch = rows
            .iter()
            .map(|row| split_row(row, id_column))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(err) = batch.iter().find_map(|(id, _)| state.update_failures.get(id)) {
            return Err(err.clone());
        }
        if !state.tables.contains_key(table) {
            return Err(StoreError::Http(404, format!("relation \"{table}\" does not exist")));
        }
        for (id, fields) in &batch {
            state.patch(table, id_column, id, fields)?;
        }
        Ok(())
    }
}
