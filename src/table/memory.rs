//! In-Memory Table Storage
//!
//! Process-local stand-in for the remote table store. Counts every call and
//! can be switched offline, which makes it the stub of choice for cache and
//! engine tests.

use crate::entity::Row;
use crate::error::{Error, Result};
use crate::table::{TableCreation, TableService};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

type TableRows = HashMap<(String, String), Row>;

/// Per-operation call counters
#[derive(Debug, Default)]
pub struct TableCallCounts {
    pub creates: AtomicU64,
    pub upserts: AtomicU64,
    pub gets: AtomicU64,
}

/// In-memory table storage backend
pub struct InMemoryTableService {
    tables: RwLock<HashMap<String, TableRows>>,
    calls: TableCallCounts,
    available: AtomicBool,
}

impl InMemoryTableService {
    /// Create an empty, available store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            calls: TableCallCounts::default(),
            available: AtomicBool::new(true),
        }
    }

    /// Set availability (for testing)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub fn create_calls(&self) -> u64 {
        self.calls.creates.load(Ordering::Relaxed)
    }

    pub fn upsert_calls(&self) -> u64 {
        self.calls.upserts.load(Ordering::Relaxed)
    }

    pub fn get_calls(&self) -> u64 {
        self.calls.gets.load(Ordering::Relaxed)
    }

    /// Total remote calls of any kind
    pub fn total_calls(&self) -> u64 {
        self.create_calls() + self.upsert_calls() + self.get_calls()
    }

    /// Write a row directly, bypassing counters and availability. Simulates
    /// an out-of-band edit of the remote store.
    pub fn put_raw(&self, table: &str, row: Row) {
        let key = (
            row.partition_key().unwrap_or_default().to_string(),
            row.row_key().unwrap_or_default().to_string(),
        );
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key, row);
    }

    /// Read a row directly, bypassing counters and availability
    pub fn get_raw(&self, table: &str, partition_key: &str, row_key: &str) -> Option<Row> {
        self.tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(&(partition_key.to_string(), row_key.to_string())))
            .cloned()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::StoreUnavailable {
                reason: "in-memory store switched offline".into(),
            })
        }
    }
}

impl Default for InMemoryTableService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableService for InMemoryTableService {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create_table_if_not_exists(&self, table: &str) -> Result<TableCreation> {
        self.calls.creates.fetch_add(1, Ordering::Relaxed);
        self.ensure_available()?;

        let mut tables = self.tables.write();
        if tables.contains_key(table) {
            Ok(TableCreation::AlreadyExists)
        } else {
            tables.insert(table.to_string(), HashMap::new());
            Ok(TableCreation::Created)
        }
    }

    async fn upsert_merge(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        row: &Row,
    ) -> Result<()> {
        self.calls.upserts.fetch_add(1, Ordering::Relaxed);
        self.ensure_available()?;

        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| Error::RemoteStatus {
            table: table.to_string(),
            operation: "merge".into(),
            status: 404,
            reason: "TableNotFound".into(),
        })?;

        rows.entry((partition_key.to_string(), row_key.to_string()))
            .and_modify(|stored| stored.merge(row))
            .or_insert_with(|| row.clone());
        Ok(())
    }

    async fn get_row(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<Row>> {
        self.calls.gets.fetch_add(1, Ordering::Relaxed);
        self.ensure_available()?;

        let tables = self.tables.read();
        let rows = tables.get(table).ok_or_else(|| Error::RemoteStatus {
            table: table.to_string(),
            operation: "get".into(),
            status: 404,
            reason: "TableNotFound".into(),
        })?;

        Ok(rows
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned())
    }
}

// =============================================================================
// Tests
// =============================================================================
