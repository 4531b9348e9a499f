//! Table Storage Backends
//!
//! The remote key/value table store is the sole durable source of truth.
//! Rows are addressed by an exact (partition key, row key) pair inside a
//! named table.

mod azure;
mod memory;

pub use azure::{AzureTableService, ConnectionString};
pub use memory::InMemoryTableService;

use crate::entity::Row;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Table Creation Outcome
// =============================================================================

/// Outcome of ensuring a table exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCreation {
    /// The table was created by this call
    Created,
    /// The table was already there
    AlreadyExists,
}

// =============================================================================
// TableService Trait (Port)
// =============================================================================

/// Port for table storage operations
#[async_trait]
pub trait TableService: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Create `table` unless it already exists
    async fn create_table_if_not_exists(&self, table: &str) -> Result<TableCreation>;

    /// Insert the row, or merge its columns into the stored row.
    ///
    /// Columns the stored row has but `row` lacks are left untouched.
    async fn upsert_merge(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        row: &Row,
    ) -> Result<()>;

    /// Point lookup. `Ok(None)` means the row does not exist.
    async fn get_row(&self, table: &str, partition_key: &str, row_key: &str) -> Result<Option<Row>>;
}

/// Type alias for Arc'd TableService
pub type TableServiceRef = Arc<dyn TableService>;
