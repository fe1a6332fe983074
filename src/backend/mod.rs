//! Ordered key-value backends.
//!
//! The feed engine talks to storage only through [`Backend`]. Data is laid
//! out as wide rows: every [`Table`] maps a partition key to a sorted map of
//! column names to byte values.
//!
//! | Table          | partition          | column        | value             |
//! |----------------|--------------------|---------------|-------------------|
//! | `Object`       | object key         | `""`          | msgpack attrs     |
//! | `Subscription` | publisher timeline | fanout target | backlink          |
//! | `Event`        | event key          | `""`          | msgpack event     |
//! | `Timeline`     | timeline key       | token         | event key         |
//!
//! Two implementations ship with the crate: [`MemoryBackend`] and the
//! durable, log-structured [`FileBackend`].

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Column used by single-value tables (objects and events).
pub const VALUE_COLUMN: &str = "";

/// Logical tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    Object,
    Subscription,
    Event,
    Timeline,
}

/// Column iteration order for slices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// A single mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Insert or overwrite one column.
    Put {
        table: Table,
        partition: String,
        column: String,
        value: Vec<u8>,
    },
    /// Delete one column (no-op if absent).
    Delete {
        table: Table,
        partition: String,
        column: String,
    },
    /// Delete a whole partition (no-op if absent).
    DeleteRow { table: Table, partition: String },
}

impl WriteOp {
    pub fn put(
        table: Table,
        partition: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        WriteOp::Put {
            table,
            partition: partition.into(),
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn delete(table: Table, partition: impl Into<String>, column: impl Into<String>) -> Self {
        WriteOp::Delete {
            table,
            partition: partition.into(),
            column: column.into(),
        }
    }

    pub fn delete_row(table: Table, partition: impl Into<String>) -> Self {
        WriteOp::DeleteRow {
            table,
            partition: partition.into(),
        }
    }

    /// Partition this mutation targets.
    pub fn partition(&self) -> &str {
        match self {
            WriteOp::Put { partition, .. }
            | WriteOp::Delete { partition, .. }
            | WriteOp::DeleteRow { partition, .. } => partition,
        }
    }
}

/// Rows returned from slices: `(column, value)` pairs in the requested order.
pub type Columns = Vec<(String, Vec<u8>)>;

/// Storage handle shared by every component.
///
/// Batch reads (`multi_get`, `multi_slice`) may reject an empty partition
/// list; callers are expected to short-circuit before issuing one.
pub trait Backend: Send + Sync {
    /// Read one column.
    fn get(&self, table: Table, partition: &str, column: &str) -> Result<Option<Vec<u8>>>;

    /// Read the same column from several partitions. Missing partitions are
    /// absent from the result.
    fn multi_get(
        &self,
        table: Table,
        partitions: &[String],
        column: &str,
    ) -> Result<HashMap<String, Vec<u8>>>;

    /// Read every column of a partition, ascending.
    fn row(&self, table: Table, partition: &str) -> Result<Columns>;

    /// Read up to `limit` columns starting at `from` (inclusive) in `order`.
    /// With no `from`, start at the first column in that order.
    fn slice(
        &self,
        table: Table,
        partition: &str,
        from: Option<&str>,
        limit: usize,
        order: Order,
    ) -> Result<Columns>;

    /// Slice several partitions from their beginning in one request.
    fn multi_slice(
        &self,
        table: Table,
        partitions: &[String],
        limit: usize,
        order: Order,
    ) -> Result<HashMap<String, Columns>>;

    /// Number of columns in a partition.
    fn count(&self, table: Table, partition: &str) -> Result<usize>;

    /// Apply a batch of mutations atomically.
    fn apply(&self, batch: Vec<WriteOp>) -> Result<()>;

    /// Convenience single put.
    fn put(&self, table: Table, partition: &str, column: &str, value: Vec<u8>) -> Result<()> {
        self.apply(vec![WriteOp::put(table, partition, column, value)])
    }

    /// Convenience single delete.
    fn delete(&self, table: Table, partition: &str, column: &str) -> Result<()> {
        self.apply(vec![WriteOp::delete(table, partition, column)])
    }
}
