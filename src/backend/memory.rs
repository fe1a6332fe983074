//! In-memory backend.

use super::{Backend, Columns, Order, Table, WriteOp};
use crate::error::{FeedError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sorted columns of one partition.
type Row = BTreeMap<String, Vec<u8>>;

/// Table contents shared by the memory and file backends.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    tables: HashMap<Table, HashMap<String, Row>>,
}

impl Tables {
    fn partition(&self, table: Table, partition: &str) -> Option<&Row> {
        self.tables.get(&table).and_then(|t| t.get(partition))
    }

    pub(crate) fn get(&self, table: Table, partition: &str, column: &str) -> Option<Vec<u8>> {
        self.partition(table, partition)
            .and_then(|row| row.get(column))
            .cloned()
    }

    pub(crate) fn row(&self, table: Table, partition: &str) -> Columns {
        self.partition(table, partition)
            .map(|row| row.iter().map(|(c, v)| (c.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub(crate) fn slice(
        &self,
        table: Table,
        partition: &str,
        from: Option<&str>,
        limit: usize,
        order: Order,
    ) -> Columns {
        let Some(row) = self.partition(table, partition) else {
            return Vec::new();
        };

        let owned = |(c, v): (&String, &Vec<u8>)| (c.clone(), v.clone());
        match (order, from) {
            (Order::Ascending, None) => row.iter().take(limit).map(owned).collect(),
            (Order::Ascending, Some(from)) => row
                .range::<str, _>((Bound::Included(from), Bound::Unbounded))
                .take(limit)
                .map(owned)
                .collect(),
            (Order::Descending, None) => row.iter().rev().take(limit).map(owned).collect(),
            (Order::Descending, Some(from)) => row
                .range::<str, _>((Bound::Unbounded, Bound::Included(from)))
                .rev()
                .take(limit)
                .map(owned)
                .collect(),
        }
    }

    pub(crate) fn count(&self, table: Table, partition: &str) -> usize {
        self.partition(table, partition).map_or(0, BTreeMap::len)
    }

    pub(crate) fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::Put {
                table,
                partition,
                column,
                value,
            } => {
                self.tables
                    .entry(table)
                    .or_default()
                    .entry(partition)
                    .or_default()
                    .insert(column, value);
            }
            WriteOp::Delete {
                table,
                partition,
                column,
            } => {
                if let Some(rows) = self.tables.get_mut(&table) {
                    let now_empty = match rows.get_mut(&partition) {
                        Some(row) => {
                            row.remove(&column);
                            row.is_empty()
                        }
                        None => false,
                    };
                    if now_empty {
                        rows.remove(&partition);
                    }
                }
            }
            WriteOp::DeleteRow { table, partition } => {
                if let Some(rows) = self.tables.get_mut(&table) {
                    rows.remove(&partition);
                }
            }
        }
    }
}

/// Rejects an empty batch read the way remote stores do.
pub(crate) fn check_batch(partitions: &[String]) -> Result<()> {
    if partitions.is_empty() {
        return Err(FeedError::Backend("empty batch request".into()));
    }
    Ok(())
}

/// Backend holding every table in process memory.
///
/// Counts the requests it serves so callers can verify that no request was
/// issued, for example on an empty batch.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
    requests: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests served so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

impl Backend for MemoryBackend {
    fn get(&self, table: Table, partition: &str, column: &str) -> Result<Option<Vec<u8>>> {
        self.tick();
        Ok(self.tables.read().get(table, partition, column))
    }

    fn multi_get(
        &self,
        table: Table,
        partitions: &[String],
        column: &str,
    ) -> Result<HashMap<String, Vec<u8>>> {
        self.tick();
        check_batch(partitions)?;
        let tables = self.tables.read();
        Ok(partitions
            .iter()
            .filter_map(|p| tables.get(table, p, column).map(|v| (p.clone(), v)))
            .collect())
    }

    fn row(&self, table: Table, partition: &str) -> Result<Columns> {
        self.tick();
        Ok(self.tables.read().row(table, partition))
    }

    fn slice(
        &self,
        table: Table,
        partition: &str,
        from: Option<&str>,
        limit: usize,
        order: Order,
    ) -> Result<Columns> {
        self.tick();
        Ok(self.tables.read().slice(table, partition, from, limit, order))
    }

    fn multi_slice(
        &self,
        table: Table,
        partitions: &[String],
        limit: usize,
        order: Order,
    ) -> Result<HashMap<String, Columns>> {
        self.tick();
        check_batch(partitions)?;
        let tables = self.tables.read();
        Ok(partitions
            .iter()
            .map(|p| (p.clone(), tables.slice(table, p, None, limit, order)))
            .collect())
    }

    fn count(&self, table: Table, partition: &str) -> Result<usize> {
        self.tick();
        Ok(self.tables.read().count(table, partition))
    }

    fn apply(&self, batch: Vec<WriteOp>) -> Result<()> {
        self.tick();
        let mut tables = self.tables.write();
        for op in batch {
            tables.apply(op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline(backend: &MemoryBackend, tokens: &[&str]) {
        let batch = tokens
            .iter()
            .map(|t| WriteOp::put(Table::Timeline, "home", *t, t.as_bytes().to_vec()))
            .collect();
        backend.apply(batch).unwrap();
    }

    fn columns(rows: &Columns) -> Vec<&str> {
        rows.iter().map(|(c, _)| c.as_str()).collect()
    }

    #[test]
    fn test_put_get_delete() {
        let backend = MemoryBackend::new();
        backend.put(Table::Object, "u1", "", b"x".to_vec()).unwrap();
        assert_eq!(backend.get(Table::Object, "u1", "").unwrap(), Some(b"x".to_vec()));

        backend.delete(Table::Object, "u1", "").unwrap();
        assert_eq!(backend.get(Table::Object, "u1", "").unwrap(), None);
        assert_eq!(backend.count(Table::Object, "u1").unwrap(), 0);
    }

    #[test]
    fn test_descending_slice_is_inclusive() {
        let backend = MemoryBackend::new();
        timeline(&backend, &["1", "2", "3", "4", "5"]);

        let newest = backend.slice(Table::Timeline, "home", None, 2, Order::Descending).unwrap();
        assert_eq!(columns(&newest), vec!["5", "4"]);

        let from = backend
            .slice(Table::Timeline, "home", Some("3"), 10, Order::Descending)
            .unwrap();
        assert_eq!(columns(&from), vec!["3", "2", "1"]);

        let asc = backend
            .slice(Table::Timeline, "home", Some("4"), 10, Order::Ascending)
            .unwrap();
        assert_eq!(columns(&asc), vec!["4", "5"]);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let backend = MemoryBackend::new();
        assert!(backend.multi_get(Table::Event, &[], "").is_err());
        assert!(backend
            .multi_slice(Table::Timeline, &[], 5, Order::Descending)
            .is_err());
    }

    #[test]
    fn test_request_counter() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.requests(), 0);
        backend.get(Table::Event, "e", "").unwrap();
        backend.count(Table::Timeline, "t").unwrap();
        assert_eq!(backend.requests(), 2);
    }
}
