//! Object store: denormalized entity snapshots referenced by events.

use crate::backend::{Backend, Table, VALUE_COLUMN};
use crate::error::Result;
use crate::types::Attributes;
use std::collections::HashMap;
use std::sync::Arc;

/// Key to attribute-map storage. Last write wins.
pub struct ObjectStore {
    backend: Arc<dyn Backend>,
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Create or overwrite an object.
    pub fn record(&self, key: &str, attrs: &Attributes) -> Result<()> {
        let bytes = rmp_serde::to_vec_named(attrs)?;
        self.backend.put(Table::Object, key, VALUE_COLUMN, bytes)
    }

    /// Delete an object. No-op if absent.
    pub fn unrecord(&self, key: &str) -> Result<()> {
        self.backend.delete(Table::Object, key, VALUE_COLUMN)
    }

    /// Fetch one object.
    pub fn get_one(&self, key: &str) -> Result<Option<Attributes>> {
        match self.backend.get(Table::Object, key, VALUE_COLUMN)? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch several objects in one request. Missing keys are absent from
    /// the result. An empty key list never reaches the backend.
    pub fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Attributes>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        self.backend
            .multi_get(Table::Object, keys, VALUE_COLUMN)?
            .into_iter()
            .map(|(key, bytes)| Ok((key, rmp_serde::from_slice(&bytes)?)))
            .collect()
    }
}
