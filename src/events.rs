//! Event store: key to payload storage for event bodies.

use crate::backend::{Backend, Table, WriteOp, VALUE_COLUMN};
use crate::error::Result;
use crate::types::Event;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Event body storage with an optional LRU cache of decoded events.
///
/// Duplicate prevention is not this layer's job; `create` is a raw write.
///
/// The cache is local to one handle and is not invalidated by other
/// writers on the same backend, so it only serves reads. Anything that
/// acts on an event's stored state (its token, its timelines) goes through
/// [`EventStore::load`].
pub struct EventStore {
    backend: Arc<dyn Backend>,

    /// Recently read or written events. `None` when the cache size is 0.
    cache: Option<Mutex<LruCache<String, Event>>>,
}

impl EventStore {
    pub fn new(backend: Arc<dyn Backend>, cache_size: usize) -> Self {
        Self {
            backend,
            cache: NonZeroUsize::new(cache_size).map(|size| Mutex::new(LruCache::new(size))),
        }
    }

    /// Whether decoded events are cached.
    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    /// Write an event body.
    pub fn create(&self, event: &Event) -> Result<()> {
        self.backend
            .put(Table::Event, &event.key, VALUE_COLUMN, event.encode()?)?;
        self.remember(event);
        Ok(())
    }

    /// Write an event body together with other mutations in one atomic
    /// backend batch.
    pub fn create_grouped(&self, event: &Event, grouped: Vec<WriteOp>) -> Result<()> {
        let mut batch = Vec::with_capacity(grouped.len() + 1);
        batch.push(WriteOp::put(Table::Event, &event.key, VALUE_COLUMN, event.encode()?));
        batch.extend(grouped);
        self.backend.apply(batch)?;
        self.remember(event);
        Ok(())
    }

    /// Replace an existing event body.
    pub fn overwrite(&self, event: &Event) -> Result<()> {
        self.forget(&event.key);
        self.create(event)
    }

    /// Check for an event without decoding it. Always asks the backend.
    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.backend.get(Table::Event, key, VALUE_COLUMN)?.is_some())
    }

    /// Fetch one event as currently stored, bypassing the cache. The cached
    /// copy is refreshed (or dropped if the event is gone).
    pub fn load(&self, key: &str) -> Result<Option<Event>> {
        match self.backend.get(Table::Event, key, VALUE_COLUMN)? {
            Some(bytes) => {
                let event = Event::decode(&bytes)?;
                self.remember(&event);
                Ok(Some(event))
            }
            None => {
                self.forget(key);
                Ok(None)
            }
        }
    }

    /// Fetch one event, from the cache if present.
    pub fn get_one(&self, key: &str) -> Result<Option<Event>> {
        if let Some(cache) = &self.cache {
            if let Some(event) = cache.lock().get(key).cloned() {
                return Ok(Some(event));
            }
        }
        self.load(key)
    }

    /// Fetch several events in one backend request. Cached events are served
    /// locally; an empty remainder never reaches the backend.
    pub fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Event>> {
        let mut found = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();
        match &self.cache {
            Some(cache) => {
                let mut cache = cache.lock();
                for key in keys {
                    match cache.get(key) {
                        Some(event) => {
                            found.insert(key.clone(), event.clone());
                        }
                        None => missing.push(key.clone()),
                    }
                }
            }
            None => missing.extend(keys.iter().cloned()),
        }

        if missing.is_empty() {
            return Ok(found);
        }

        let rows = self.backend.multi_get(Table::Event, &missing, VALUE_COLUMN)?;
        for (key, bytes) in rows {
            let event = Event::decode(&bytes)?;
            self.remember(&event);
            found.insert(key, event);
        }
        Ok(found)
    }

    /// Delete an event body. No-op if absent.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.forget(key);
        self.backend.delete(Table::Event, key, VALUE_COLUMN)
    }

    /// Delete an event body together with other mutations in one atomic
    /// backend batch.
    pub fn remove_grouped(&self, key: &str, grouped: Vec<WriteOp>) -> Result<()> {
        self.forget(key);
        let mut batch = Vec::with_capacity(grouped.len() + 1);
        batch.push(WriteOp::delete(Table::Event, key, VALUE_COLUMN));
        batch.extend(grouped);
        self.backend.apply(batch)
    }

    /// Drop every cached event.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }

    fn remember(&self, event: &Event) {
        if let Some(cache) = &self.cache {
            cache.lock().put(event.key.clone(), event.clone());
        }
    }

    fn forget(&self, key: &str) {
        if let Some(cache) = &self.cache {
            cache.lock().pop(key);
        }
    }
}
