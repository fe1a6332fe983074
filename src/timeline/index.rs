//! Timeline index over the timeline table.

use crate::backend::{Backend, Columns, Order, Table, WriteOp};
use crate::error::{FeedError, Result};
use crate::types::Token;
use std::collections::HashMap;
use std::sync::Arc;

/// One reference to an event inside a timeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimelineEntry {
    pub timeline_key: String,
    pub token: Token,
    pub event_key: String,
}

impl TimelineEntry {
    fn from_column(timeline_key: &str, token: String, value: Vec<u8>) -> Self {
        // Values are written from `&str`; fall back to the token suffix if a
        // foreign writer stored something else.
        let token = Token::from(token);
        let event_key = String::from_utf8(value)
            .unwrap_or_else(|_| token.event_key().to_string());
        Self {
            timeline_key: timeline_key.to_string(),
            token,
            event_key,
        }
    }
}

/// A page of timeline entries plus the cursor for the next page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimelinePage {
    pub entries: Vec<TimelineEntry>,
    pub next_page: Option<Token>,
}

impl TimelinePage {
    /// Event keys in page order.
    pub fn event_keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.event_key.clone()).collect()
    }
}

/// Ordered `timeline -> {token -> event_key}` index.
///
/// At most one entry exists per `(timeline, token)`; appending the same pair
/// again overwrites it.
pub struct TimelineIndex {
    backend: Arc<dyn Backend>,
}

impl TimelineIndex {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Mutation appending an entry, for callers batching writes.
    pub fn append_op(timeline_key: &str, token: &Token, event_key: &str) -> WriteOp {
        WriteOp::put(
            Table::Timeline,
            timeline_key,
            token.as_str(),
            event_key.as_bytes().to_vec(),
        )
    }

    /// Mutation removing an entry, for callers batching writes.
    pub fn remove_op(timeline_key: &str, token: &Token) -> WriteOp {
        WriteOp::delete(Table::Timeline, timeline_key, token.as_str())
    }

    pub fn append(&self, timeline_key: &str, token: &Token, event_key: &str) -> Result<()> {
        self.backend
            .apply(vec![Self::append_op(timeline_key, token, event_key)])
    }

    /// Remove an entry. No-op if absent.
    pub fn remove(&self, timeline_key: &str, token: &Token) -> Result<()> {
        self.backend.apply(vec![Self::remove_op(timeline_key, token)])
    }

    /// Number of entries. Both bundled backends keep partitions as in-memory
    /// sorted maps and return their length directly; a remote backend may
    /// have to scan the partition instead.
    pub fn count(&self, timeline_key: &str) -> Result<usize> {
        self.backend.count(Table::Timeline, timeline_key)
    }

    /// One page, newest first, beginning at `start` (inclusive) or at the
    /// newest entry.
    ///
    /// Fetches `per_page + 1` entries. If the extra entry arrives, its token
    /// becomes `next_page` and it is dropped from this page; the next call
    /// starting at that token returns it first.
    pub fn page(
        &self,
        timeline_key: &str,
        per_page: usize,
        start: Option<&Token>,
    ) -> Result<TimelinePage> {
        if per_page == 0 {
            return Err(FeedError::Validation("per_page must be at least 1".into()));
        }

        let fetch = per_page.saturating_add(1);
        let columns = self.backend.slice(
            Table::Timeline,
            timeline_key,
            start.map(Token::as_str),
            fetch,
            Order::Descending,
        )?;
        let mut entries = Self::entries_from(timeline_key, columns);

        let next_page = if entries.len() == fetch {
            entries.pop().map(|extra| extra.token)
        } else {
            None
        };

        Ok(TimelinePage { entries, next_page })
    }

    /// The `limit` newest entries.
    pub fn recent(&self, timeline_key: &str, limit: usize) -> Result<Vec<TimelineEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let columns =
            self.backend
                .slice(Table::Timeline, timeline_key, None, limit, Order::Descending)?;
        Ok(Self::entries_from(timeline_key, columns))
    }

    /// Every entry, newest first.
    pub fn entries(&self, timeline_key: &str) -> Result<Vec<TimelineEntry>> {
        let mut entries = Self::entries_from(
            timeline_key,
            self.backend.row(Table::Timeline, timeline_key)?,
        );
        entries.reverse();
        Ok(entries)
    }

    /// Newest `limit` entries of several timelines in one request. An empty
    /// list never reaches the backend.
    pub fn recent_many(
        &self,
        timeline_keys: &[String],
        limit: usize,
    ) -> Result<HashMap<String, Vec<TimelineEntry>>> {
        if timeline_keys.is_empty() || limit == 0 {
            return Ok(HashMap::new());
        }

        Ok(self
            .backend
            .multi_slice(Table::Timeline, timeline_keys, limit, Order::Descending)?
            .into_iter()
            .map(|(key, columns)| {
                let entries = Self::entries_from(&key, columns);
                (key, entries)
            })
            .collect())
    }

    fn entries_from(timeline_key: &str, columns: Columns) -> Vec<TimelineEntry> {
        columns
            .into_iter()
            .map(|(token, value)| TimelineEntry::from_column(timeline_key, token, value))
            .collect()
    }
}
