//! Timeline index.
//!
//! Per-timeline log of `(token, event_key)` entries, ordered newest first.
//! This is the structure a feed read actually scans.

mod index;

pub use index::{TimelineEntry, TimelineIndex, TimelinePage};
