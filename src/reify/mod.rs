//! Feed reifier: the read side.
//!
//! A feed read pages through one timeline, batch-loads the event bodies,
//! optionally discovers subevents through the sub-timelines named after each
//! loaded event, optionally binds object references, and finally rebuilds
//! the nested tree.
//!
//! Round trips per read are bounded by the tree depth, not by the number of
//! events: one slice and one count for the timeline, one batched load for
//! its events, one batched scan plus one batched load per subevent level,
//! and one batched object fetch.
//!
//! # Example
//!
//! ```ignore
//! let page = fanline.feed("user_1_home", &FeedOptions::new().per_page(10).with_subevents())?;
//! for item in &page.items {
//!     println!("{} has {} comments", item.key, item.subevents.len());
//! }
//! let older = fanline.feed("user_1_home", &FeedOptions::new().page(page.next_page.unwrap()))?;
//! ```

mod strategy;
mod tree;

pub use strategy::Strategy;
pub use tree::reify;

use crate::error::Result;
use crate::events::EventStore;
use crate::objects::ObjectStore;
use crate::timeline::{TimelineEntry, TimelineIndex};
use crate::types::{Event, FeedItem, FeedPage, Token};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Paging and shaping options for a feed read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedOptions {
    /// Page size (None = configured default).
    pub per_page: Option<usize>,

    /// Cursor returned as `next_page` by the previous read.
    pub page: Option<Token>,

    /// Load subevents and nest them under their parents.
    pub fetch_subevents: bool,

    /// Object binding strategy.
    pub strategy: Strategy,
}

impl FeedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn per_page(mut self, per_page: usize) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn page(mut self, cursor: Token) -> Self {
        self.page = Some(cursor);
        self
    }

    pub fn with_subevents(mut self) -> Self {
        self.fetch_subevents = true;
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Assembles feed pages from the stores.
pub struct FeedReifier<'a> {
    timelines: &'a TimelineIndex,
    events: &'a EventStore,
    objects: &'a ObjectStore,
    default_per_page: usize,
    max_subevent_depth: usize,
}

impl<'a> FeedReifier<'a> {
    pub fn new(
        timelines: &'a TimelineIndex,
        events: &'a EventStore,
        objects: &'a ObjectStore,
        default_per_page: usize,
        max_subevent_depth: usize,
    ) -> Self {
        Self {
            timelines,
            events,
            objects,
            default_per_page,
            max_subevent_depth,
        }
    }

    /// Read one page of a timeline.
    pub fn feed(&self, timeline_key: &str, options: &FeedOptions) -> Result<FeedPage> {
        let per_page = options.per_page.unwrap_or(self.default_per_page);
        let page = self
            .timelines
            .page(timeline_key, per_page, options.page.as_ref())?;
        let count = self.timelines.count(timeline_key)?;

        let mut seen = HashSet::new();
        let events = self.load(&page.entries, &mut seen)?;

        let subevents = if options.fetch_subevents {
            self.load_subevents(&events, &mut seen)?
        } else {
            Vec::new()
        };

        debug!(
            timeline = timeline_key,
            per_page,
            events = events.len(),
            subevents = subevents.len(),
            strategy = %options.strategy,
            "reifying feed page"
        );

        let mut items: Vec<FeedItem> = events
            .into_iter()
            .chain(subevents)
            .map(FeedItem::from)
            .collect();
        options.strategy.bind_objects(self.objects, &mut items)?;

        Ok(FeedPage {
            items: reify(items),
            count,
            next_page: page.next_page,
        })
    }

    /// Entry count of a timeline.
    pub fn count(&self, timeline_key: &str) -> Result<usize> {
        self.timelines.count(timeline_key)
    }

    /// Batch-load the bodies behind `entries` in order, skipping keys already
    /// in `seen` and entries whose body has been removed.
    fn load(&self, entries: &[TimelineEntry], seen: &mut HashSet<String>) -> Result<Vec<Event>> {
        let wanted: Vec<&TimelineEntry> = entries
            .iter()
            .filter(|entry| !seen.contains(&entry.event_key))
            .collect();
        let keys: Vec<String> = wanted.iter().map(|entry| entry.event_key.clone()).collect();
        let mut bodies = self.events.get_many(&keys)?;

        let mut loaded = Vec::with_capacity(wanted.len());
        for entry in wanted {
            if seen.contains(&entry.event_key) {
                continue;
            }
            match bodies.remove(&entry.event_key) {
                Some(event) => {
                    seen.insert(entry.event_key.clone());
                    loaded.push(event);
                }
                None => {
                    warn!(
                        timeline = %entry.timeline_key,
                        event = %entry.event_key,
                        "dangling timeline entry"
                    );
                }
            }
        }
        Ok(loaded)
    }

    /// Follow sub-timelines level by level: every loaded event's key is read
    /// as a timeline, one batched scan and one batched load per level.
    fn load_subevents(&self, parents: &[Event], seen: &mut HashSet<String>) -> Result<Vec<Event>> {
        let mut pool = Vec::new();
        let mut frontier: Vec<String> = parents.iter().map(|e| e.key.clone()).collect();

        for _ in 0..self.max_subevent_depth {
            if frontier.is_empty() {
                break;
            }

            let mut scanned = self.timelines.recent_many(&frontier, usize::MAX)?;
            let mut entries = Vec::new();
            for parent in &frontier {
                entries.extend(scanned.remove(parent).unwrap_or_default());
            }

            let level = self.load(&entries, seen)?;
            frontier = level.iter().map(|e| e.key.clone()).collect();
            pool.extend(level);
        }

        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Table, WriteOp};
    use crate::protocol::{Fanline, PublishOptions};
    use crate::types::Timestamp;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn at(secs: u64) -> PublishOptions {
        PublishOptions::default().at(Timestamp(secs))
    }

    #[test]
    fn test_dangling_subevent_names_its_sub_timeline() {
        let feeds = Fanline::in_memory();
        feeds
            .publish_with(Event::builder("post_1").timeline("home").build(), at(100))
            .unwrap();
        feeds
            .publish_with(Event::builder("reply_1").parent("post_1").build(), at(101))
            .unwrap();
        feeds
            .backend()
            .apply(vec![WriteOp::DeleteRow {
                table: Table::Event,
                partition: "reply_1".into(),
            }])
            .unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();

        let page = tracing::subscriber::with_default(subscriber, || {
            feeds.feed("home", &FeedOptions::new().with_subevents())
        })
        .unwrap();

        assert_eq!(page.items.len(), 1);
        assert!(page.items[0].subevents.is_empty());

        let logged = captured.text();
        assert!(logged.contains("dangling timeline entry"), "{logged}");
        assert!(logged.contains("timeline=post_1"), "{logged}");
        assert!(logged.contains("event=reply_1"), "{logged}");
    }
}
