//! Main `Fanline` struct tying all components together.

use crate::backend::{Backend, FileBackend, MemoryBackend, WriteOp};
use crate::config::{BackendConfig, FanlineConfig};
use crate::error::{FeedError, Result};
use crate::events::EventStore;
use crate::fanout::FanoutExecutor;
use crate::objects::ObjectStore;
use crate::reify::{FeedOptions, FeedReifier};
use crate::subscriptions::{SubscriptionEdge, SubscriptionGraph};
use crate::timeline::TimelineIndex;
use crate::types::{Attributes, Event, FeedPage, Timestamp, Token};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Removals per backend request when purging a timeline on unsubscribe.
const PURGE_CHUNK: usize = 512;

/// Per-call publishing options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishOptions {
    /// Copy the event into every subscriber of its timelines.
    pub fanout: bool,

    /// Use this time for the token instead of the wall clock.
    pub timestamp: Option<Timestamp>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            fanout: true,
            timestamp: None,
        }
    }
}

impl PublishOptions {
    /// Write only to the event's own timelines.
    pub fn without_fanout(mut self) -> Self {
        self.fanout = false;
        self
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// The feed engine.
///
/// Provides a unified interface for:
/// - Recording objects referenced by events
/// - Managing subscriptions between timelines
/// - Publishing, updating and unpublishing events with fan-out on write
/// - Reading reified feed pages
pub struct Fanline {
    config: FanlineConfig,
    backend: Arc<dyn Backend>,
    objects: ObjectStore,
    events: EventStore,
    subscriptions: SubscriptionGraph,
    timelines: TimelineIndex,
    fanout: FanoutExecutor,

    /// Serializes event mutations so the duplicate check and the write
    /// cannot interleave.
    write_lock: Mutex<()>,
}

impl Fanline {
    /// Open the backend named by `config`.
    pub fn open(config: FanlineConfig) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn Backend> = match &config.backend {
            BackendConfig::Memory => Arc::new(MemoryBackend::new()),
            BackendConfig::File {
                path,
                create_if_missing,
                sync_interval,
            } => Arc::new(FileBackend::open(path, *create_if_missing, *sync_interval)?),
        };
        Self::with_backend(backend, config)
    }

    /// In-memory engine with default settings.
    pub fn in_memory() -> Self {
        Self::build(Arc::new(MemoryBackend::new()), FanlineConfig::default())
    }

    /// Run on a caller-supplied backend. `config.backend` is ignored.
    pub fn with_backend(backend: Arc<dyn Backend>, config: FanlineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(backend, config))
    }

    fn build(backend: Arc<dyn Backend>, config: FanlineConfig) -> Self {
        info!(
            backfill_limit = config.backfill_limit,
            fanout_workers = config.fanout_workers,
            "opening feed engine"
        );
        Self {
            objects: ObjectStore::new(Arc::clone(&backend)),
            events: EventStore::new(Arc::clone(&backend), config.event_cache_size),
            subscriptions: SubscriptionGraph::new(Arc::clone(&backend)),
            timelines: TimelineIndex::new(Arc::clone(&backend)),
            fanout: FanoutExecutor::new(config.fanout_workers, config.fanout_errors),
            backend,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &FanlineConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    // ========== Objects ==========

    /// Store (or overwrite) an object's attributes.
    pub fn record(&self, key: &str, attrs: &Attributes) -> Result<()> {
        self.objects.record(key, attrs)
    }

    /// Delete an object. No-op if absent.
    pub fn unrecord(&self, key: &str) -> Result<()> {
        self.objects.unrecord(key)
    }

    pub fn get_object(&self, key: &str) -> Result<Option<Attributes>> {
        self.objects.get_one(key)
    }

    // ========== Subscriptions ==========

    /// Make `subscriber` receive every future event published to
    /// `publisher`, optionally seeding it with the publisher's most recent
    /// entries.
    pub fn subscribe(
        &self,
        subscriber: &str,
        publisher: &str,
        backlink: Option<&str>,
        backfill: bool,
    ) -> Result<SubscriptionEdge> {
        let edge = self.subscriptions.create(subscriber, publisher, backlink)?;

        let mut copied = 0;
        if backfill {
            let recent = self.timelines.recent(publisher, self.config.backfill_limit)?;
            copied = recent.len();
            let batch: Vec<WriteOp> = recent
                .iter()
                .map(|entry| TimelineIndex::append_op(subscriber, &entry.token, &entry.event_key))
                .collect();
            if !batch.is_empty() {
                self.backend.apply(batch)?;
            }
        }

        debug!(subscriber, publisher, backfilled = copied, "subscribed");
        Ok(edge)
    }

    /// Remove the edge and purge every entry of `publisher` from
    /// `subscriber`, whether it arrived by backfill or by fan-out.
    ///
    /// Entries the subscriber also received through another subscription
    /// carry the same token and are removed too.
    pub fn unsubscribe(&self, subscriber: &str, publisher: &str) -> Result<()> {
        self.subscriptions.remove(subscriber, publisher)?;

        let entries = self.timelines.entries(publisher)?;
        for chunk in entries.chunks(PURGE_CHUNK) {
            let batch = chunk
                .iter()
                .map(|entry| TimelineIndex::remove_op(subscriber, &entry.token))
                .collect();
            self.backend.apply(batch)?;
        }

        debug!(subscriber, publisher, purged = entries.len(), "unsubscribed");
        Ok(())
    }

    /// Whether `backlink` is recorded on any edge out of `publisher`.
    pub fn is_connected(&self, publisher: &str, backlink: &str) -> Result<bool> {
        self.subscriptions.is_connected(publisher, backlink)
    }

    /// Fan-out targets of `publisher`.
    pub fn subscribers(&self, publisher: &str) -> Result<Vec<String>> {
        self.subscriptions.subscribers_for(&[publisher.to_string()])
    }

    /// Backlinks recorded on edges out of `publisher`.
    pub fn followers(&self, publisher: &str) -> Result<Vec<String>> {
        self.subscriptions.followers_for(publisher)
    }

    // ========== Events ==========

    /// Publish with default options (fan-out on, wall-clock token).
    pub fn publish(&self, event: Event) -> Result<Event> {
        self.publish_with(event, PublishOptions::default())
    }

    /// Store a new event and index it.
    ///
    /// The event body and its own timeline entries are written in one atomic
    /// batch. Subscriber timelines are written afterwards, one request per
    /// target; a failure there leaves the event published.
    pub fn publish_with(&self, mut event: Event, options: PublishOptions) -> Result<Event> {
        event.validate()?;

        let _guard = self.write_lock.lock();
        if self.events.exists(&event.key)? {
            return Err(FeedError::Duplicate(event.key));
        }

        let timestamp = options.timestamp.unwrap_or_else(Timestamp::now);
        let token = Token::compose(timestamp, &event.key);
        event.token = Some(token.clone());

        let primaries = dedup(event.timelines.as_slice());
        let appends = primaries
            .iter()
            .map(|timeline| TimelineIndex::append_op(timeline, &token, &event.key))
            .collect();
        self.events.create_grouped(&event, appends)?;

        let mut fanned = 0;
        if options.fanout {
            let ops: Vec<WriteOp> = self
                .secondary_targets(&primaries)?
                .into_iter()
                .map(|target| TimelineIndex::append_op(&target, &token, &event.key))
                .collect();
            fanned = ops.len();
            self.fanout.run(self.backend.as_ref(), ops)?;
        }

        debug!(
            event = %event.key,
            token = %token,
            timelines = primaries.len(),
            fanned_out = fanned,
            "published"
        );
        Ok(event)
    }

    /// Remove an event and every timeline entry that points at it.
    ///
    /// The token comes from `event`, or from the stored copy when `event`
    /// carries none. The entries removed are those of the event's timelines
    /// and of their current subscribers.
    pub fn unpublish(&self, event: &Event) -> Result<()> {
        let _guard = self.write_lock.lock();

        let token = match &event.token {
            Some(token) => token.clone(),
            None => self
                .events
                .load(&event.key)?
                .and_then(|stored| stored.token)
                .ok_or_else(|| {
                    FeedError::Validation(format!("event {} has no token", event.key))
                })?,
        };

        let primaries = dedup(event.timelines.as_slice());
        let removals = primaries
            .iter()
            .map(|timeline| TimelineIndex::remove_op(timeline, &token))
            .collect();
        self.events.remove_grouped(&event.key, removals)?;

        let ops = self
            .secondary_targets(&primaries)?
            .into_iter()
            .map(|target| TimelineIndex::remove_op(&target, &token))
            .collect();
        self.fanout.run(self.backend.as_ref(), ops)?;

        debug!(event = %event.key, token = %token, "unpublished");
        Ok(())
    }

    /// Unpublish the event currently stored under this key.
    pub fn unpublish_key(&self, key: &str) -> Result<()> {
        let event = self
            .events
            .load(key)?
            .ok_or_else(|| FeedError::EventNotFound(key.to_string()))?;
        self.unpublish(&event)
    }

    /// Replace a published event's body, keeping its token.
    ///
    /// With `update_timelines`, timelines added to the event (plus their
    /// subscribers) gain an entry and timelines dropped from it (plus their
    /// subscribers) lose theirs. Unlike a plain set difference over the
    /// removed timelines, targets still reached through a timeline the event
    /// keeps or gains are left alone.
    ///
    /// The token and the original timelines are read from the backend, never
    /// from the cache.
    pub fn update_event(&self, mut event: Event, update_timelines: bool) -> Result<Event> {
        let _guard = self.write_lock.lock();

        let original = self
            .events
            .load(&event.key)?
            .ok_or_else(|| FeedError::EventNotFound(event.key.clone()))?;
        let token = original
            .token
            .clone()
            .ok_or_else(|| FeedError::Corruption(format!("stored event {} has no token", event.key)))?;

        event.token = Some(token.clone());
        event.validate()?;
        self.events.overwrite(&event)?;

        if update_timelines {
            let added: Vec<String> = dedup(event.timelines.as_slice())
                .into_iter()
                .filter(|t| !original.timelines.contains(t))
                .collect();
            let removed: Vec<String> = dedup(original.timelines.as_slice())
                .into_iter()
                .filter(|t| !event.timelines.contains(t))
                .collect();

            let mut ops = Vec::new();
            if !added.is_empty() {
                for target in self.fanout_set(&added)? {
                    ops.push(TimelineIndex::append_op(&target, &token, &event.key));
                }
            }
            if !removed.is_empty() {
                let kept = self.fanout_set(event.timelines.as_slice())?;
                let kept: HashSet<String> = kept.into_iter().collect();
                for target in self.fanout_set(&removed)? {
                    if !kept.contains(&target) {
                        ops.push(TimelineIndex::remove_op(&target, &token));
                    }
                }
            }

            debug!(
                event = %event.key,
                added = added.len(),
                removed = removed.len(),
                writes = ops.len(),
                "updating event timelines"
            );
            self.fanout.run(self.backend.as_ref(), ops)?;
        }

        Ok(event)
    }

    /// Fetch an event. With `event_cache_size > 0` this may be served from
    /// the local cache.
    pub fn get_event(&self, key: &str) -> Result<Option<Event>> {
        self.events.get_one(key)
    }

    // ========== Feeds ==========

    /// Read one reified page of a timeline.
    pub fn feed(&self, timeline_key: &str, options: &FeedOptions) -> Result<FeedPage> {
        self.reifier().feed(timeline_key, options)
    }

    /// Number of entries in a timeline.
    pub fn feed_count(&self, timeline_key: &str) -> Result<usize> {
        self.reifier().count(timeline_key)
    }

    fn reifier(&self) -> FeedReifier<'_> {
        FeedReifier::new(
            &self.timelines,
            &self.events,
            &self.objects,
            self.config.default_per_page,
            self.config.max_subevent_depth,
        )
    }

    // ========== Internal ==========

    /// `timelines` together with their subscribers, deduplicated.
    fn fanout_set(&self, timelines: &[String]) -> Result<Vec<String>> {
        let mut set = dedup(timelines);
        let mut seen: HashSet<String> = set.iter().cloned().collect();
        for target in self.subscriptions.subscribers_for(timelines)? {
            if seen.insert(target.clone()) {
                set.push(target);
            }
        }
        Ok(set)
    }

    /// Subscribers of `timelines` that are not themselves among `timelines`.
    fn secondary_targets(&self, timelines: &[String]) -> Result<Vec<String>> {
        Ok(self
            .subscriptions
            .subscribers_for(timelines)?
            .into_iter()
            .filter(|target| !timelines.contains(target))
            .collect())
    }
}

/// Drop repeated keys, keeping first-seen order.
fn dedup(keys: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter()
        .filter(|key| seen.insert(key.as_str()))
        .cloned()
        .collect()
}
