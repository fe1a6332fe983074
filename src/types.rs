//! Core types for the feed engine.

use crate::error::{FeedError, Result};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Attribute map used for object snapshots and event data.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Reserved data field naming an event's parent.
pub const PARENT_FIELD: &str = "parent";

/// Seconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_secs())
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Sortable position of an event inside every timeline it appears in.
///
/// Format is `"<decimal-unix-seconds>_<event_key>"`. Timelines sort tokens
/// lexicographically, which matches numeric time order only while the
/// timestamps keep the same number of digits. Events sharing a timestamp
/// are ordered by key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Compose a token from a timestamp and an event key.
    pub fn compose(timestamp: Timestamp, event_key: &str) -> Self {
        Token(format!("{}_{}", timestamp.0, event_key))
    }

    /// The timestamp prefix, if the token is well formed.
    pub fn timestamp(&self) -> Option<Timestamp> {
        let (secs, _) = self.0.split_once('_')?;
        secs.parse().ok().map(Timestamp)
    }

    /// The event key suffix (the whole token if no separator is present).
    pub fn event_key(&self) -> &str {
        match self.0.split_once('_') {
            Some((_, key)) => key,
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Token {
    fn from(raw: String) -> Self {
        Token(raw)
    }
}

impl From<&str> for Token {
    fn from(raw: &str) -> Self {
        Token(raw.to_string())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference from an event slot to one or more stored objects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectRef {
    One(String),
    Many(Vec<String>),
}

impl ObjectRef {
    /// Keys referenced by this slot.
    pub fn keys(&self) -> &[String] {
        match self {
            ObjectRef::One(key) => std::slice::from_ref(key),
            ObjectRef::Many(keys) => keys,
        }
    }
}

impl From<&str> for ObjectRef {
    fn from(key: &str) -> Self {
        ObjectRef::One(key.to_string())
    }
}

impl From<Vec<String>> for ObjectRef {
    fn from(keys: Vec<String>) -> Self {
        ObjectRef::Many(keys)
    }
}

/// Explicit destination timelines of an event.
///
/// Always serialized as a list. Deserializes from a list or from a map, in
/// which case the map's keys are taken.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "TimelinesRepr")]
pub struct Timelines(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum TimelinesRepr {
    List(Vec<String>),
    Map(BTreeMap<String, IgnoredAny>),
}

impl From<TimelinesRepr> for Timelines {
    fn from(repr: TimelinesRepr) -> Self {
        match repr {
            TimelinesRepr::List(list) => Timelines(list),
            TimelinesRepr::Map(map) => Timelines(map.into_keys().collect()),
        }
    }
}

impl Serialize for Timelines {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl Timelines {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, timeline: &str) -> bool {
        self.0.iter().any(|t| t == timeline)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for Timelines {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Timelines(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<String>> for Timelines {
    fn from(list: Vec<String>) -> Self {
        Timelines(list)
    }
}

/// A published (or about to be published) event.
///
/// Subevents are never stored on the event itself; they are discovered at
/// read time through the sub-timeline named after the parent's key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Externally assigned, unique key.
    pub key: String,

    /// Assigned once at first publish and never changed afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,

    /// Application data. May carry a `parent` field naming another event.
    #[serde(default)]
    pub data: Attributes,

    /// Named slots referencing stored objects.
    #[serde(default)]
    pub objects: BTreeMap<String, ObjectRef>,

    /// Primary destination timelines.
    #[serde(default)]
    pub timelines: Timelines,
}

impl Event {
    /// Start building an event with the given key.
    pub fn builder(key: impl Into<String>) -> EventBuilder {
        EventBuilder {
            event: Event {
                key: key.into(),
                token: None,
                data: Attributes::new(),
                objects: BTreeMap::new(),
                timelines: Timelines::default(),
            },
        }
    }

    /// Key of the parent event, if this is a subevent.
    pub fn parent(&self) -> Option<&str> {
        self.data.get(PARENT_FIELD).and_then(|v| v.as_str())
    }

    /// Every object key referenced from any slot.
    pub fn object_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.objects
            .values()
            .flat_map(|r| r.keys().iter().map(String::as_str))
    }

    /// Check the fields required for publishing.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(FeedError::Validation("event key is empty".into()));
        }
        if self.timelines.iter().any(|t| t.is_empty()) {
            return Err(FeedError::Validation(format!(
                "event {} names an empty timeline",
                self.key
            )));
        }
        if let Some(parent) = self.data.get(PARENT_FIELD) {
            if !parent.is_string() {
                return Err(FeedError::Validation(format!(
                    "event {}: parent must be a string key",
                    self.key
                )));
            }
        }
        Ok(())
    }

    /// Encode for the event table.
    ///
    /// Structs are written as maps so optional fields can be skipped.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from the event table.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Builder for [`Event`].
#[derive(Clone, Debug)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    /// Set a data field.
    pub fn data(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.event.data.insert(field.into(), value.into());
        self
    }

    /// Replace all data.
    pub fn with_data(mut self, data: Attributes) -> Self {
        self.event.data = data;
        self
    }

    /// Mark this event as a subevent of `parent`.
    ///
    /// Sets the `parent` field and adds the parent's key as a timeline.
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        let parent = parent.into();
        if !self.event.timelines.contains(&parent) {
            self.event.timelines.0.push(parent.clone());
        }
        self.event
            .data
            .insert(PARENT_FIELD.to_string(), serde_json::Value::String(parent));
        self
    }

    /// Reference a single object from a slot.
    pub fn object(mut self, slot: impl Into<String>, key: impl Into<String>) -> Self {
        self.event
            .objects
            .insert(slot.into(), ObjectRef::One(key.into()));
        self
    }

    /// Reference several objects from a slot.
    pub fn objects<I, S>(mut self, slot: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = keys.into_iter().map(Into::into).collect();
        self.event.objects.insert(slot.into(), ObjectRef::Many(keys));
        self
    }

    /// Add a primary timeline.
    pub fn timeline(mut self, timeline: impl Into<String>) -> Self {
        let timeline = timeline.into();
        if !self.event.timelines.contains(&timeline) {
            self.event.timelines.0.push(timeline);
        }
        self
    }

    /// Add several primary timelines.
    pub fn timelines<I, S>(mut self, timelines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for timeline in timelines {
            self = self.timeline(timeline);
        }
        self
    }

    pub fn build(self) -> Event {
        self.event
    }
}

/// An object slot after (optional) binding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectBinding {
    /// Unresolved single key.
    Key(String),
    /// Unresolved key list.
    Keys(Vec<String>),
    /// Resolved snapshot.
    Object(Attributes),
    /// Resolved snapshots, in slot order.
    Objects(Vec<Attributes>),
}

impl ObjectBinding {
    /// The resolved snapshot, if this slot holds exactly one.
    pub fn as_object(&self) -> Option<&Attributes> {
        match self {
            ObjectBinding::Object(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ObjectBinding::Object(_) | ObjectBinding::Objects(_))
    }
}

impl From<ObjectRef> for ObjectBinding {
    fn from(r: ObjectRef) -> Self {
        match r {
            ObjectRef::One(key) => ObjectBinding::Key(key),
            ObjectRef::Many(keys) => ObjectBinding::Keys(keys),
        }
    }
}

/// One node of a reified feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub key: String,
    pub token: Option<Token>,
    pub data: Attributes,
    pub timelines: Timelines,
    pub objects: BTreeMap<String, ObjectBinding>,
    #[serde(default)]
    pub subevents: Vec<FeedItem>,
}

impl FeedItem {
    pub fn parent(&self) -> Option<&str> {
        self.data.get(PARENT_FIELD).and_then(|v| v.as_str())
    }

    /// Depth of the subtree rooted here (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + self.subevents.iter().map(FeedItem::depth).max().unwrap_or(0)
    }
}

impl From<Event> for FeedItem {
    fn from(event: Event) -> Self {
        FeedItem {
            key: event.key,
            token: event.token,
            data: event.data,
            timelines: event.timelines,
            objects: event
                .objects
                .into_iter()
                .map(|(slot, r)| (slot, r.into()))
                .collect(),
            subevents: Vec::new(),
        }
    }
}

/// One page of a feed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    /// Total number of entries on the timeline.
    pub count: usize,
    /// Cursor for the following page, if there is one.
    pub next_page: Option<Token>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_compose() {
        let token = Token::compose(Timestamp(1_300_000_000), "checkin_1");
        assert_eq!(token.as_str(), "1300000000_checkin_1");
        assert_eq!(token.timestamp(), Some(Timestamp(1_300_000_000)));
        assert_eq!(token.event_key(), "checkin_1");
    }

    #[test]
    fn test_token_same_timestamp_orders_by_key() {
        let a = Token::compose(Timestamp(100), "a");
        let b = Token::compose(Timestamp(100), "b");
        assert!(a < b);
    }

    #[test]
    fn test_timelines_from_map() {
        let event: Event = serde_json::from_value(json!({
            "key": "e1",
            "timelines": {"tech": 1, "home": null}
        }))
        .unwrap();
        assert_eq!(event.timelines.as_slice(), &["home".to_string(), "tech".to_string()]);
    }

    #[test]
    fn test_event_msgpack_keeps_token_and_refs() {
        let mut event = Event::builder("checkin_1")
            .data("text", "hi")
            .object("user", "user_1")
            .objects("tags", vec!["t1", "t2"])
            .timelines(["user_1", "spot_1"])
            .build();
        event.token = Some(Token::compose(Timestamp(5), "checkin_1"));

        let decoded = Event::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_builder_parent_adds_timeline() {
        let event = Event::builder("b").parent("a").build();
        assert_eq!(event.parent(), Some("a"));
        assert!(event.timelines.contains("a"));
    }

    #[test]
    fn test_validate() {
        assert!(Event::builder("").build().validate().is_err());
        assert!(Event::builder("e").timeline("").build().validate().is_err());
        assert!(Event::builder("e").data("parent", 7).build().validate().is_err());
        assert!(Event::builder("e").timeline("t").build().validate().is_ok());
    }

    #[test]
    fn test_feed_item_depth() {
        let mut root = FeedItem::from(Event::builder("a").build());
        let mut child = FeedItem::from(Event::builder("b").parent("a").build());
        child
            .subevents
            .push(FeedItem::from(Event::builder("c").parent("b").build()));
        root.subevents.push(child);
        assert_eq!(root.depth(), 3);
    }
}
