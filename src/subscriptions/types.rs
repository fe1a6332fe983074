//! Subscription edge type.

use serde::{Deserialize, Serialize};

/// A directed fan-out edge.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionEdge {
    /// Timeline whose events are copied.
    pub publisher_timeline: String,

    /// Timeline receiving the copies.
    pub fanout_target: String,

    /// Inverse identity recorded alongside the edge.
    pub backlink: Option<String>,
}

impl SubscriptionEdge {
    pub fn new(
        fanout_target: impl Into<String>,
        publisher_timeline: impl Into<String>,
        backlink: Option<String>,
    ) -> Self {
        Self {
            publisher_timeline: publisher_timeline.into(),
            fanout_target: fanout_target.into(),
            backlink: backlink.filter(|b| !b.is_empty()),
        }
    }

    /// Stored column value: the backlink, or empty.
    pub(crate) fn backlink_bytes(&self) -> Vec<u8> {
        self.backlink.clone().unwrap_or_default().into_bytes()
    }

    pub(crate) fn from_column(publisher_timeline: &str, target: String, value: Vec<u8>) -> Self {
        let backlink = String::from_utf8(value).ok().filter(|b| !b.is_empty());
        Self {
            publisher_timeline: publisher_timeline.to_string(),
            fanout_target: target,
            backlink,
        }
    }
}
