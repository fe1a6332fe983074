//! Subscription graph stored in the subscription table.

use super::types::SubscriptionEdge;
use crate::backend::{Backend, Order, Table};
use crate::error::Result;
use std::collections::HashSet;
use std::sync::Arc;

/// Directed `publisher -> {fanout_target: backlink}` edges.
///
/// Edges are independent: removing one never touches another.
pub struct SubscriptionGraph {
    backend: Arc<dyn Backend>,
}

impl SubscriptionGraph {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Create (or overwrite) the edge `publisher_timeline -> fanout_target`.
    pub fn create(
        &self,
        fanout_target: &str,
        publisher_timeline: &str,
        backlink: Option<&str>,
    ) -> Result<SubscriptionEdge> {
        let edge = SubscriptionEdge::new(
            fanout_target,
            publisher_timeline,
            backlink.map(str::to_string),
        );
        self.backend.put(
            Table::Subscription,
            publisher_timeline,
            fanout_target,
            edge.backlink_bytes(),
        )?;
        Ok(edge)
    }

    /// Remove one edge. No-op if absent.
    pub fn remove(&self, fanout_target: &str, publisher_timeline: &str) -> Result<()> {
        self.backend
            .delete(Table::Subscription, publisher_timeline, fanout_target)
    }

    /// All edges out of a publisher.
    pub fn edges(&self, publisher_timeline: &str) -> Result<Vec<SubscriptionEdge>> {
        Ok(self
            .backend
            .row(Table::Subscription, publisher_timeline)?
            .into_iter()
            .map(|(target, value)| SubscriptionEdge::from_column(publisher_timeline, target, value))
            .collect())
    }

    /// Fan-out targets of every given publisher, flattened and deduplicated
    /// in first-seen order. One batched read; none for an empty list.
    pub fn subscribers_for(&self, publisher_timelines: &[String]) -> Result<Vec<String>> {
        if publisher_timelines.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = self.backend.multi_slice(
            Table::Subscription,
            publisher_timelines,
            usize::MAX,
            Order::Ascending,
        )?;

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for publisher in publisher_timelines {
            for (target, _) in rows.remove(publisher).unwrap_or_default() {
                if seen.insert(target.clone()) {
                    targets.push(target);
                }
            }
        }
        Ok(targets)
    }

    /// Backlinks recorded on a publisher's edges.
    pub fn followers_for(&self, publisher_timeline: &str) -> Result<Vec<String>> {
        Ok(self
            .edges(publisher_timeline)?
            .into_iter()
            .filter_map(|edge| edge.backlink)
            .collect())
    }

    /// True iff `backlink` is among the publisher's followers.
    pub fn is_connected(&self, publisher_timeline: &str, backlink: &str) -> Result<bool> {
        Ok(self
            .followers_for(publisher_timeline)?
            .iter()
            .any(|b| b == backlink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn graph() -> (Arc<MemoryBackend>, SubscriptionGraph) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), SubscriptionGraph::new(backend))
    }

    #[test]
    fn test_create_and_list() {
        let (_, graph) = graph();
        graph.create("home_1", "tech", None).unwrap();
        graph.create("home_2", "tech", Some("user_2")).unwrap();

        let subs = graph.subscribers_for(&["tech".into()]).unwrap();
        assert_eq!(subs, vec!["home_1".to_string(), "home_2".to_string()]);
        assert_eq!(graph.followers_for("tech").unwrap(), vec!["user_2".to_string()]);
    }

    #[test]
    fn test_subscribers_deduplicated_across_publishers() {
        let (_, graph) = graph();
        graph.create("home", "tech", None).unwrap();
        graph.create("home", "science", None).unwrap();
        graph.create("digest", "science", None).unwrap();

        let subs = graph
            .subscribers_for(&["tech".into(), "science".into(), "nobody".into()])
            .unwrap();
        assert_eq!(subs, vec!["home".to_string(), "digest".to_string()]);
    }

    #[test]
    fn test_remove_is_independent() {
        let (_, graph) = graph();
        graph.create("a", "tech", Some("x")).unwrap();
        graph.create("b", "tech", Some("y")).unwrap();

        graph.remove("a", "tech").unwrap();
        assert_eq!(graph.subscribers_for(&["tech".into()]).unwrap(), vec!["b".to_string()]);
        assert!(!graph.is_connected("tech", "x").unwrap());
        assert!(graph.is_connected("tech", "y").unwrap());
    }

    #[test]
    fn test_backlink_is_not_a_reverse_edge() {
        let (_, graph) = graph();
        graph.create("user_1_home", "user_2", Some("user_1")).unwrap();
        assert!(graph.subscribers_for(&["user_1".into()]).unwrap().is_empty());
    }

    #[test]
    fn test_empty_publisher_list_short_circuits() {
        let (backend, graph) = graph();
        assert!(graph.subscribers_for(&[]).unwrap().is_empty());
        assert_eq!(backend.requests(), 0);
    }
}
