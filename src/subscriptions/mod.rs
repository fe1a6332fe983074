//! Subscription graph.
//!
//! Directed edges `publisher_timeline -> fanout_target` recording which
//! timelines receive copies of which publishers' events. Each edge may carry
//! a backlink: the inverse identity used to answer "are these two connected"
//! without walking the graph. A backlink never creates a reverse edge.
//!
//! # Example
//!
//! ```ignore
//! let graph = SubscriptionGraph::new(backend);
//!
//! // "user_1_home" receives everything published to "user_1"
//! graph.create("user_1_home", "user_1", Some("user_2"))?;
//!
//! assert_eq!(graph.subscribers_for(&["user_1".into()])?, vec!["user_1_home"]);
//! assert!(graph.is_connected("user_1", "user_2")?);
//! ```

mod graph;
mod types;

pub use graph::SubscriptionGraph;
pub use types::SubscriptionEdge;
