//! # Fanline
//!
//! An activity feed engine that fans events out on write.
//!
//! ## Core Concepts
//!
//! - **Objects**: Attribute maps (users, posts, places) referenced by events
//! - **Timelines**: Ordered lists of event references, newest first
//! - **Subscriptions**: Edges copying a publisher's events into a subscriber's timeline
//! - **Events**: Published once, indexed in every timeline they reach
//! - **Feeds**: Paged timeline reads with subevents nested under their parents
//!
//! ## Example
//!
//! ```ignore
//! use fanline::{Event, Fanline, FeedOptions};
//!
//! let feeds = Fanline::in_memory();
//!
//! // Alice's home timeline follows Bob's wall
//! feeds.subscribe("alice_home", "bob_wall", Some("alice"), true)?;
//!
//! // Bob posts; the post lands on his wall and on Alice's home timeline
//! feeds.publish(
//!     Event::builder("post_1")
//!         .data("text", "Hello!")
//!         .object("author", "bob")
//!         .timeline("bob_wall")
//!         .build(),
//! )?;
//!
//! let page = feeds.feed("alice_home", &FeedOptions::new().per_page(10).with_subevents())?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod fanout;
pub mod objects;
pub mod protocol;
pub mod reify;
pub mod subscriptions;
pub mod timeline;
pub mod types;

// Re-exports
pub use backend::{Backend, Columns, FileBackend, MemoryBackend, Order, Table, WriteOp};
pub use config::{BackendConfig, FanlineConfig, FanoutErrorPolicy};
pub use error::{FeedError, Result};
pub use events::EventStore;
pub use fanout::FanoutExecutor;
pub use objects::ObjectStore;
pub use protocol::{Fanline, PublishOptions};
pub use reify::{reify, FeedOptions, FeedReifier, Strategy};
pub use subscriptions::{SubscriptionEdge, SubscriptionGraph};
pub use timeline::{TimelineEntry, TimelineIndex, TimelinePage};
pub use types::*;
