//! Property tests for cursor pagination.

use fanline::{Event, Fanline, FeedOptions, PublishOptions, Timestamp, Token};
use proptest::prelude::*;

/// Walk every page of `timeline`, returning the pages' keys.
fn walk(feeds: &Fanline, timeline: &str, per_page: usize) -> Vec<Vec<String>> {
    let mut pages = Vec::new();
    let mut cursor = None;
    loop {
        let mut options = FeedOptions::new().per_page(per_page);
        if let Some(token) = cursor.take() {
            options = options.page(token);
        }
        let page = feeds.feed(timeline, &options).unwrap();
        pages.push(page.items.iter().map(|item| item.key.clone()).collect());
        match page.next_page {
            Some(next) => cursor = Some(next),
            None => return pages,
        }
    }
}

proptest! {
    #[test]
    fn pages_partition_the_timeline(
        stamps in proptest::collection::vec(100u64..110, 0..40),
        per_page in 1usize..12,
    ) {
        let feeds = Fanline::in_memory();
        let mut tokens = Vec::new();
        for (i, secs) in stamps.iter().enumerate() {
            let key = format!("e{i:03}");
            feeds
                .publish_with(
                    Event::builder(key.clone()).timeline("T").build(),
                    PublishOptions::default().at(Timestamp(*secs)),
                )
                .unwrap();
            tokens.push(Token::compose(Timestamp(*secs), &key));
        }
        tokens.sort();
        tokens.reverse();
        let expected: Vec<String> = tokens.iter().map(|t| t.event_key().to_string()).collect();

        let pages = walk(&feeds, "T", per_page);
        for page in &pages {
            prop_assert!(page.len() <= per_page);
        }
        if stamps.is_empty() {
            prop_assert_eq!(pages.len(), 1);
        } else {
            prop_assert!(pages.iter().all(|page| !page.is_empty()));
            prop_assert_eq!(pages.len(), (stamps.len() + per_page - 1) / per_page);
        }

        let flat: Vec<String> = pages.into_iter().flatten().collect();
        prop_assert_eq!(flat, expected);
        prop_assert_eq!(feeds.feed_count("T").unwrap(), stamps.len());
    }

    #[test]
    fn subscriber_sees_same_order_as_publisher(
        stamps in proptest::collection::vec(100u64..200, 1..25),
        per_page in 1usize..8,
    ) {
        let feeds = Fanline::in_memory();
        feeds.subscribe("home", "T", None, false).unwrap();
        for (i, secs) in stamps.iter().enumerate() {
            feeds
                .publish_with(
                    Event::builder(format!("e{i:03}")).timeline("T").build(),
                    PublishOptions::default().at(Timestamp(*secs)),
                )
                .unwrap();
        }

        prop_assert_eq!(walk(&feeds, "home", per_page), walk(&feeds, "T", per_page));
    }
}
