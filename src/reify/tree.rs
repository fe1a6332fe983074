//! Rebuilds the nested subevent tree from a flat batch of feed items.

use crate::types::FeedItem;
use std::collections::HashMap;

/// Attach every item whose parent is present in `flat` under that parent.
///
/// Pass one places items in an arena keyed by event key (first occurrence
/// wins). Pass two resolves parent keys to arena slots and links children.
/// Items whose parent is absent stay top-level in their original order, and
/// children keep their original relative order. A parent chain that loops
/// back on itself is cut at its earliest member, which stays top-level.
///
/// Both passes are linear and neither recurses, so arbitrarily deep reply
/// chains are safe.
pub fn reify(flat: Vec<FeedItem>) -> Vec<FeedItem> {
    let mut arena: Vec<Option<FeedItem>> = Vec::with_capacity(flat.len());
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(flat.len());
    for item in flat {
        if slots.contains_key(&item.key) {
            continue;
        }
        slots.insert(item.key.clone(), arena.len());
        arena.push(Some(item));
    }

    let mut parents: Vec<Option<usize>> = arena
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_ref()
                .and_then(FeedItem::parent)
                .and_then(|key| slots.get(key).copied())
                .filter(|&p| p != i)
        })
        .collect();
    cut_cycles(&mut parents);

    let n = arena.len();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut roots = Vec::new();
    for (i, parent) in parents.iter().enumerate() {
        match parent {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }

    // Pre-order over the forest; built in reverse, every child is finished
    // before its parent needs it.
    let mut order = Vec::with_capacity(n);
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(slot) = stack.pop() {
        order.push(slot);
        stack.extend(children[slot].iter().rev().copied());
    }

    let mut built: Vec<Option<FeedItem>> = (0..n).map(|_| None).collect();
    for &slot in order.iter().rev() {
        let Some(mut item) = arena[slot].take() else {
            continue;
        };
        item.subevents
            .extend(children[slot].iter().filter_map(|&child| built[child].take()));
        built[slot] = Some(item);
    }

    roots
        .into_iter()
        .filter_map(|root| built[root].take())
        .collect()
}

/// Break every parent cycle by detaching its lowest slot.
///
/// Each slot has at most one parent, so a walk from an unvisited slot either
/// ends at a root, joins a finished walk, or closes a loop on its own path.
/// Every slot is walked once.
fn cut_cycles(parents: &mut [Option<usize>]) {
    const UNSEEN: u8 = 0;
    const ON_PATH: u8 = 1;
    const DONE: u8 = 2;

    let mut state = vec![UNSEEN; parents.len()];
    let mut path = Vec::new();
    for start in 0..parents.len() {
        let mut current = Some(start);
        while let Some(slot) = current {
            match state[slot] {
                UNSEEN => {
                    state[slot] = ON_PATH;
                    path.push(slot);
                    current = parents[slot];
                }
                ON_PATH => {
                    let from = path.iter().rposition(|&p| p == slot).unwrap_or(0);
                    if let Some(&lowest) = path[from..].iter().min() {
                        parents[lowest] = None;
                    }
                    current = None;
                }
                _ => current = None,
            }
        }
        for slot in path.drain(..) {
            state[slot] = DONE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;

    fn item(key: &str, parent: Option<&str>) -> FeedItem {
        let mut builder = Event::builder(key);
        if let Some(parent) = parent {
            builder = builder.parent(parent);
        }
        builder.build().into()
    }

    fn keys(items: &[FeedItem]) -> Vec<&str> {
        items.iter().map(|i| i.key.as_str()).collect()
    }

    #[test]
    fn test_flat_items_stay_in_order() {
        let tree = reify(vec![item("a", None), item("b", None), item("c", None)]);
        assert_eq!(keys(&tree), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_children_attach_to_parent() {
        let tree = reify(vec![
            item("a", None),
            item("b", None),
            item("c1", Some("a")),
            item("c2", Some("a")),
        ]);
        assert_eq!(keys(&tree), vec!["a", "b"]);
        assert_eq!(keys(&tree[0].subevents), vec!["c1", "c2"]);
    }

    #[test]
    fn test_arbitrary_depth() {
        let tree = reify(vec![
            item("a", None),
            item("d", Some("c")),
            item("b", Some("a")),
            item("c", Some("b")),
        ]);
        assert_eq!(keys(&tree), vec!["a"]);
        assert_eq!(tree[0].depth(), 4);
        assert_eq!(tree[0].subevents[0].subevents[0].subevents[0].key, "d");
    }

    #[test]
    fn test_missing_parent_is_top_level() {
        let tree = reify(vec![item("a", None), item("orphan", Some("elsewhere"))]);
        assert_eq!(keys(&tree), vec!["a", "orphan"]);
    }

    #[test]
    fn test_duplicate_keys_keep_first() {
        let tree = reify(vec![item("a", None), item("b", Some("a")), item("b", Some("a"))]);
        assert_eq!(tree[0].subevents.len(), 1);
    }

    #[test]
    fn test_cycle_is_cut() {
        let tree = reify(vec![item("x", Some("y")), item("y", Some("x"))]);
        assert_eq!(keys(&tree), vec!["x"]);
        assert_eq!(keys(&tree[0].subevents), vec!["y"]);
    }

    #[test]
    fn test_self_parent_is_top_level() {
        let tree = reify(vec![item("a", Some("a"))]);
        assert_eq!(keys(&tree), vec!["a"]);
    }

    #[test]
    fn test_cycle_cut_at_earliest_member() {
        // "a" leads into the loop b -> c -> d -> b without being part of it
        let tree = reify(vec![
            item("a", Some("c")),
            item("c", Some("d")),
            item("d", Some("b")),
            item("b", Some("c")),
        ]);
        assert_eq!(keys(&tree), vec!["c"]);
        assert_eq!(keys(&tree[0].subevents), vec!["a", "b"]);
        assert_eq!(keys(&tree[0].subevents[1].subevents), vec!["d"]);
    }

    #[test]
    fn test_long_chain() {
        let depth = 10_000;
        let mut flat = vec![item("e0", None)];
        for i in 1..depth {
            flat.push(item(&format!("e{i}"), Some(&format!("e{}", i - 1))));
        }
        flat.reverse();

        let tree = reify(flat);
        assert_eq!(keys(&tree), vec!["e0"]);

        let mut node = &tree[0];
        let mut levels = 1;
        while let Some(child) = node.subevents.first() {
            assert_eq!(node.subevents.len(), 1);
            assert_eq!(child.key, format!("e{levels}"));
            node = child;
            levels += 1;
        }
        assert_eq!(levels, depth);

        // Take the chain apart level by level; dropping it whole recurses
        let mut pending = tree;
        while let Some(mut item) = pending.pop() {
            pending.append(&mut item.subevents);
        }
    }
}
