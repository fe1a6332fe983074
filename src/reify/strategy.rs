//! Read strategies: with or without object binding.

use crate::error::{FeedError, Result};
use crate::objects::ObjectStore;
use crate::types::{Attributes, FeedItem, ObjectBinding};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// How a feed read treats object references.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Resolve every referenced object with one batched fetch.
    #[default]
    Default,
    /// Leave object slots as raw keys.
    Objectless,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Default => "default",
            Strategy::Objectless => "objectless",
        }
    }

    /// Rebind object slots in place, according to the strategy.
    pub(crate) fn bind_objects(self, objects: &ObjectStore, items: &mut [FeedItem]) -> Result<()> {
        match self {
            Strategy::Objectless => Ok(()),
            Strategy::Default => bind_all(objects, items),
        }
    }
}

impl FromStr for Strategy {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Strategy::Default),
            "objectless" => Ok(Strategy::Objectless),
            other => Err(FeedError::Validation(format!("unknown feed strategy: {other}"))),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn bind_all(objects: &ObjectStore, items: &mut [FeedItem]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for item in items.iter() {
        for binding in item.objects.values() {
            let unresolved: &[String] = match binding {
                ObjectBinding::Key(key) => std::slice::from_ref(key),
                ObjectBinding::Keys(list) => list,
                _ => &[],
            };
            for key in unresolved {
                if seen.insert(key.as_str()) {
                    keys.push(key.clone());
                }
            }
        }
    }

    let found = objects.get_many(&keys)?;
    for item in items.iter_mut() {
        for binding in item.objects.values_mut() {
            resolve(binding, &found);
        }
    }
    Ok(())
}

/// Unknown keys stay raw; a key list resolves only if every key does.
fn resolve(binding: &mut ObjectBinding, found: &HashMap<String, Attributes>) {
    let resolved = match binding {
        ObjectBinding::Key(key) => found.get(key).cloned().map(ObjectBinding::Object),
        ObjectBinding::Keys(list) => list
            .iter()
            .map(|key| found.get(key).cloned())
            .collect::<Option<Vec<_>>>()
            .map(ObjectBinding::Objects),
        _ => None,
    };
    if let Some(resolved) = resolved {
        *binding = resolved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::types::Event;
    use serde_json::json;
    use std::sync::Arc;

    fn objects() -> (Arc<MemoryBackend>, ObjectStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = ObjectStore::new(backend.clone());
        store
            .record("user_1", json!({"name": "akk"}).as_object().unwrap())
            .unwrap();
        store
            .record("spot_1", json!({"name": "JP"}).as_object().unwrap())
            .unwrap();
        (backend, store)
    }

    fn item() -> FeedItem {
        Event::builder("checkin_1")
            .object("user", "user_1")
            .objects("spots", ["spot_1", "spot_9"])
            .object("ghost", "nobody")
            .build()
            .into()
    }

    #[test]
    fn test_parse() {
        assert_eq!("default".parse::<Strategy>().unwrap(), Strategy::Default);
        assert_eq!("objectless".parse::<Strategy>().unwrap(), Strategy::Objectless);
        assert!("eager".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_default_binds_found_objects() {
        let (_, store) = objects();
        let mut items = vec![item()];
        Strategy::Default.bind_objects(&store, &mut items).unwrap();

        let objects = &items[0].objects;
        assert_eq!(objects["user"].as_object().unwrap()["name"], "akk");
        assert_eq!(objects["ghost"], ObjectBinding::Key("nobody".into()));
        assert_eq!(
            objects["spots"],
            ObjectBinding::Keys(vec!["spot_1".into(), "spot_9".into()])
        );
    }

    #[test]
    fn test_objectless_issues_no_requests() {
        let (backend, store) = objects();
        let before = backend.requests();
        let mut items = vec![item()];
        Strategy::Objectless.bind_objects(&store, &mut items).unwrap();

        assert_eq!(backend.requests(), before);
        assert_eq!(items[0].objects["user"], ObjectBinding::Key("user_1".into()));
    }

    #[test]
    fn test_no_references_no_request() {
        let (backend, store) = objects();
        let before = backend.requests();
        let mut items = vec![FeedItem::from(Event::builder("plain").build())];
        Strategy::Default.bind_objects(&store, &mut items).unwrap();
        assert_eq!(backend.requests(), before);
    }
}
