//! In-memory [`RemoteStore`] used by the integration tests (and handy for
//! demos). Documents live in a map; every mutation re-emits the complete
//! result set to each matching subscriber, mimicking a document store's
//! change feed. Connectivity can be toggled to simulate going offline.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use pigeon_shared::snapshot::Fields;
use pigeon_shared::UserId;

use crate::error::RemoteError;
use crate::remote::{DocPath, RemoteQuery, RemoteSnapshot, RemoteStore, SnapshotStream};

type WatcherTx = mpsc::UnboundedSender<Result<Vec<RemoteSnapshot>, RemoteError>>;

struct Watcher {
    query: RemoteQuery,
    tx: WatcherTx,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, (DocPath, Fields)>,
    watchers: Vec<Watcher>,
    offline: bool,
}

/// Cloneable in-memory remote store.
#[derive(Clone, Default)]
pub struct InMemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated connectivity. Going offline fails all in-flight
    /// subscriptions (the connection is gone) and rejects every operation
    /// until the store is back online.
    pub fn set_online(&self, online: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.offline = !online;
        if !online {
            for watcher in inner.watchers.drain(..) {
                let _ = watcher.tx.send(Err(RemoteError::Unavailable(
                    "connection lost".to_string(),
                )));
            }
        }
    }

    /// Raw document access for test assertions.
    pub fn raw_doc(&self, path: &DocPath) -> Option<Fields> {
        let inner = self.inner.lock().unwrap();
        inner.docs.get(&path.to_string()).map(|(_, f)| f.clone())
    }

    pub fn doc_count(&self) -> usize {
        self.inner.lock().unwrap().docs.len()
    }

    fn check_online(inner: &Inner) -> Result<(), RemoteError> {
        if inner.offline {
            Err(RemoteError::Unavailable("simulated offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn matches(query: &RemoteQuery, path: &DocPath, fields: &Fields) -> bool {
        match (query, path) {
            (RemoteQuery::Messages(conv), DocPath::Message(c, _)) => c == conv,
            (RemoteQuery::Conversations(user), DocPath::Conversation(_)) => fields
                .get("participants")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().any(|v| v.as_str() == Some(user.as_str())))
                .unwrap_or(false),
            _ => false,
        }
    }

    fn result_for(inner: &Inner, query: &RemoteQuery) -> Vec<RemoteSnapshot> {
        let mut result: Vec<RemoteSnapshot> = inner
            .docs
            .values()
            .filter(|(path, fields)| Self::matches(query, path, fields))
            .map(|(path, fields)| RemoteSnapshot {
                path: path.clone(),
                fields: fields.clone(),
            })
            .collect();

        // RFC-3339 strings sort chronologically.
        let sort_key = |snap: &RemoteSnapshot, field: &str| {
            snap.fields
                .get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        match query {
            RemoteQuery::Messages(_) => {
                result.sort_by_key(|snap| sort_key(snap, "created_at"));
            }
            RemoteQuery::Conversations(_) => {
                result.sort_by_key(|snap| std::cmp::Reverse(sort_key(snap, "last_activity")));
            }
        }
        result
    }

    /// Push fresh result sets to every watcher whose query covers `path`.
    fn notify(inner: &mut Inner, path: &DocPath) {
        let snapshots: Vec<(usize, Vec<RemoteSnapshot>)> = inner
            .watchers
            .iter()
            .enumerate()
            .filter(|(_, w)| {
                let fields = inner
                    .docs
                    .get(&path.to_string())
                    .map(|(_, f)| f)
                    .cloned()
                    .unwrap_or_default();
                Self::matches(&w.query, path, &fields)
            })
            .map(|(i, w)| (i, Self::result_for(inner, &w.query)))
            .collect();

        for (i, result) in snapshots {
            let _ = inner.watchers[i].tx.send(Ok(result));
        }
        inner.watchers.retain(|w| !w.tx.is_closed());
    }

    /// Merge `value` into `fields` at a possibly dotted key path.
    fn apply_field(fields: &mut Fields, key: &str, value: Value) {
        match key.split_once('.') {
            None => {
                fields.insert(key.to_string(), value);
            }
            Some((head, rest)) => {
                let entry = fields
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Default::default()));
                if !entry.is_object() {
                    *entry = Value::Object(Default::default());
                }
                let nested = entry.as_object_mut().expect("just ensured object");
                // Only one nesting level is used in practice, but recurse
                // anyway for dotted paths of any depth.
                let mut sub: Fields = std::mem::take(nested);
                Self::apply_field(&mut sub, rest, value);
                *nested = sub;
            }
        }
    }

    fn read_number(fields: &Fields, key: &str) -> i64 {
        match key.split_once('.') {
            None => fields.get(key).and_then(Value::as_i64).unwrap_or(0),
            Some((head, rest)) => fields
                .get(head)
                .and_then(Value::as_object)
                .map(|nested| Self::read_number(nested, rest))
                .unwrap_or(0),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn get(&self, path: &DocPath) -> Result<Option<Fields>, RemoteError> {
        let inner = self.inner.lock().unwrap();
        Self::check_online(&inner)?;
        Ok(inner.docs.get(&path.to_string()).map(|(_, f)| f.clone()))
    }

    async fn set(&self, path: &DocPath, fields: Fields) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_online(&inner)?;
        inner
            .docs
            .insert(path.to_string(), (path.clone(), fields));
        Self::notify(&mut inner, path);
        Ok(())
    }

    async fn update(&self, path: &DocPath, fields: Fields) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_online(&inner)?;
        let Some((_, doc)) = inner.docs.get_mut(&path.to_string()) else {
            return Err(RemoteError::Rejected(format!("no document at {path}")));
        };
        for (key, value) in fields {
            Self::apply_field(doc, &key, value);
        }
        Self::notify(&mut inner, path);
        Ok(())
    }

    async fn increment(&self, path: &DocPath, field: &str, delta: i64) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_online(&inner)?;
        let Some((_, doc)) = inner.docs.get_mut(&path.to_string()) else {
            return Err(RemoteError::Rejected(format!("no document at {path}")));
        };
        let current = Self::read_number(doc, field);
        Self::apply_field(doc, field, Value::from(current + delta));
        Self::notify(&mut inner, path);
        Ok(())
    }

    fn subscribe(&self, query: RemoteQuery) -> SnapshotStream {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.offline {
                let _ = tx.send(Err(RemoteError::Unavailable(
                    "simulated offline".to_string(),
                )));
            } else {
                // Initial emission: the full current result set.
                let _ = tx.send(Ok(Self::result_for(&inner, &query)));
                inner.watchers.push(Watcher { query, tx });
            }
        }
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

/// Convenience: the standard pair of test users.
pub fn test_users() -> (UserId, UserId) {
    (UserId::new("alice"), UserId::new("bob"))
}
