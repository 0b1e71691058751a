//! In-memory [`PresenceStore`] used by the tests. Records live in a map;
//! every overwrite is pushed to that user's subscribers. A registered
//! disconnect record can be triggered explicitly to simulate the server
//! noticing a dropped connection.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use pigeon_shared::snapshot::Fields;
use pigeon_shared::UserId;

use crate::backend::{PresenceStore, PresenceStream};
use crate::error::PresenceError;

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, Fields>,
    fallbacks: BTreeMap<String, Fields>,
    watchers: BTreeMap<String, Vec<mpsc::UnboundedSender<Fields>>>,
}

/// Cloneable in-memory presence store.
#[derive(Clone, Default)]
pub struct InMemoryPresence {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the server noticing this client's connection dropped:
    /// the installed disconnect record (if any) is written as if the
    /// client had called `set`, then consumed.
    pub fn drop_connection(&self, user: &UserId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(fields) = inner.fallbacks.remove(user.as_str()) {
            inner
                .records
                .insert(user.as_str().to_string(), fields.clone());
            Self::notify(&mut inner, user, &fields);
        }
    }

    /// Raw record access for test assertions.
    pub fn record(&self, user: &UserId) -> Option<Fields> {
        self.inner.lock().unwrap().records.get(user.as_str()).cloned()
    }

    pub fn has_fallback(&self, user: &UserId) -> bool {
        self.inner.lock().unwrap().fallbacks.contains_key(user.as_str())
    }

    fn notify(inner: &mut Inner, user: &UserId, fields: &Fields) {
        if let Some(watchers) = inner.watchers.get_mut(user.as_str()) {
            watchers.retain(|tx| tx.send(fields.clone()).is_ok());
        }
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresence {
    async fn set(&self, user: &UserId, fields: Fields) -> Result<(), PresenceError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .records
            .insert(user.as_str().to_string(), fields.clone());
        Self::notify(&mut inner, user, &fields);
        Ok(())
    }

    async fn install_on_disconnect(
        &self,
        user: &UserId,
        fields: Fields,
    ) -> Result<(), PresenceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.fallbacks.insert(user.as_str().to_string(), fields);
        Ok(())
    }

    async fn cancel_on_disconnect(&self, user: &UserId) -> Result<(), PresenceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.fallbacks.remove(user.as_str());
        Ok(())
    }

    fn subscribe(&self, user: &UserId) -> PresenceStream {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(fields) = inner.records.get(user.as_str()) {
                let _ = tx.send(fields.clone());
            }
            inner
                .watchers
                .entry(user.as_str().to_string())
                .or_default()
                .push(tx);
        }
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}
