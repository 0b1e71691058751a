use std::sync::Arc;

use pigeon_shared::UserId;
use pigeon_store::StoreHandle;

use crate::remote::RemoteStore;

/// Everything a sync operation needs: the local store's FIFO handle, the
/// remote store, and the identity this client acts as.
///
/// Cheap to clone; every spawned task gets its own copy.
#[derive(Clone)]
pub struct SyncContext {
    pub store: StoreHandle,
    pub remote: Arc<dyn RemoteStore>,
    pub user: UserId,
}

impl SyncContext {
    pub fn new(store: StoreHandle, remote: Arc<dyn RemoteStore>, user: UserId) -> Self {
        Self {
            store,
            remote,
            user,
        }
    }
}
