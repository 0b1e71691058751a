//! The session facade: one object wiring the local store, the sync engine,
//! the reconnect driver, and the presence subsystem together for the
//! lifetime of a signed-in user.
//!
//! The session owns the store worker, the heartbeat publisher, and a
//! registry of live reconciliation listeners. When the reconnect driver
//! reports the link coming back, the session runs the retry queue and
//! respawns every registered listener, so a network blip needs no help
//! from the presentation layer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use pigeon_presence::{
    observe_presence_with_threshold, PresenceCallback, PresenceHandle, PresencePublisher,
    PresenceStore, PresenceView,
};
use pigeon_shared::constants::{
    DEFAULT_MESSAGE_PAGE, HEARTBEAT_INTERVAL, STALENESS_THRESHOLD,
};
use pigeon_shared::{Conversation, ConversationId, Message, MessageBody, UserId};
use pigeon_store::handle::log_cache_error;
use pigeon_store::{Database, StoreHandle};
use pigeon_sync::listener::{ConversationsCallback, MessagesCallback};
use pigeon_sync::{
    create_group_conversation, ensure_direct_conversation, mark_conversation_messages_read,
    mark_conversation_read, retry_unsent, send_message, spawn_conversation_list_listener,
    spawn_conversation_listener,
    spawn_reconnect_driver, LinkEvent, ListenerHandle, NetStatus, ReconnectDriver, RemoteStore,
    SyncContext,
};

use crate::error::SessionError;

/// Per-user session parameters. Interval overrides exist for tests; the
/// defaults are the production cadence.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub user: UserId,
    /// Explicit database file. `None` places it under the platform data
    /// directory.
    pub db_path: Option<PathBuf>,
    pub heartbeat_interval: Duration,
    pub staleness_threshold: Duration,
}

impl SessionConfig {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            db_path: None,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            staleness_threshold: STALENESS_THRESHOLD,
        }
    }
}

struct ConversationEntry {
    handle: ListenerHandle,
    callback: MessagesCallback,
    focus: Arc<AtomicBool>,
}

struct ListEntry {
    handle: ListenerHandle,
    callback: ConversationsCallback,
}

/// A signed-in user's connection to the chat system.
pub struct ChatSession {
    ctx: SyncContext,
    presence: Arc<dyn PresenceStore>,
    publisher: PresencePublisher,
    driver: ReconnectDriver,
    listeners: Arc<Mutex<HashMap<ConversationId, ConversationEntry>>>,
    list_listener: Arc<Mutex<Option<ListEntry>>>,
    staleness_threshold: Duration,
}

impl ChatSession {
    /// Open the local store, start the heartbeat publisher, and begin
    /// watching the network link.
    pub async fn start(
        config: SessionConfig,
        remote: Arc<dyn RemoteStore>,
        presence: Arc<dyn PresenceStore>,
        net_rx: watch::Receiver<NetStatus>,
    ) -> Result<Self, SessionError> {
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        let ctx = SyncContext::new(StoreHandle::spawn(db), remote, config.user.clone());

        let publisher = PresencePublisher::start_with_interval(
            presence.clone(),
            config.user.clone(),
            config.heartbeat_interval,
        )
        .await?;

        let listeners: Arc<Mutex<HashMap<ConversationId, ConversationEntry>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let list_listener: Arc<Mutex<Option<ListEntry>>> = Arc::new(Mutex::new(None));

        let (driver, mut events) = spawn_reconnect_driver(net_rx);
        let link_ctx = ctx.clone();
        let link_listeners = listeners.clone();
        let link_list = list_listener.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    LinkEvent::Reconnected => {
                        let recovered = retry_unsent(&link_ctx, None).await;
                        if recovered > 0 {
                            info!(recovered, "retry queue drained after reconnect");
                        }
                        respawn_listeners(&link_ctx, &link_listeners, &link_list);
                    }
                    LinkEvent::Dropped => {
                        debug!("link dropped; sends will queue locally");
                    }
                }
            }
        });

        info!(user = %config.user, "session started");
        Ok(Self {
            ctx,
            presence,
            publisher,
            driver,
            listeners,
            list_listener,
            staleness_threshold: config.staleness_threshold,
        })
    }

    pub fn user(&self) -> &UserId {
        &self.ctx.user
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub async fn ensure_direct_conversation(
        &self,
        peer: &UserId,
    ) -> Result<Conversation, SessionError> {
        Ok(ensure_direct_conversation(&self.ctx, peer).await?)
    }

    pub async fn create_group(
        &self,
        members: impl IntoIterator<Item = UserId>,
        name: Option<String>,
    ) -> Result<Conversation, SessionError> {
        Ok(create_group_conversation(&self.ctx, members, name).await?)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Optimistic send. Returns as soon as the message is in the local
    /// cache; delivery progress arrives through the conversation
    /// subscription.
    pub async fn send(
        &self,
        conversation_id: ConversationId,
        body: MessageBody,
    ) -> Result<Message, SessionError> {
        Ok(send_message(&self.ctx, conversation_id, body).await?)
    }

    /// Read the cached messages of a conversation, newest first.
    pub async fn local_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, SessionError> {
        Ok(self
            .ctx
            .store
            .messages_for_conversation(conversation_id, DEFAULT_MESSAGE_PAGE)
            .await?)
    }

    /// Re-submit locally queued messages now, optionally scoped to one
    /// conversation. The reconnect driver runs the unscoped version
    /// automatically; this exists for pull-to-retry UIs.
    pub async fn retry_unsent(&self, conversation_id: Option<ConversationId>) -> u32 {
        retry_unsent(&self.ctx, conversation_id).await
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Open a live subscription to one conversation. Replaces any previous
    /// subscription to the same conversation; the callback receives the
    /// full current message set on every change, newest first.
    pub fn subscribe_conversation(&self, conversation_id: ConversationId, on_update: MessagesCallback) {
        let focus = Arc::new(AtomicBool::new(false));
        let handle = spawn_conversation_listener(
            &self.ctx,
            conversation_id.clone(),
            focus.clone(),
            on_update.clone(),
        );
        let entry = ConversationEntry {
            handle,
            callback: on_update,
            focus,
        };
        // Dropping a replaced entry stops its listener.
        self.listeners.lock().unwrap().insert(conversation_id, entry);
    }

    pub fn unsubscribe_conversation(&self, conversation_id: &ConversationId) {
        self.listeners.lock().unwrap().remove(conversation_id);
    }

    /// Subscribe to the user's conversation list, most recently active
    /// first. Replaces any previous list subscription.
    pub fn subscribe_conversation_list(&self, on_update: ConversationsCallback) {
        let handle =
            spawn_conversation_list_listener(&self.ctx, self.ctx.user.clone(), on_update.clone());
        *self.list_listener.lock().unwrap() = Some(ListEntry {
            handle,
            callback: on_update,
        });
    }

    // ------------------------------------------------------------------
    // Read state
    // ------------------------------------------------------------------

    /// Record whether the conversation is open on screen. Gaining focus
    /// zeroes the unread counter, advances every already-delivered inbound
    /// message to `Read`, and lets the listener read-mark new arrivals.
    pub async fn set_focused(
        &self,
        conversation_id: &ConversationId,
        focused: bool,
    ) -> Result<(), SessionError> {
        let callback = {
            let listeners = self.listeners.lock().unwrap();
            listeners.get(conversation_id).map(|entry| {
                entry.focus.store(focused, Ordering::Relaxed);
                entry.callback.clone()
            })
        };
        if focused {
            // Messages that arrived while the conversation was closed only
            // got their delivered mark; the receipts happen here.
            mark_conversation_messages_read(&self.ctx, conversation_id).await?;
            self.mark_read(conversation_id).await?;
            if let Some(callback) = callback {
                callback(self.local_messages(conversation_id.clone()).await?);
            }
        }
        Ok(())
    }

    /// Zero this user's unread counter for a conversation. Idempotent.
    pub async fn mark_read(&self, conversation_id: &ConversationId) -> Result<(), SessionError> {
        mark_conversation_read(&self.ctx, conversation_id, &self.ctx.user).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// Observe another user's derived presence. Each update is also
    /// mirrored into the cached profile, best effort.
    pub fn observe_presence(&self, user: &UserId, on_update: PresenceCallback) -> PresenceHandle {
        let store = self.ctx.store.clone();
        let cb: PresenceCallback = Arc::new(move |view: PresenceView| {
            let store = store.clone();
            let mirror = view.clone();
            tokio::spawn(async move {
                let cached = log_cache_error(
                    "read cached profile",
                    store.get_profile(mirror.user_id.clone()).await,
                )
                .flatten();
                if let Some(mut profile) = cached {
                    profile.online = mirror.online;
                    profile.last_seen = mirror.last_seen;
                    log_cache_error(
                        "mirror presence into profile",
                        store.upsert_profile(profile).await,
                    );
                }
            });
            on_update(view);
        });
        observe_presence_with_threshold(
            self.presence.clone(),
            user.clone(),
            self.staleness_threshold,
            cb,
        )
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Controlled sign-out: stop every listener and the reconnect driver,
    /// publish an explicit offline record, and drain the store worker.
    pub async fn shutdown(&self) {
        self.driver.stop();
        self.listeners.lock().unwrap().clear();
        self.list_listener.lock().unwrap().take();
        self.publisher.shutdown().await;
        self.ctx.store.shutdown().await;
        info!(user = %self.ctx.user, "session stopped");
    }
}

/// Stop and restart every registered listener against a fresh
/// subscription. Called on the reconnected edge; the initial emission of
/// each new subscription resynchronizes the local cache.
fn respawn_listeners(
    ctx: &SyncContext,
    listeners: &Mutex<HashMap<ConversationId, ConversationEntry>>,
    list_listener: &Mutex<Option<ListEntry>>,
) {
    let mut map = listeners.lock().unwrap();
    if !map.is_empty() {
        debug!(count = map.len(), "respawning conversation listeners");
    }
    for (id, entry) in map.iter_mut() {
        // Assigning the new handle drops (and thereby stops) the old one.
        entry.handle = spawn_conversation_listener(
            ctx,
            id.clone(),
            entry.focus.clone(),
            entry.callback.clone(),
        );
    }

    let mut list = list_listener.lock().unwrap();
    if let Some(entry) = list.as_mut() {
        entry.handle =
            spawn_conversation_list_listener(ctx, ctx.user.clone(), entry.callback.clone());
    }
}
