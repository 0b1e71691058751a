//! Remote reconciliation listener.
//!
//! One live subscription per open conversation (plus one for the user's
//! conversation list). Every emitted batch is merged into the local store
//! through idempotent upserts, the owning client advances delivery status
//! for newly observed inbound messages (`delivered` first, then — only
//! while the conversation is focused — `read`), and the caller's callback
//! receives the complete, order-consistent local record set, never a diff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use pigeon_shared::constants::DEFAULT_MESSAGE_PAGE;
use pigeon_shared::snapshot::{conversation_from_fields, message_from_fields};
use pigeon_shared::{Conversation, ConversationId, DeliveryStatus, Message, UserId};
use pigeon_store::handle::log_cache_error;

use crate::context::SyncContext;
use crate::remote::{RemoteQuery, RemoteSnapshot};
use crate::unread::{mark_delivered, mark_read};

/// Callback receiving the full current message set of a conversation,
/// newest first.
pub type MessagesCallback = Arc<dyn Fn(Vec<Message>) + Send + Sync>;

/// Callback receiving the full current conversation list, most recently
/// active first.
pub type ConversationsCallback = Arc<dyn Fn(Vec<Conversation>) + Send + Sync>;

/// Handle to a running listener task.
///
/// `stop` is idempotent: it may be called any number of times, before or
/// after the underlying subscription has already ended. Dropping the handle
/// stops the listener too.
pub struct ListenerHandle {
    stop_tx: watch::Sender<bool>,
}

impl ListenerHandle {
    pub fn stop(&self) {
        // Send fails only when the task is already gone, which is fine.
        let _ = self.stop_tx.send(true);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the reconciliation listener for one conversation.
///
/// `focus` reflects whether the conversation is currently open on screen;
/// it gates the read-marking step. Subscription errors are logged and leave
/// the listener inert — re-establishing it is the reconnect driver's job,
/// not this component's.
pub fn spawn_conversation_listener(
    ctx: &SyncContext,
    conversation_id: ConversationId,
    focus: Arc<AtomicBool>,
    on_update: MessagesCallback,
) -> ListenerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let ctx = ctx.clone();

    tokio::spawn(async move {
        let mut stream = ctx
            .remote
            .subscribe(RemoteQuery::Messages(conversation_id.clone()));
        debug!(conversation = %conversation_id, "conversation listener started");

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                item = stream.next() => match item {
                    None => {
                        debug!(conversation = %conversation_id, "subscription ended");
                        break;
                    }
                    Some(Err(e)) => {
                        // Left inert by design; the reconnect driver
                        // respawns listeners when the network returns.
                        error!(conversation = %conversation_id, error = %e, "subscription error");
                        break;
                    }
                    Some(Ok(batch)) => {
                        merge_message_batch(&ctx, &batch, &focus).await;
                        emit_messages(&ctx, &conversation_id, &on_update).await;
                    }
                },
            }
        }
        debug!(conversation = %conversation_id, "conversation listener stopped");
    });

    ListenerHandle { stop_tx }
}

/// Merge one change-feed batch into the local store and advance delivery
/// status for newly observed inbound messages.
async fn merge_message_batch(ctx: &SyncContext, batch: &[RemoteSnapshot], focus: &AtomicBool) {
    let mut inbound_new: Vec<Message> = Vec::new();

    for snap in batch {
        let remote_msg = match message_from_fields(&snap.fields) {
            Ok(msg) => msg,
            Err(e) => {
                // Skip the document rather than surfacing partial data.
                warn!(path = %snap.path, error = %e, "malformed remote message document");
                continue;
            }
        };

        let merged = match merge_into_store(ctx, remote_msg).await {
            Some(msg) => msg,
            None => continue,
        };

        let is_inbound = merged.sender_id != ctx.user;
        let undelivered = matches!(
            merged.status,
            DeliveryStatus::Sending | DeliveryStatus::Failed | DeliveryStatus::Sent
        );
        if is_inbound && undelivered {
            inbound_new.push(merged);
        }
    }

    if inbound_new.is_empty() {
        return;
    }

    // Delivered-marking settles before any read-marking is issued for the
    // same batch, so no observer ever sees `read` precede `delivered`.
    mark_delivered(ctx, &inbound_new).await;
    if focus.load(Ordering::Relaxed) {
        mark_read(ctx, &ctx.user.clone(), &inbound_new).await;
    }
}

/// Replay-safe merge of one remote message into the local cache: status
/// moves only forward, read receipts accumulate, and local-only send
/// bookkeeping survives.
async fn merge_into_store(ctx: &SyncContext, remote_msg: Message) -> Option<Message> {
    let existing = log_cache_error(
        "read cached message",
        ctx.store.get_message(remote_msg.id).await,
    )
    .flatten();

    let merged = match existing {
        Some(local) => reconcile(local, remote_msg),
        None => remote_msg,
    };

    log_cache_error(
        "merge remote message",
        ctx.store.upsert_message(merged.clone()).await,
    )?;
    Some(merged)
}

fn reconcile(local: Message, remote: Message) -> Message {
    let mut read_by = local.read_by;
    read_by.extend(remote.read_by);
    Message {
        status: local.status.merge(remote.status),
        read_by,
        synced: true,
        send_attempts: local.send_attempts,
        ..remote
    }
}

async fn emit_messages(
    ctx: &SyncContext,
    conversation_id: &ConversationId,
    on_update: &MessagesCallback,
) {
    match ctx
        .store
        .messages_for_conversation(conversation_id.clone(), DEFAULT_MESSAGE_PAGE)
        .await
    {
        Ok(messages) => on_update(messages),
        // Callback deliberately not invoked with partial data.
        Err(e) => warn!(conversation = %conversation_id, error = %e, "snapshot read failed"),
    }
}

/// Spawn the listener for a user's conversation list.
pub fn spawn_conversation_list_listener(
    ctx: &SyncContext,
    user: UserId,
    on_update: ConversationsCallback,
) -> ListenerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let ctx = ctx.clone();

    tokio::spawn(async move {
        let mut stream = ctx.remote.subscribe(RemoteQuery::Conversations(user.clone()));
        debug!(user = %user, "conversation list listener started");

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                item = stream.next() => match item {
                    None => break,
                    Some(Err(e)) => {
                        error!(user = %user, error = %e, "subscription error");
                        break;
                    }
                    Some(Ok(batch)) => {
                        for snap in &batch {
                            match conversation_from_fields(&snap.fields) {
                                Ok(conv) => {
                                    log_cache_error(
                                        "merge remote conversation",
                                        ctx.store.upsert_conversation(conv).await,
                                    );
                                }
                                Err(e) => {
                                    warn!(path = %snap.path, error = %e, "malformed remote conversation document");
                                }
                            }
                        }
                        match ctx.store.list_conversations().await {
                            Ok(conversations) => on_update(conversations),
                            Err(e) => warn!(error = %e, "conversation list read failed"),
                        }
                    }
                },
            }
        }
        debug!(user = %user, "conversation list listener stopped");
    });

    ListenerHandle { stop_tx }
}
