//! Unread-counter and read-receipt bookkeeping.
//!
//! Counters live authoritatively in the remote conversation document and
//! are mirrored into the local cache. Increments always go through the
//! remote store's atomic increment primitive, never a client-side
//! read-modify-write, so near-simultaneous sends from different senders
//! cannot lose an update. Resets and receipt marks are idempotent, which
//! makes the focus-triggered reset and the listener's delivered/read
//! marking order-insensitive with respect to each other.

use serde_json::json;
use tracing::{debug, warn};

use pigeon_shared::constants::DEFAULT_MESSAGE_PAGE;
use pigeon_shared::snapshot::Fields;
use pigeon_shared::{ConversationId, DeliveryStatus, Message, UserId};
use pigeon_store::handle::log_cache_error;

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::remote::DocPath;
use crate::send::load_conversation;

/// Reset `user`'s unread counter for a conversation to zero, remotely and
/// locally. Idempotent; calling it twice is the same as calling it once.
pub async fn mark_conversation_read(
    ctx: &SyncContext,
    conversation_id: &ConversationId,
    user: &UserId,
) -> Result<(), SyncError> {
    ctx.remote
        .update(
            &DocPath::Conversation(conversation_id.clone()),
            Fields::from_iter([(format!("unread.{user}"), json!(0))]),
        )
        .await?;
    log_cache_error(
        "mirror unread reset",
        ctx.store
            .reset_unread(conversation_id.clone(), user.clone())
            .await,
    );
    Ok(())
}

/// Atomically increment the unread counter of every participant except the
/// sender, then mirror the increments locally.
pub async fn increment_unread_for_others(
    ctx: &SyncContext,
    conversation_id: &ConversationId,
    sender: &UserId,
) -> Result<(), SyncError> {
    let Some(conv) = load_conversation(ctx, conversation_id).await? else {
        warn!(conversation = %conversation_id, "unread increment for unknown conversation");
        return Ok(());
    };

    let path = DocPath::Conversation(conversation_id.clone());
    for other in conv.others(sender) {
        ctx.remote
            .increment(&path, &format!("unread.{other}"), 1)
            .await?;
    }
    log_cache_error(
        "mirror unread increment",
        ctx.store
            .increment_unread(conversation_id.clone(), sender.clone())
            .await,
    );
    Ok(())
}

/// Advance every inbound message in a conversation to `Read`, remotely and
/// locally. Used on focus gain: messages that were delivered while the
/// conversation was closed still need their receipts, and the listener only
/// read-marks messages it newly observes.
pub async fn mark_conversation_messages_read(
    ctx: &SyncContext,
    conversation_id: &ConversationId,
) -> Result<(), SyncError> {
    let messages = ctx
        .store
        .messages_for_conversation(conversation_id.clone(), DEFAULT_MESSAGE_PAGE)
        .await?;
    let pending: Vec<Message> = messages
        .into_iter()
        .filter(|m| m.sender_id != ctx.user && m.status != DeliveryStatus::Read)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    // Stragglers get their delivered mark first; an observer never sees
    // `read` precede `delivered`.
    let undelivered: Vec<Message> = pending
        .iter()
        .filter(|m| {
            matches!(
                m.status,
                DeliveryStatus::Sending | DeliveryStatus::Failed | DeliveryStatus::Sent
            )
        })
        .cloned()
        .collect();
    if !undelivered.is_empty() {
        mark_delivered(ctx, &undelivered).await;
    }

    let reader = ctx.user.clone();
    mark_read(ctx, &reader, &pending).await;
    Ok(())
}

/// Mark a batch of inbound messages `Delivered`, remotely and locally.
///
/// The listener awaits this to completion before issuing any read marks for
/// the same batch, so an observer never sees `read` arrive before
/// `delivered` on a message.
pub(crate) async fn mark_delivered(ctx: &SyncContext, messages: &[Message]) {
    for msg in messages {
        let path = DocPath::Message(msg.conversation_id.clone(), msg.id);
        if let Err(e) = ctx
            .remote
            .update(
                &path,
                Fields::from_iter([(
                    "status".to_string(),
                    json!(DeliveryStatus::Delivered.as_str()),
                )]),
            )
            .await
        {
            debug!(id = %msg.id, error = %e, "delivered mark not pushed");
        }
        log_cache_error(
            "advance to delivered",
            ctx.store
                .advance_message_status(msg.id, DeliveryStatus::Delivered)
                .await,
        );
    }
}

/// Mark a batch of inbound messages `Read` by `reader`, remotely and
/// locally. Only called after [`mark_delivered`] has settled for the batch.
pub(crate) async fn mark_read(ctx: &SyncContext, reader: &UserId, messages: &[Message]) {
    for msg in messages {
        let path = DocPath::Message(msg.conversation_id.clone(), msg.id);
        // Known limitation: the pushed set is the local copy plus this
        // reader, so two group members reading the same message at the same
        // moment can overwrite each other's receipt. The remote store's
        // per-field last-writer-wins tolerates it, and the losing receipt is
        // restored the next time that client pushes a read for the message.
        let mut read_by = msg.read_by.clone();
        read_by.insert(reader.clone());
        let read_by_json: Vec<_> = read_by.iter().map(|u| json!(u.as_str())).collect();

        if let Err(e) = ctx
            .remote
            .update(
                &path,
                Fields::from_iter([
                    ("status".to_string(), json!(DeliveryStatus::Read.as_str())),
                    ("read_by".to_string(), json!(read_by_json)),
                ]),
            )
            .await
        {
            debug!(id = %msg.id, error = %e, "read mark not pushed");
        }
        log_cache_error(
            "record read receipt",
            ctx.store.add_read_receipt(msg.id, reader.clone()).await,
        );
        log_cache_error(
            "advance to read",
            ctx.store
                .advance_message_status(msg.id, DeliveryStatus::Read)
                .await,
        );
    }
}
