//! Optimistic send pipeline.
//!
//! A composed message is written to the local cache first, with a
//! client-generated identity and status `Sending`, so the presentation
//! layer can show it instantly regardless of connectivity. The remote push
//! runs in the background under the same identity; when the reconciliation
//! listener later observes the record it recognizes it as the same message
//! instead of duplicating it.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use pigeon_shared::snapshot::{
    self, conversation_from_fields, conversation_to_fields, message_to_fields,
};
use pigeon_shared::{
    Conversation, ConversationId, DeliveryStatus, LastMessage, Message, MessageBody, UserId,
};
use pigeon_store::handle::log_cache_error;

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::remote::DocPath;
use crate::unread::increment_unread_for_others;

/// Send a message. Returns as soon as the local write lands; the remote
/// push continues in a background task.
///
/// The returned record carries status `Sending`. Callers observe the
/// transition to `Sent` through their conversation subscription. The only
/// error surfaced here is a local-cache failure on the initial write — with
/// no local record there would be nothing for the retry queue to recover.
pub async fn send_message(
    ctx: &SyncContext,
    conversation_id: ConversationId,
    body: MessageBody,
) -> Result<Message, SyncError> {
    let message = Message::outgoing(conversation_id, ctx.user.clone(), body);
    ctx.store.upsert_message(message.clone()).await?;

    info!(id = %message.id, conversation = %message.conversation_id, "message queued");

    let push_ctx = ctx.clone();
    let push_msg = message.clone();
    tokio::spawn(async move {
        if let Err(e) = push_to_remote(&push_ctx, &push_msg).await {
            // Intentional swallow: the message stays in `Sending`, which is
            // exactly what the retry queue scans for after reconnect.
            debug!(id = %push_msg.id, error = %e, "remote push failed; message left for retry");
        }
    });

    Ok(message)
}

/// Steps 3-5 of the pipeline: remote write under the original identity,
/// confirmation to `Sent`, then conversation bookkeeping. Shared verbatim
/// by the retry queue.
pub(crate) async fn push_to_remote(ctx: &SyncContext, message: &Message) -> Result<(), SyncError> {
    // Count the attempt first so a message that keeps failing eventually
    // moves to `Failed` instead of being retried forever.
    log_cache_error(
        "record send attempt",
        ctx.store.record_send_attempt(message.id).await,
    );

    let path = DocPath::Message(message.conversation_id.clone(), message.id);

    // Remote write with the client-generated identity, then the
    // confirmation transition, remotely and locally.
    ctx.remote.set(&path, message_to_fields(message)).await?;
    ctx.remote
        .update(
            &path,
            snapshot::Fields::from_iter([(
                "status".to_string(),
                json!(DeliveryStatus::Sent.as_str()),
            )]),
        )
        .await?;
    ctx.store.mark_message_synced(message.id).await?;

    // Conversation bookkeeping: last-message snapshot and unread counters.
    // Not transactional with the message write; a crash in between leaves
    // the badge count behind until the next send through this conversation.
    let last = LastMessage {
        message_id: message.id,
        sender_id: message.sender_id.clone(),
        preview: message.body.preview(),
        sent_at: message.created_at,
    };
    let conv_path = DocPath::Conversation(message.conversation_id.clone());
    ctx.remote
        .update(
            &conv_path,
            snapshot::Fields::from_iter([
                (
                    "last_message".to_string(),
                    snapshot::last_message_to_value(&last),
                ),
                (
                    "last_activity".to_string(),
                    json!(message.created_at.to_rfc3339()),
                ),
            ]),
        )
        .await?;
    log_cache_error(
        "mirror last-message snapshot",
        ctx.store
            .set_last_message(message.conversation_id.clone(), last)
            .await,
    );

    increment_unread_for_others(ctx, &message.conversation_id, &message.sender_id).await?;

    Ok(())
}

/// Load a conversation, local cache first, falling back to the remote
/// store (and caching the result). `None` when neither side knows it.
pub(crate) async fn load_conversation(
    ctx: &SyncContext,
    id: &ConversationId,
) -> Result<Option<Conversation>, SyncError> {
    if let Some(conv) = ctx.store.get_conversation(id.clone()).await? {
        return Ok(Some(conv));
    }

    let Some(fields) = ctx.remote.get(&DocPath::Conversation(id.clone())).await? else {
        return Ok(None);
    };
    match conversation_from_fields(&fields) {
        Ok(conv) => {
            log_cache_error(
                "cache remote conversation",
                ctx.store.upsert_conversation(conv.clone()).await,
            );
            Ok(Some(conv))
        }
        Err(e) => {
            warn!(conversation = %id, error = %e, "malformed remote conversation document");
            Ok(None)
        }
    }
}

/// Open (or create) the direct conversation between this client's user and
/// `peer`.
///
/// The identity is the deterministic sorted-pair derivation, and the remote
/// write is a replace-by-identity `set`, so two clients racing to create
/// the same conversation converge on a single record.
pub async fn ensure_direct_conversation(
    ctx: &SyncContext,
    peer: &UserId,
) -> Result<Conversation, SyncError> {
    let id = ConversationId::direct(&ctx.user, peer);
    if let Some(existing) = load_conversation(ctx, &id).await? {
        return Ok(existing);
    }

    let conv = Conversation::direct(ctx.user.clone(), peer.clone());
    ctx.remote
        .set(
            &DocPath::Conversation(conv.id.clone()),
            conversation_to_fields(&conv),
        )
        .await?;
    ctx.store.upsert_conversation(conv.clone()).await?;

    info!(conversation = %conv.id, peer = %peer, "direct conversation created");
    Ok(conv)
}

/// Create a group conversation with a fresh identity. The caller is always
/// included in the participant set.
pub async fn create_group_conversation(
    ctx: &SyncContext,
    members: impl IntoIterator<Item = UserId>,
    name: Option<String>,
) -> Result<Conversation, SyncError> {
    let mut participants: std::collections::BTreeSet<UserId> = members.into_iter().collect();
    participants.insert(ctx.user.clone());

    let mut conv = Conversation::group(participants, name);
    conv.last_activity = Utc::now();

    ctx.remote
        .set(
            &DocPath::Conversation(conv.id.clone()),
            conversation_to_fields(&conv),
        )
        .await?;
    ctx.store.upsert_conversation(conv.clone()).await?;

    info!(conversation = %conv.id, "group conversation created");
    Ok(conv)
}
