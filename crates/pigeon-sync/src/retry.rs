//! Retry / offline queue.
//!
//! There is no separate queue structure: the local store itself is the
//! queue. A message stuck in `Sending` *is* the failure signal, so the
//! retry pass simply scans for that status and re-runs the push half of
//! the send pipeline with each message's original identity and body.

use tracing::{debug, info, warn};

use pigeon_shared::{ConversationId, DeliveryStatus};

use crate::context::SyncContext;
use crate::send::push_to_remote;

/// Re-submit every message still in `Sending`, optionally scoped to one
/// conversation. Each retry is independent; one failure never blocks the
/// rest. Returns the number of messages successfully pushed. Never errors —
/// a failed scan just reports zero.
pub async fn retry_unsent(ctx: &SyncContext, conversation_id: Option<ConversationId>) -> u32 {
    let pending = match ctx
        .store
        .messages_with_status(DeliveryStatus::Sending, conversation_id)
        .await
    {
        Ok(pending) => pending,
        Err(e) => {
            warn!(error = %e, "retry scan failed");
            return 0;
        }
    };

    if pending.is_empty() {
        return 0;
    }
    info!(count = pending.len(), "retrying unsent messages");

    let mut succeeded = 0;
    for message in pending {
        match push_to_remote(ctx, &message).await {
            Ok(()) => succeeded += 1,
            Err(e) => {
                debug!(id = %message.id, error = %e, "retry failed; message stays queued");
            }
        }
    }
    succeeded
}
