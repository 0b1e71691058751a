//! Async front door to the store with a FIFO operation queue.
//!
//! A single worker task owns the [`Database`]; callers talk to it through a
//! typed command channel, command/oneshot pattern as in a swarm task. The
//! worker pulls operations off one `mpsc` receiver and runs each to
//! completion before starting the next, which serializes every read and
//! write without caller-side locking. This queue is the only
//! mutual-exclusion primitive in the system: optimistic sends,
//! reconciliation merges, retry re-sends, and presence-triggered profile
//! writes all line up here.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use pigeon_shared::{
    Conversation, ConversationId, DeliveryStatus, LastMessage, Message, MessageId, Profile,
    UserId,
};

use crate::database::Database;
use crate::error::StoreError;
use crate::Result;

/// Queue depth before backpressure kicks in.
const OP_QUEUE_DEPTH: usize = 256;

/// Operations sent *into* the store worker task.
enum StoreOp {
    UpsertMessage(Box<Message>, oneshot::Sender<Result<()>>),
    GetMessage(MessageId, oneshot::Sender<Result<Option<Message>>>),
    MessagesForConversation(ConversationId, u32, oneshot::Sender<Result<Vec<Message>>>),
    MessagesWithStatus(
        DeliveryStatus,
        Option<ConversationId>,
        oneshot::Sender<Result<Vec<Message>>>,
    ),
    AdvanceStatus(
        MessageId,
        DeliveryStatus,
        oneshot::Sender<Result<Option<DeliveryStatus>>>,
    ),
    AddReadReceipt(MessageId, UserId, oneshot::Sender<Result<()>>),
    RecordSendAttempt(MessageId, oneshot::Sender<Result<Option<u32>>>),
    MarkSynced(MessageId, oneshot::Sender<Result<()>>),
    UpsertConversation(Box<Conversation>, oneshot::Sender<Result<()>>),
    GetConversation(ConversationId, oneshot::Sender<Result<Option<Conversation>>>),
    ListConversations(oneshot::Sender<Result<Vec<Conversation>>>),
    SetLastMessage(ConversationId, LastMessage, oneshot::Sender<Result<()>>),
    IncrementUnread(ConversationId, UserId, oneshot::Sender<Result<()>>),
    ResetUnread(ConversationId, UserId, oneshot::Sender<Result<()>>),
    UpsertProfile(Box<Profile>, oneshot::Sender<Result<()>>),
    GetProfile(UserId, oneshot::Sender<Result<Option<Profile>>>),
    Shutdown,
}

/// Cloneable handle to the store worker.
///
/// Dropping every clone (or calling [`StoreHandle::shutdown`]) stops the
/// worker. Operations issued after shutdown fail with
/// [`StoreError::WorkerGone`].
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreOp>,
}

impl StoreHandle {
    /// Move `db` into a fresh worker task and return a handle to it.
    pub fn spawn(db: Database) -> Self {
        let (tx, rx) = mpsc::channel(OP_QUEUE_DEPTH);
        tokio::spawn(run_worker(db, rx));
        Self { tx }
    }

    async fn execute<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> StoreOp,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StoreError::WorkerGone)?;
        reply_rx.await.map_err(|_| StoreError::WorkerGone)?
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn upsert_message(&self, message: Message) -> Result<()> {
        self.execute(|tx| StoreOp::UpsertMessage(Box::new(message), tx))
            .await
    }

    pub async fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        self.execute(|tx| StoreOp::GetMessage(id, tx)).await
    }

    pub async fn messages_for_conversation(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.execute(|tx| StoreOp::MessagesForConversation(conversation_id, limit, tx))
            .await
    }

    pub async fn messages_with_status(
        &self,
        status: DeliveryStatus,
        conversation_id: Option<ConversationId>,
    ) -> Result<Vec<Message>> {
        self.execute(|tx| StoreOp::MessagesWithStatus(status, conversation_id, tx))
            .await
    }

    pub async fn advance_message_status(
        &self,
        id: MessageId,
        observed: DeliveryStatus,
    ) -> Result<Option<DeliveryStatus>> {
        self.execute(|tx| StoreOp::AdvanceStatus(id, observed, tx))
            .await
    }

    pub async fn add_read_receipt(&self, id: MessageId, user: UserId) -> Result<()> {
        self.execute(|tx| StoreOp::AddReadReceipt(id, user, tx)).await
    }

    pub async fn record_send_attempt(&self, id: MessageId) -> Result<Option<u32>> {
        self.execute(|tx| StoreOp::RecordSendAttempt(id, tx)).await
    }

    pub async fn mark_message_synced(&self, id: MessageId) -> Result<()> {
        self.execute(|tx| StoreOp::MarkSynced(id, tx)).await
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub async fn upsert_conversation(&self, conv: Conversation) -> Result<()> {
        self.execute(|tx| StoreOp::UpsertConversation(Box::new(conv), tx))
            .await
    }

    pub async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        self.execute(|tx| StoreOp::GetConversation(id, tx)).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.execute(StoreOp::ListConversations).await
    }

    pub async fn set_last_message(
        &self,
        id: ConversationId,
        last: LastMessage,
    ) -> Result<()> {
        self.execute(|tx| StoreOp::SetLastMessage(id, last, tx)).await
    }

    pub async fn increment_unread(&self, id: ConversationId, sender: UserId) -> Result<()> {
        self.execute(|tx| StoreOp::IncrementUnread(id, sender, tx))
            .await
    }

    pub async fn reset_unread(&self, id: ConversationId, user: UserId) -> Result<()> {
        self.execute(|tx| StoreOp::ResetUnread(id, user, tx)).await
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    pub async fn upsert_profile(&self, profile: Profile) -> Result<()> {
        self.execute(|tx| StoreOp::UpsertProfile(Box::new(profile), tx))
            .await
    }

    pub async fn get_profile(&self, id: UserId) -> Result<Option<Profile>> {
        self.execute(|tx| StoreOp::GetProfile(id, tx)).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Ask the worker to drain its queue and exit. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(StoreOp::Shutdown).await;
    }
}

/// Worker loop: strictly one operation at a time, in arrival order.
async fn run_worker(db: Database, mut rx: mpsc::Receiver<StoreOp>) {
    debug!("store worker started");
    while let Some(op) = rx.recv().await {
        match op {
            StoreOp::UpsertMessage(msg, reply) => {
                let _ = reply.send(db.upsert_message(&msg));
            }
            StoreOp::GetMessage(id, reply) => {
                let _ = reply.send(db.get_message(id));
            }
            StoreOp::MessagesForConversation(conv, limit, reply) => {
                let _ = reply.send(db.messages_for_conversation(&conv, limit));
            }
            StoreOp::MessagesWithStatus(status, conv, reply) => {
                let _ = reply.send(db.messages_with_status(status, conv.as_ref()));
            }
            StoreOp::AdvanceStatus(id, observed, reply) => {
                let _ = reply.send(db.advance_message_status(id, observed));
            }
            StoreOp::AddReadReceipt(id, user, reply) => {
                let _ = reply.send(db.add_read_receipt(id, &user));
            }
            StoreOp::RecordSendAttempt(id, reply) => {
                let _ = reply.send(db.record_send_attempt(id));
            }
            StoreOp::MarkSynced(id, reply) => {
                let _ = reply.send(db.mark_message_synced(id));
            }
            StoreOp::UpsertConversation(conv, reply) => {
                let _ = reply.send(db.upsert_conversation(&conv));
            }
            StoreOp::GetConversation(id, reply) => {
                let _ = reply.send(db.get_conversation(&id));
            }
            StoreOp::ListConversations(reply) => {
                let _ = reply.send(db.list_conversations());
            }
            StoreOp::SetLastMessage(id, last, reply) => {
                let _ = reply.send(db.set_last_message(&id, &last));
            }
            StoreOp::IncrementUnread(id, sender, reply) => {
                let _ = reply.send(db.increment_unread(&id, &sender));
            }
            StoreOp::ResetUnread(id, user, reply) => {
                let _ = reply.send(db.reset_unread(&id, &user));
            }
            StoreOp::UpsertProfile(profile, reply) => {
                let _ = reply.send(db.upsert_profile(&profile));
            }
            StoreOp::GetProfile(id, reply) => {
                let _ = reply.send(db.get_profile(&id));
            }
            StoreOp::Shutdown => break,
        }
    }
    debug!("store worker stopped");
}

/// Log and discard a best-effort cache write result.
///
/// Cache population paths have no other source of truth to protect, so a
/// storage failure degrades to a warning instead of propagating.
pub fn log_cache_error<T>(context: &'static str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(context, error = %e, "best-effort cache operation failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pigeon_shared::MessageBody;

    fn open_handle() -> (tempfile::TempDir, StoreHandle) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, StoreHandle::spawn(db))
    }

    #[tokio::test]
    async fn operations_are_processed_in_submission_order() {
        let (_dir, handle) = open_handle();
        let conv = ConversationId::direct(&UserId::new("a"), &UserId::new("b"));
        let msg = Message::outgoing(
            conv.clone(),
            UserId::new("a"),
            MessageBody::Text("hi".into()),
        );

        // Queue a write and immediately a dependent read; FIFO ordering
        // guarantees the read observes the write.
        let write = handle.upsert_message(msg.clone());
        let read = handle.get_message(msg.id);
        let (write_res, read_res) = tokio::join!(write, read);

        write_res.unwrap();
        assert_eq!(read_res.unwrap().unwrap().id, msg.id);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_lose_increments() {
        let (_dir, handle) = open_handle();
        let conv = Conversation::direct(UserId::new("a"), UserId::new("b"));
        handle.upsert_conversation(conv.clone()).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let h = handle.clone();
            let id = conv.id.clone();
            tasks.push(tokio::spawn(async move {
                h.increment_unread(id, UserId::new("a")).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = handle.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(stored.unread_for(&UserId::new("b")), 10);
    }

    #[tokio::test]
    async fn shutdown_rejects_later_operations() {
        let (_dir, handle) = open_handle();
        handle.shutdown().await;
        // Give the worker a beat to drain and exit.
        tokio::task::yield_now().await;

        let result = handle.list_conversations().await;
        assert!(matches!(result, Err(StoreError::WorkerGone)));
    }
}
