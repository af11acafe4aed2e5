use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::error::StoreError;
use crate::ids::{DurableId, DurableThreadId, MessageId};
use crate::schema::Message;

/// Durable, eventually consistent message store.
pub trait MessageStore: Send + Sync + 'static {
    fn create_thread(&self, title: String) -> BoxFuture<'static, Result<DurableThreadId, StoreError>>;

    /// Snapshot of a thread's messages; may lag behind in-flight writes.
    fn get_messages(&self, thread: &DurableThreadId) -> BoxFuture<'static, Result<Vec<Message>, StoreError>>;

    /// Stores a message and returns its durable id.
    fn append_message(
        &self,
        thread: &DurableThreadId,
        message: Message,
    ) -> BoxFuture<'static, Result<DurableId, StoreError>>;

    /// Asks the store to drop `ids` so a regenerated reply can replace them.
    fn mark_for_overwrite(
        &self,
        thread: &DurableThreadId,
        ids: Vec<DurableId>,
    ) -> BoxFuture<'static, Result<(), StoreError>>;
}

#[derive(Debug, Default)]
struct ThreadRecord {
    title: String,
    messages: Vec<Message>,
    overwritten: HashSet<DurableId>,
}

/// In-memory store used for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageStore {
    threads: Arc<Mutex<HashMap<DurableThreadId, ThreadRecord>>>,
    timestamp_offset_ms: i64,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps stored messages `offset_ms` after their client timestamp, the
    /// way a server clock would.
    pub fn with_timestamp_offset(mut self, offset_ms: i64) -> Self {
        self.timestamp_offset_ms = offset_ms;
        self
    }

    pub fn title(&self, thread: &DurableThreadId) -> Option<String> {
        lock_unpoisoned(&self.threads)
            .get(thread)
            .map(|record| record.title.clone())
    }

    /// Replaces the stored copy of a durable message.
    pub fn update_message(&self, thread: &DurableThreadId, message: Message) -> Result<(), StoreError> {
        let mut threads = lock_unpoisoned(&self.threads);
        let record = threads
            .get_mut(thread)
            .ok_or_else(|| StoreError::UnknownThread(thread.to_string()))?;
        let slot = record
            .messages
            .iter_mut()
            .find(|stored| stored.id == message.id)
            .ok_or_else(|| StoreError::UnknownMessage(message.id.to_string()))?;
        *slot = message;
        Ok(())
    }

    pub fn overwritten(&self, thread: &DurableThreadId) -> Vec<DurableId> {
        let threads = lock_unpoisoned(&self.threads);
        let mut ids: Vec<DurableId> = threads
            .get(thread)
            .map(|record| record.overwritten.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

impl MessageStore for InMemoryMessageStore {
    fn create_thread(&self, title: String) -> BoxFuture<'static, Result<DurableThreadId, StoreError>> {
        let threads = self.threads.clone();

        Box::pin(async move {
            let id = DurableThreadId::generate();
            lock_unpoisoned(&threads).insert(
                id.clone(),
                ThreadRecord {
                    title,
                    ..ThreadRecord::default()
                },
            );
            debug!(thread = %id, "thread created");
            Ok(id)
        })
    }

    fn get_messages(&self, thread: &DurableThreadId) -> BoxFuture<'static, Result<Vec<Message>, StoreError>> {
        let threads = self.threads.clone();
        let thread = thread.clone();

        Box::pin(async move {
            let threads = lock_unpoisoned(&threads);
            let record = threads
                .get(&thread)
                .ok_or_else(|| StoreError::UnknownThread(thread.to_string()))?;
            Ok(record
                .messages
                .iter()
                .filter(|message| {
                    message
                        .id
                        .durable()
                        .is_some_and(|id| !record.overwritten.contains(id))
                })
                .cloned()
                .collect())
        })
    }

    fn append_message(
        &self,
        thread: &DurableThreadId,
        message: Message,
    ) -> BoxFuture<'static, Result<DurableId, StoreError>> {
        let threads = self.threads.clone();
        let thread = thread.clone();
        let offset = self.timestamp_offset_ms;

        Box::pin(async move {
            let mut threads = lock_unpoisoned(&threads);
            let record = threads
                .get_mut(&thread)
                .ok_or_else(|| StoreError::UnknownThread(thread.to_string()))?;

            let id = DurableId::generate();
            let mut stored = message;
            stored.id = MessageId::Durable(id.clone());
            stored.created_at = stored.created_at.offset(offset);
            record.messages.push(stored);
            debug!(thread = %thread, message_id = %id.as_str(), "message appended");
            Ok(id)
        })
    }

    fn mark_for_overwrite(
        &self,
        thread: &DurableThreadId,
        ids: Vec<DurableId>,
    ) -> BoxFuture<'static, Result<(), StoreError>> {
        let threads = self.threads.clone();
        let thread = thread.clone();

        Box::pin(async move {
            let mut threads = lock_unpoisoned(&threads);
            let record = threads
                .get_mut(&thread)
                .ok_or_else(|| StoreError::UnknownThread(thread.to_string()))?;
            debug!(thread = %thread, count = ids.len(), "messages marked for overwrite");
            record.overwritten.extend(ids);
            Ok(())
        })
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
