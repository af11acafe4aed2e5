//! Transcript data model, two-phase identifiers, the durable message store
//! contract, and file-backed drafts.

mod drafts;
mod error;
mod ids;
mod message_store;
mod paths;
mod schema;

pub use drafts::{Draft, DraftManager, DraftSync, DRAFT_VERSION};
pub use error::{SessionStoreError, StoreError};
pub use ids::{DurableId, DurableThreadId, LocalId, MessageId};
pub use message_store::{InMemoryMessageStore, MessageStore};
pub use paths::{draft_file_name, draft_root};
pub use schema::{
    title_seed, GenerationState, Message, MessagePart, Thread, ThreadKey, Timestamp,
    DEFAULT_THREAD_TITLE, TITLE_SEED_CHARS,
};
