//! Storage abstraction for the question-answering engine.
//!
//! The [`Store`] trait defines every persistence operation the core needs:
//! document lifecycle rows, immutable chunk rows with their vectors,
//! conversations, and messages. Repositories are arena-style and keyed by
//! integer id; relations are explicit foreign-key fields.
//!
//! Implementations: [`sqlite::SqliteStore`] for durable storage and
//! [`memory::MemoryStore`] for tests and embedding-free experimentation.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::models::{
    Chunk, Conversation, Document, Message, NewChunk, NewDocument, NewMessage,
};

/// A chunk row ranked by its cosine distance to a query vector.
///
/// `distance = 1 - cosine_similarity`; smaller means closer. Rows come back
/// ordered by ascending distance.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub distance: f64,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_document`](Store::create_document) | Insert a document in `Processing` state |
/// | [`get_document`](Store::get_document) | Fetch a document by id |
/// | [`list_documents`](Store::list_documents) | All documents owned by a user |
/// | [`mark_completed`](Store::mark_completed) | Terminal success transition |
/// | [`mark_failed`](Store::mark_failed) | Terminal failure transition |
/// | [`delete_document`](Store::delete_document) | Delete a document and cascade its chunks |
/// | [`insert_chunks`](Store::insert_chunks) | Write the chunk rows of one document |
/// | [`knn_search`](Store::knn_search) | Top-K chunks by vector distance |
/// | [`create_conversation`](Store::create_conversation) | Start a conversation |
/// | [`get_conversation`](Store::get_conversation) | Fetch a conversation by id |
/// | [`append_message`](Store::append_message) | Append a message with citations |
/// | [`list_messages`](Store::list_messages) | Ordered messages of a conversation |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_document(&self, doc: NewDocument) -> Result<Document, EngineError>;

    async fn get_document(&self, id: i64) -> Result<Option<Document>, EngineError>;

    async fn list_documents(&self, user_id: i64) -> Result<Vec<Document>, EngineError>;

    /// Transition a document to `Completed` and record its chunk count.
    async fn mark_completed(&self, id: i64, total_chunks: i64) -> Result<(), EngineError>;

    /// Transition a document to `Failed`. The row is retained so the failure
    /// stays inspectable.
    async fn mark_failed(&self, id: i64) -> Result<(), EngineError>;

    /// Delete a document and all of its chunks.
    async fn delete_document(&self, id: i64) -> Result<(), EngineError>;

    /// Insert the chunk rows of one document. Returns the assigned ids in
    /// input order.
    async fn insert_chunks(
        &self,
        document_id: i64,
        chunks: &[NewChunk],
    ) -> Result<Vec<i64>, EngineError>;

    /// Return the `top_k` stored chunks nearest to `query`, ordered by
    /// ascending cosine distance.
    ///
    /// Any stored vector whose length differs from the query's is a fatal
    /// [`EngineError::DimensionMismatch`], never a silently skipped row.
    async fn knn_search(&self, query: &[f32], top_k: i64)
        -> Result<Vec<RankedChunk>, EngineError>;

    async fn create_conversation(
        &self,
        user_id: i64,
        title: &str,
    ) -> Result<Conversation, EngineError>;

    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, EngineError>;

    async fn append_message(&self, message: NewMessage) -> Result<Message, EngineError>;

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, EngineError>;
}
