//! In-memory [`Store`] implementation.
//!
//! Arena vectors behind `std::sync::RwLock`, integer ids from atomic
//! counters. Vector search is brute-force cosine similarity over all stored
//! chunks. Used by the test suite and by integrators who want the engine
//! without a database file.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedder::cosine_similarity;
use crate::error::EngineError;
use crate::models::{
    Chunk, Conversation, Document, DocumentStatus, Message, NewChunk, NewDocument, NewMessage,
};

use super::{RankedChunk, Store};

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<i64, Document>>,
    chunks: RwLock<Vec<Chunk>>,
    conversations: RwLock<HashMap<i64, Conversation>>,
    messages: RwLock<Vec<Message>>,
    next_document_id: AtomicI64,
    next_chunk_id: AtomicI64,
    next_conversation_id: AtomicI64,
    next_message_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(counter: &AtomicI64) -> i64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_document(&self, doc: NewDocument) -> Result<Document, EngineError> {
        let document = Document {
            id: Self::next_id(&self.next_document_id),
            user_id: doc.user_id,
            filename: doc.filename,
            file_size: doc.file_size,
            media_type: doc.media_type,
            status: DocumentStatus::Processing,
            total_chunks: 0,
            uploaded_at: Self::now(),
        };
        self.documents
            .write()
            .unwrap()
            .insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>, EngineError> {
        Ok(self.documents.read().unwrap().get(&id).cloned())
    }

    async fn list_documents(&self, user_id: i64) -> Result<Vec<Document>, EngineError> {
        let mut docs: Vec<Document> = self
            .documents
            .read()
            .unwrap()
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.id);
        Ok(docs)
    }

    async fn mark_completed(&self, id: i64, total_chunks: i64) -> Result<(), EngineError> {
        let mut docs = self.documents.write().unwrap();
        let doc = docs.get_mut(&id).ok_or(EngineError::NotFound {
            kind: "document",
            id,
        })?;
        doc.status = DocumentStatus::Completed;
        doc.total_chunks = total_chunks;
        Ok(())
    }

    async fn mark_failed(&self, id: i64) -> Result<(), EngineError> {
        let mut docs = self.documents.write().unwrap();
        let doc = docs.get_mut(&id).ok_or(EngineError::NotFound {
            kind: "document",
            id,
        })?;
        doc.status = DocumentStatus::Failed;
        Ok(())
    }

    async fn delete_document(&self, id: i64) -> Result<(), EngineError> {
        self.documents.write().unwrap().remove(&id);
        self.chunks
            .write()
            .unwrap()
            .retain(|c| c.document_id != id);
        Ok(())
    }

    async fn insert_chunks(
        &self,
        document_id: i64,
        chunks: &[NewChunk],
    ) -> Result<Vec<i64>, EngineError> {
        let now = Self::now();
        let mut stored = self.chunks.write().unwrap();
        let mut ids = Vec::with_capacity(chunks.len());
        for c in chunks {
            let id = Self::next_id(&self.next_chunk_id);
            stored.push(Chunk {
                id,
                document_id,
                chunk_index: c.chunk_index,
                content: c.content.clone(),
                embedding: c.embedding.clone(),
                metadata: c.metadata.clone(),
                content_hash: c.content_hash.clone(),
                created_at: now,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn knn_search(
        &self,
        query: &[f32],
        top_k: i64,
    ) -> Result<Vec<RankedChunk>, EngineError> {
        let chunks = self.chunks.read().unwrap();
        let mut ranked = Vec::with_capacity(chunks.len());
        for chunk in chunks.iter() {
            if chunk.embedding.len() != query.len() {
                return Err(EngineError::DimensionMismatch {
                    expected: chunk.embedding.len(),
                    actual: query.len(),
                });
            }
            let distance = 1.0 - cosine_similarity(query, &chunk.embedding) as f64;
            ranked.push(RankedChunk {
                chunk: chunk.clone(),
                distance,
            });
        }
        ranked.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(top_k.max(0) as usize);
        Ok(ranked)
    }

    async fn create_conversation(
        &self,
        user_id: i64,
        title: &str,
    ) -> Result<Conversation, EngineError> {
        let conversation = Conversation {
            id: Self::next_id(&self.next_conversation_id),
            user_id,
            title: title.to_string(),
            created_at: Self::now(),
        };
        self.conversations
            .write()
            .unwrap()
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, EngineError> {
        Ok(self.conversations.read().unwrap().get(&id).cloned())
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, EngineError> {
        let stored = Message {
            id: Self::next_id(&self.next_message_id),
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            citations: message.citations,
            created_at: Self::now(),
        };
        self.messages.write().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, EngineError> {
        Ok(self
            .messages
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}
