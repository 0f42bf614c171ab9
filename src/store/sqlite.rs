//! SQLite [`Store`] implementation backed by sqlx.
//!
//! Embedding vectors are stored as little-endian f32 BLOBs; chunk metadata
//! and message citations are fixed-schema JSON text columns. Vector search
//! is a brute-force cosine scan over the chunk rows, computed in Rust.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedder::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::EngineError;
use crate::models::{
    Chunk, ChunkMetadata, Citation, Conversation, Document, DocumentStatus, Message, MessageRole,
    NewChunk, NewDocument, NewMessage,
};

use super::{RankedChunk, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document, EngineError> {
        let status: String = row.get("status");
        Ok(Document {
            id: row.get("id"),
            user_id: row.get("user_id"),
            filename: row.get("filename"),
            file_size: row.get("file_size"),
            media_type: row.get("media_type"),
            status: DocumentStatus::parse(&status)?,
            total_chunks: row.get("total_chunks"),
            uploaded_at: row.get("uploaded_at"),
        })
    }

    fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk, EngineError> {
        let metadata_json: String = row.get("metadata_json");
        let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
            .map_err(|e| EngineError::DataIntegrity(format!("bad chunk metadata: {e}")))?;
        let blob: Vec<u8> = row.get("embedding");
        Ok(Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            chunk_index: row.get("chunk_index"),
            content: row.get("content"),
            embedding: blob_to_vec(&blob),
            metadata,
            content_hash: row.get("content_hash"),
            created_at: row.get("created_at"),
        })
    }

    fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Message, EngineError> {
        let role: String = row.get("role");
        let citations_json: String = row.get("citations_json");
        let citations: Vec<Citation> = serde_json::from_str(&citations_json)
            .map_err(|e| EngineError::DataIntegrity(format!("bad citations: {e}")))?;
        Ok(Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            role: MessageRole::parse(&role)?,
            content: row.get("content"),
            citations,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_document(&self, doc: NewDocument) -> Result<Document, EngineError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO documents (user_id, filename, file_size, media_type, status, total_chunks, uploaded_at)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(doc.user_id)
        .bind(&doc.filename)
        .bind(doc.file_size)
        .bind(&doc.media_type)
        .bind(DocumentStatus::Processing.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Document {
            id: result.last_insert_rowid(),
            user_id: doc.user_id,
            filename: doc.filename,
            file_size: doc.file_size,
            media_type: doc.media_type,
            status: DocumentStatus::Processing,
            total_chunks: 0,
            uploaded_at: now,
        })
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>, EngineError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::document_from_row).transpose()
    }

    async fn list_documents(&self, user_id: i64) -> Result<Vec<Document>, EngineError> {
        let rows = sqlx::query("SELECT * FROM documents WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::document_from_row).collect()
    }

    async fn mark_completed(&self, id: i64, total_chunks: i64) -> Result<(), EngineError> {
        let result = sqlx::query("UPDATE documents SET status = ?, total_chunks = ? WHERE id = ?")
            .bind(DocumentStatus::Completed.as_str())
            .bind(total_chunks)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound {
                kind: "document",
                id,
            });
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64) -> Result<(), EngineError> {
        let result = sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(DocumentStatus::Failed.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound {
                kind: "document",
                id,
            });
        }
        Ok(())
    }

    async fn delete_document(&self, id: i64) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_chunks(
        &self,
        document_id: i64,
        chunks: &[NewChunk],
    ) -> Result<Vec<i64>, EngineError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let metadata_json = serde_json::to_string(&chunk.metadata)
                .map_err(|e| EngineError::DataIntegrity(format!("bad chunk metadata: {e}")))?;
            let result = sqlx::query(
                r#"
                INSERT INTO chunks (document_id, chunk_index, content, embedding, metadata_json, content_hash, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(&metadata_json)
            .bind(&chunk.content_hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            ids.push(result.last_insert_rowid());
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn knn_search(
        &self,
        query: &[f32],
        top_k: i64,
    ) -> Result<Vec<RankedChunk>, EngineError> {
        let rows = sqlx::query("SELECT * FROM chunks")
            .fetch_all(&self.pool)
            .await?;

        let mut ranked = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = Self::chunk_from_row(row)?;
            if chunk.embedding.len() != query.len() {
                return Err(EngineError::DimensionMismatch {
                    expected: chunk.embedding.len(),
                    actual: query.len(),
                });
            }
            let distance = 1.0 - cosine_similarity(query, &chunk.embedding) as f64;
            ranked.push(RankedChunk { chunk, distance });
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
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO conversations (user_id, title, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(title)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Conversation {
            id: result.last_insert_rowid(),
            user_id,
            title: title.to_string(),
            created_at: now,
        })
    }

    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, EngineError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Conversation {
            id: row.get("id"),
            user_id: row.get("user_id"),
            title: row.get("title"),
            created_at: row.get("created_at"),
        }))
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, EngineError> {
        let now = chrono::Utc::now().timestamp();
        let citations_json = serde_json::to_string(&message.citations)
            .map_err(|e| EngineError::DataIntegrity(format!("bad citations: {e}")))?;
        let result = sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, role, content, citations_json, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&citations_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id: result.last_insert_rowid(),
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            citations: message.citations,
            created_at: now,
        })
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, EngineError> {
        let rows = sqlx::query("SELECT * FROM messages WHERE conversation_id = ? ORDER BY id")
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::message_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use crate::models::CitationMetadata;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("docqa.sqlite");
        let pool = db::connect(&path).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn new_doc() -> NewDocument {
        NewDocument {
            user_id: 1,
            filename: "guide.md".to_string(),
            file_size: 256,
            media_type: "text/markdown".to_string(),
        }
    }

    fn new_chunk(index: i64, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            chunk_index: index,
            content: format!("chunk {index} content"),
            embedding,
            metadata: ChunkMetadata {
                start_char: index * 100,
                end_char: index * 100 + 80,
                document_type: "MARKDOWN".to_string(),
                ..ChunkMetadata::default()
            },
            content_hash: format!("hash-{index}"),
        }
    }

    #[tokio::test]
    async fn test_document_roundtrip_and_status() {
        let (_tmp, store) = test_store().await;
        let doc = store.create_document(new_doc()).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);

        store.mark_completed(doc.id, 2).await.unwrap();
        let read = store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(read.status, DocumentStatus::Completed);
        assert_eq!(read.total_chunks, 2);

        assert!(store.get_document(doc.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chunk_roundtrip_preserves_vector_and_metadata() {
        let (_tmp, store) = test_store().await;
        let doc = store.create_document(new_doc()).await.unwrap();
        store
            .insert_chunks(doc.id, &[new_chunk(0, vec![0.25, -1.5, 3.0])])
            .await
            .unwrap();

        let ranked = store.knn_search(&[0.25, -1.5, 3.0], 1).await.unwrap();
        assert_eq!(ranked.len(), 1);
        let chunk = &ranked[0].chunk;
        assert_eq!(chunk.embedding, vec![0.25, -1.5, 3.0]);
        assert_eq!(chunk.metadata.document_type, "MARKDOWN");
        assert_eq!(chunk.metadata.end_char, 80);
        assert!(ranked[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (_tmp, store) = test_store().await;
        let doc = store.create_document(new_doc()).await.unwrap();
        store
            .insert_chunks(doc.id, &[new_chunk(0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store.delete_document(doc.id).await.unwrap();

        assert!(store.get_document(doc.id).await.unwrap().is_none());
        assert!(store.knn_search(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_citations_roundtrip() {
        let (_tmp, store) = test_store().await;
        let conv = store.create_conversation(1, "Support").await.unwrap();
        let citation = Citation {
            chunk_id: 9,
            content: "cited excerpt".to_string(),
            similarity_score: 0.83,
            metadata: CitationMetadata {
                document_id: 4,
                document_name: "guide.md".to_string(),
                page: None,
                section: Some("intro".to_string()),
            },
        };
        store
            .append_message(NewMessage {
                conversation_id: conv.id,
                role: MessageRole::Assistant,
                content: "answer".to_string(),
                citations: vec![citation.clone()],
            })
            .await
            .unwrap();

        let messages = store.list_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert_eq!(messages[0].citations, vec![citation]);
    }
}
