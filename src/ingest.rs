//! Ingestion pipeline orchestration.
//!
//! Coordinates the full upload flow: validation → text extraction →
//! chunking → batch embedding → chunk persistence, driving the per-document
//! status state machine (`Processing` → `Completed` | `Failed`).
//!
//! The heavy work runs off the request path on the shared [`WorkerPool`]; no
//! error escapes the async boundary. Every failure path ends with the
//! document marked `Failed` — a document is never left in `Processing`.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::chunker::chunk_text;
use crate::config::{ChunkingConfig, UploadConfig};
use crate::embedder::EmbeddingGateway;
use crate::error::EngineError;
use crate::extract::{TextExtractor, MEDIA_MARKDOWN, MEDIA_PDF, MEDIA_PLAIN};
use crate::models::{ChunkMetadata, Document, NewChunk, NewDocument};
use crate::store::Store;
use crate::workers::WorkerPool;

#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn Store>,
    gateway: Arc<EmbeddingGateway>,
    extractor: Arc<dyn TextExtractor>,
    pool: Arc<WorkerPool>,
    chunking: ChunkingConfig,
    upload: UploadConfig,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<EmbeddingGateway>,
        extractor: Arc<dyn TextExtractor>,
        pool: Arc<WorkerPool>,
        chunking: ChunkingConfig,
        upload: UploadConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            extractor,
            pool,
            chunking,
            upload,
        }
    }

    /// Accept an upload: validate, extract text, persist the document in
    /// `Processing`, dispatch the heavy work, and return immediately.
    ///
    /// Ingestion is fire-and-forget from the caller's perspective: the
    /// returned document is still `Processing`, and each upload owns a fresh
    /// document id, so no two runs ever touch the same row.
    pub async fn upload(
        &self,
        user_id: i64,
        filename: &str,
        media_type: &str,
        bytes: &[u8],
    ) -> Result<Document, EngineError> {
        self.validate_upload(media_type, bytes.len() as u64)?;

        let text = self.extractor.extract(bytes, media_type)?;
        if text.trim().is_empty() {
            return Err(EngineError::Extraction(
                "no text could be extracted from the upload".to_string(),
            ));
        }

        let document = self
            .store
            .create_document(NewDocument {
                user_id,
                filename: filename.to_string(),
                file_size: bytes.len() as i64,
                media_type: media_type.to_string(),
            })
            .await?;

        tracing::info!(
            document_id = document.id,
            filename,
            "document accepted, processing dispatched"
        );

        let pipeline = self.clone();
        let document_id = document.id;
        let media_type = media_type.to_string();
        self.pool
            .submit(async move {
                pipeline.process(document_id, &media_type, text).await;
            })
            .await;

        Ok(document)
    }

    /// The asynchronous half of ingestion. Never returns an error: any
    /// failure is absorbed here and recorded as a `Failed` document.
    pub async fn process(&self, document_id: i64, media_type: &str, text: String) {
        if let Err(e) = self.run(document_id, media_type, &text).await {
            tracing::error!(document_id, "ingestion failed: {e}");
            if let Err(mark) = self.store.mark_failed(document_id).await {
                tracing::error!(document_id, "could not mark document as failed: {mark}");
            }
        }
    }

    async fn run(
        &self,
        document_id: i64,
        media_type: &str,
        text: &str,
    ) -> Result<(), EngineError> {
        let drafts = chunk_text(text, &self.chunking);
        if drafts.is_empty() {
            return Err(EngineError::invalid_input("chunking produced no chunks"));
        }
        tracing::info!(document_id, chunks = drafts.len(), "text chunked");

        let texts: Vec<String> = drafts.iter().map(|d| d.content.clone()).collect();
        let vectors = self.gateway.embed_batch(&texts).await?;

        // The gateway already retried; a count mismatch here is a
        // data-integrity fault, not something to retry again.
        if vectors.len() != drafts.len() {
            return Err(EngineError::DataIntegrity(format!(
                "embedding count {} does not match chunk count {}",
                vectors.len(),
                drafts.len()
            )));
        }

        let document_type = document_type_label(media_type);
        let rows: Vec<NewChunk> = drafts
            .iter()
            .zip(vectors)
            .map(|(draft, embedding)| NewChunk {
                chunk_index: draft.chunk_index,
                content: draft.content.clone(),
                embedding,
                metadata: ChunkMetadata {
                    page: None,
                    section: None,
                    start_char: draft.start_char as i64,
                    end_char: draft.end_char as i64,
                    document_type: document_type.to_string(),
                    language: None,
                    has_code_block: Some(draft.content.contains("```")),
                },
                content_hash: hash_text(&draft.content),
            })
            .collect();

        self.store.insert_chunks(document_id, &rows).await?;
        self.store
            .mark_completed(document_id, rows.len() as i64)
            .await?;

        tracing::info!(
            document_id,
            total_chunks = rows.len(),
            "ingestion completed"
        );
        Ok(())
    }

    /// All documents owned by a user.
    pub async fn list_documents(&self, user_id: i64) -> Result<Vec<Document>, EngineError> {
        self.store.list_documents(user_id).await
    }

    /// Delete a document and its chunks after an explicit ownership check.
    /// Citations referencing the chunks are snapshots and keep working.
    pub async fn delete_document(&self, document_id: i64, user_id: i64) -> Result<(), EngineError> {
        let document =
            self.store
                .get_document(document_id)
                .await?
                .ok_or(EngineError::NotFound {
                    kind: "document",
                    id: document_id,
                })?;
        if document.user_id != user_id {
            return Err(EngineError::Ownership {
                kind: "document",
                id: document_id,
            });
        }

        self.store.delete_document(document_id).await?;
        tracing::info!(document_id, "document deleted");
        Ok(())
    }

    fn validate_upload(&self, media_type: &str, size: u64) -> Result<(), EngineError> {
        if size == 0 {
            return Err(EngineError::invalid_input("uploaded file is empty"));
        }
        if size > self.upload.max_file_size_bytes() {
            return Err(EngineError::InvalidInput(format!(
                "file exceeds the maximum size of {} MB",
                self.upload.max_file_size_mb
            )));
        }
        if !self.upload.is_allowed(media_type) {
            return Err(EngineError::InvalidInput(format!(
                "media type {media_type} is not allowed"
            )));
        }
        Ok(())
    }
}

fn document_type_label(media_type: &str) -> &'static str {
    match media_type {
        MEDIA_PDF => "PDF",
        MEDIA_MARKDOWN => "MARKDOWN",
        MEDIA_PLAIN => "TEXT",
        _ => "OTHER",
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
