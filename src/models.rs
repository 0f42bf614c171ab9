//! Core data records used throughout the engine.
//!
//! These are plain structs with explicit foreign-key fields; ownership checks
//! are equality comparisons on the stored owner id. Chunk metadata and
//! citations carry a fixed serialization schema (camelCase JSON) so the
//! persisted layout is stable across backends.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Lifecycle of an uploaded document.
///
/// `Processing` is the initial state set at upload time; `Completed` and
/// `Failed` are terminal. Only the single ingestion run owning the document
/// id ever changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(EngineError::DataIntegrity(format!(
                "unknown document status: {other}"
            ))),
        }
    }
}

/// An uploaded document. `total_chunks` stays 0 until ingestion completes.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: i64,
    pub user_id: i64,
    pub filename: String,
    pub file_size: i64,
    pub media_type: String,
    pub status: DocumentStatus,
    pub total_chunks: i64,
    pub uploaded_at: i64,
}

/// Fields needed to create a document row; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub user_id: i64,
    pub filename: String,
    pub file_size: i64,
    pub media_type: String,
}

/// Structured metadata attached to every persisted chunk.
///
/// Serializes as a flat record: `{page, section, startChar, endChar,
/// documentType, language, hasCodeBlock}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub section: Option<String>,
    pub start_char: i64,
    pub end_char: i64,
    pub document_type: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub has_code_block: Option<bool>,
}

/// A stored slice of a document's text, paired with its embedding vector.
/// Immutable once written.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub content_hash: String,
    pub created_at: i64,
}

/// Chunk fields produced by ingestion; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub content_hash: String,
}

/// Transient chunker output: a chunk-to-be without an embedding.
///
/// `start_char`/`end_char` are character offsets into the trimmed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub content: String,
    pub chunk_index: i64,
    pub start_char: usize,
    pub end_char: usize,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "USER" => Ok(Self::User),
            "ASSISTANT" => Ok(Self::Assistant),
            other => Err(EngineError::DataIntegrity(format!(
                "unknown message role: {other}"
            ))),
        }
    }
}

/// One turn in a conversation. Assistant messages own their citations.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub citations: Vec<Citation>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub citations: Vec<Citation>,
}

/// A denormalized, point-in-time snapshot of a chunk used to justify part of
/// an answer. Must survive chunk/document deletion without dangling, so it
/// copies everything it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub chunk_id: i64,
    pub content: String,
    pub similarity_score: f64,
    pub metadata: CitationMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationMetadata {
    pub document_id: i64,
    pub document_name: String,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub section: Option<String>,
}
