//! Retrieval-augmented answer orchestration.
//!
//! Per-query flow: resolve the conversation, persist the user turn, embed
//! the question, retrieve grounding chunks, build the grounded prompt, call
//! the generator, assemble citations, persist the assistant turn. Any
//! failure in any step surfaces as a single [`EngineError::Chat`] carrying
//! the original cause.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedder::EmbeddingGateway;
use crate::error::EngineError;
use crate::generate::Generator;
use crate::models::{
    Citation, CitationMetadata, Conversation, Message, MessageRole, NewMessage,
};
use crate::retrieval::{RetrievalEngine, RetrievedChunk};
use crate::store::Store;

/// Fixed reply used when retrieval finds no grounding. The generator is
/// never invoked on this path.
pub const NO_CONTEXT_REPLY: &str =
    "I could not find relevant information in the available documents to answer your question.";

const SYSTEM_PROMPT: &str = "\
You are a helpful, knowledgeable assistant. Answer questions using only the \
documents provided as context.

RULES:
- Base every answer on the provided documents.
- If the documents do not contain the information, say so plainly.
- Cite your sources where possible (e.g. \"According to source 1...\").
- Be clear, concise, and direct.";

const CITATION_EXCERPT_CHARS: usize = 200;
const NEW_CONVERSATION_TITLE: &str = "New conversation";

/// The assistant's reply for one question.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub conversation_id: i64,
    pub message: String,
    pub citations: Vec<Citation>,
    pub created_at: i64,
}

pub struct RagOrchestrator {
    store: Arc<dyn Store>,
    gateway: Arc<EmbeddingGateway>,
    retrieval: RetrievalEngine,
    generator: Arc<dyn Generator>,
    config: RetrievalConfig,
}

impl RagOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<EmbeddingGateway>,
        generator: Arc<dyn Generator>,
        config: RetrievalConfig,
    ) -> Self {
        let retrieval = RetrievalEngine::new(store.clone(), gateway.dims());
        Self {
            store,
            gateway,
            retrieval,
            generator,
            config,
        }
    }

    /// Answer a question, grounded in the caller's documents.
    ///
    /// With a `conversation_id` the conversation must exist and belong to
    /// the caller; without one a new conversation is created. Callers see
    /// exactly one error kind regardless of which internal step failed.
    pub async fn answer(
        &self,
        user_id: i64,
        text: &str,
        conversation_id: Option<i64>,
    ) -> Result<ChatReply, EngineError> {
        self.answer_inner(user_id, text, conversation_id)
            .await
            .map_err(EngineError::chat)
    }

    async fn answer_inner(
        &self,
        user_id: i64,
        text: &str,
        conversation_id: Option<i64>,
    ) -> Result<ChatReply, EngineError> {
        let conversation = self.resolve_conversation(user_id, conversation_id).await?;

        self.store
            .append_message(NewMessage {
                conversation_id: conversation.id,
                role: MessageRole::User,
                content: text.to_string(),
                citations: Vec::new(),
            })
            .await?;

        let query = self.gateway.embed_one(text).await?;
        let retrieved = self
            .retrieval
            .retrieve(&query, self.config.top_k, self.config.similarity_threshold)
            .await?;

        if retrieved.is_empty() {
            tracing::info!(
                conversation_id = conversation.id,
                "no chunks cleared the similarity floor, answering without generation"
            );
            let message = self
                .store
                .append_message(NewMessage {
                    conversation_id: conversation.id,
                    role: MessageRole::Assistant,
                    content: NO_CONTEXT_REPLY.to_string(),
                    citations: Vec::new(),
                })
                .await?;
            return Ok(reply_from(conversation.id, message));
        }

        tracing::info!(
            conversation_id = conversation.id,
            chunks = retrieved.len(),
            "grounding retrieved"
        );

        let context = build_context_prompt(&retrieved, text);
        let answer = self.generator.complete(SYSTEM_PROMPT, &context).await?;
        if answer.trim().is_empty() {
            return Err(EngineError::Generation(
                "generator returned an empty response".to_string(),
            ));
        }

        let citations = self.build_citations(&retrieved).await?;
        let message = self
            .store
            .append_message(NewMessage {
                conversation_id: conversation.id,
                role: MessageRole::Assistant,
                content: answer,
                citations,
            })
            .await?;

        Ok(reply_from(conversation.id, message))
    }

    /// Ordered messages of one of the caller's conversations.
    pub async fn history(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<Vec<Message>, EngineError> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(EngineError::NotFound {
                kind: "conversation",
                id: conversation_id,
            })?;
        if conversation.user_id != user_id {
            return Err(EngineError::Ownership {
                kind: "conversation",
                id: conversation_id,
            });
        }
        self.store.list_messages(conversation_id).await
    }

    async fn resolve_conversation(
        &self,
        user_id: i64,
        conversation_id: Option<i64>,
    ) -> Result<Conversation, EngineError> {
        match conversation_id {
            Some(id) => {
                let conversation =
                    self.store
                        .get_conversation(id)
                        .await?
                        .ok_or(EngineError::NotFound {
                            kind: "conversation",
                            id,
                        })?;
                if conversation.user_id != user_id {
                    return Err(EngineError::Ownership {
                        kind: "conversation",
                        id,
                    });
                }
                Ok(conversation)
            }
            None => {
                self.store
                    .create_conversation(user_id, NEW_CONVERSATION_TITLE)
                    .await
            }
        }
    }

    /// One citation per retrieved chunk, in retrieval order: a snapshot of
    /// the excerpt plus denormalized document metadata.
    async fn build_citations(
        &self,
        retrieved: &[RetrievedChunk],
    ) -> Result<Vec<Citation>, EngineError> {
        let mut names: HashMap<i64, String> = HashMap::new();
        let mut citations = Vec::with_capacity(retrieved.len());

        for r in retrieved {
            let document_id = r.chunk.document_id;
            let name = match names.get(&document_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .store
                        .get_document(document_id)
                        .await?
                        .map(|d| d.filename)
                        .unwrap_or_default();
                    names.insert(document_id, name.clone());
                    name
                }
            };

            citations.push(Citation {
                chunk_id: r.chunk.id,
                content: truncate_content(&r.chunk.content, CITATION_EXCERPT_CHARS),
                similarity_score: r.similarity,
                metadata: CitationMetadata {
                    document_id,
                    document_name: name,
                    page: r.chunk.metadata.page,
                    section: r.chunk.metadata.section.clone(),
                },
            });
        }

        Ok(citations)
    }
}

fn reply_from(conversation_id: i64, message: Message) -> ChatReply {
    ChatReply {
        conversation_id,
        message: message.content,
        citations: message.citations,
        created_at: message.created_at,
    }
}

/// Context block: each retrieved chunk tagged with its rank and similarity,
/// followed by the user's question verbatim.
fn build_context_prompt(retrieved: &[RetrievedChunk], question: &str) -> String {
    let mut context = String::from("RELEVANT DOCUMENTS:\n\n");
    for (i, r) in retrieved.iter().enumerate() {
        context.push_str(&format!(
            "[SOURCE {}] (similarity: {:.2})\n",
            i + 1,
            r.similarity
        ));
        context.push_str(&r.chunk.content);
        context.push_str("\n\n");
    }
    context.push_str("USER QUESTION:\n");
    context.push_str(question);
    context
}

/// Truncate to `max` characters, appending an ellipsis when shortened.
fn truncate_content(content: &str, max: usize) -> String {
    if content.chars().count() <= max {
        return content.to_string();
    }
    let mut truncated: String = content.chars().take(max).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedder::EmbeddingProvider;
    use crate::models::{ChunkMetadata, NewChunk, NewDocument};
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIMS: usize = 4;

    struct StubProvider;

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
        }
    }

    struct StubGenerator {
        reply: String,
        calls: AtomicUsize,
    }

    impl StubGenerator {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Generator for StubGenerator {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn orchestrator(
        store: Arc<MemoryStore>,
        generator: Arc<StubGenerator>,
    ) -> RagOrchestrator {
        let gateway = Arc::new(EmbeddingGateway::new(
            Arc::new(StubProvider),
            EmbeddingConfig {
                dims: DIMS,
                max_attempts: 1,
                ..EmbeddingConfig::default()
            },
        ));
        RagOrchestrator::new(store, gateway, generator, RetrievalConfig::default())
    }

    async fn seed_document(store: &MemoryStore, embedding: Vec<f32>, content: &str) -> (i64, i64) {
        let doc = store
            .create_document(NewDocument {
                user_id: 1,
                filename: "manual.pdf".to_string(),
                file_size: 100,
                media_type: "application/pdf".to_string(),
            })
            .await
            .unwrap();
        let ids = store
            .insert_chunks(
                doc.id,
                &[NewChunk {
                    chunk_index: 0,
                    content: content.to_string(),
                    embedding,
                    metadata: ChunkMetadata {
                        document_type: "PDF".to_string(),
                        ..ChunkMetadata::default()
                    },
                    content_hash: "h0".to_string(),
                }],
            )
            .await
            .unwrap();
        (doc.id, ids[0])
    }

    #[tokio::test]
    async fn test_empty_retrieval_answers_fallback_without_generator() {
        let store = Arc::new(MemoryStore::new());
        let generator = StubGenerator::new("should never be used");
        let rag = orchestrator(store.clone(), generator.clone());

        let reply = rag.answer(1, "hello", None).await.unwrap();
        assert_eq!(reply.message, NO_CONTEXT_REPLY);
        assert!(reply.citations.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

        // Both turns persisted.
        let messages = store.list_messages(reply.conversation_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_grounded_answer_with_citation() {
        let store = Arc::new(MemoryStore::new());
        let long_content = "x".repeat(400);
        let (doc_id, chunk_id) =
            seed_document(&store, vec![1.0, 0.0, 0.0, 0.0], &long_content).await;

        let generator = StubGenerator::new("Grounded answer.");
        let rag = orchestrator(store.clone(), generator.clone());

        let reply = rag.answer(1, "what does the manual say?", None).await.unwrap();
        assert_eq!(reply.message, "Grounded answer.");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(reply.citations.len(), 1);

        let citation = &reply.citations[0];
        assert_eq!(citation.chunk_id, chunk_id);
        assert_eq!(citation.metadata.document_id, doc_id);
        assert_eq!(citation.metadata.document_name, "manual.pdf");
        assert!((citation.similarity_score - 1.0).abs() < 1e-6);
        // 200 chars + ellipsis
        assert_eq!(citation.content.chars().count(), 203);
        assert!(citation.content.ends_with("..."));
    }

    #[tokio::test]
    async fn test_citation_survives_document_deletion() {
        let store = Arc::new(MemoryStore::new());
        let (doc_id, _) = seed_document(&store, vec![1.0, 0.0, 0.0, 0.0], "short excerpt").await;

        let generator = StubGenerator::new("Answer.");
        let rag = orchestrator(store.clone(), generator);
        let reply = rag.answer(1, "question", None).await.unwrap();

        store.delete_document(doc_id).await.unwrap();
        let messages = store.list_messages(reply.conversation_id).await.unwrap();
        let assistant = messages.last().unwrap();
        assert_eq!(assistant.citations.len(), 1);
        assert_eq!(assistant.citations[0].metadata.document_name, "manual.pdf");
        assert_eq!(assistant.citations[0].content, "short excerpt");
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_chat_wrapped_not_found() {
        let store = Arc::new(MemoryStore::new());
        let rag = orchestrator(store, StubGenerator::new("unused"));

        let err = rag.answer(1, "hello", Some(99)).await.unwrap_err();
        match err {
            EngineError::Chat(cause) => {
                assert!(matches!(*cause, EngineError::NotFound { id: 99, .. }))
            }
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_foreign_conversation_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let conversation = store.create_conversation(2, "theirs").await.unwrap();
        let rag = orchestrator(store, StubGenerator::new("unused"));

        let err = rag.answer(1, "hello", Some(conversation.id)).await.unwrap_err();
        match err {
            EngineError::Chat(cause) => {
                assert!(matches!(*cause, EngineError::Ownership { .. }))
            }
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blank_generation_is_chat_wrapped_generation_failure() {
        let store = Arc::new(MemoryStore::new());
        seed_document(&store, vec![1.0, 0.0, 0.0, 0.0], "content").await;
        let rag = orchestrator(store, StubGenerator::new("   "));

        let err = rag.answer(1, "question", None).await.unwrap_err();
        match err {
            EngineError::Chat(cause) => {
                assert!(matches!(*cause, EngineError::Generation(_)))
            }
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_follow_up_reuses_conversation() {
        let store = Arc::new(MemoryStore::new());
        let rag = orchestrator(store.clone(), StubGenerator::new("unused"));

        let first = rag.answer(1, "first question", None).await.unwrap();
        let second = rag
            .answer(1, "second question", Some(first.conversation_id))
            .await
            .unwrap();
        assert_eq!(first.conversation_id, second.conversation_id);

        let history = rag.history(first.conversation_id, 1).await.unwrap();
        assert_eq!(history.len(), 4);

        let err = rag.history(first.conversation_id, 2).await.unwrap_err();
        assert!(matches!(err, EngineError::Ownership { .. }));
    }

    #[test]
    fn test_truncate_content() {
        assert_eq!(truncate_content("short", 200), "short");
        let exact = "y".repeat(200);
        assert_eq!(truncate_content(&exact, 200), exact);
        let long = "z".repeat(201);
        let truncated = truncate_content(&long, 200);
        assert_eq!(truncated.chars().count(), 203);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_context_prompt_shape() {
        let retrieved = vec![RetrievedChunk {
            chunk: crate::models::Chunk {
                id: 1,
                document_id: 1,
                chunk_index: 0,
                content: "The API rate limit is 100 requests per minute.".to_string(),
                embedding: vec![1.0, 0.0, 0.0, 0.0],
                metadata: ChunkMetadata::default(),
                content_hash: "h".to_string(),
                created_at: 0,
            },
            similarity: 0.92,
        }];
        let prompt = build_context_prompt(&retrieved, "what is the rate limit?");
        assert!(prompt.starts_with("RELEVANT DOCUMENTS:"));
        assert!(prompt.contains("[SOURCE 1] (similarity: 0.92)"));
        assert!(prompt.contains("rate limit is 100"));
        assert!(prompt.ends_with("USER QUESTION:\nwhat is the rate limit?"));
    }
}
