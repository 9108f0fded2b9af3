//! Generación de respuestas con RAG sobre los documentos de la sesión.
//!
//! Flujo por cada mensaje del usuario:
//!   1. Búsqueda vectorial de fragmentos de documentos de la sesión (top 5).
//!   2. Selección del historial reciente (ventana por emisor).
//!   3. Construcción del prompt con presupuesto de contexto.
//!   4. Llamada al modelo; si falla, respuesta de reserva fija.
//!   5. Persistencia del mensaje de IA e indexación en segundo plano.
//!
//! Los fallos de recuperación, generación e indexación nunca llegan al usuario:
//! se registran y se cuentan en `RagMetrics`.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{GenerationError, ServiceError};
use crate::history::select_history;
use crate::llm::TextGenerator;
use crate::metrics::RagMetrics;
use crate::models::{
    ChunkMetadata, ContextDocument, IndexedText, Message, MessageContext, Provenance,
    RetrievedChunk, Sender,
};
use crate::prompt::{build_prompt, truncate_chars};
use crate::repository::ChatRepository;
use crate::vector_store::{with_timeout, VectorFilter, VectorIndex};

/// Contenido literal de la respuesta cuando la generación falla.
pub const FALLBACK_RESPONSE: &str = "Failed to generate response";
pub const RETRIEVAL_TOP_K: usize = 5;
/// Longitud máxima del extracto guardado en el contexto de la respuesta.
pub const CONTEXT_SNIPPET_MAX_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub history_window: i32,
    pub generation_timeout: Duration,
    pub vector_timeout: Duration,
}

impl From<&AppConfig> for RagSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            history_window: cfg.history_window,
            generation_timeout: cfg.generation_timeout,
            vector_timeout: cfg.vector_timeout,
        }
    }
}

#[derive(Clone)]
pub struct RagEngine {
    repository: Arc<dyn ChatRepository>,
    vector_index: Arc<dyn VectorIndex>,
    generator: Arc<dyn TextGenerator>,
    metrics: Arc<RagMetrics>,
    settings: RagSettings,
}

impl RagEngine {
    pub fn new(
        repository: Arc<dyn ChatRepository>,
        vector_index: Arc<dyn VectorIndex>,
        generator: Arc<dyn TextGenerator>,
        metrics: Arc<RagMetrics>,
        settings: RagSettings,
    ) -> Self {
        Self {
            repository,
            vector_index,
            generator,
            metrics,
            settings,
        }
    }

    /// Fragmentos de documentos de la sesión relevantes para `query`.
    ///
    /// Cualquier error o timeout equivale a "sin contexto".
    pub async fn retrieve_context(&self, session_id: Uuid, query: &str) -> Vec<RetrievedChunk> {
        let filter = VectorFilter {
            session_id,
            provenance: Provenance::SessionDocuments,
        };
        let search = self.vector_index.search(query, RETRIEVAL_TOP_K, &filter);

        match with_timeout(self.settings.vector_timeout, search).await {
            Ok(chunks) => {
                debug!(%session_id, found = chunks.len(), "Contexto recuperado");
                chunks
            }
            Err(e) => {
                self.metrics.retrieval_failed();
                warn!(%session_id, error = %e, "Búsqueda vectorial fallida; se continúa sin contexto");
                Vec::new()
            }
        }
    }

    async fn recent_history(&self, message: &Message) -> Vec<Message> {
        match self.repository.find_messages(message.session_id).await {
            Ok(all) => select_history(&all, message.sequence, self.settings.history_window),
            Err(e) => {
                warn!(session_id = %message.session_id, error = %e, "No se pudo cargar el historial; se continúa sin él");
                Vec::new()
            }
        }
    }

    async fn call_model(&self, prompt: &str) -> Result<String, GenerationError> {
        let timeout = self.settings.generation_timeout;
        match tokio::time::timeout(timeout, self.generator.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(timeout)),
        }
    }

    /// Genera y persiste la respuesta de IA a `user_message`.
    ///
    /// Siempre persiste exactamente un mensaje de IA con secuencia
    /// `user_message.sequence + 1`. Sólo un fallo de esa escritura se propaga.
    pub async fn generate_response(&self, user_message: &Message) -> Result<Message, ServiceError> {
        let session_id = user_message.session_id;

        let (chunks, history) = tokio::join!(
            self.retrieve_context(session_id, &user_message.content),
            self.recent_history(user_message),
        );

        let prompt = build_prompt(&user_message.content, &chunks, &history);

        let response = match self.call_model(&prompt).await {
            Ok(answer) => {
                info!(%session_id, context_chunks = chunks.len(), "Respuesta generada");
                Message::new(
                    session_id,
                    Sender::Ai,
                    answer,
                    context_payload(&chunks),
                    user_message.sequence + 1,
                )
            }
            Err(e) => {
                self.metrics.generation_failed();
                error!(%session_id, message_id = %user_message.id, error = %e, "Fallo al generar la respuesta");
                Message::new(
                    session_id,
                    Sender::Ai,
                    FALLBACK_RESPONSE,
                    MessageContext::None,
                    user_message.sequence + 1,
                )
            }
        };

        self.repository.insert_message(&response).await?;
        self.index_message(&response);

        Ok(response)
    }

    /// Indexa un mensaje con procedencia "chat-message" en segundo plano.
    ///
    /// Los fallos se registran y se cuentan; nunca afectan al llamante.
    pub fn index_message(&self, message: &Message) -> Option<JoinHandle<()>> {
        if message.content.trim().is_empty() {
            return None;
        }

        let item = IndexedText {
            text: message.content.clone(),
            metadata: ChunkMetadata::chat_message(message),
        };
        let message_id = message.id;
        let index = Arc::clone(&self.vector_index);
        let metrics = Arc::clone(&self.metrics);
        let timeout = self.settings.vector_timeout;

        Some(tokio::spawn(async move {
            match with_timeout(timeout, index.add(vec![item])).await {
                Ok(()) => debug!(%message_id, "Mensaje indexado en el índice vectorial"),
                Err(e) => {
                    metrics.message_indexing_failed();
                    warn!(%message_id, error = %e, "No se pudo indexar el mensaje");
                }
            }
        }))
    }
}

/// Referencias a los fragmentos usados; `None` si no hubo ninguno.
pub fn context_payload(chunks: &[RetrievedChunk]) -> MessageContext {
    if chunks.is_empty() {
        return MessageContext::None;
    }

    let documents = chunks
        .iter()
        .map(|chunk| ContextDocument {
            session_id: chunk.metadata.session_id,
            document_id: chunk.metadata.document_id,
            filename: chunk.metadata.filename.clone(),
            chunk_index: chunk.metadata.chunk_index,
            snippet: truncate_chars(&chunk.text, CONTEXT_SNIPPET_MAX_CHARS),
            score: chunk.score,
        })
        .collect();

    MessageContext::RetrievalContext { documents }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_truncates_snippets_and_keeps_references() {
        let session_id = Uuid::new_v4();
        let document_id = Uuid::new_v4();
        let chunk = RetrievedChunk {
            text: "a".repeat(1200),
            score: 0.42,
            metadata: ChunkMetadata {
                session_id,
                provenance: Provenance::SessionDocuments,
                document_id: Some(document_id),
                message_id: None,
                filename: Some("informe.pdf".into()),
                chunk_index: Some(3),
                sender: None,
                sequence: None,
            },
        };

        match context_payload(&[chunk]) {
            MessageContext::RetrievalContext { documents } => {
                assert_eq!(documents.len(), 1);
                let doc = &documents[0];
                assert_eq!(doc.snippet.len(), CONTEXT_SNIPPET_MAX_CHARS);
                assert_eq!(doc.document_id, Some(document_id));
                assert_eq!(doc.filename.as_deref(), Some("informe.pdf"));
                assert_eq!(doc.chunk_index, Some(3));
                assert_eq!(doc.score, 0.42);
            }
            other => panic!("contexto inesperado: {other:?}"),
        }
    }

    #[test]
    fn payload_is_none_without_chunks() {
        assert_eq!(context_payload(&[]), MessageContext::None);
    }
}
