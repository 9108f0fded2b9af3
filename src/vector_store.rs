//! Índice vectorial: contrato del colaborador e integración con Neo4j.
//!
//! API pública:
//!   - `VectorIndex` (`search`, `add`), seguro para llamantes concurrentes.
//!   - `Neo4jVectorIndex`: nodos `:Chunk` con embedding calculado vía Rig.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use neo4rs::{query, Graph};
use tracing::debug;
use uuid::Uuid;

use crate::error::VectorIndexError;
use crate::llm::LlmManager;
use crate::models::{ChunkMetadata, IndexedText, Provenance, RetrievedChunk, Sender};

/// Búsqueda exacta sobre los fragmentos de una sesión y procedencia; el filtro
/// se aplica antes de puntuar.
const SEARCH_CHUNKS_CYPHER: &str = "\
MATCH (c:Chunk {session_id: $session_id, source: $source})
WITH c, vector.similarity.cosine(c.embedding, $embedding) AS score
RETURN c.text AS text, score,
       c.document_id AS document_id, c.message_id AS message_id,
       c.filename AS filename, c.chunk_index AS chunk_index,
       c.sender AS sender, c.sequence AS sequence
ORDER BY score DESC
LIMIT $k";

/// Filtro obligatorio de toda búsqueda.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorFilter {
    pub session_id: Uuid,
    pub provenance: Provenance,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Hasta `top_k` textos más parecidos a `query`, de mayor a menor score.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<RetrievedChunk>, VectorIndexError>;

    async fn add(&self, items: Vec<IndexedText>) -> Result<(), VectorIndexError>;
}

/// Acota una llamada al índice vectorial con `timeout`.
pub async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, VectorIndexError>>,
) -> Result<T, VectorIndexError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(VectorIndexError::Timeout(timeout)),
    }
}

/// Índice vectorial respaldado por Neo4j. Neo4j se encarga de la
/// sincronización entre escrituras y búsquedas concurrentes.
#[derive(Clone)]
pub struct Neo4jVectorIndex {
    graph: Arc<Graph>,
    llm: LlmManager,
}

impl Neo4jVectorIndex {
    pub fn new(graph: Arc<Graph>, llm: LlmManager) -> Self {
        Self { graph, llm }
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>, VectorIndexError> {
        self.llm
            .embed_texts(texts)
            .await
            .map_err(|e| VectorIndexError::Backend(format!("embedding: {e}")))
    }
}

#[async_trait]
impl VectorIndex for Neo4jVectorIndex {
    async fn search(
        &self,
        query_text: &str,
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<RetrievedChunk>, VectorIndexError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // 1) Embedding de la query
        let query_vec = self
            .embed(vec![query_text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                VectorIndexError::Malformed("no se pudo generar embedding de la query".into())
            })?;

        // 2) Similitud coseno sólo sobre los fragmentos de la sesión y procedencia
        let mut cursor = self
            .graph
            .execute(
                query(SEARCH_CHUNKS_CYPHER)
                    .param("embedding", query_vec)
                    .param("session_id", filter.session_id.to_string())
                    .param("source", filter.provenance.as_str())
                    .param("k", top_k as i64),
            )
            .await
            .map_err(backend)?;

        // 3) Convertir filas a RetrievedChunk
        let mut output = Vec::new();
        while let Some(row) = cursor.next().await.map_err(backend)? {
            let text: String = row
                .get("text")
                .ok_or_else(|| VectorIndexError::Malformed("falta campo 'text'".into()))?;
            let score: f64 = row
                .get("score")
                .ok_or_else(|| VectorIndexError::Malformed("falta campo 'score'".into()))?;

            let metadata = ChunkMetadata {
                session_id: filter.session_id,
                provenance: filter.provenance,
                document_id: non_empty(row.get("document_id")).and_then(|s| s.parse().ok()),
                message_id: non_empty(row.get("message_id")).and_then(|s| s.parse().ok()),
                filename: non_empty(row.get("filename")),
                chunk_index: row.get::<i64>("chunk_index").filter(|v| *v >= 0),
                sender: non_empty(row.get("sender")).and_then(|s| Sender::parse(&s)),
                sequence: row.get::<i64>("sequence").filter(|v| *v >= 0),
            };
            output.push(RetrievedChunk {
                text,
                score,
                metadata,
            });
        }

        Ok(output)
    }

    async fn add(&self, items: Vec<IndexedText>) -> Result<(), VectorIndexError> {
        if items.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = items.iter().map(|item| item.text.clone()).collect();
        let vectors = self.embed(texts).await?;

        let tx = self.graph.start_txn().await.map_err(backend)?;
        for (item, embedding) in items.iter().zip(vectors) {
            let meta = &item.metadata;
            // Neo4j no guarda nulos en propiedades: "" y -1 significan ausencia.
            tx.run(
                query(
                    "CREATE (c:Chunk {id: $id})
                     SET c.text = $text, c.embedding = $embedding,
                         c.session_id = $session_id, c.source = $source,
                         c.document_id = $document_id, c.message_id = $message_id,
                         c.filename = $filename, c.chunk_index = $chunk_index,
                         c.sender = $sender, c.sequence = $sequence",
                )
                .param("id", Uuid::new_v4().to_string())
                .param("text", item.text.clone())
                .param("embedding", embedding)
                .param("session_id", meta.session_id.to_string())
                .param("source", meta.provenance.as_str())
                .param(
                    "document_id",
                    meta.document_id.map(|id| id.to_string()).unwrap_or_default(),
                )
                .param(
                    "message_id",
                    meta.message_id.map(|id| id.to_string()).unwrap_or_default(),
                )
                .param("filename", meta.filename.clone().unwrap_or_default())
                .param("chunk_index", meta.chunk_index.unwrap_or(-1))
                .param(
                    "sender",
                    meta.sender.map(|s| s.as_str().to_string()).unwrap_or_default(),
                )
                .param("sequence", meta.sequence.unwrap_or(-1)),
            )
            .await
            .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;

        debug!("Añadidos {} textos al índice vectorial.", items.len());
        Ok(())
    }
}

fn backend(err: neo4rs::Error) -> VectorIndexError {
    VectorIndexError::Backend(err.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_filters_by_session_before_scoring() {
        let filter_at = SEARCH_CHUNKS_CYPHER
            .find("{session_id: $session_id, source: $source}")
            .unwrap();
        let score_at = SEARCH_CHUNKS_CYPHER.find("vector.similarity.cosine").unwrap();
        assert!(filter_at < score_at);
        assert!(!SEARCH_CHUNKS_CYPHER.contains("queryNodes"));
        assert!(SEARCH_CHUNKS_CYPHER.ends_with("LIMIT $k"));
    }
}
