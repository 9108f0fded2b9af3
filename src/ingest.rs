//! Ingesta de documentos subidos a una sesión: almacenamiento, extracción de
//! texto, troceado e indexado, con la máquina de estados
//! `PENDING → PROCESSING → {READY, FAILED}`.
//!
//! La subida devuelve el documento en cuanto queda encolado; el indexado lo
//! hacen los workers de `indexing_queue` llamando a `DocumentIndexer::run`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::extract::TextExtractor;
use crate::indexing_queue::{IndexingQueue, QueueError};
use crate::metrics::RagMetrics;
use crate::models::{ChunkMetadata, Document, IndexedText, IndexingStatus};
use crate::prompt::truncate_chars;
use crate::repository::ChatRepository;
use crate::sessions::load_owned_session;
use crate::storage::FileStore;
use crate::vector_store::{with_timeout, VectorIndex};

pub const CHUNK_SIZE: usize = 1000;
pub const CHUNK_OVERLAP: usize = 200;
pub const ERROR_MESSAGE_MAX_CHARS: usize = 500;

const DEFAULT_FILENAME: &str = "document";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Trocea `text` con una ventana deslizante de `size` caracteres que avanza
/// `size - overlap` cada vez. Los trozos se recortan y los vacíos se descartan.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Ejecuta la tarea de indexación de un documento.
pub struct DocumentIndexer {
    repository: Arc<dyn ChatRepository>,
    vector_index: Arc<dyn VectorIndex>,
    extractor: Arc<dyn TextExtractor>,
    files: Arc<FileStore>,
    metrics: Arc<RagMetrics>,
    vector_timeout: Duration,
}

impl DocumentIndexer {
    pub fn new(
        repository: Arc<dyn ChatRepository>,
        vector_index: Arc<dyn VectorIndex>,
        extractor: Arc<dyn TextExtractor>,
        files: Arc<FileStore>,
        metrics: Arc<RagMetrics>,
        vector_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            vector_index,
            extractor,
            files,
            metrics,
            vector_timeout,
        }
    }

    /// Indexa el documento y deja su estado final en `READY` o `FAILED`.
    ///
    /// Un documento borrado o ya terminal se ignora.
    pub async fn run(&self, document_id: Uuid) {
        let mut document = match self.repository.find_document(document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                debug!(%document_id, "El documento ya no existe; se omite la indexación");
                return;
            }
            Err(e) => {
                error!(%document_id, error = %e, "No se pudo cargar el documento a indexar");
                return;
            }
        };

        if document.status.is_terminal() {
            debug!(%document_id, status = document.status.as_str(), "Documento en estado terminal; se omite");
            return;
        }

        document.transition_to(IndexingStatus::Processing);
        document.error_message = None;
        if let Err(e) = self.repository.update_document(&document).await {
            error!(%document_id, error = %e, "No se pudo marcar el documento como PROCESSING");
            return;
        }

        match self.index_document(&document).await {
            Ok(chunks) => {
                document.transition_to(IndexingStatus::Ready);
                if let Err(e) = self.repository.update_document(&document).await {
                    error!(%document_id, error = %e, "No se pudo marcar el documento como READY");
                    return;
                }
                self.metrics.document_ready();
                info!(%document_id, session_id = %document.session_id, chunks, "Documento indexado");
            }
            Err(e) => self.record_failure(&mut document, &format!("{e:#}")).await,
        }
    }

    /// Marca como `FAILED` un documento cuya tarea no terminó por sí misma.
    pub async fn mark_failed(&self, document_id: Uuid, reason: &str) {
        match self.repository.find_document(document_id).await {
            Ok(Some(mut document)) if !document.status.is_terminal() => {
                self.record_failure(&mut document, reason).await;
            }
            Ok(_) => {}
            Err(e) => error!(%document_id, error = %e, "No se pudo cargar el documento para marcarlo FAILED"),
        }
    }

    async fn record_failure(&self, document: &mut Document, reason: &str) {
        let reason = if reason.trim().is_empty() {
            "error desconocido durante la indexación"
        } else {
            reason
        };
        document.error_message = Some(truncate_chars(reason, ERROR_MESSAGE_MAX_CHARS));
        document.transition_to(IndexingStatus::Failed);
        self.metrics.document_failed();
        warn!(document_id = %document.id, session_id = %document.session_id, error = reason, "Fallo al indexar el documento");

        if let Err(e) = self.repository.update_document(document).await {
            error!(document_id = %document.id, error = %e, "No se pudo marcar el documento como FAILED");
        }
    }

    /// Extrae, trocea y añade al índice. Devuelve el número de fragmentos.
    async fn index_document(&self, document: &Document) -> Result<usize> {
        let bytes = self
            .files
            .read(Path::new(&document.storage_path))
            .await
            .context("no se pudo leer el fichero almacenado")?;

        let extractor = Arc::clone(&self.extractor);
        let content_type = document.content_type.clone();
        let filename = document.original_filename.clone();
        let text = tokio::task::spawn_blocking(move || {
            extractor.extract(&bytes, &content_type, &filename)
        })
        .await
        .context("la extracción de texto terminó de forma inesperada")??;

        if text.trim().is_empty() {
            debug!(document_id = %document.id, "Texto extraído vacío; el documento queda sin fragmentos");
            return Ok(0);
        }

        let items: Vec<IndexedText> = chunk_text(&text, CHUNK_SIZE, CHUNK_OVERLAP)
            .into_iter()
            .enumerate()
            .map(|(i, text)| IndexedText {
                text,
                metadata: ChunkMetadata::document_chunk(document, i as i64),
            })
            .collect();
        let count = items.len();

        with_timeout(self.vector_timeout, self.vector_index.add(items)).await?;
        Ok(count)
    }
}

/// Operaciones sobre los documentos de una sesión.
#[derive(Clone)]
pub struct DocumentService {
    repository: Arc<dyn ChatRepository>,
    files: Arc<FileStore>,
    queue: IndexingQueue,
    metrics: Arc<RagMetrics>,
}

impl DocumentService {
    pub fn new(
        repository: Arc<dyn ChatRepository>,
        files: Arc<FileStore>,
        queue: IndexingQueue,
        metrics: Arc<RagMetrics>,
    ) -> Self {
        Self {
            repository,
            files,
            queue,
            metrics,
        }
    }

    /// Guarda el fichero, deja el documento en `PROCESSING` y encola su
    /// indexación. No espera a que termine.
    pub async fn upload(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        filename: Option<&str>,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<Document, ServiceError> {
        load_owned_session(self.repository.as_ref(), user_id, session_id).await?;
        if bytes.is_empty() {
            return Err(ServiceError::Validation("el fichero está vacío".into()));
        }

        let filename = filename
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_FILENAME);
        let content_type = content_type
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        let mut document = Document::pending(session_id, filename, content_type, bytes.len() as i64);
        self.repository.insert_document(&document).await?;

        let path = match self.files.save(session_id, document.id, filename, bytes).await {
            Ok(path) => path,
            Err(e) => {
                document.error_message = Some(truncate_chars(&e.to_string(), ERROR_MESSAGE_MAX_CHARS));
                document.transition_to(IndexingStatus::Failed);
                self.metrics.document_failed();
                if let Err(update) = self.repository.update_document(&document).await {
                    error!(document_id = %document.id, error = %update, "No se pudo marcar el documento como FAILED");
                }
                error!(document_id = %document.id, %session_id, error = %e, "No se pudo guardar el fichero subido");
                return Err(e.into());
            }
        };

        document.storage_path = path.to_string_lossy().into_owned();
        document.transition_to(IndexingStatus::Processing);
        self.repository.update_document(&document).await?;

        match self.queue.submit(document.id) {
            Ok(()) => {
                info!(document_id = %document.id, %session_id, size = document.size_bytes, "Documento subido y encolado");
            }
            Err(e) => {
                self.metrics.indexing_job_rejected();
                warn!(document_id = %document.id, %session_id, error = %e, "No se pudo encolar la indexación; el documento sigue en PROCESSING y puede reenviarse");
            }
        }

        Ok(document)
    }

    /// Documentos de la sesión, del más reciente al más antiguo.
    pub async fn list(&self, user_id: Uuid, session_id: Uuid) -> Result<Vec<Document>, ServiceError> {
        load_owned_session(self.repository.as_ref(), user_id, session_id).await?;
        Ok(self.repository.find_documents_by_session(session_id).await?)
    }

    /// Borra el fichero y la fila del documento.
    ///
    /// Los fragmentos ya indexados permanecen en el índice vectorial.
    pub async fn delete(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        document_id: Uuid,
    ) -> Result<(), ServiceError> {
        let document = self.load_document(user_id, session_id, document_id).await?;

        if !document.storage_path.is_empty() {
            if let Err(e) = self.files.remove(Path::new(&document.storage_path)).await {
                warn!(%document_id, error = %e, "No se pudo borrar el fichero del documento");
            }
        }
        self.repository.delete_document(document_id).await?;
        info!(%document_id, %session_id, "Documento borrado");
        Ok(())
    }

    /// Vuelve a encolar un documento atascado en `PROCESSING`.
    ///
    /// Si su tarea sigue encolada o en curso devuelve `Conflict`.
    pub async fn resubmit(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        document_id: Uuid,
    ) -> Result<Document, ServiceError> {
        let document = self.load_document(user_id, session_id, document_id).await?;
        if document.status != IndexingStatus::Processing {
            return Err(ServiceError::Conflict(format!(
                "sólo se puede reindexar un documento en PROCESSING (estado actual: {})",
                document.status.as_str()
            )));
        }

        self.queue.submit(document_id).map_err(|e| match e {
            QueueError::InFlight => ServiceError::Conflict(e.to_string()),
            QueueError::Full | QueueError::Closed => {
                self.metrics.indexing_job_rejected();
                ServiceError::QueueUnavailable(e.to_string())
            }
        })?;
        info!(%document_id, %session_id, "Documento reenviado a indexación");
        Ok(document)
    }

    async fn load_document(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        document_id: Uuid,
    ) -> Result<Document, ServiceError> {
        load_owned_session(self.repository.as_ref(), user_id, session_id).await?;
        match self.repository.find_document(document_id).await? {
            Some(document) if document.session_id == session_id => Ok(document),
            _ => Err(ServiceError::DocumentNotFound(document_id)),
        }
    }
}
