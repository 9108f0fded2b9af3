//! Taxonomía de errores del núcleo.
//!
//! Los errores de los colaboradores (generación, índice vectorial, extracción)
//! se recuperan localmente; sólo `ServiceError` llega a los llamantes.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Fallo del colaborador de generación de texto.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("la generación superó el tiempo límite de {0:?}")]
    Timeout(Duration),
    #[error("error del proveedor LLM: {0}")]
    Provider(String),
    #[error("respuesta vacía del modelo")]
    EmptyResponse,
}

/// Fallo del índice vectorial, tanto en búsquedas como en altas.
#[derive(Debug, Error)]
pub enum VectorIndexError {
    #[error("el índice vectorial superó el tiempo límite de {0:?}")]
    Timeout(Duration),
    #[error("error del índice vectorial: {0}")]
    Backend(String),
    #[error("respuesta malformada del índice vectorial: {0}")]
    Malformed(String),
}

/// Fallo del colaborador de extracción de texto.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("tipo de contenido no soportado: {0}")]
    Unsupported(String),
    #[error("el fichero no es texto UTF-8 válido")]
    InvalidEncoding,
    #[error("no se pudo extraer texto del PDF: {0}")]
    Pdf(String),
}

/// Fallo del almacenamiento de ficheros subidos.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("error de E/S en el almacenamiento: {0}")]
    Io(#[from] std::io::Error),
}

/// Fallo del colaborador de persistencia.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("error del backend de persistencia: {0}")]
    Backend(String),
    #[error("dato persistido inválido: {0}")]
    Corrupt(String),
    #[error("error de serialización: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<neo4rs::Error> for RepositoryError {
    fn from(err: neo4rs::Error) -> Self {
        RepositoryError::Backend(err.to_string())
    }
}

/// Errores visibles para los llamantes del núcleo.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("sesión no encontrada: {0}")]
    SessionNotFound(Uuid),
    #[error("documento no encontrado: {0}")]
    DocumentNotFound(Uuid),
    #[error("validación fallida: {0}")]
    Validation(String),
    #[error("conflicto de estado: {0}")]
    Conflict(String),
    #[error("cola de indexación no disponible: {0}")]
    QueueUnavailable(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServiceError::SessionNotFound(_) | ServiceError::DocumentNotFound(_)
        )
    }
}
