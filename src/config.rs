//! Carga y gestión de configuración de la aplicación (persistencia, LLM, RAG).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Dónde viven sesiones, mensajes, documentos e índice vectorial.
#[derive(Clone, Debug, PartialEq)]
pub enum StorageBackend {
    Neo4j {
        uri: String,
        user: String,
        password: String,
    },
    /// Todo en memoria del proceso; útil en desarrollo y en tests.
    Memory,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend: StorageBackend,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,

    /// Mensajes previos por emisor que entran en el prompt.
    pub history_window: i32,
    pub generation_timeout: Duration,
    pub vector_timeout: Duration,

    pub storage_root: PathBuf,
    pub indexing_workers: usize,
    pub indexing_queue_capacity: usize,
    pub max_upload_bytes: usize,

    /// Expone `POST /api/shutdown`. Desactivado salvo que se pida.
    pub enable_shutdown_endpoint: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            server_addr: "127.0.0.1:3322".to_string(),
            llm_provider: LlmProvider::OpenAI,
            llm_embedding_model: "text-embedding-3-small".to_string(),
            llm_chat_model: "gpt-4o-mini".to_string(),
            history_window: 3,
            generation_timeout: Duration::from_secs(60),
            vector_timeout: Duration::from_secs(15),
            storage_root: PathBuf::from("storage").join("session-docs"),
            indexing_workers: 2,
            indexing_queue_capacity: 64,
            max_upload_bytes: 20 * 1024 * 1024,
            enable_shutdown_endpoint: false,
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "neo4j".to_string())
            .to_lowercase()
            .as_str()
        {
            "neo4j" => StorageBackend::Neo4j {
                uri: env::var("NEO4J_URI").map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?,
                user: env::var("NEO4J_USER")
                    .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?,
                password: env::var("NEO4J_PASSWORD")
                    .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?,
            },
            "memory" => StorageBackend::Memory,
            other => return Err(anyhow!("STORAGE_BACKEND no soportado: {other}")),
        };

        let server_addr = env::var("SERVER_ADDR").unwrap_or(defaults.server_addr);

        let llm_provider_str = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model =
            env::var("LLM_EMBEDDING_MODEL").unwrap_or(defaults.llm_embedding_model);
        let llm_chat_model = env::var("LLM_CHAT_MODEL").unwrap_or(defaults.llm_chat_model);

        let storage_root = env::var("DOCUMENT_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_root);

        Ok(Self {
            backend,
            server_addr,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            history_window: parse_var("CHAT_HISTORY_PREVIOUS_MESSAGES", defaults.history_window)?,
            generation_timeout: Duration::from_secs(parse_var(
                "GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout.as_secs(),
            )?),
            vector_timeout: Duration::from_secs(parse_var(
                "VECTOR_TIMEOUT_SECS",
                defaults.vector_timeout.as_secs(),
            )?),
            storage_root,
            indexing_workers: parse_var("INDEXING_WORKERS", defaults.indexing_workers)?.max(1),
            indexing_queue_capacity: parse_var(
                "INDEXING_QUEUE_CAPACITY",
                defaults.indexing_queue_capacity,
            )?
            .max(1),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            enable_shutdown_endpoint: parse_var(
                "ENABLE_SHUTDOWN_ENDPOINT",
                defaults.enable_shutdown_endpoint,
            )?,
        })
    }
}

/// Lee una variable numérica opcional; si no está definida devuelve `default`.
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {name}: '{raw}'")),
        Err(_) => Ok(default),
    }
}
