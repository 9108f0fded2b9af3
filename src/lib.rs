//! Chat por sesiones con RAG sobre los documentos que el usuario sube a cada
//! sesión.
//!
//! El núcleo son dos caminos:
//!   - generación: mensaje del usuario → historial + contexto recuperado →
//!     prompt → modelo → mensaje de IA (con respuesta de reserva si falla);
//!   - ingesta: fichero subido → `PENDING` → `PROCESSING` → indexado
//!     asíncrono → `READY` / `FAILED`.

pub mod api;
pub mod app_state;
pub mod chat;
pub mod config;
pub mod error;
pub mod extract;
pub mod history;
pub mod indexing_queue;
pub mod ingest;
pub mod llm;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod neo4j_client;
pub mod prompt;
pub mod rag;
pub mod repository;
pub mod sessions;
pub mod storage;
pub mod vector_store;
