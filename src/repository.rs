//! Contrato del colaborador de persistencia.
//!
//! Implementaciones: `neo4j_client::Neo4jRepository` y
//! `memory::InMemoryRepository`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::{Document, Message, Session};

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError>;

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, RepositoryError>;

    /// Sesiones de un usuario, de la más reciente a la más antigua.
    async fn find_sessions_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, RepositoryError>;

    async fn update_session(&self, session: &Session) -> Result<(), RepositoryError>;

    /// Borra la sesión junto con sus mensajes y documentos.
    async fn delete_session(&self, id: Uuid) -> Result<(), RepositoryError>;

    async fn insert_message(&self, message: &Message) -> Result<(), RepositoryError>;

    /// Todos los mensajes de la sesión en orden de secuencia ascendente.
    async fn find_messages(&self, session_id: Uuid) -> Result<Vec<Message>, RepositoryError>;

    async fn last_sequence(&self, session_id: Uuid) -> Result<Option<i64>, RepositoryError>;

    async fn count_messages(&self, session_id: Uuid) -> Result<u64, RepositoryError>;

    /// Página `page` (base 0) de mensajes en orden de secuencia descendente.
    async fn find_messages_page(
        &self,
        session_id: Uuid,
        page: u32,
        size: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn insert_document(&self, document: &Document) -> Result<(), RepositoryError>;

    async fn update_document(&self, document: &Document) -> Result<(), RepositoryError>;

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>, RepositoryError>;

    /// Documentos de la sesión, del más reciente al más antiguo.
    async fn find_documents_by_session(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<Document>, RepositoryError>;

    async fn delete_document(&self, id: Uuid) -> Result<(), RepositoryError>;
}
