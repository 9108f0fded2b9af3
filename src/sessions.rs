//! Gestión de sesiones de chat de un usuario.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::SessionLocks;
use crate::error::ServiceError;
use crate::models::{Session, SessionSummary};
use crate::repository::ChatRepository;
use crate::storage::FileStore;

pub const SESSION_NAME_MAX_CHARS: usize = 255;

#[derive(Clone)]
pub struct SessionService {
    repository: Arc<dyn ChatRepository>,
    files: Arc<FileStore>,
    locks: Arc<SessionLocks>,
}

impl SessionService {
    pub fn new(
        repository: Arc<dyn ChatRepository>,
        files: Arc<FileStore>,
        locks: Arc<SessionLocks>,
    ) -> Self {
        Self {
            repository,
            files,
            locks,
        }
    }

    pub async fn create(&self, user_id: Uuid, name: &str) -> Result<Session, ServiceError> {
        let name = validate_name(name)?;
        let session = Session::new(user_id, name);
        self.repository.insert_session(&session).await?;
        info!(session_id = %session.id, %user_id, "Sesión creada");
        Ok(session)
    }

    /// Sesiones del usuario con su número de mensajes, más recientes primero.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<SessionSummary>, ServiceError> {
        let sessions = self.repository.find_sessions_by_user(user_id).await?;
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            let message_count = self.repository.count_messages(session.id).await?;
            summaries.push(SessionSummary {
                session,
                message_count,
            });
        }
        Ok(summaries)
    }

    pub async fn get(&self, user_id: Uuid, session_id: Uuid) -> Result<SessionSummary, ServiceError> {
        let session = self.load_owned_session(user_id, session_id).await?;
        let message_count = self.repository.count_messages(session.id).await?;
        Ok(SessionSummary {
            session,
            message_count,
        })
    }

    pub async fn rename(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        name: &str,
    ) -> Result<Session, ServiceError> {
        let name = validate_name(name)?;
        let mut session = self.load_owned_session(user_id, session_id).await?;
        session.name = name;
        session.updated_at = Utc::now();
        self.repository.update_session(&session).await?;
        Ok(session)
    }

    pub async fn toggle_favorite(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Session, ServiceError> {
        let mut session = self.load_owned_session(user_id, session_id).await?;
        session.favorite = !session.favorite;
        session.updated_at = Utc::now();
        self.repository.update_session(&session).await?;
        Ok(session)
    }

    /// Borra la sesión, sus mensajes, sus documentos y los ficheros subidos.
    ///
    /// Las entradas del índice vectorial de la sesión no se borran.
    pub async fn delete(&self, user_id: Uuid, session_id: Uuid) -> Result<(), ServiceError> {
        self.load_owned_session(user_id, session_id).await?;
        self.repository.delete_session(session_id).await?;
        self.locks.forget(session_id);
        if let Err(e) = self.files.remove_session(session_id).await {
            warn!(%session_id, error = %e, "No se pudieron borrar los ficheros de la sesión");
        }
        info!(%session_id, "Sesión borrada");
        Ok(())
    }

    /// Sesión `session_id` si existe y pertenece a `user_id`.
    ///
    /// Una sesión ajena se trata como inexistente.
    pub(crate) async fn load_owned_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Session, ServiceError> {
        load_owned_session(self.repository.as_ref(), user_id, session_id).await
    }
}

pub(crate) async fn load_owned_session(
    repository: &dyn ChatRepository,
    user_id: Uuid,
    session_id: Uuid,
) -> Result<Session, ServiceError> {
    match repository.find_session(session_id).await? {
        Some(session) if session.user_id == user_id => Ok(session),
        _ => Err(ServiceError::SessionNotFound(session_id)),
    }
}

fn validate_name(name: &str) -> Result<String, ServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::Validation(
            "el nombre de la sesión no puede estar vacío".into(),
        ));
    }
    if name.chars().count() > SESSION_NAME_MAX_CHARS {
        return Err(ServiceError::Validation(format!(
            "el nombre de la sesión supera {SESSION_NAME_MAX_CHARS} caracteres"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRepository;

    fn service() -> (SessionService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let service = SessionService::new(
            Arc::new(InMemoryRepository::new()),
            Arc::new(FileStore::new(dir.path())),
            Arc::new(SessionLocks::new()),
        );
        (service, dir)
    }

    #[tokio::test]
    async fn blank_and_oversized_names_are_rejected() {
        let (service, _dir) = service();
        let user = Uuid::new_v4();

        let err = service.create(user, "   ").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = service.create(user, &"n".repeat(256)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let ok = service.create(user, &"n".repeat(255)).await.unwrap();
        assert_eq!(ok.name.chars().count(), 255);
    }

    #[tokio::test]
    async fn foreign_sessions_look_missing() {
        let (service, _dir) = service();
        let owner = Uuid::new_v4();
        let session = service.create(owner, "Mi sesión").await.unwrap();

        let err = service.get(Uuid::new_v4(), session.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::SessionNotFound(id) if id == session.id));

        let err = service.delete(Uuid::new_v4(), session.id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(service.get(owner, session.id).await.is_ok());
    }

    #[tokio::test]
    async fn rename_and_favorite_update_the_session() {
        let (service, _dir) = service();
        let user = Uuid::new_v4();
        let session = service.create(user, "Inicial").await.unwrap();

        let renamed = service.rename(user, session.id, "  Nuevo  ").await.unwrap();
        assert_eq!(renamed.name, "Nuevo");

        let fav = service.toggle_favorite(user, session.id).await.unwrap();
        assert!(fav.favorite);
        let unfav = service.toggle_favorite(user, session.id).await.unwrap();
        assert!(!unfav.favorite);
    }

    #[tokio::test]
    async fn list_only_returns_the_callers_sessions() {
        let (service, _dir) = service();
        let user = Uuid::new_v4();
        service.create(user, "a").await.unwrap();
        service.create(user, "b").await.unwrap();
        service.create(Uuid::new_v4(), "ajena").await.unwrap();

        let listed = service.list(user).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|s| s.session.user_id == user && s.message_count == 0));
    }
}
