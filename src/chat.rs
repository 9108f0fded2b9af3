//! Mensajes de chat: alta de un turno de usuario con su respuesta y listado
//! paginado.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{ChatTurn, Message, MessageContext, Page, Sender};
use crate::rag::RagEngine;
use crate::repository::ChatRepository;
use crate::sessions::load_owned_session;

pub const DEFAULT_PAGE_SIZE: u32 = 5;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Un cerrojo asíncrono por sesión.
///
/// Se mantiene durante todo el turno (mensaje del usuario y respuesta), de modo
/// que dos turnos concurrentes de la misma sesión nunca comparten secuencia.
/// La entrada de una sesión se elimina cuando nadie la retiene ni la espera.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

/// Turno en curso sobre una sesión; al soltarse libera el cerrojo.
pub struct SessionTurn<'a> {
    owner: &'a SessionLocks,
    session_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: Uuid) -> SessionTurn<'_> {
        let lock = {
            let mut locks = self.entries();
            Arc::clone(locks.entry(session_id).or_default())
        };
        SessionTurn {
            owner: self,
            session_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Olvida el cerrojo de una sesión borrada.
    pub fn forget(&self, session_id: Uuid) {
        self.entries().remove(&session_id);
    }

    /// Número de sesiones con cerrojo registrado.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for SessionTurn<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let mut locks = self.owner.entries();
        drop(guard);
        // Sólo queda la referencia del mapa: nadie más espera este cerrojo.
        let idle = locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.session_id);
        }
    }
}

#[derive(Clone)]
pub struct MessageService {
    repository: Arc<dyn ChatRepository>,
    rag: RagEngine,
    locks: Arc<SessionLocks>,
}

impl MessageService {
    pub fn new(repository: Arc<dyn ChatRepository>, rag: RagEngine, locks: Arc<SessionLocks>) -> Self {
        Self {
            repository,
            rag,
            locks,
        }
    }

    /// Persiste el mensaje del usuario y la respuesta de IA generada.
    ///
    /// El mensaje recibe la siguiente secuencia de la sesión y la respuesta la
    /// inmediatamente posterior. `metadata` se guarda como contexto del
    /// mensaje del usuario.
    pub async fn create_message(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        sender: Sender,
        content: &str,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<ChatTurn, ServiceError> {
        if content.trim().is_empty() {
            return Err(ServiceError::Validation(
                "el contenido del mensaje no puede estar vacío".into(),
            ));
        }
        load_owned_session(self.repository.as_ref(), user_id, session_id).await?;

        let _turn = self.locks.acquire(session_id).await;

        let sequence = self
            .repository
            .last_sequence(session_id)
            .await?
            .map_or(1, |last| last + 1);

        let context = match metadata {
            Some(extra) if !extra.is_empty() => MessageContext::ClientMetadata { extra },
            _ => MessageContext::None,
        };
        let message = Message::new(session_id, sender, content, context, sequence);
        self.repository.insert_message(&message).await?;
        debug!(%session_id, sequence, "Mensaje del usuario guardado");

        self.rag.index_message(&message);
        let response = self.rag.generate_response(&message).await?;

        info!(%session_id, user_sequence = sequence, ai_sequence = response.sequence, "Turno completado");
        Ok(ChatTurn { message, response })
    }

    /// Página `page` (base 0) de mensajes, del más reciente al más antiguo.
    pub async fn list_messages_page(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        page: u32,
        size: u32,
    ) -> Result<Page<Message>, ServiceError> {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(ServiceError::Validation(format!(
                "el tamaño de página debe estar entre 1 y {MAX_PAGE_SIZE}"
            )));
        }
        load_owned_session(self.repository.as_ref(), user_id, session_id).await?;

        let total = self.repository.count_messages(session_id).await?;
        let content = self
            .repository
            .find_messages_page(session_id, page, size)
            .await?;
        Ok(Page::new(content, page, size, total))
    }
}
