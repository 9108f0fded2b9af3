//! Modelos de dominio: sesiones, mensajes, documentos y los fragmentos
//! recuperados del índice vectorial.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conversación de un usuario. Posee mensajes y documentos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            favorite: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Sesión junto con su número de mensajes, tal como se lista.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub message_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "USER",
            Sender::Ai => "AI",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "USER" => Some(Sender::User),
            "AI" => Some(Sender::Ai),
            _ => None,
        }
    }
}

/// Referencia a un fragmento usado como contexto de una respuesta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub session_id: Uuid,
    pub document_id: Option<Uuid>,
    pub filename: Option<String>,
    pub chunk_index: Option<i64>,
    pub snippet: String,
    pub score: f64,
}

/// Carga estructurada asociada a un mensaje.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContext {
    #[default]
    None,
    RetrievalContext {
        documents: Vec<ContextDocument>,
    },
    ClientMetadata {
        extra: serde_json::Map<String, serde_json::Value>,
    },
}

impl MessageContext {
    pub fn is_none(&self) -> bool {
        matches!(self, MessageContext::None)
    }
}

/// Turno de conversación. Nunca se modifica tras su creación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender: Sender,
    pub content: String,
    #[serde(default, skip_serializing_if = "MessageContext::is_none")]
    pub context: MessageContext,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        session_id: Uuid,
        sender: Sender,
        content: impl Into<String>,
        context: MessageContext,
        sequence: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            sender,
            content: content.into(),
            context,
            sequence,
            created_at: Utc::now(),
        }
    }
}

/// Resultado de `createMessage`: el turno del usuario y la respuesta generada.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub message: Message,
    pub response: Message,
}

/// Estado de indexación de un documento.
///
/// `PENDING → PROCESSING → {READY, FAILED}`. `PROCESSING` admite reentrada;
/// los estados terminales no vuelven a procesarse solos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexingStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl IndexingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexingStatus::Pending => "PENDING",
            IndexingStatus::Processing => "PROCESSING",
            IndexingStatus::Ready => "READY",
            IndexingStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(IndexingStatus::Pending),
            "PROCESSING" => Some(IndexingStatus::Processing),
            "READY" => Some(IndexingStatus::Ready),
            "FAILED" => Some(IndexingStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IndexingStatus::Ready | IndexingStatus::Failed)
    }

    pub fn can_transition_to(&self, next: IndexingStatus) -> bool {
        use IndexingStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Processing | Ready | Failed)
        )
    }
}

/// Fichero subido a una sesión.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub session_id: Uuid,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub storage_path: String,
    pub status: IndexingStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn pending(
        session_id: Uuid,
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            original_filename: original_filename.into(),
            content_type: content_type.into(),
            size_bytes,
            storage_path: String::new(),
            status: IndexingStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Aplica una transición de estado válida; devuelve `false` si no lo es.
    pub fn transition_to(&mut self, next: IndexingStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }
}

/// Origen de un texto indexado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    #[serde(rename = "session-documents")]
    SessionDocuments,
    #[serde(rename = "chat-message")]
    ChatMessage,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::SessionDocuments => "session-documents",
            Provenance::ChatMessage => "chat-message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session-documents" => Some(Provenance::SessionDocuments),
            "chat-message" => Some(Provenance::ChatMessage),
            _ => None,
        }
    }
}

/// Metadatos que acompañan a cada texto dentro del índice vectorial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub session_id: Uuid,
    pub provenance: Provenance,
    pub document_id: Option<Uuid>,
    pub message_id: Option<Uuid>,
    pub filename: Option<String>,
    pub chunk_index: Option<i64>,
    pub sender: Option<Sender>,
    pub sequence: Option<i64>,
}

impl ChunkMetadata {
    pub fn document_chunk(document: &Document, chunk_index: i64) -> Self {
        Self {
            session_id: document.session_id,
            provenance: Provenance::SessionDocuments,
            document_id: Some(document.id),
            message_id: None,
            filename: Some(document.original_filename.clone()),
            chunk_index: Some(chunk_index),
            sender: None,
            sequence: None,
        }
    }

    pub fn chat_message(message: &Message) -> Self {
        Self {
            session_id: message.session_id,
            provenance: Provenance::ChatMessage,
            document_id: None,
            message_id: Some(message.id),
            filename: None,
            chunk_index: None,
            sender: Some(message.sender),
            sequence: Some(message.sequence),
        }
    }
}

/// Texto a añadir al índice vectorial.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedText {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Fragmento devuelto por una búsqueda. No se persiste.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub score: f64,
    pub metadata: ChunkMetadata,
}

/// Página de resultados.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, page: u32, size: u32, total_elements: u64) -> Self {
        let total_pages = if size == 0 {
            0
        } else {
            total_elements.div_ceil(size as u64) as u32
        };
        Self {
            content,
            page,
            size,
            total_elements,
            total_pages,
            has_next: u64::from(page) + 1 < u64::from(total_pages),
            has_previous: page > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_the_state_machine() {
        use IndexingStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Ready));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn message_context_is_tagged() {
        let ctx = MessageContext::RetrievalContext { documents: vec![] };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["kind"], "retrieval_context");

        let back: MessageContext = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn sender_and_provenance_use_wire_names() {
        assert_eq!(serde_json::to_string(&Sender::Ai).unwrap(), "\"AI\"");
        assert_eq!(Sender::parse("user"), Some(Sender::User));
        assert_eq!(
            serde_json::to_string(&Provenance::SessionDocuments).unwrap(),
            "\"session-documents\""
        );
        assert_eq!(Provenance::parse("chat-message"), Some(Provenance::ChatMessage));
    }

    #[test]
    fn page_computes_navigation_flags() {
        let page = Page::new(vec![1, 2, 3, 4, 5], 0, 5, 12);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert!(!page.has_previous);

        let last = Page::new(vec![11, 12], 2, 5, 12);
        assert!(!last.has_next);
        assert!(last.has_previous);

        let empty: Page<i32> = Page::new(vec![], 0, 5, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);

        let beyond: Page<i32> = Page::new(vec![], u32::MAX, 5, 12);
        assert!(!beyond.has_next);
        assert!(beyond.has_previous);
    }
}
