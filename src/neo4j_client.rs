use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{query, Graph, Query, Row};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::{Document, IndexingStatus, Message, MessageContext, Sender, Session};
use crate::repository::ChatRepository;

pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Graph> {
    let url = Url::parse(uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, user, password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints básicos para las etiquetas usadas en el grafo:
/// :Session, :Message, :SessionDocument y :Chunk
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        "CREATE CONSTRAINT session_id IF NOT EXISTS
         FOR (s:Session)
         REQUIRE s.id IS UNIQUE",
        "CREATE CONSTRAINT message_id IF NOT EXISTS
         FOR (m:Message)
         REQUIRE m.id IS UNIQUE",
        // Una única secuencia por sesión.
        "CREATE CONSTRAINT message_sequence IF NOT EXISTS
         FOR (m:Message)
         REQUIRE (m.session_id, m.sequence) IS UNIQUE",
        "CREATE CONSTRAINT session_document_id IF NOT EXISTS
         FOR (d:SessionDocument)
         REQUIRE d.id IS UNIQUE",
        "CREATE CONSTRAINT chunk_id IF NOT EXISTS
         FOR (c:Chunk)
         REQUIRE c.id IS UNIQUE",
        // La búsqueda de contexto filtra siempre por sesión y procedencia.
        "CREATE INDEX chunk_scope IF NOT EXISTS
         FOR (c:Chunk)
         ON (c.session_id, c.source)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints e índices creados).");
    Ok(())
}

/// Persistencia de sesiones, mensajes y documentos como nodos de Neo4j.
#[derive(Clone)]
pub struct Neo4jRepository {
    graph: Arc<Graph>,
}

impl Neo4jRepository {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    async fn fetch_all(&self, q: Query) -> Result<Vec<Row>, RepositoryError> {
        let mut cursor = self.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn fetch_one(&self, q: Query) -> Result<Option<Row>, RepositoryError> {
        let mut cursor = self.graph.execute(q).await?;
        Ok(cursor.next().await?)
    }
}

const SESSION_FIELDS: &str = "s.id AS id, s.user_id AS user_id, s.name AS name,
     s.favorite AS favorite, s.created_at AS created_at, s.updated_at AS updated_at";

const MESSAGE_FIELDS: &str = "m.id AS id, m.session_id AS session_id, m.sender AS sender,
     m.content AS content, m.context AS context, m.sequence AS sequence,
     m.created_at AS created_at";

const DOCUMENT_FIELDS: &str = "d.id AS id, d.session_id AS session_id,
     d.original_filename AS original_filename, d.content_type AS content_type,
     d.size_bytes AS size_bytes, d.storage_path AS storage_path, d.status AS status,
     d.error_message AS error_message, d.created_at AS created_at, d.updated_at AS updated_at";

#[async_trait]
impl ChatRepository for Neo4jRepository {
    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError> {
        self.graph
            .run(
                query(
                    "CREATE (s:Session {id: $id})
                     SET s.user_id = $user_id, s.name = $name, s.favorite = $favorite,
                         s.created_at = $created_at, s.updated_at = $updated_at",
                )
                .param("id", session.id.to_string())
                .param("user_id", session.user_id.to_string())
                .param("name", session.name.clone())
                .param("favorite", session.favorite)
                .param("created_at", timestamp(&session.created_at))
                .param("updated_at", timestamp(&session.updated_at)),
            )
            .await?;
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, RepositoryError> {
        let cypher = format!("MATCH (s:Session {{id: $id}}) RETURN {SESSION_FIELDS}");
        self.fetch_one(query(&cypher).param("id", id.to_string()))
            .await?
            .map(|row| session_from_row(&row))
            .transpose()
    }

    async fn find_sessions_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, RepositoryError> {
        let cypher = format!(
            "MATCH (s:Session {{user_id: $user_id}}) RETURN {SESSION_FIELDS} ORDER BY s.created_at DESC"
        );
        self.fetch_all(query(&cypher).param("user_id", user_id.to_string()))
            .await?
            .iter()
            .map(session_from_row)
            .collect()
    }

    async fn update_session(&self, session: &Session) -> Result<(), RepositoryError> {
        self.graph
            .run(
                query(
                    "MATCH (s:Session {id: $id})
                     SET s.name = $name, s.favorite = $favorite, s.updated_at = $updated_at",
                )
                .param("id", session.id.to_string())
                .param("name", session.name.clone())
                .param("favorite", session.favorite)
                .param("updated_at", timestamp(&session.updated_at)),
            )
            .await?;
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.graph
            .run(
                query(
                    "MATCH (s:Session {id: $id})
                     OPTIONAL MATCH (s)-[:HAS_MESSAGE|HAS_DOCUMENT]->(child)
                     DETACH DELETE child, s",
                )
                .param("id", id.to_string()),
            )
            .await?;
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> Result<(), RepositoryError> {
        let context = serde_json::to_string(&message.context)?;
        self.graph
            .run(
                query(
                    "MATCH (s:Session {id: $session_id})
                     CREATE (s)-[:HAS_MESSAGE]->(m:Message {id: $id})
                     SET m.session_id = $session_id, m.sender = $sender, m.content = $content,
                         m.context = $context, m.sequence = $sequence, m.created_at = $created_at",
                )
                .param("id", message.id.to_string())
                .param("session_id", message.session_id.to_string())
                .param("sender", message.sender.as_str())
                .param("content", message.content.clone())
                .param("context", context)
                .param("sequence", message.sequence)
                .param("created_at", timestamp(&message.created_at)),
            )
            .await?;
        Ok(())
    }

    async fn find_messages(&self, session_id: Uuid) -> Result<Vec<Message>, RepositoryError> {
        let cypher = format!(
            "MATCH (m:Message {{session_id: $session_id}}) RETURN {MESSAGE_FIELDS} ORDER BY m.sequence ASC"
        );
        self.fetch_all(query(&cypher).param("session_id", session_id.to_string()))
            .await?
            .iter()
            .map(message_from_row)
            .collect()
    }

    async fn last_sequence(&self, session_id: Uuid) -> Result<Option<i64>, RepositoryError> {
        let row = self
            .fetch_one(
                query("MATCH (m:Message {session_id: $session_id}) RETURN max(m.sequence) AS last")
                    .param("session_id", session_id.to_string()),
            )
            .await?;
        Ok(row.and_then(|r| r.get::<i64>("last")))
    }

    async fn count_messages(&self, session_id: Uuid) -> Result<u64, RepositoryError> {
        let row = self
            .fetch_one(
                query("MATCH (m:Message {session_id: $session_id}) RETURN count(m) AS total")
                    .param("session_id", session_id.to_string()),
            )
            .await?;
        Ok(row.and_then(|r| r.get::<i64>("total")).unwrap_or(0).max(0) as u64)
    }

    async fn find_messages_page(
        &self,
        session_id: Uuid,
        page: u32,
        size: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let cypher = format!(
            "MATCH (m:Message {{session_id: $session_id}}) RETURN {MESSAGE_FIELDS}
             ORDER BY m.sequence DESC SKIP $skip LIMIT $limit"
        );
        self.fetch_all(
            query(&cypher)
                .param("session_id", session_id.to_string())
                .param("skip", page as i64 * size as i64)
                .param("limit", size as i64),
        )
        .await?
        .iter()
        .map(message_from_row)
        .collect()
    }

    async fn insert_document(&self, document: &Document) -> Result<(), RepositoryError> {
        self.graph
            .run(
                query(
                    "MATCH (s:Session {id: $session_id})
                     CREATE (s)-[:HAS_DOCUMENT]->(d:SessionDocument {id: $id})
                     SET d.session_id = $session_id, d.original_filename = $original_filename,
                         d.content_type = $content_type, d.size_bytes = $size_bytes,
                         d.storage_path = $storage_path, d.status = $status,
                         d.error_message = $error_message,
                         d.created_at = $created_at, d.updated_at = $updated_at",
                )
                .param("id", document.id.to_string())
                .param("session_id", document.session_id.to_string())
                .param("original_filename", document.original_filename.clone())
                .param("content_type", document.content_type.clone())
                .param("size_bytes", document.size_bytes)
                .param("storage_path", document.storage_path.clone())
                .param("status", document.status.as_str())
                .param("error_message", document.error_message.clone().unwrap_or_default())
                .param("created_at", timestamp(&document.created_at))
                .param("updated_at", timestamp(&document.updated_at)),
            )
            .await?;
        Ok(())
    }

    async fn update_document(&self, document: &Document) -> Result<(), RepositoryError> {
        self.graph
            .run(
                query(
                    "MATCH (d:SessionDocument {id: $id})
                     SET d.storage_path = $storage_path, d.status = $status,
                         d.error_message = $error_message, d.updated_at = $updated_at",
                )
                .param("id", document.id.to_string())
                .param("storage_path", document.storage_path.clone())
                .param("status", document.status.as_str())
                .param("error_message", document.error_message.clone().unwrap_or_default())
                .param("updated_at", timestamp(&document.updated_at)),
            )
            .await?;
        Ok(())
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>, RepositoryError> {
        let cypher = format!("MATCH (d:SessionDocument {{id: $id}}) RETURN {DOCUMENT_FIELDS}");
        self.fetch_one(query(&cypher).param("id", id.to_string()))
            .await?
            .map(|row| document_from_row(&row))
            .transpose()
    }

    async fn find_documents_by_session(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<Document>, RepositoryError> {
        let cypher = format!(
            "MATCH (d:SessionDocument {{session_id: $session_id}}) RETURN {DOCUMENT_FIELDS}
             ORDER BY d.created_at DESC"
        );
        self.fetch_all(query(&cypher).param("session_id", session_id.to_string()))
            .await?
            .iter()
            .map(document_from_row)
            .collect()
    }

    async fn delete_document(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.graph
            .run(query("MATCH (d:SessionDocument {id: $id}) DETACH DELETE d").param("id", id.to_string()))
            .await?;
        Ok(())
    }
}

// neo4rs 0.6 no exporta `BoltType`, así que el límite de `Row::get` no se
// puede nombrar en una función genérica: se infiere en cada uso.
macro_rules! field {
    ($row:expr, $name:expr) => {{
        let name: &str = $name;
        $row.get(name)
            .ok_or_else(|| RepositoryError::Corrupt(format!("falta el campo '{name}'")))
    }};
}

/// Marca temporal de ancho fijo, ordenable como cadena.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn uuid_field(row: &Row, name: &str) -> Result<Uuid, RepositoryError> {
    let raw: String = field!(row, name)?;
    raw.parse()
        .map_err(|_| RepositoryError::Corrupt(format!("'{name}' no es un UUID: {raw}")))
}

fn time_field(row: &Row, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = field!(row, name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Corrupt(format!("'{name}' no es una fecha: {raw}")))
}

fn session_from_row(row: &Row) -> Result<Session, RepositoryError> {
    Ok(Session {
        id: uuid_field(row, "id")?,
        user_id: uuid_field(row, "user_id")?,
        name: field!(row, "name")?,
        favorite: field!(row, "favorite")?,
        created_at: time_field(row, "created_at")?,
        updated_at: time_field(row, "updated_at")?,
    })
}

fn message_from_row(row: &Row) -> Result<Message, RepositoryError> {
    let sender_raw: String = field!(row, "sender")?;
    let sender = Sender::parse(&sender_raw)
        .ok_or_else(|| RepositoryError::Corrupt(format!("emisor desconocido: {sender_raw}")))?;
    let context = match row.get::<String>("context") {
        Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)?,
        _ => MessageContext::None,
    };
    Ok(Message {
        id: uuid_field(row, "id")?,
        session_id: uuid_field(row, "session_id")?,
        sender,
        content: field!(row, "content")?,
        context,
        sequence: field!(row, "sequence")?,
        created_at: time_field(row, "created_at")?,
    })
}

fn document_from_row(row: &Row) -> Result<Document, RepositoryError> {
    let status_raw: String = field!(row, "status")?;
    let status = IndexingStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Corrupt(format!("estado desconocido: {status_raw}")))?;
    Ok(Document {
        id: uuid_field(row, "id")?,
        session_id: uuid_field(row, "session_id")?,
        original_filename: field!(row, "original_filename")?,
        content_type: field!(row, "content_type")?,
        size_bytes: field!(row, "size_bytes")?,
        storage_path: field!(row, "storage_path")?,
        status,
        error_message: row.get::<String>("error_message").filter(|s| !s.is_empty()),
        created_at: time_field(row, "created_at")?,
        updated_at: time_field(row, "updated_at")?,
    })
}
