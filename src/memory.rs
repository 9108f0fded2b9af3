//! Backend en memoria: persistencia e índice vectorial dentro del proceso.
//!
//! Se usa con `STORAGE_BACKEND=memory` y en los tests. La búsqueda del índice
//! es léxica (solapamiento de términos), suficiente para desarrollo local.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{RepositoryError, VectorIndexError};
use crate::models::{Document, IndexedText, Message, RetrievedChunk, Session};
use crate::repository::ChatRepository;
use crate::vector_store::{VectorFilter, VectorIndex};

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, Session>,
    messages: Vec<Message>,
    // En orden de inserción; desempata documentos creados en el mismo instante.
    documents: Vec<Document>,
}

#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Backend("mutex del repositorio envenenado".into()))
    }
}

#[async_trait]
impl ChatRepository for InMemoryRepository {
    async fn insert_session(&self, session: &Session) -> Result<(), RepositoryError> {
        self.tables()?.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, RepositoryError> {
        Ok(self.tables()?.sessions.get(&id).cloned())
    }

    async fn find_sessions_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, RepositoryError> {
        let mut sessions: Vec<Session> = self
            .tables()?
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn update_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        if let Some(existing) = tables.sessions.get_mut(&session.id) {
            *existing = session.clone();
        }
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        tables.sessions.remove(&id);
        tables.messages.retain(|m| m.session_id != id);
        tables.documents.retain(|d| d.session_id != id);
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        let duplicate = tables
            .messages
            .iter()
            .any(|m| m.session_id == message.session_id && m.sequence == message.sequence);
        if duplicate {
            return Err(RepositoryError::Backend(format!(
                "secuencia {} duplicada en la sesión {}",
                message.sequence, message.session_id
            )));
        }
        tables.messages.push(message.clone());
        Ok(())
    }

    async fn find_messages(&self, session_id: Uuid) -> Result<Vec<Message>, RepositoryError> {
        let mut messages: Vec<Message> = self
            .tables()?
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.sequence);
        Ok(messages)
    }

    async fn last_sequence(&self, session_id: Uuid) -> Result<Option<i64>, RepositoryError> {
        Ok(self
            .tables()?
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .map(|m| m.sequence)
            .max())
    }

    async fn count_messages(&self, session_id: Uuid) -> Result<u64, RepositoryError> {
        Ok(self
            .tables()?
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .count() as u64)
    }

    async fn find_messages_page(
        &self,
        session_id: Uuid,
        page: u32,
        size: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut messages = self.find_messages(session_id).await?;
        messages.reverse();
        Ok(messages
            .into_iter()
            .skip((page as usize).saturating_mul(size as usize))
            .take(size as usize)
            .collect())
    }

    async fn insert_document(&self, document: &Document) -> Result<(), RepositoryError> {
        self.tables()?.documents.push(document.clone());
        Ok(())
    }

    async fn update_document(&self, document: &Document) -> Result<(), RepositoryError> {
        let mut tables = self.tables()?;
        if let Some(existing) = tables.documents.iter_mut().find(|d| d.id == document.id) {
            *existing = document.clone();
        }
        Ok(())
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>, RepositoryError> {
        Ok(self.tables()?.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn find_documents_by_session(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<Document>, RepositoryError> {
        let mut documents: Vec<Document> = self
            .tables()?
            .documents
            .iter()
            .rev()
            .filter(|d| d.session_id == session_id)
            .cloned()
            .collect();
        // Orden estable: a igual fecha queda primero el último insertado.
        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(documents)
    }

    async fn delete_document(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.tables()?.documents.retain(|d| d.id != id);
        Ok(())
    }
}

/// Índice vectorial en memoria con puntuación por solapamiento de términos.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: Mutex<Vec<IndexedText>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> Result<MutexGuard<'_, Vec<IndexedText>>, VectorIndexError> {
        self.entries
            .lock()
            .map_err(|_| VectorIndexError::Backend("mutex del índice envenenado".into()))
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fracción de términos de la consulta presentes en el texto.
fn overlap_score(query: &HashSet<String>, text: &str) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let text_terms = terms(text);
    query.intersection(&text_terms).count() as f64 / query.len() as f64
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<RetrievedChunk>, VectorIndexError> {
        let query_terms = terms(query);
        let mut hits: Vec<RetrievedChunk> = self
            .entries()?
            .iter()
            .filter(|e| {
                e.metadata.session_id == filter.session_id
                    && e.metadata.provenance == filter.provenance
            })
            .map(|e| RetrievedChunk {
                text: e.text.clone(),
                score: overlap_score(&query_terms, &e.text),
                metadata: e.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn add(&self, items: Vec<IndexedText>) -> Result<(), VectorIndexError> {
        self.entries()?.extend(items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, MessageContext, Provenance, Sender};

    fn doc_text(session_id: Uuid, text: &str) -> IndexedText {
        let document = Document::pending(session_id, "notes.txt", "text/plain", 10);
        IndexedText {
            text: text.to_string(),
            metadata: ChunkMetadata::document_chunk(&document, 0),
        }
    }

    #[tokio::test]
    async fn search_ranks_by_term_overlap_and_honours_filter() {
        let index = InMemoryVectorIndex::new();
        let session = Uuid::new_v4();
        let other = Uuid::new_v4();
        index
            .add(vec![
                doc_text(session, "the quarterly revenue grew"),
                doc_text(session, "unrelated gardening tips"),
                doc_text(other, "quarterly revenue for another session"),
            ])
            .await
            .unwrap();

        let filter = VectorFilter {
            session_id: session,
            provenance: Provenance::SessionDocuments,
        };
        let hits = index.search("quarterly revenue", 5, &filter).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "the quarterly revenue grew");
        assert!(hits[0].score > hits[1].score);
        assert!(hits.iter().all(|h| h.metadata.session_id == session));

        let chat_filter = VectorFilter {
            session_id: session,
            provenance: Provenance::ChatMessage,
        };
        assert!(index.search("revenue", 5, &chat_filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repository_rejects_duplicate_sequences() {
        let repo = InMemoryRepository::new();
        let session = Session::new(Uuid::new_v4(), "s");
        repo.insert_session(&session).await.unwrap();

        let first = Message::new(session.id, Sender::User, "hi", MessageContext::None, 1);
        let clash = Message::new(session.id, Sender::Ai, "hello", MessageContext::None, 1);
        repo.insert_message(&first).await.unwrap();
        assert!(repo.insert_message(&clash).await.is_err());
        assert_eq!(repo.last_sequence(session.id).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn messages_page_is_descending() {
        let repo = InMemoryRepository::new();
        let session = Session::new(Uuid::new_v4(), "s");
        for seq in 1..=7 {
            let m = Message::new(session.id, Sender::User, format!("m{seq}"), MessageContext::None, seq);
            repo.insert_message(&m).await.unwrap();
        }

        let first = repo.find_messages_page(session.id, 0, 5).await.unwrap();
        let seqs: Vec<i64> = first.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![7, 6, 5, 4, 3]);

        let second = repo.find_messages_page(session.id, 1, 5).await.unwrap();
        let seqs: Vec<i64> = second.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![2, 1]);
    }

    #[tokio::test]
    async fn deleting_a_session_cascades() {
        let repo = InMemoryRepository::new();
        let session = Session::new(Uuid::new_v4(), "s");
        repo.insert_session(&session).await.unwrap();
        repo.insert_message(&Message::new(session.id, Sender::User, "x", MessageContext::None, 1))
            .await
            .unwrap();
        repo.insert_document(&Document::pending(session.id, "a.txt", "text/plain", 1))
            .await
            .unwrap();

        repo.delete_session(session.id).await.unwrap();

        assert!(repo.find_session(session.id).await.unwrap().is_none());
        assert_eq!(repo.count_messages(session.id).await.unwrap(), 0);
        assert!(repo.find_documents_by_session(session.id).await.unwrap().is_empty());
    }
}
