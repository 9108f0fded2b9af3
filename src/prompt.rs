//! Construcción del prompt: instrucciones, contexto recuperado, historial
//! reciente y la pregunta del usuario.

use std::fmt::Write as _;

use crate::models::{Message, RetrievedChunk, Sender};

/// Límite global de caracteres de fragmentos en la sección de contexto.
pub const CONTEXT_CHAR_BUDGET: usize = 3000;

const PREAMBLE: &str = "You are a helpful assistant. Use any provided context and recent conversation to answer the user's question. If the context is not relevant, you may also use your general knowledge, but prefer the provided context when possible.";

const HISTORY_HEADER: &str = "Recent conversation (lines starting with 'User:' are the human, 'Assistant:' are you):";

const CLOSING_INSTRUCTION: &str = "When you answer, respond only with the answer text itself. Do not include any speaker labels like 'Assistant:' or 'User:' in your response.";

/// Recorta los fragmentos al presupuesto de caracteres.
///
/// Recorre los fragmentos de mayor a menor score, ignora los vacíos y trunca
/// el último para llenar exactamente lo que queda. La suma de caracteres
/// devuelta nunca supera `budget`.
pub fn budget_snippets(chunks: &[RetrievedChunk], budget: usize) -> Vec<String> {
    let mut ranked: Vec<&RetrievedChunk> = chunks.iter().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut used = 0;
    let mut snippets = Vec::new();
    for chunk in ranked {
        if used >= budget {
            break;
        }
        if chunk.text.trim().is_empty() {
            continue;
        }
        let remaining = budget - used;
        let snippet = truncate_chars(&chunk.text, remaining);
        used += snippet.chars().count();
        snippets.push(snippet);
    }
    snippets
}

/// Primeros `max` caracteres de `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Prompt completo para el modelo.
pub fn build_prompt(question: &str, chunks: &[RetrievedChunk], history: &[Message]) -> String {
    let mut prompt = String::new();

    prompt.push_str(PREAMBLE);
    prompt.push('\n');

    let snippets = budget_snippets(chunks, CONTEXT_CHAR_BUDGET);
    if !snippets.is_empty() {
        prompt.push_str("Context:\n");
        for (i, snippet) in snippets.iter().enumerate() {
            let _ = write!(prompt, "[{}] {}\n\n", i + 1, snippet);
        }
    }

    if !history.is_empty() {
        prompt.push_str(HISTORY_HEADER);
        prompt.push('\n');
        for message in history {
            let role = match message.sender {
                Sender::User => "User",
                Sender::Ai => "Assistant",
            };
            let _ = writeln!(prompt, "{}: {}", role, message.content);
        }
        prompt.push('\n');
    }

    prompt.push_str("User question:\n");
    prompt.push_str(question);
    prompt.push_str("\n\n");
    prompt.push_str(CLOSING_INSTRUCTION);
    prompt.push_str("\n\n");

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, MessageContext, Provenance};
    use uuid::Uuid;

    fn chunk(text: &str, score: f64) -> RetrievedChunk {
        RetrievedChunk {
            text: text.to_string(),
            score,
            metadata: ChunkMetadata {
                session_id: Uuid::nil(),
                provenance: Provenance::SessionDocuments,
                document_id: Some(Uuid::nil()),
                message_id: None,
                filename: Some("doc.txt".into()),
                chunk_index: Some(0),
                sender: None,
                sequence: None,
            },
        }
    }

    #[test]
    fn budget_is_never_exceeded_with_oversized_chunks() {
        let chunks: Vec<RetrievedChunk> = (0..8)
            .map(|i| chunk(&"x".repeat(1000 + i * 337), 1.0 - i as f64 * 0.1))
            .collect();

        let snippets = budget_snippets(&chunks, CONTEXT_CHAR_BUDGET);
        let total: usize = snippets.iter().map(|s| s.chars().count()).sum();
        assert_eq!(total, CONTEXT_CHAR_BUDGET);
        // 1000 + 1337 + 663 truncado
        assert_eq!(snippets.len(), 3);
        assert_eq!(snippets[2].len(), 663);
    }

    #[test]
    fn budget_counts_characters_not_bytes() {
        let chunks = vec![chunk(&"ñ".repeat(5000), 0.9)];
        let snippets = budget_snippets(&chunks, CONTEXT_CHAR_BUDGET);
        assert_eq!(snippets[0].chars().count(), CONTEXT_CHAR_BUDGET);
    }

    #[test]
    fn blank_chunks_are_skipped_and_order_follows_score() {
        let chunks = vec![chunk("low", 0.1), chunk("   ", 0.99), chunk("high", 0.8)];
        let snippets = budget_snippets(&chunks, CONTEXT_CHAR_BUDGET);
        assert_eq!(snippets, vec!["high".to_string(), "low".to_string()]);
    }

    #[test]
    fn prompt_sections_appear_in_order() {
        let session = Uuid::new_v4();
        let history = vec![
            Message::new(session, Sender::User, "What is RAG?", MessageContext::None, 1),
            Message::new(session, Sender::Ai, "Retrieval augmented generation.", MessageContext::None, 2),
        ];
        let prompt = build_prompt(
            "And how is it used?",
            &[chunk("RAG combines search and generation.", 0.7)],
            &history,
        );

        let preamble = prompt.find("You are a helpful assistant").unwrap();
        let context = prompt.find("Context:\n[1] RAG combines search and generation.").unwrap();
        let recent = prompt.find("Recent conversation").unwrap();
        let user_line = prompt.find("User: What is RAG?").unwrap();
        let ai_line = prompt.find("Assistant: Retrieval augmented generation.").unwrap();
        let question = prompt.find("User question:\nAnd how is it used?").unwrap();
        let closing = prompt.find("respond only with the answer text").unwrap();

        assert!(preamble < context);
        assert!(context < recent);
        assert!(recent < user_line && user_line < ai_line);
        assert!(ai_line < question);
        assert!(question < closing);
    }

    #[test]
    fn prompt_without_context_or_history_omits_those_sections() {
        let prompt = build_prompt("hola", &[], &[]);
        assert!(!prompt.contains("Context:"));
        assert!(!prompt.contains("Recent conversation"));
        assert!(prompt.contains("User question:\nhola"));
    }
}
