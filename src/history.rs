//! Selección del historial reciente que entra en el prompt.

use crate::models::{Message, Sender};

/// Devuelve, en orden cronológico, como mucho `window` mensajes de cada emisor
/// anteriores a `current_sequence`.
///
/// `messages` debe venir en orden de secuencia ascendente. Con `window <= 0`
/// o sin mensajes previos el resultado es vacío.
pub fn select_history(messages: &[Message], current_sequence: i64, window: i32) -> Vec<Message> {
    if window <= 0 {
        return Vec::new();
    }
    let limit = window as usize;

    let mut user_count = 0;
    let mut ai_count = 0;
    let mut selected = Vec::new();

    for message in messages
        .iter()
        .rev()
        .filter(|m| m.sequence < current_sequence)
    {
        let count = match message.sender {
            Sender::User => &mut user_count,
            Sender::Ai => &mut ai_count,
        };
        if *count < limit {
            *count += 1;
            selected.push(message.clone());
        }
        if user_count >= limit && ai_count >= limit {
            break;
        }
    }

    selected.reverse();
    selected
}
