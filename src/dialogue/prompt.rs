//! Persona prompt and request assembly

use super::ChatMessage;

/// Default persona of the mirror
///
/// Replies are read aloud by the synthesizer, so the prompt forbids anything
/// that cannot be spoken.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the Magic Mirror, a talking mirror who chats with the person standing in front of you. \
Be warm and a little playful, tease gently now and then, and keep a natural conversational tone. \
Answer in plain spoken sentences. Never use parentheses, stage directions, descriptions of actions, \
descriptions of sounds or onomatopoeia, because everything you write is spoken aloud. \
Keep replies short unless you are asked for detail.";

/// Number of characters of the first question used as a conversation title
pub const TITLE_CHARS: usize = 30;

/// Assemble the messages sent to the model: system, history, then the query
#[must_use]
pub fn build_messages(system_prompt: &str, history: &[ChatMessage], query: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(history.iter().filter(|m| !m.is_system()).cloned());
    messages.push(ChatMessage::user(query));
    messages
}

/// Derive a conversation title from its first question
#[must_use]
pub fn title_from(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.chars().count() > TITLE_CHARS {
        let head: String = trimmed.chars().take(TITLE_CHARS).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}
