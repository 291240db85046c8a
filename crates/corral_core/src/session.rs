//! In-memory conversation context. The core only ever reads the last N
//! messages; there is no durable session store.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Sliding window of recent conversation turns.
#[derive(Debug, Clone)]
pub struct SessionContext {
    messages: Vec<ChatMessage>,
    cap: usize,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(20)
    }
}

impl SessionContext {
    pub fn new(cap: usize) -> Self {
        Self {
            messages: Vec::new(),
            cap: cap.max(2),
        }
    }

    pub fn push_user(&mut self, text: &str) {
        self.push(ChatRole::User, text);
    }

    pub fn push_assistant(&mut self, text: &str) {
        self.push(ChatRole::Assistant, text);
    }

    fn push(&mut self, role: ChatRole, text: &str) {
        self.messages.push(ChatMessage {
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        if self.messages.len() > self.cap {
            let excess = self.messages.len() - self.cap;
            self.messages.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Render the window as a prompt section, oldest first.
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let who = match m.role {
                    ChatRole::User => "User",
                    ChatRole::Assistant => "Assistant",
                };
                format!("{}: {}", who, m.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
