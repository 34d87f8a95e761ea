//! Chat roles, transcript state, and prompt rendering.
//!
//! The conversation is an explicit value: [`ConversationState`] is passed
//! into each agent turn and a new state comes back with the turn appended.
//! Nothing here is global or ambient, which keeps turns replayable and lets
//! callers hold as many independent conversations as they like.

use serde::{Deserialize, Serialize};

/// Roles in a chat transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// The tokens a model uses to mark each role in a prompt.
#[derive(Debug, Clone)]
pub struct RoleTokens {
    pub system: String,
    pub user: String,
    pub assistant: String,
}

impl Default for RoleTokens {
    fn default() -> Self {
        Self {
            system: "### System".to_string(),
            user: "### User".to_string(),
            assistant: "### Assistant".to_string(),
        }
    }
}

impl RoleTokens {
    fn for_role(&self, role: ChatRole) -> &str {
        match role {
            ChatRole::System => &self.system,
            ChatRole::User => &self.user,
            ChatRole::Assistant => &self.assistant,
        }
    }
}

/// A single message in a chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Bounded conversation transcript.
///
/// Keeps at most `window` player/DM exchanges (two messages each); older
/// messages fall off the front.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<HistoryMessage>,
    window: usize,
}

impl ConversationState {
    pub fn new(window: usize) -> Self {
        Self {
            messages: Vec::new(),
            window: window.max(1),
        }
    }

    pub fn push(&mut self, role: ChatRole, content: impl Into<String>) {
        self.messages.push(HistoryMessage {
            role,
            content: content.into(),
        });
        let cap = self.window * 2;
        while self.messages.len() > cap {
            self.messages.remove(0);
        }
    }

    pub fn messages(&self) -> &[HistoryMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Render a single-turn prompt: system line, windowed history, the user
/// message, and an open assistant header for the model to complete.
pub fn render_prompt(
    tokens: &RoleTokens,
    system_prompt: &str,
    history: &[HistoryMessage],
    user_message: &str,
) -> String {
    let mut out = format!("{}: {}\n", tokens.system, system_prompt);
    for message in history {
        out.push_str(&format!(
            "{}: {}\n",
            tokens.for_role(message.role),
            message.content
        ));
    }
    out.push_str(&format!("{}: {}\n", tokens.user, user_message));
    out.push_str(&format!("{}:", tokens.assistant));
    out
}
