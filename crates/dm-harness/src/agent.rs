//! The Dungeon Master agent: tool routing and the turn pipeline.
//!
//! A turn runs in two or four model calls. First a forced-choice decision:
//! does answering the player need the rules database? The classifier call is
//! an implementation detail; callers only ever see the tagged
//! [`ToolDecision`]. On `UseTool` the player message is reworded into a
//! standalone rules question, the query engine answers it, and the final
//! in-character reply is generated grounded on that answer. On `NoTool` the
//! reply is generated directly from the conversation.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use dm_harness_core::capability::LanguageModel;

use crate::chat::{render_prompt, ChatRole, ConversationState, RoleTokens};
use crate::config::ChatConfig;
use crate::lifecycle::SrdIndex;

/// Outcome of the tool-routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDecision {
    /// Consult the rules database with a reworded, standalone question.
    UseTool { query: String },
    /// Answer in character from the conversation alone.
    NoTool,
}

pub struct DmAgent {
    index: SrdIndex,
    llm: Arc<dyn LanguageModel>,
    tokens: RoleTokens,
    system_prompt: String,
    history_window: usize,
}

impl DmAgent {
    pub fn new(index: SrdIndex, llm: Arc<dyn LanguageModel>, chat: &ChatConfig) -> Self {
        Self {
            index,
            llm,
            tokens: RoleTokens::default(),
            system_prompt: chat.system_prompt.clone(),
            history_window: chat.history_window,
        }
    }

    pub fn new_conversation(&self) -> ConversationState {
        ConversationState::new(self.history_window)
    }

    pub fn index(&self) -> &SrdIndex {
        &self.index
    }

    /// Decide whether the rules database is needed for `message`.
    ///
    /// An unparseable classifier reply falls back to `NoTool`; a reword that
    /// yields nothing falls back to the raw player message.
    pub async fn decide_rules_tool(&self, message: &str) -> Result<ToolDecision> {
        let reply = self
            .llm
            .generate(&self.decision_prompt(message))
            .await
            .context("language model failed during tool routing")?;

        if !parse_choice(&reply) {
            return Ok(ToolDecision::NoTool);
        }

        let reword = self
            .llm
            .generate(&self.reword_prompt(message))
            .await
            .context("language model failed while rewording the question")?;
        let query = parse_question(&reword).unwrap_or_else(|| message.trim().to_string());
        Ok(ToolDecision::UseTool { query })
    }

    /// Run one turn. The state passed in is not consumed; the returned state
    /// carries the turn appended, so a failed turn leaves the caller's copy
    /// untouched.
    pub async fn respond(
        &self,
        state: &ConversationState,
        message: &str,
    ) -> Result<(ConversationState, String)> {
        let decision = self.decide_rules_tool(message).await?;

        let answer = match decision {
            ToolDecision::UseTool { query } => {
                debug!(%query, "consulting the rules database");
                let tool_answer = self.index.query(&query).await?;
                let grounded = format!(
                    "{}\n\nRules reference for this turn:\n{}",
                    self.system_prompt, tool_answer
                );
                let prompt = render_prompt(&self.tokens, &grounded, state.messages(), message);
                self.llm
                    .generate(&prompt)
                    .await
                    .context("language model failed generating the grounded reply")?
            }
            ToolDecision::NoTool => {
                let prompt =
                    render_prompt(&self.tokens, &self.system_prompt, state.messages(), message);
                self.llm
                    .generate(&prompt)
                    .await
                    .context("language model failed generating the reply")?
            }
        };

        let answer = answer.trim().to_string();
        let mut next = state.clone();
        next.push(ChatRole::User, message);
        next.push(ChatRole::Assistant, answer.clone());
        Ok((next, answer))
    }

    fn decision_prompt(&self, message: &str) -> String {
        format!(
            "{system}: You are a dungeon master for D&D 5e games. You have one tool available: \
             ('rules-database', answers questions about the rules and details of the game). \
             Do not rely on your own knowledge of the rules. \
             Reply with exactly one word: NEED if the tool is required to answer the player, \
             SKIP if it is not.\n\
             {user}: {message}\n\
             {assistant}:",
            system = self.tokens.system,
            user = self.tokens.user,
            assistant = self.tokens.assistant,
            message = message
        )
    }

    fn reword_prompt(&self, message: &str) -> String {
        format!(
            "{system}: Reword the player's message as a standalone question for the \
             'rules-database' tool. Wrap the question in <question></question> tags.\n\
             {user}: {message}\n\
             {assistant}: <question>",
            system = self.tokens.system,
            user = self.tokens.user,
            assistant = self.tokens.assistant,
            message = message
        )
    }
}

/// Parse the forced-choice reply. Tolerant: only the first word counts, and
/// anything unrecognized means no tool.
fn parse_choice(reply: &str) -> bool {
    let first_word = reply
        .split(|c: char| !c.is_alphanumeric())
        .find(|s| !s.is_empty())
        .map(str::to_uppercase);
    matches!(first_word.as_deref(), Some("NEED"))
}

/// Extract the reworded question from a `<question>...</question>` reply.
fn parse_question(reply: &str) -> Option<String> {
    let body = reply
        .split("<question>")
        .last()
        .unwrap_or(reply)
        .split("</question>")
        .next()
        .unwrap_or("");
    let trimmed = body.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
