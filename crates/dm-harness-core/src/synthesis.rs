//! Tree-summarization answer synthesis.
//!
//! Combines retrieved context spans into a single answer with repeated
//! language-model calls: spans are greedily packed into batches under a
//! character budget, each batch is answered against the query with one
//! `generate` call, and the partial answers are combined recursively with
//! the same prompt until one answer remains. The batching and recursion are
//! deterministic; only the text generation is delegated to the capability.

use anyhow::{Context, Result};

use crate::capability::LanguageModel;

pub const DEFAULT_BUDGET_CHARS: usize = 12_000;

/// Hard cap on recursion rounds; a well-behaved model converges in two or
/// three.
const MAX_ROUNDS: usize = 10;

pub struct TreeSummarizer {
    budget_chars: usize,
}

impl TreeSummarizer {
    pub fn new(budget_chars: usize) -> Self {
        Self {
            budget_chars: budget_chars.max(1),
        }
    }

    /// Reduce `contexts` to one answer for `query`.
    ///
    /// A single batch means a single `generate` call. Capability failures
    /// propagate unchanged.
    pub async fn synthesize(
        &self,
        llm: &dyn LanguageModel,
        query: &str,
        contexts: &[String],
    ) -> Result<String> {
        anyhow::ensure!(!contexts.is_empty(), "no context to synthesize from");

        let mut layer: Vec<String> = contexts.to_vec();
        for _ in 0..MAX_ROUNDS {
            let batches = pack_batches(&layer, self.budget_chars);
            let mut partials = Vec::with_capacity(batches.len());
            for batch in &batches {
                let prompt = summary_prompt(query, batch);
                let answer = llm
                    .generate(&prompt)
                    .await
                    .context("language model capability failed during synthesis")?;
                partials.push(answer.trim().to_string());
            }
            if partials.len() == 1 {
                return Ok(partials.remove(0));
            }
            layer = partials;
        }
        anyhow::bail!("synthesis did not converge within {} rounds", MAX_ROUNDS)
    }
}

/// Greedily pack spans into batches whose combined length stays under
/// `budget`; a single oversized span gets a batch of its own.
fn pack_batches(spans: &[String], budget: usize) -> Vec<Vec<String>> {
    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for span in spans {
        if !current.is_empty() && current_len + span.len() > budget {
            batches.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += span.len();
        current.push(span.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn summary_prompt(query: &str, contexts: &[String]) -> String {
    format!(
        "Context information from the rules reference is below.\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\
         Using only the context information above, answer the question.\n\
         Question: {}\n\
         Answer:",
        contexts.join("\n\n"),
        query
    )
}
