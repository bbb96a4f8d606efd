//! Prompt construction
//!
//! Renders a bounded prompt string from a question, optional document text and
//! the active model's template. Building never fails and never touches I/O:
//! malformed context degrades to "no context".

use pdfask_common::config::{ModelConfig, PromptConfig, PromptTemplate};
use std::fmt;

const CONTEXT_LEAD: &str = "Based on this content: ";
const QUESTION_LEAD: &str = "\n\nQuestion: ";

const CHATML_SYSTEM_OPEN: &str = "<|im_start|>system\n";
const CHATML_USER_OPEN: &str = "<|im_start|>user\n";
const CHATML_CLOSE: &str = "<|im_end|>\n";
const CHATML_ASSISTANT_OPEN: &str = "<|im_start|>assistant\n";

const GEMMA_USER_OPEN: &str = "<start_of_turn>user\n";
const GEMMA_CLOSE: &str = "<end_of_turn>\n";
const GEMMA_MODEL_OPEN: &str = "<start_of_turn>model\n";

/// A rendered, bounded prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic prompt renderer
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_context_bytes: usize,
    max_question_bytes: usize,
    system_prompt: String,
}

impl PromptBuilder {
    pub fn new(config: &PromptConfig) -> Self {
        Self {
            max_context_bytes: config.max_context_bytes,
            max_question_bytes: config.max_question_bytes,
            system_prompt: config.system_prompt.clone(),
        }
    }

    /// Render the prompt for `model`
    pub fn build(&self, question: &str, context: Option<&str>, model: &ModelConfig) -> Prompt {
        let question = truncate_to_bytes(question.trim(), self.max_question_bytes);
        let context = context
            .map(|raw| clean_context(raw, model.context_budget(self.max_context_bytes)))
            .filter(|ctx| !ctx.is_empty());

        let user = match &context {
            Some(ctx) => format!("{CONTEXT_LEAD}{ctx}{QUESTION_LEAD}{question}"),
            None => question.to_string(),
        };

        let rendered = match model.template() {
            PromptTemplate::Plain => user,
            PromptTemplate::ChatMl => format!(
                "{CHATML_SYSTEM_OPEN}{system}{CHATML_CLOSE}{CHATML_USER_OPEN}{user}{CHATML_CLOSE}{CHATML_ASSISTANT_OPEN}",
                system = self.system_prompt,
            ),
            // Gemma has no system role; the instruction leads the user turn.
            PromptTemplate::Gemma => format!(
                "{GEMMA_USER_OPEN}{system}\n\n{user}{GEMMA_CLOSE}{GEMMA_MODEL_OPEN}",
                system = self.system_prompt,
            ),
        };

        Prompt(rendered)
    }

    /// Upper bound on the length of any prompt rendered for `model`
    pub fn max_len(&self, model: &ModelConfig) -> usize {
        let framing = CONTEXT_LEAD.len() + QUESTION_LEAD.len();
        let overhead = match model.template() {
            PromptTemplate::Plain => framing,
            PromptTemplate::ChatMl => {
                framing
                    + CHATML_SYSTEM_OPEN.len()
                    + self.system_prompt.len()
                    + CHATML_CLOSE.len() * 2
                    + CHATML_USER_OPEN.len()
                    + CHATML_ASSISTANT_OPEN.len()
            }
            PromptTemplate::Gemma => {
                framing
                    + GEMMA_USER_OPEN.len()
                    + self.system_prompt.len()
                    + 2
                    + GEMMA_CLOSE.len()
                    + GEMMA_MODEL_OPEN.len()
            }
        };

        self.max_question_bytes + model.context_budget(self.max_context_bytes) + overhead
    }
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == '_'
        || c.is_whitespace()
        || matches!(c, '.' | ',' | '!' | '?' | '-' | '(' | ')')
}

/// Strip unsafe characters, collapse whitespace and cut to `budget` bytes
pub fn clean_context(raw: &str, budget: usize) -> String {
    let filtered: String = raw.chars().filter(|c| is_safe_char(*c)).collect();
    let collapsed = filtered.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_to_bytes(&collapsed, budget).trim_end().to_string()
}

/// Longest prefix of `s` that fits in `budget` bytes without splitting a char
pub fn truncate_to_bytes(s: &str, budget: usize) -> &str {
    if s.len() <= budget {
        return s;
    }
    let mut end = budget;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
