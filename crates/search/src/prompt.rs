//! Instruction templates and the prompt compiler.
//!
//! The compiler folds the retrieved context into the conversation's system
//! turn. Whatever the client sent, the compiled transcript carries exactly
//! one system turn, and it comes first.

use graphchat_core::error::SearchError;
use graphchat_core::message::Message;
use tracing::info;

/// Role preamble used when the transcript has no system turn.
pub const DEFAULT_ROLE: &str =
    "You are a helpful assistant responding to questions about data in the tables provided.";

pub const LOCAL_SEARCH_SYSTEM_PROMPT: &str = "---Role---

{role}

---Goal---

Answer the user's question in the target length and format below, using the data tables as your evidence. Summarize everything in the tables that bears on the question and add general knowledge only where it helps.

If the tables do not contain the answer, say so plainly. Never invent facts, and leave out any statement the tables do not support.

---Target response length and format---

{response_type}

---Data tables---

{context_data}

---Goal---

Answer the user's question in the target length and format, grounded in the data tables above. If the answer is not there, say so.

---Target response length and format---

{response_type}

Organize the answer into sections and commentary as the length and format call for. Write it in markdown.
";

pub const MAP_SYSTEM_PROMPT: &str = r#"---Role---

You are a helpful assistant reading community reports from a knowledge graph.

---Goal---

List the key points in the reports below that help answer the user's question. Give each point a description and an importance score between 0 and 100, where 0 means the point does not help answer the question at all.

If the reports do not help, answer with a single point scored 0. Do not invent points the reports do not support.

Respond with JSON only, in this shape:
{"points": [{"description": "Description of point 1", "score": 80}, {"description": "Description of point 2", "score": 40}]}

---Data tables---

{context_data}
"#;

pub const REDUCE_SYSTEM_PROMPT: &str = "---Role---

You are a helpful assistant merging the findings of several analysts who each read part of a dataset.

---Goal---

Write a response in the target length and format that answers the user's question, built from the analyst reports below. The reports are ordered from most to least important.

Drop anything the reports do not support. If the reports do not answer the question, say so. Do not invent facts.

---Target response length and format---

{response_type}

---Analyst Reports---

{report_data}

Organize the answer into sections and commentary as the length and format call for. Write it in markdown.
";

/// Appended to the reduce prompt when answers may go beyond the data.
pub const GENERAL_KNOWLEDGE_INSTRUCTION: &str = "
The response may also draw on relevant real-world knowledge outside the dataset, but it must be marked with a verification tag [LLM: verify]. For example:
\"This is an example sentence supported by real-world knowledge [LLM: verify].\"
";

/// Fixed reply when no analyst point survives and general knowledge is off.
pub const NO_DATA_ANSWER: &str =
    "I am sorry but I am unable to answer this question given the provided data.";

/// A `{placeholder}` template, checked once at startup.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// Validate that every `required` placeholder occurs in `template`.
    pub fn new(template: impl Into<String>, required: &[&str]) -> Result<Self, SearchError> {
        let template = template.into();
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| !template.contains(&format!("{{{name}}}")))
            .collect();
        if !missing.is_empty() {
            return Err(SearchError::Template(format!(
                "missing placeholder(s): {}",
                missing
                    .iter()
                    .map(|n| format!("{{{n}}}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(Self { template })
    }

    /// Substitute placeholders in one pass.
    ///
    /// Values are inserted verbatim, so braces inside retrieved text are
    /// never treated as placeholders. Unknown `{...}` spans (such as the
    /// JSON example in the map prompt) are left alone.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let substituted = after.find('}').and_then(|close| {
                let name = &after[..close];
                values
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (close, *value))
            });
            match substituted {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Splices the rendered instruction into a transcript.
#[derive(Debug, Clone)]
pub struct PromptCompiler {
    template: PromptTemplate,
}

impl PromptCompiler {
    pub const REQUIRED: &'static [&'static str] = &["role", "response_type", "context_data"];

    pub fn new(template: impl Into<String>) -> Result<Self, SearchError> {
        Ok(Self {
            template: PromptTemplate::new(template, Self::REQUIRED)?,
        })
    }

    /// The compiler for the built-in local search prompt.
    pub fn local() -> Result<Self, SearchError> {
        Self::new(LOCAL_SEARCH_SYSTEM_PROMPT)
    }

    /// Compile `turns` into the transcript sent to the model.
    ///
    /// The first system turn supplies the role preamble. The result starts
    /// with the rendered instruction, followed by every non-system turn in
    /// its original order.
    pub fn compile(&self, turns: &[Message], context: &str, response_type: &str) -> Vec<Message> {
        let role = turns
            .iter()
            .find(|m| m.is_system())
            .map(|m| m.content.as_str())
            .unwrap_or(DEFAULT_ROLE);

        let instruction = self.template.render(&[
            ("role", role),
            ("response_type", response_type),
            ("context_data", context),
        ]);

        let mut compiled = Vec::with_capacity(turns.len() + 1);
        compiled.push(Message::system(instruction));
        compiled.extend(turns.iter().filter(|m| !m.is_system()).cloned());

        info!(
            target: "graphchat::audit",
            turns = compiled.len(),
            messages = ?compiled,
            context = %context,
            "Compiled search prompt"
        );
        compiled
    }
}
