//! Prompt templates for the research operations.
//!
//! Each [`Operation`] owns exactly one template. Rendering is single-pass so
//! user text containing `{placeholder}`-looking strings is never re-expanded.

use serde::{Deserialize, Serialize};

use crate::gateway::Message;

// =============================================================================
// Operations
// =============================================================================

/// The closed set of generator operations the research loop performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Decompose,
    Expand,
    Answer,
    Evaluate,
    Beast,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decompose => "decompose",
            Self::Expand => "expand",
            Self::Answer => "answer",
            Self::Evaluate => "evaluate",
            Self::Beast => "beast",
        }
    }

    /// Static caller tag used for gateway attribution.
    pub fn caller(self) -> &'static str {
        match self {
            Self::Decompose => "research::decompose",
            Self::Expand => "research::expand",
            Self::Answer => "research::answer",
            Self::Evaluate => "research::evaluate",
            Self::Beast => "research::beast",
        }
    }

    pub fn template(self) -> PromptTemplate {
        match self {
            Self::Decompose => DECOMPOSE,
            Self::Expand => EXPAND,
            Self::Answer => ANSWER,
            Self::Evaluate => EVALUATE,
            Self::Beast => BEAST,
        }
    }

    pub fn temperature(self) -> f32 {
        match self {
            Self::Decompose => 0.3,
            Self::Expand => 0.2,
            Self::Answer => 0.1,
            Self::Evaluate => 0.0,
            Self::Beast => 0.3,
        }
    }

    pub fn max_output_tokens(self) -> u32 {
        match self {
            Self::Decompose => 512,
            Self::Expand => 128,
            Self::Answer => 1024,
            Self::Evaluate => 512,
            Self::Beast => 2048,
        }
    }

    /// Whether the operation asks the provider for a JSON object.
    pub fn wants_json(self) -> bool {
        matches!(self, Self::Evaluate)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Templates
// =============================================================================

/// A prompt template with `{placeholder}` slots.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

/// Rendered prompt ready for a generator.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub operation: Operation,
    pub template_slug: &'static str,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }

    /// Flattened single-string form, used for token estimation and
    /// prompt-only backends.
    pub fn to_text(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

/// Escape XML special characters so inputs cannot break out of their tags.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Substitute `{key}` slots in one pass. Unknown slots are left verbatim.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (close, *v))
        });
        match replaced {
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

impl PromptTemplate {
    fn render(&self, operation: Operation, values: &[(&str, &str)]) -> PromptInstance {
        let escaped: Vec<(&str, String)> = values
            .iter()
            .map(|(k, v)| (*k, escape_xml_chars(v.trim())))
            .collect();
        let pairs: Vec<(&str, &str)> = escaped.iter().map(|(k, v)| (*k, v.as_str())).collect();

        PromptInstance {
            operation,
            template_slug: self.slug,
            system: fill(self.system, &pairs).trim().to_string(),
            user: fill(self.user, &pairs).trim().to_string(),
        }
    }
}

pub const DECOMPOSE: PromptTemplate = PromptTemplate {
    slug: "decompose_v1",
    system: r#"You are a research assistant breaking down complex questions. Identify up to {max_sub_questions} sub-questions that together would help answer the main question. Keep each sub-question specific, relevant, and phrased as a question."#,
    user: r#"<question>{question}</question>

Output the sub-questions as a numbered list, one per line, and nothing else."#,
};

pub const EXPAND: PromptTemplate = PromptTemplate {
    slug: "expand_v1",
    system: r#"You are a search query optimizer. Expand the query with synonyms, alternative terminology, and closely related concepts so a document search finds more relevant passages. Keep it brief."#,
    user: r#"<query>{question}</query>

Output only the expanded query on a single line."#,
};

pub const ANSWER: PromptTemplate = PromptTemplate {
    slug: "answer_v1",
    system: r#"You are a knowledgeable assistant answering questions from retrieved context. Use only information present in the context. If the context does not contain the answer, say what is missing instead of guessing."#,
    user: r#"<question>{question}</question>

<context>
{context}
</context>

Answer:"#,
};

pub const EVALUATE: PromptTemplate = PromptTemplate {
    slug: "evaluate_v1",
    system: r#"You evaluate answers to research questions against three criteria:
1. relevance: does the answer directly address the question?
2. completeness: does it cover every key aspect of the question?
3. specific_facts: does it use concrete facts (names, numbers, dates) rather than generalities?
The answer is complete only if all three pass. If it is incomplete, suggest one follow-up question that would fill the biggest gap.

Output only JSON:
{"relevance": "pass|fail", "completeness": "pass|fail", "specific_facts": "pass|fail", "status": "complete|incomplete", "suggested_followup": "question or null"}"#,
    user: r#"<question>{question}</question>

<answer>
{answer}
</answer>

json:"#,
};

pub const BEAST: PromptTemplate = PromptTemplate {
    slug: "beast_v1",
    system: r#"You are a research specialist producing the best possible final answer from everything gathered so far. Review all evidence and every previous answer attempt, reconcile them, and write one comprehensive, authoritative answer to the original question. Prefer specific facts from the evidence."#,
    user: r#"<original_question>{question}</original_question>

<evidence>
{evidence}
</evidence>

<previous_attempts>
{attempts}
</previous_attempts>

Final answer:"#,
};

pub fn render_decompose(question: &str, max_sub_questions: usize) -> PromptInstance {
    let max = max_sub_questions.to_string();
    DECOMPOSE.render(
        Operation::Decompose,
        &[("question", question), ("max_sub_questions", &max)],
    )
}

pub fn render_expand(question: &str) -> PromptInstance {
    EXPAND.render(Operation::Expand, &[("question", question)])
}

pub fn render_answer(question: &str, context: &str) -> PromptInstance {
    ANSWER.render(
        Operation::Answer,
        &[("question", question), ("context", context)],
    )
}

pub fn render_evaluate(question: &str, answer: &str) -> PromptInstance {
    EVALUATE.render(
        Operation::Evaluate,
        &[("question", question), ("answer", answer)],
    )
}

pub fn render_beast(question: &str, evidence: &str, attempts: &str) -> PromptInstance {
    BEAST.render(
        Operation::Beast,
        &[
            ("question", question),
            ("evidence", evidence),
            ("attempts", attempts),
        ],
    )
}

// =============================================================================
// TESTS
// =============================================================================
