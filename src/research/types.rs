//! Record types for one research call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retriever::SearchHit;

// =============================================================================
// Questions
// =============================================================================

/// Where a queued question came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionOrigin {
    Original,
    SubQuestion,
    Gap,
}

impl QuestionOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::SubQuestion => "sub_question",
            Self::Gap => "gap",
        }
    }
}

/// A question on the research queue. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    text: String,
    origin: QuestionOrigin,
}

impl Question {
    pub fn original(text: impl Into<String>) -> Self {
        Self::new(text, QuestionOrigin::Original)
    }

    pub fn sub_question(text: impl Into<String>) -> Self {
        Self::new(text, QuestionOrigin::SubQuestion)
    }

    pub fn gap(text: impl Into<String>) -> Self {
        Self::new(text, QuestionOrigin::Gap)
    }

    fn new(text: impl Into<String>, origin: QuestionOrigin) -> Self {
        Self {
            text: text.into(),
            origin,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> QuestionOrigin {
        self.origin
    }

    pub fn is_original(&self) -> bool {
        self.origin == QuestionOrigin::Original
    }
}

// =============================================================================
// Evaluation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Complete,
    Incomplete,
}

/// Verdict on one `(question, answer)` pair.
///
/// A follow-up can only be attached to an incomplete verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    status: EvaluationStatus,
    suggested_followup: Option<String>,
}

impl EvaluationResult {
    pub fn complete() -> Self {
        Self {
            status: EvaluationStatus::Complete,
            suggested_followup: None,
        }
    }

    /// Blank follow-ups are normalized to `None`.
    pub fn incomplete(suggested_followup: Option<String>) -> Self {
        let suggested_followup = suggested_followup
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self {
            status: EvaluationStatus::Incomplete,
            suggested_followup,
        }
    }

    pub fn status(&self) -> EvaluationStatus {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == EvaluationStatus::Complete
    }

    pub fn suggested_followup(&self) -> Option<&str> {
        self.suggested_followup.as_deref()
    }
}

// =============================================================================
// Memory records
// =============================================================================

/// One search step: the question, the query actually sent, and what came back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    pub question: Question,
    pub expanded_query: String,
    pub hits: Vec<SearchHit>,
    /// Context string handed to the answer step.
    pub context_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerAttempt {
    pub question: Question,
    pub answer: String,
    /// `None` when the answer went straight to synthesis unjudged.
    #[serde(default)]
    pub evaluation: Option<EvaluationResult>,
}

// =============================================================================
// Research trail
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailKind {
    Decomposed,
    DecompositionFallback,
    Expanded,
    ExpansionFallback,
    Retrieved,
    RetrievalFailed,
    Answered,
    Evaluated,
    EvaluationFallback,
    FollowupQueued,
    FollowupSkipped,
    BudgetExhausted,
    BeastMode,
}

/// One append-only entry of the research trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailEntry {
    /// Iteration the entry belongs to (0 for decomposition).
    pub iteration: usize,
    pub kind: TrailKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<QuestionOrigin>,
    pub detail: String,
    /// Running token counter after the step.
    pub tokens_used: usize,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Result
// =============================================================================

/// Why the processing loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The original question was evaluated complete.
    Answered,
    MaxIterations,
    TokenBudget,
    QueueExhausted,
}

/// Final output of one research call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepSearchResult {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    /// Processed questions; the beast-mode step is not counted.
    pub iterations: usize,
    /// Gap questions that were processed, in processing order.
    pub gap_questions: Vec<String>,
    /// Sub-questions scheduled by decomposition (after any fallback).
    pub sub_questions: Vec<String>,
    pub search_history: Vec<SearchRecord>,
    pub answer_attempts: Vec<AnswerAttempt>,
    pub research_trail: Vec<TrailEntry>,
    pub tokens_used: usize,
    pub stop_reason: StopReason,
    pub beast_mode: bool,
}
