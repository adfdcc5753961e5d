//! Per-call research memory: the work queue, everything gathered so far,
//! and the token counter.
//!
//! One `ResearchMemory` belongs to exactly one research call and is dropped
//! with it. Nothing in here is shared, so there is no locking.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;

use crate::retriever::SearchHit;
use crate::tokens::TokenEstimator;

use super::types::{AnswerAttempt, Question, QuestionOrigin, SearchRecord, TrailEntry, TrailKind};

#[derive(Debug, Default)]
pub struct ResearchMemory {
    queue: VecDeque<Question>,
    sub_questions: Vec<Question>,
    search_history: Vec<SearchRecord>,
    answer_attempts: Vec<AnswerAttempt>,
    trail: Vec<TrailEntry>,
    gap_questions: Vec<String>,
    processed: HashSet<String>,
    tokens_used: usize,
    iteration: usize,
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

impl ResearchMemory {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Queue
    // -------------------------------------------------------------------------

    pub fn enqueue_back(&mut self, question: Question) {
        self.queue.push_back(question);
    }

    pub fn pop_front(&mut self) -> Option<Question> {
        self.queue.pop_front()
    }

    /// Put sub-questions at the front in their given order, ahead of anything
    /// already queued, then re-enqueue `original` at the back.
    pub fn schedule_decomposition(&mut self, subs: &[String], original: Question) {
        self.schedule_sub_questions(subs);
        self.queue.push_back(original);
    }

    /// Put sub-questions at the front in their given order.
    pub fn schedule_sub_questions(&mut self, subs: &[String]) {
        for text in subs.iter().rev() {
            self.queue.push_front(Question::sub_question(text.clone()));
        }
        self.sub_questions
            .extend(subs.iter().map(|s| Question::sub_question(s.clone())));
    }

    pub fn queue(&self) -> &VecDeque<Question> {
        &self.queue
    }

    /// Whether `text` matches a processed or still-queued question, ignoring
    /// case and surrounding whitespace.
    pub fn is_known(&self, text: &str) -> bool {
        let key = normalize(text);
        self.processed.contains(&key) || self.queue.iter().any(|q| normalize(q.text()) == key)
    }

    pub fn mark_processed(&mut self, question: &Question) {
        self.processed.insert(normalize(question.text()));
        if question.origin() == QuestionOrigin::Gap {
            self.gap_questions.push(question.text().to_string());
        }
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    pub fn add_tokens(&mut self, tokens: usize) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }

    pub fn tokens_used(&self) -> usize {
        self.tokens_used
    }

    pub fn remaining(&self, budget: usize) -> usize {
        budget.saturating_sub(self.tokens_used)
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn complete_iteration(&mut self) {
        self.iteration += 1;
    }

    // -------------------------------------------------------------------------
    // Records
    // -------------------------------------------------------------------------

    pub fn push_search(&mut self, record: SearchRecord) {
        self.search_history.push(record);
    }

    pub fn push_attempt(&mut self, attempt: AnswerAttempt) {
        self.answer_attempts.push(attempt);
    }

    pub fn record(
        &mut self,
        iteration: usize,
        kind: TrailKind,
        question: Option<&Question>,
        detail: impl Into<String>,
    ) {
        self.trail.push(TrailEntry {
            iteration,
            kind,
            question: question.map(|q| q.text().to_string()),
            origin: question.map(Question::origin),
            detail: detail.into(),
            tokens_used: self.tokens_used,
            timestamp: Utc::now(),
        });
    }

    pub fn sub_questions(&self) -> &[Question] {
        &self.sub_questions
    }

    pub fn search_history(&self) -> &[SearchRecord] {
        &self.search_history
    }

    pub fn answer_attempts(&self) -> &[AnswerAttempt] {
        &self.answer_attempts
    }

    pub fn trail(&self) -> &[TrailEntry] {
        &self.trail
    }

    pub fn gap_questions(&self) -> &[String] {
        &self.gap_questions
    }

    /// Context over every earlier search plus `current`, newest first.
    pub fn context_for(
        &self,
        current: &[SearchHit],
        estimator: &dyn TokenEstimator,
        remaining: usize,
    ) -> String {
        let batches = self
            .search_history
            .iter()
            .map(|r| r.hits.as_slice())
            .chain(std::iter::once(current));
        assemble_context(batches, estimator, remaining)
    }

    /// Evidence for the forced final synthesis: every retrieved hit, newest
    /// first, under `budget`.
    pub fn evidence(&self, estimator: &dyn TokenEstimator, budget: usize) -> String {
        let batches = self.search_history.iter().map(|r| r.hits.as_slice());
        assemble_context(batches, estimator, budget)
    }

    /// All prior answers, oldest first.
    pub fn attempts_digest(&self) -> String {
        self.answer_attempts
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let status = match &a.evaluation {
                    Some(e) if e.is_complete() => "complete",
                    Some(_) => "incomplete",
                    None => "not evaluated",
                };
                format!(
                    "Attempt {} ({}, {status})\nQ: {}\nA: {}",
                    i + 1,
                    a.question.origin().as_str(),
                    a.question.text(),
                    a.answer.trim()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub(crate) fn into_parts(self) -> MemoryParts {
        MemoryParts {
            sub_questions: self.sub_questions,
            search_history: self.search_history,
            answer_attempts: self.answer_attempts,
            trail: self.trail,
            gap_questions: self.gap_questions,
            tokens_used: self.tokens_used,
            iterations: self.iteration,
        }
    }
}

pub(crate) struct MemoryParts {
    pub sub_questions: Vec<Question>,
    pub search_history: Vec<SearchRecord>,
    pub answer_attempts: Vec<AnswerAttempt>,
    pub trail: Vec<TrailEntry>,
    pub gap_questions: Vec<String>,
    pub tokens_used: usize,
    pub iterations: usize,
}

fn fragment(hit: &SearchHit) -> String {
    format!("[{}] {}", hit.id, hit.text.trim())
}

/// Assemble a context string from hit batches given oldest first.
///
/// Fragments are taken from the newest hit backwards and kept while the
/// running estimate stays within `remaining`; the first fragment that does
/// not fit ends assembly. A zero budget yields an empty string.
pub fn assemble_context<'a, I>(
    batches: I,
    estimator: &dyn TokenEstimator,
    remaining: usize,
) -> String
where
    I: IntoIterator<Item = &'a [SearchHit]>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut used = 0usize;
    let mut fragments = Vec::new();

    for hit in batches
        .into_iter()
        .rev()
        .flat_map(|batch| batch.iter().rev())
    {
        let text = fragment(hit);
        let cost = estimator.estimate(&text);
        if used + cost > remaining {
            break;
        }
        used += cost;
        fragments.push(text);
    }

    fragments.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::types::EvaluationResult;
    use crate::tokens::HeuristicEstimator;

    fn hits(ids: &[&str]) -> Vec<SearchHit> {
        ids.iter().map(|id| SearchHit::new(*id, "abcd")).collect()
    }

    #[test]
    fn sub_questions_jump_queue_and_original_goes_last() {
        let mut mem = ResearchMemory::new();
        mem.enqueue_back(Question::gap("earlier"));
        mem.schedule_decomposition(&["Q1".into(), "Q2".into()], Question::original("Q"));

        let order: Vec<_> = mem.queue().iter().map(|q| q.text().to_string()).collect();
        assert_eq!(order, vec!["Q1", "Q2", "earlier", "Q"]);
        assert!(mem.queue().back().is_some_and(Question::is_original));
        assert_eq!(mem.sub_questions().len(), 2);
    }

    #[test]
    fn known_questions_ignore_case_and_whitespace() {
        let mut mem = ResearchMemory::new();
        mem.enqueue_back(Question::original("What is X?"));
        assert!(mem.is_known("  what is x? "));

        let q = mem.pop_front().unwrap();
        mem.mark_processed(&q);
        assert!(mem.is_known("WHAT IS X?"));
        assert!(!mem.is_known("What is Y?"));
    }

    #[test]
    fn only_gap_questions_are_listed_as_gaps() {
        let mut mem = ResearchMemory::new();
        mem.mark_processed(&Question::sub_question("s"));
        mem.mark_processed(&Question::gap("g"));
        assert_eq!(mem.gap_questions(), &["g".to_string()]);
    }

    #[test]
    fn context_is_newest_first() {
        let old = hits(&["a1", "a2"]);
        let new = hits(&["b1"]);
        let ctx = assemble_context(
            [old.as_slice(), new.as_slice()],
            &HeuristicEstimator,
            1000,
        );
        assert_eq!(ctx, "[b1] abcd\n\n[a2] abcd\n\n[a1] abcd");
    }

    #[test]
    fn context_stops_at_first_fragment_over_budget() {
        // "[xx] abcd" is 9 chars -> 3 tokens each.
        let batch = hits(&["a1", "a2", "a3"]);
        let ctx = assemble_context([batch.as_slice()], &HeuristicEstimator, 7);
        assert_eq!(ctx, "[a3] abcd\n\n[a2] abcd");
    }

    #[test]
    fn zero_budget_yields_empty_context() {
        let batch = hits(&["a1"]);
        assert_eq!(
            assemble_context([batch.as_slice()], &HeuristicEstimator, 0),
            ""
        );
    }

    #[test]
    fn remaining_saturates() {
        let mut mem = ResearchMemory::new();
        mem.add_tokens(7);
        assert_eq!(mem.remaining(5), 0);
        assert_eq!(mem.remaining(10), 3);
    }

    #[test]
    fn attempts_digest_lists_every_answer() {
        let mut mem = ResearchMemory::new();
        mem.push_attempt(AnswerAttempt {
            question: Question::sub_question("Q1"),
            answer: "A1".into(),
            evaluation: Some(EvaluationResult::complete()),
        });
        mem.push_attempt(AnswerAttempt {
            question: Question::original("Q"),
            answer: "A".into(),
            evaluation: Some(EvaluationResult::incomplete(None)),
        });
        let digest = mem.attempts_digest();
        assert!(digest.contains("Attempt 1 (sub_question, complete)\nQ: Q1\nA: A1"));
        assert!(digest.contains("Attempt 2 (original, incomplete)"));
    }
}
