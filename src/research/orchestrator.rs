//! The deep-search state machine.
//!
//! ```text
//! Init -> Decomposing -> Processing(i) -> { Processing(i+1) | BeastMode } -> Done
//! ```
//!
//! Every collaborator call is awaited before the next one is issued, so one
//! run never has more than one retrieval or generation in flight. Callers
//! that want to stop early drive [`ResearchOrchestrator::step`] themselves
//! and simply stop calling it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::gateway::ProviderError;
use crate::generator::Generator;
use crate::prompts::Operation;
use crate::retriever::{CollectionHandle, Retriever};
use crate::tokens::{TiktokenEstimator, TokenEstimator};

use super::config::{ConfigError, ResearchConfig, ResearchMode};
use super::memory::ResearchMemory;
use super::observer::{IterationEvent, ResearchObserver};
use super::steps::{self, StepFailure};
use super::types::{
    AnswerAttempt, DeepSearchResult, EvaluationResult, Question, SearchRecord, StopReason,
    TrailKind,
};

#[derive(Debug, thiserror::Error)]
pub enum DeepSearchError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{operation} generation failed: {source}")]
    Generation {
        operation: Operation,
        source: ProviderError,
    },
}

impl DeepSearchError {
    fn generation(operation: Operation, failure: StepFailure) -> Self {
        Self::Generation {
            operation,
            source: failure.source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Decomposing,
    Processing,
    BeastMode,
    Done,
}

/// State of one research call between steps.
#[derive(Debug)]
pub struct ResearchState {
    id: Uuid,
    question: Question,
    collection: CollectionHandle,
    phase: Phase,
    memory: ResearchMemory,
    stop_reason: Option<StopReason>,
    answer: Option<String>,
    beast_mode: bool,
}

impl ResearchState {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn memory(&self) -> &ResearchMemory {
        &self.memory
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Final result, once the run reached [`Phase::Done`].
    pub fn into_result(self) -> Option<DeepSearchResult> {
        self.is_done().then(move || self.finish())
    }

    fn finish(self) -> DeepSearchResult {
        let parts = self.memory.into_parts();
        DeepSearchResult {
            id: self.id,
            question: self.question.text().to_string(),
            answer: self.answer.unwrap_or_default(),
            iterations: parts.iterations,
            gap_questions: parts.gap_questions,
            sub_questions: parts
                .sub_questions
                .iter()
                .map(|q| q.text().to_string())
                .collect(),
            search_history: parts.search_history,
            answer_attempts: parts.answer_attempts,
            research_trail: parts.trail,
            tokens_used: parts.tokens_used,
            stop_reason: self.stop_reason.unwrap_or(StopReason::QueueExhausted),
            beast_mode: self.beast_mode,
        }
    }

    fn stop(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
        self.phase = Phase::BeastMode;
    }
}

pub struct ResearchOrchestrator {
    generator: Arc<dyn Generator>,
    retriever: Arc<dyn Retriever>,
    estimator: Arc<dyn TokenEstimator>,
    observer: Option<Arc<dyn ResearchObserver>>,
    config: ResearchConfig,
}

impl ResearchOrchestrator {
    pub fn new(
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            generator,
            retriever,
            estimator: Arc::new(TiktokenEstimator),
            observer: None,
            config,
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResearchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Validate inputs and create the initial state. No collaborator is called.
    pub fn start(
        &self,
        question: &str,
        collection: CollectionHandle,
    ) -> Result<ResearchState, ConfigError> {
        self.config.validate()?;
        let question = question.trim();
        if question.is_empty() {
            return Err(ConfigError::EmptyQuestion);
        }
        Ok(ResearchState {
            id: Uuid::new_v4(),
            question: Question::original(question),
            collection,
            phase: Phase::Init,
            memory: ResearchMemory::new(),
            stop_reason: None,
            answer: None,
            beast_mode: false,
        })
    }

    /// Run one research call to completion.
    pub async fn run(
        &self,
        question: &str,
        collection: CollectionHandle,
    ) -> Result<DeepSearchResult, DeepSearchError> {
        let mut state = self.start(question, collection)?;
        let span = info_span!("deep_search", run_id = %state.id);

        async move {
            info!(
                mode = self.config.mode.as_str(),
                max_iterations = self.config.max_iterations,
                token_budget = self.config.token_budget,
                "starting deep search"
            );
            while !state.is_done() {
                state = self.step(state).await?;
            }
            let result = state.finish();
            info!(
                iterations = result.iterations,
                tokens_used = result.tokens_used,
                beast_mode = result.beast_mode,
                stop_reason = ?result.stop_reason,
                "deep search finished"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Advance the state machine by one transition. A state in
    /// [`Phase::Done`] is returned unchanged.
    pub async fn step(&self, mut state: ResearchState) -> Result<ResearchState, DeepSearchError> {
        match state.phase {
            Phase::Init => {
                state.memory.enqueue_back(state.question.clone());
                state.phase = if self.config.decomposes() {
                    Phase::Decomposing
                } else {
                    debug!("single iteration budget, skipping decomposition");
                    Phase::Processing
                };
            }
            Phase::Decomposing => {
                self.decompose(&mut state).await;
                state.phase = Phase::Processing;
            }
            Phase::Processing => self.process_next(&mut state).await?,
            Phase::BeastMode => self.beast_mode(&mut state).await?,
            Phase::Done => {}
        }
        Ok(state)
    }

    async fn decompose(&self, state: &mut ResearchState) {
        let memory = &mut state.memory;
        let Some(original) = memory.pop_front() else {
            return;
        };

        let outcome = steps::decompose(
            self.generator.as_ref(),
            self.estimator.as_ref(),
            original.text(),
            self.config.max_sub_questions,
        )
        .await;
        memory.add_tokens(outcome.tokens);

        match &outcome.fallback {
            Some(reason) => {
                warn!(reason = %reason, "decomposition fell back to the original question");
                memory.record(0, TrailKind::DecompositionFallback, Some(&original), reason);
            }
            None => {
                info!(sub_questions = outcome.value.len(), "question decomposed");
                memory.record(
                    0,
                    TrailKind::Decomposed,
                    Some(&original),
                    outcome.value.join(" | "),
                );
            }
        }

        match self.config.mode {
            ResearchMode::Adaptive => memory.schedule_decomposition(&outcome.value, original),
            ResearchMode::Sequential => memory.schedule_sub_questions(&outcome.value),
        }
        debug!(queue_len = memory.queue().len(), "sub-questions scheduled");
    }

    async fn process_next(&self, state: &mut ResearchState) -> Result<(), DeepSearchError> {
        if state.memory.iteration() >= self.config.max_iterations {
            info!("iteration limit reached");
            state.stop(StopReason::MaxIterations);
            return Ok(());
        }
        let Some(question) = state.memory.pop_front() else {
            info!("queue exhausted without a complete answer");
            state.stop(StopReason::QueueExhausted);
            return Ok(());
        };

        let iteration = state.memory.iteration() + 1;
        let collection = state.collection.clone();
        let memory = &mut state.memory;
        let generator = self.generator.as_ref();
        let estimator = self.estimator.as_ref();

        info!(
            iteration,
            origin = question.origin().as_str(),
            question = question.text(),
            "processing question"
        );

        // Expand.
        let expansion = steps::expand_query(generator, estimator, question.text()).await;
        memory.add_tokens(expansion.tokens);
        match &expansion.fallback {
            Some(reason) => {
                warn!(reason = %reason, "query expansion fell back to the question text");
                memory.record(iteration, TrailKind::ExpansionFallback, Some(&question), reason);
            }
            None => memory.record(
                iteration,
                TrailKind::Expanded,
                Some(&question),
                &expansion.value,
            ),
        }
        let query = expansion.value;

        // Retrieve.
        let limit = self.config.results_per_query;
        let hits = match self.retriever.search(&collection, &query, limit).await {
            Ok(mut hits) => {
                hits.truncate(limit);
                memory.record(
                    iteration,
                    TrailKind::Retrieved,
                    Some(&question),
                    format!("{} hits for {query:?}", hits.len()),
                );
                hits
            }
            Err(e) => {
                warn!(collection = %collection, "retrieval failed, continuing without evidence: {e}");
                memory.record(
                    iteration,
                    TrailKind::RetrievalFailed,
                    Some(&question),
                    e.to_string(),
                );
                Vec::new()
            }
        };

        let hit_count = hits.len();

        // Answer.
        let remaining = memory.remaining(self.config.token_budget);
        let context = memory.context_for(&hits, estimator, remaining);
        debug!(remaining, context_chars = context.len(), "context assembled");

        let answer = steps::answer(generator, estimator, question.text(), &context)
            .await
            .map_err(|f| DeepSearchError::generation(Operation::Answer, f))?;
        memory.add_tokens(answer.tokens);
        memory.record(
            iteration,
            TrailKind::Answered,
            Some(&question),
            format!("{} chars", answer.value.len()),
        );

        let sequential = self.config.mode == ResearchMode::Sequential;

        // The last sequential iteration goes straight to synthesis.
        if sequential && iteration == self.config.max_iterations {
            memory.push_search(SearchRecord {
                question: question.clone(),
                expanded_query: query.clone(),
                hits,
                context_text: context,
            });
            memory.push_attempt(AnswerAttempt {
                question: question.clone(),
                answer: answer.value,
                evaluation: None,
            });
            memory.mark_processed(&question);
            memory.complete_iteration();
            let tokens_used = memory.tokens_used();
            let queue_len = memory.queue().len();
            info!(iteration, "final sequential iteration, forcing synthesis");
            state.stop(StopReason::MaxIterations);

            self.notify(IterationEvent {
                run_id: state.id,
                iteration,
                question: question.text().to_string(),
                origin: question.origin(),
                expanded_query: query,
                hits: hit_count,
                status: None,
                suggested_followup: None,
                followup_queued: false,
                tokens_used,
                queue_len,
                timestamp: Utc::now(),
            })
            .await;
            return Ok(());
        }

        // Evaluate. Sequential runs judge every answer against the original.
        let judged = if sequential {
            state.question.text()
        } else {
            question.text()
        };
        let evaluation = steps::evaluate(generator, estimator, judged, &answer.value).await;
        memory.add_tokens(evaluation.tokens);
        match &evaluation.fallback {
            Some(reason) => {
                warn!(reason = %reason, "evaluation fell back to incomplete");
                memory.record(iteration, TrailKind::EvaluationFallback, Some(&question), reason);
            }
            None => memory.record(
                iteration,
                TrailKind::Evaluated,
                Some(&question),
                if evaluation.value.is_complete() {
                    "complete"
                } else {
                    "incomplete"
                },
            ),
        }
        let evaluation = evaluation.value;

        memory.push_search(SearchRecord {
            question: question.clone(),
            expanded_query: query.clone(),
            hits,
            context_text: context,
        });
        memory.push_attempt(AnswerAttempt {
            question: question.clone(),
            answer: answer.value.clone(),
            evaluation: Some(evaluation.clone()),
        });
        memory.mark_processed(&question);

        // Branch.
        let followup_queued = if sequential {
            self.schedule_sequential(memory, iteration, &state.question, &evaluation)
        } else {
            self.schedule_gap(memory, iteration, &evaluation)
        };

        memory.complete_iteration();
        let tokens_used = memory.tokens_used();
        let queue_len = memory.queue().len();

        let answered = evaluation.is_complete() && (sequential || question.is_original());
        if answered {
            info!(iteration, "original question answered");
            state.answer = Some(answer.value);
            state.stop_reason = Some(StopReason::Answered);
            state.phase = Phase::Done;
        } else if tokens_used >= self.config.token_budget {
            info!(tokens_used, "token budget exhausted");
            state.memory.record(
                iteration,
                TrailKind::BudgetExhausted,
                None,
                format!("{tokens_used} of {}", self.config.token_budget),
            );
            state.stop(StopReason::TokenBudget);
        }

        self.notify(IterationEvent {
            run_id: state.id,
            iteration,
            question: question.text().to_string(),
            origin: question.origin(),
            expanded_query: query,
            hits: hit_count,
            status: Some(evaluation.status()),
            suggested_followup: evaluation.suggested_followup().map(str::to_string),
            followup_queued,
            tokens_used,
            queue_len,
            timestamp: Utc::now(),
        })
        .await;

        Ok(())
    }

    /// Adaptive follow-up: append the suggested gap question unless it
    /// repeats a known one.
    fn schedule_gap(
        &self,
        memory: &mut ResearchMemory,
        iteration: usize,
        evaluation: &EvaluationResult,
    ) -> bool {
        let Some(followup) = evaluation.suggested_followup() else {
            return false;
        };
        let gap = Question::gap(followup);
        if self.config.dedupe_followups && memory.is_known(followup) {
            debug!(followup, "follow-up repeats a known question");
            memory.record(iteration, TrailKind::FollowupSkipped, Some(&gap), "duplicate");
            return false;
        }
        memory.record(iteration, TrailKind::FollowupQueued, Some(&gap), "");
        memory.enqueue_back(gap);
        true
    }

    /// Sequential follow-up: pending sub-questions come first; after them the
    /// suggested follow-up, or the original question when there is none.
    fn schedule_sequential(
        &self,
        memory: &mut ResearchMemory,
        iteration: usize,
        original: &Question,
        evaluation: &EvaluationResult,
    ) -> bool {
        let followup = evaluation.suggested_followup();
        if !memory.queue().is_empty() {
            if let Some(followup) = followup {
                memory.record(
                    iteration,
                    TrailKind::FollowupSkipped,
                    Some(&Question::gap(followup)),
                    "sub-questions pending",
                );
            }
            return false;
        }
        match followup {
            Some(followup) => {
                let gap = Question::gap(followup);
                memory.record(iteration, TrailKind::FollowupQueued, Some(&gap), "");
                memory.enqueue_back(gap);
                true
            }
            None => {
                debug!("no follow-up suggested, revisiting the original question");
                memory.enqueue_back(original.clone());
                false
            }
        }
    }

    async fn beast_mode(&self, state: &mut ResearchState) -> Result<(), DeepSearchError> {
        // The forced step may overshoot: evidence is trimmed against the whole
        // budget, not what is left of it.
        let estimator = self.estimator.as_ref();
        let evidence = state.memory.evidence(estimator, self.config.token_budget);
        let attempts = state.memory.attempts_digest();

        info!(
            reason = ?state.stop_reason,
            evidence_chars = evidence.len(),
            attempts = state.memory.answer_attempts().len(),
            "entering beast mode"
        );

        let synthesis = steps::synthesize(
            self.generator.as_ref(),
            estimator,
            state.question.text(),
            &evidence,
            &attempts,
        )
        .await
        .map_err(|f| DeepSearchError::generation(Operation::Beast, f))?;

        state.memory.add_tokens(synthesis.tokens);
        let iteration = state.memory.iteration();
        state.memory.record(
            iteration,
            TrailKind::BeastMode,
            Some(&state.question),
            format!("{} chars", synthesis.value.len()),
        );
        state.answer = Some(synthesis.value);
        state.beast_mode = true;
        state.phase = Phase::Done;
        Ok(())
    }

    async fn notify(&self, event: IterationEvent) {
        if let Some(observer) = &self.observer {
            if let Err(e) = observer.on_iteration(&event).await {
                warn!(iteration = event.iteration, "progress observer failed: {e}");
            }
        }
    }
}
