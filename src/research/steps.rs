//! One function per generator operation.
//!
//! Decompose, expand, and evaluate recover from both generator errors and
//! unparsable output by returning a fallback value with a reason. Answer and
//! synthesize have no meaningful fallback, so their generator errors surface.

use tracing::warn;

use crate::gateway::ProviderError;
use crate::generator::Generator;
use crate::parse::{
    parse_evaluation, parse_expanded_query, parse_sub_questions, strip_think_tags,
};
use crate::prompts::{self, PromptInstance};
use crate::tokens::TokenEstimator;

use super::types::EvaluationResult;

/// Value produced by a step plus the tokens it consumed.
#[derive(Debug, Clone)]
pub struct StepOutcome<T> {
    pub value: T,
    pub tokens: usize,
    /// Set when `value` is a fallback.
    pub fallback: Option<String>,
}

/// Error from a fatal step, with the tokens spent on the prompt.
#[derive(Debug)]
pub struct StepFailure {
    pub source: ProviderError,
    pub tokens: usize,
}

/// Call the generator; on success return the output and the combined
/// prompt + output estimate, on failure the error and the prompt estimate.
async fn call(
    generator: &dyn Generator,
    estimator: &dyn TokenEstimator,
    prompt: &PromptInstance,
) -> (Result<String, ProviderError>, usize) {
    let prompt_tokens = estimator.estimate(&prompt.to_text());
    match generator.generate(prompt).await {
        Ok(raw) => {
            let tokens = prompt_tokens + estimator.estimate(&raw);
            (Ok(raw), tokens)
        }
        Err(e) => (Err(e), prompt_tokens),
    }
}

/// Recoverable step: parse on success, fall back on generator error.
async fn recoverable<T>(
    generator: &dyn Generator,
    estimator: &dyn TokenEstimator,
    prompt: PromptInstance,
    fallback: impl FnOnce() -> T,
    parse: impl FnOnce(&str) -> (T, Option<String>),
) -> StepOutcome<T> {
    let (result, tokens) = call(generator, estimator, &prompt).await;
    match result {
        Ok(raw) => {
            let (value, fallback) = parse(&raw);
            StepOutcome {
                value,
                tokens,
                fallback,
            }
        }
        Err(e) => {
            warn!(
                operation = %prompt.operation,
                code = e.code(),
                "generator failed, using fallback: {e}"
            );
            StepOutcome {
                value: fallback(),
                tokens,
                fallback: Some(format!("generator error: {e}")),
            }
        }
    }
}

pub async fn decompose(
    generator: &dyn Generator,
    estimator: &dyn TokenEstimator,
    question: &str,
    max_sub_questions: usize,
) -> StepOutcome<Vec<String>> {
    recoverable(
        generator,
        estimator,
        prompts::render_decompose(question, max_sub_questions),
        || vec![question.to_string()],
        |raw| parse_sub_questions(raw, question, max_sub_questions).into_parts(),
    )
    .await
}

pub async fn expand_query(
    generator: &dyn Generator,
    estimator: &dyn TokenEstimator,
    question: &str,
) -> StepOutcome<String> {
    recoverable(
        generator,
        estimator,
        prompts::render_expand(question),
        || question.to_string(),
        |raw| parse_expanded_query(raw, question).into_parts(),
    )
    .await
}

pub async fn answer(
    generator: &dyn Generator,
    estimator: &dyn TokenEstimator,
    question: &str,
    context: &str,
) -> Result<StepOutcome<String>, StepFailure> {
    let prompt = prompts::render_answer(question, context);
    fatal(generator, estimator, &prompt).await
}

pub async fn evaluate(
    generator: &dyn Generator,
    estimator: &dyn TokenEstimator,
    question: &str,
    answer: &str,
) -> StepOutcome<EvaluationResult> {
    recoverable(
        generator,
        estimator,
        prompts::render_evaluate(question, answer),
        || EvaluationResult::incomplete(None),
        |raw| parse_evaluation(raw).into_parts(),
    )
    .await
}

pub async fn synthesize(
    generator: &dyn Generator,
    estimator: &dyn TokenEstimator,
    question: &str,
    evidence: &str,
    attempts: &str,
) -> Result<StepOutcome<String>, StepFailure> {
    let prompt = prompts::render_beast(question, evidence, attempts);
    fatal(generator, estimator, &prompt).await
}

async fn fatal(
    generator: &dyn Generator,
    estimator: &dyn TokenEstimator,
    prompt: &PromptInstance,
) -> Result<StepOutcome<String>, StepFailure> {
    let (result, tokens) = call(generator, estimator, prompt).await;
    match result {
        Ok(raw) => Ok(StepOutcome {
            value: strip_think_tags(&raw),
            tokens,
            fallback: None,
        }),
        Err(source) => Err(StepFailure { source, tokens }),
    }
}
