//! Adaptive research orchestration ("deep search").
//!
//! Decomposes a question into sub-questions, works a FIFO queue of questions
//! (expand -> retrieve -> answer -> evaluate), lets evaluations add gap
//! questions, and forces a final synthesis ("beast mode") when the iteration
//! or token budget runs out before the original question is answered.
//!
//! [`ResearchMode::Sequential`] is the simpler schedule: sub-questions in
//! order, each answer judged against the original question, and synthesis
//! on the last iteration.

pub mod config;
pub mod memory;
pub mod observer;
pub mod orchestrator;
pub mod steps;
pub mod types;

use std::sync::Arc;

use crate::generator::Generator;
use crate::retriever::{CollectionHandle, Retriever};

pub use config::{ConfigError, ResearchConfig, ResearchMode};
pub use memory::{assemble_context, ResearchMemory};
pub use observer::{
    IterationEvent, JsonlProgressSink, ObserverError, ProgressCallback, ProgressWorker,
    ResearchObserver,
};
pub use orchestrator::{DeepSearchError, Phase, ResearchOrchestrator, ResearchState};
pub use types::*;

/// Run one research call with the default token estimator and no observer.
pub async fn deep_search(
    question: &str,
    collection: CollectionHandle,
    generator: Arc<dyn Generator>,
    retriever: Arc<dyn Retriever>,
    config: ResearchConfig,
) -> Result<DeepSearchResult, DeepSearchError> {
    ResearchOrchestrator::new(generator, retriever, config)
        .run(question, collection)
        .await
}
