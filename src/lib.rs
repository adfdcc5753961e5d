#![forbid(unsafe_code)]

//! # deepsearch-harness
//!
//! Answers a research question by iterating over a document collection with
//! an LLM: decompose the question, expand each sub-question into a search
//! query, retrieve evidence, answer from that evidence only, and let a
//! self-evaluation decide whether to chase a gap or close out the original
//! question. Work is bounded by an iteration limit and an approximate token
//! budget; when either runs out first, a forced "beast mode" synthesis
//! produces the final answer from everything gathered.
//!
//! The loop talks to two capabilities, [`Generator`] and [`Retriever`], so
//! any chat backend or search service can be plugged in.

pub mod gateway;
pub mod generator;
pub mod parse;
pub mod prompts;
pub mod research;
pub mod retriever;
pub mod tokens;

pub use gateway::{Attribution, ChatGateway, ChatModel, ProviderError, ProviderGateway};
pub use generator::{GatewayGenerator, Generator};
pub use research::{
    deep_search, ConfigError, DeepSearchError, DeepSearchResult, IterationEvent,
    JsonlProgressSink, ProgressWorker, ResearchConfig, ResearchMode, ResearchObserver,
    ResearchOrchestrator, StopReason,
};
pub use retriever::{CollectionHandle, HttpRetriever, RetrievalError, Retriever, SearchHit};
pub use tokens::{HeuristicEstimator, TiktokenEstimator, TokenEstimator};
