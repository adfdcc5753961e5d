//! Per-call research configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// How questions are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchMode {
    /// FIFO queue: sub-questions first, then the original, with gap
    /// follow-ups appended. Only a complete answer to the original ends the
    /// loop early.
    #[default]
    Adaptive,
    /// Sub-questions in order, then follow-ups. Each answer is judged
    /// against the original question, and the last iteration always ends in
    /// synthesis.
    Sequential,
}

impl ResearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Adaptive => "adaptive",
            Self::Sequential => "sequential",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default)]
    pub mode: ResearchMode,
    /// Upper bound on processed questions (default: 3).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Approximate token budget across the whole call (default: 5000).
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Hits requested per search (default: 3).
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,
    /// Cap on sub-questions kept from decomposition (default: 3).
    #[serde(default = "default_max_sub_questions")]
    pub max_sub_questions: usize,
    /// Skip follow-ups that repeat a processed or queued question (default: true).
    #[serde(default = "default_dedupe_followups")]
    pub dedupe_followups: bool,
    /// Collection to search when none is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

fn default_max_iterations() -> usize {
    3
}
fn default_token_budget() -> usize {
    5000
}
fn default_results_per_query() -> usize {
    3
}
fn default_max_sub_questions() -> usize {
    3
}
fn default_dedupe_followups() -> bool {
    true
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            mode: ResearchMode::default(),
            max_iterations: default_max_iterations(),
            token_budget: default_token_budget(),
            results_per_query: default_results_per_query(),
            max_sub_questions: default_max_sub_questions(),
            dedupe_followups: default_dedupe_followups(),
            collection: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_iterations must be at least 1 (got {0})")]
    MaxIterations(usize),
    #[error("token_budget must be positive")]
    TokenBudget,
    #[error("results_per_query must be positive")]
    ResultsPerQuery,
    #[error("max_sub_questions must be positive")]
    MaxSubQuestions,
    #[error("question must not be empty")]
    EmptyQuestion,
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ResearchConfig {
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_token_budget(mut self, n: usize) -> Self {
        self.token_budget = n;
        self
    }

    pub fn with_mode(mut self, mode: ResearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations < 1 {
            return Err(ConfigError::MaxIterations(self.max_iterations));
        }
        if self.token_budget == 0 {
            return Err(ConfigError::TokenBudget);
        }
        if self.results_per_query == 0 {
            return Err(ConfigError::ResultsPerQuery);
        }
        if self.max_sub_questions == 0 {
            return Err(ConfigError::MaxSubQuestions);
        }
        Ok(())
    }

    /// Decomposition only runs when an iteration is left to close out the
    /// original question.
    pub fn decomposes(&self) -> bool {
        self.max_iterations > 1
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ResearchConfig::default();
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.token_budget, 5000);
        assert_eq!(cfg.results_per_query, 3);
        assert!(cfg.dedupe_followups);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = ResearchConfig::from_json_str(r#"{"max_iterations": 5}"#).unwrap();
        assert_eq!(cfg.max_iterations, 5);
        assert_eq!(cfg.token_budget, 5000);
    }

    #[test]
    fn mode_defaults_to_adaptive_and_parses_snake_case() {
        assert_eq!(ResearchConfig::default().mode, ResearchMode::Adaptive);
        let cfg = ResearchConfig::from_json_str(r#"{"mode": "sequential"}"#).unwrap();
        assert_eq!(cfg.mode, ResearchMode::Sequential);
        assert!(ResearchConfig::from_json_str(r#"{"mode": "random"}"#).is_err());
    }

    #[test]
    fn negative_budget_is_rejected_at_parse() {
        assert!(matches!(
            ResearchConfig::from_json_str(r#"{"token_budget": -1}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_values() {
        let cfg = ResearchConfig::default().with_max_iterations(0);
        assert!(matches!(cfg.validate(), Err(ConfigError::MaxIterations(0))));

        let cfg = ResearchConfig::default().with_token_budget(0);
        assert!(matches!(cfg.validate(), Err(ConfigError::TokenBudget)));
    }

    #[test]
    fn single_iteration_skips_decomposition() {
        assert!(!ResearchConfig::default().with_max_iterations(1).decomposes());
        assert!(ResearchConfig::default().decomposes());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ResearchConfig::from_json_file("/nonexistent/deepsearch.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/deepsearch.json"));
    }
}
