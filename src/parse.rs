//! Fallible parsers for generator output.
//!
//! Every parser returns a [`ParseOutcome`]: either the parsed value or a
//! fallback value plus the reason parsing failed. The research loop records
//! the reason in its trail; nothing here raises.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::research::EvaluationResult;

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("valid regex"));

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+").expect("valid regex"));

static EXPANSION_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[^:]*?\bquery\s*(?:\*\*)?\s*:(?:\*\*)?\s*")
        .expect("valid regex")
});

static CRITERION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[^a-z]*(relevance|completeness|specific[\s_]+facts|status)\W*:\W*(pass|fail|complete|incomplete)\b")
        .expect("valid regex")
});

static SUGGEST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[^a-z]*suggest\w*(?:\s+\w+)?(?:\s+\w+)?\s*:\s*(.+)$").expect("valid regex")
});

/// Result of parsing one generator output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Fallback { value: T, reason: String },
}

impl<T> ParseOutcome<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Parsed(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// Split into the value and the fallback reason, if any.
    pub fn into_parts(self) -> (T, Option<String>) {
        match self {
            Self::Parsed(value) => (value, None),
            Self::Fallback { value, reason } => (value, Some(reason)),
        }
    }

    fn fallback(value: T, reason: impl Into<String>) -> Self {
        Self::Fallback {
            value,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Remove `<think>...</think>` reasoning blocks. An unterminated block drops
/// everything after its opening tag.
pub fn strip_think_tags(raw: &str) -> String {
    let without_blocks = THINK_BLOCK.replace_all(raw, "");
    let lower = without_blocks.to_ascii_lowercase();
    let cut = match lower.find("<think>") {
        Some(idx) => &without_blocks[..idx],
        None => &without_blocks[..],
    };
    cut.trim().to_string()
}

/// Extract the first balanced JSON object from noisy output.
pub fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let remainder = &raw[start..];
    find_matching_brace(remainder).map(|end| &remainder[..end])
}

/// Byte offset just past the brace closing the first `{`, ignoring braces
/// inside JSON strings.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_wrapping(s: &str) -> &str {
    s.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`' || c == '*')
        .trim()
}

// =============================================================================
// Decomposition
// =============================================================================

/// Parse a decomposition into at most `max` sub-questions, falling back to
/// `[question]` when nothing usable is found.
pub fn parse_sub_questions(raw: &str, question: &str, max: usize) -> ParseOutcome<Vec<String>> {
    let cleaned = strip_think_tags(raw);
    let mut subs = Vec::new();

    for line in cleaned.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let candidate = if let Some(m) = LIST_MARKER.find(line) {
            &line[m.end()..]
        } else if line.contains('?') && line.chars().count() > 10 {
            line
        } else {
            continue;
        };
        let candidate = strip_wrapping(candidate);
        if !candidate.is_empty() {
            subs.push(candidate.to_string());
        }
        if subs.len() >= max {
            break;
        }
    }

    if subs.is_empty() {
        let reason = if cleaned.is_empty() {
            "empty decomposition output"
        } else {
            "no sub-questions found in decomposition output"
        };
        return ParseOutcome::fallback(vec![question.to_string()], reason);
    }
    ParseOutcome::Parsed(subs)
}

// =============================================================================
// Expansion
// =============================================================================

/// Parse an expanded search query, falling back to the question text.
///
/// Takes the first line that is neither a preamble (`Here is the expanded
/// query:`, anything ending in `:`) nor empty once a `... query:` label is
/// removed.
pub fn parse_expanded_query(raw: &str, question: &str) -> ParseOutcome<String> {
    let cleaned = strip_think_tags(raw);
    let first = cleaned
        .lines()
        .map(str::trim)
        .filter(|l| !l.ends_with(':') && !l.ends_with(":**"))
        .map(|l| strip_wrapping(EXPANSION_LABEL.replace(l, "").as_ref()).to_string())
        .find(|l| !l.is_empty());

    match first {
        Some(query) => ParseOutcome::Parsed(query),
        None if cleaned.is_empty() => {
            ParseOutcome::fallback(question.to_string(), "empty expansion output")
        }
        None => ParseOutcome::fallback(question.to_string(), "no query line in expansion output"),
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Verdict fields stay loose: models emit `"pass"`, `true`, or `"PASS"` alike.
#[derive(Debug, Deserialize)]
struct EvaluationJson {
    #[serde(default)]
    status: Value,
    #[serde(default)]
    relevance: Value,
    #[serde(default)]
    completeness: Value,
    #[serde(default, alias = "specific facts", alias = "specificFacts")]
    specific_facts: Value,
    #[serde(default, alias = "followup", alias = "follow_up", alias = "suggested_query")]
    suggested_followup: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pass,
    Fail,
}

fn verdict(word: &str) -> Option<Verdict> {
    match word.trim().to_ascii_lowercase().as_str() {
        "pass" | "passed" | "yes" | "true" | "complete" => Some(Verdict::Pass),
        "fail" | "failed" | "no" | "false" | "incomplete" => Some(Verdict::Fail),
        _ => None,
    }
}

fn json_verdict(value: &Value) -> Option<Verdict> {
    match value {
        Value::Bool(true) => Some(Verdict::Pass),
        Value::Bool(false) => Some(Verdict::Fail),
        Value::String(s) => verdict(s),
        _ => None,
    }
}

fn clean_followup(s: Option<&str>) -> Option<String> {
    let s = strip_wrapping(s?);
    match s.to_ascii_lowercase().as_str() {
        "" | "null" | "none" | "n/a" => None,
        _ => Some(s.to_string()),
    }
}

/// Combine an explicit status with per-criterion verdicts. Any failing
/// criterion makes the verdict incomplete.
fn combine(
    status: Option<Verdict>,
    criteria: &[Verdict],
    followup: Option<String>,
) -> Option<EvaluationResult> {
    if status.is_none() && criteria.is_empty() {
        return None;
    }
    let complete =
        status != Some(Verdict::Fail) && criteria.iter().all(|v| *v == Verdict::Pass);
    Some(if complete {
        EvaluationResult::complete()
    } else {
        EvaluationResult::incomplete(followup)
    })
}

fn parse_evaluation_json(text: &str) -> Option<EvaluationResult> {
    let json = extract_json(text)?;
    let parsed: EvaluationJson = serde_json::from_str(json).ok()?;
    let status = json_verdict(&parsed.status);
    let criteria: Vec<Verdict> = [&parsed.relevance, &parsed.completeness, &parsed.specific_facts]
        .into_iter()
        .filter_map(json_verdict)
        .collect();
    combine(
        status,
        &criteria,
        clean_followup(parsed.suggested_followup.as_str()),
    )
}

fn parse_evaluation_text(text: &str) -> Option<EvaluationResult> {
    let mut status = None;
    let mut criteria = Vec::new();
    let mut suggested = None;
    let mut question_line = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(caps) = CRITERION_LINE.captures(line) {
            let v = verdict(&caps[2]);
            if caps[1].eq_ignore_ascii_case("status") {
                status = v;
            } else if let Some(v) = v {
                criteria.push(v);
            }
            continue;
        }
        if suggested.is_none() {
            if let Some(caps) = SUGGEST_LINE.captures(line) {
                suggested = clean_followup(Some(&caps[1]));
                continue;
            }
        }
        if question_line.is_none()
            && line.contains('?')
            && line.chars().count() > 15
            && !line.to_ascii_lowercase().starts_with("question:")
        {
            question_line = clean_followup(Some(line));
        }
    }

    combine(status, &criteria, suggested.or(question_line))
}

/// Parse an evaluation verdict. Unparsable output falls back to
/// `INCOMPLETE` with no follow-up.
pub fn parse_evaluation(raw: &str) -> ParseOutcome<EvaluationResult> {
    let cleaned = strip_think_tags(raw);
    if let Some(result) = parse_evaluation_json(&cleaned) {
        return ParseOutcome::Parsed(result);
    }
    if let Some(result) = parse_evaluation_text(&cleaned) {
        return ParseOutcome::Parsed(result);
    }
    let reason = if cleaned.is_empty() {
        "empty evaluation output"
    } else {
        "no verdict found in evaluation output"
    };
    ParseOutcome::fallback(EvaluationResult::incomplete(None), reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::EvaluationStatus;

    #[test]
    fn think_blocks_are_removed() {
        assert_eq!(strip_think_tags("<think>hmm</think>\nAnswer"), "Answer");
        assert_eq!(strip_think_tags("<THINK>a\nb</THINK>x"), "x");
        assert_eq!(strip_think_tags("<think>never closed"), "");
        assert_eq!(strip_think_tags("plain"), "plain");
    }

    #[test]
    fn extract_json_skips_noise_and_string_braces() {
        let raw = r#"Sure! {"status": "complete", "note": "a } b"} trailing"#;
        assert_eq!(
            extract_json(raw),
            Some(r#"{"status": "complete", "note": "a } b"}"#)
        );
        assert_eq!(extract_json("no json"), None);
        assert_eq!(extract_json("{ unclosed"), None);
    }

    #[test]
    fn sub_questions_from_numbered_list() {
        let raw = "Here are the sub-questions:\n1. What is a transformer?\n2) How does attention work?\n- Why do they scale\n";
        let outcome = parse_sub_questions(raw, "How do transformers work?", 3);
        assert_eq!(
            outcome,
            ParseOutcome::Parsed(vec![
                "What is a transformer?".to_string(),
                "How does attention work?".to_string(),
                "Why do they scale".to_string(),
            ])
        );
    }

    #[test]
    fn sub_questions_capped() {
        let raw = "1. Aaaa one?\n2. Bbbb two?\n3. Cccc three?\n4. Dddd four?";
        let (subs, reason) = parse_sub_questions(raw, "q", 2).into_parts();
        assert_eq!(subs.len(), 2);
        assert!(reason.is_none());
    }

    #[test]
    fn bare_question_lines_need_length() {
        let raw = "Why?\nWhat powers the ZigZaggeron-7 model?";
        let (subs, _) = parse_sub_questions(raw, "q", 3).into_parts();
        assert_eq!(subs, vec!["What powers the ZigZaggeron-7 model?".to_string()]);
    }

    #[test]
    fn unparsable_decomposition_falls_back_to_question() {
        let outcome = parse_sub_questions("I cannot help with that.", "Original?", 3);
        assert!(outcome.is_fallback());
        assert_eq!(outcome.value(), &vec!["Original?".to_string()]);

        let outcome = parse_sub_questions("<think>only thoughts</think>", "Original?", 3);
        assert!(outcome.is_fallback());
    }

    #[test]
    fn expansion_strips_label_and_quotes() {
        let outcome = parse_expanded_query(
            "<think>x</think>\nExpanded query: \"neural networks deep learning\"\nmore",
            "neural networks",
        );
        assert_eq!(
            outcome,
            ParseOutcome::Parsed("neural networks deep learning".to_string())
        );
    }

    #[test]
    fn expansion_skips_preamble_lines() {
        let outcome = parse_expanded_query(
            "Here is an expanded search query:\nneural networks deep learning artificial neural net",
            "neural networks",
        );
        assert_eq!(
            outcome,
            ParseOutcome::Parsed("neural networks deep learning artificial neural net".to_string())
        );

        let outcome = parse_expanded_query(
            "Sure! Here is the expanded query: transformers attention mechanism",
            "transformers",
        );
        assert_eq!(
            outcome,
            ParseOutcome::Parsed("transformers attention mechanism".to_string())
        );

        let outcome = parse_expanded_query("Okay, here you go:\n**Expanded Query:**", "nn");
        assert!(outcome.is_fallback());
        assert_eq!(outcome.value(), "nn");
    }

    #[test]
    fn empty_expansion_falls_back() {
        let outcome = parse_expanded_query("  \n ", "neural networks");
        assert!(outcome.is_fallback());
        assert_eq!(outcome.value(), "neural networks");
    }

    #[test]
    fn evaluation_json_accepts_boolean_criteria() {
        let raw = r#"{"relevance": true, "completeness": true, "specific_facts": true, "status": "complete"}"#;
        let (eval, reason) = parse_evaluation(raw).into_parts();
        assert!(reason.is_none());
        assert!(eval.is_complete());

        let raw = r#"{"relevance": true, "completeness": false, "specific_facts": true, "status": "complete", "suggested_followup": "What about the 2019 release?"}"#;
        let eval = parse_evaluation(raw).value().clone();
        assert!(!eval.is_complete());
        assert_eq!(eval.suggested_followup(), Some("What about the 2019 release?"));

        let raw = r#"{"status": "incomplete", "suggested_followup": 7}"#;
        let eval = parse_evaluation(raw).value().clone();
        assert!(!eval.is_complete());
        assert!(eval.suggested_followup().is_none());
    }

    #[test]
    fn evaluation_json_complete() {
        let raw = r#"{"relevance":"pass","completeness":"pass","specific_facts":"pass","status":"complete","suggested_followup":"ignored?"}"#;
        let (eval, reason) = parse_evaluation(raw).into_parts();
        assert!(reason.is_none());
        assert!(eval.is_complete());
        assert!(eval.suggested_followup().is_none());
    }

    #[test]
    fn evaluation_json_failing_criterion_is_incomplete() {
        let raw = r#"json: {"relevance":"pass","completeness":"fail","specific_facts":"pass","status":"complete","suggested_followup":"When was it released?"}"#;
        let (eval, _) = parse_evaluation(raw).into_parts();
        assert_eq!(eval.status(), EvaluationStatus::Incomplete);
        assert_eq!(eval.suggested_followup(), Some("When was it released?"));
    }

    #[test]
    fn evaluation_json_null_followup() {
        let raw = r#"{"status":"incomplete","suggested_followup":"null"}"#;
        let (eval, _) = parse_evaluation(raw).into_parts();
        assert!(!eval.is_complete());
        assert!(eval.suggested_followup().is_none());
    }

    #[test]
    fn evaluation_plain_text_form() {
        let raw = "Relevance: PASS\nCompleteness: FAIL\nSpecific facts: PASS\nSuggested query: ZigZaggeron-7 training data size";
        let (eval, reason) = parse_evaluation(raw).into_parts();
        assert!(reason.is_none());
        assert!(!eval.is_complete());
        assert_eq!(
            eval.suggested_followup(),
            Some("ZigZaggeron-7 training data size")
        );

        let raw = "1. Relevance: PASS\n2. Completeness: PASS\n3. Specific Facts: PASS";
        assert!(parse_evaluation(raw).value().is_complete());
    }

    #[test]
    fn evaluation_plain_text_question_line() {
        let raw = "Completeness: FAIL\nWhat dataset was the model trained on?";
        let (eval, _) = parse_evaluation(raw).into_parts();
        assert_eq!(
            eval.suggested_followup(),
            Some("What dataset was the model trained on?")
        );
    }

    #[test]
    fn unparsable_evaluation_is_conservative() {
        let outcome = parse_evaluation("Looks great to me!");
        assert!(outcome.is_fallback());
        assert_eq!(outcome.value().status(), EvaluationStatus::Incomplete);
        assert!(outcome.value().suggested_followup().is_none());
    }
}
