use std::process::Command;

use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn deepsearch() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_deepsearch"));
    cmd.env_remove("DEEPSEARCH_RETRIEVER_URL")
        .env_remove("OPENROUTER_API_KEY")
        .env("RUST_LOG", "warn");
    cmd
}

#[derive(Debug, serde::Deserialize)]
struct ResultFile {
    question: String,
    answer: String,
    iterations: usize,
    beast_mode: bool,
    stop_reason: String,
    sub_questions: Vec<String>,
}

#[test]
fn help_lists_subcommands() {
    let output = deepsearch().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run"));
    assert!(stdout.contains("config"));
}

#[test]
fn config_prints_default_json() {
    let output = deepsearch().arg("config").output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["max_iterations"], 3);
    assert_eq!(value["token_budget"], 5000);
}

#[test]
fn invalid_iteration_limit_is_rejected_before_any_request() {
    let output = deepsearch()
        .args([
            "run",
            "--question",
            "q?",
            "--collection",
            "c",
            "--retriever-url",
            "http://127.0.0.1:9",
            "--max-iterations",
            "0",
        ])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("max_iterations"), "{stderr}");
}

#[test]
fn missing_collection_is_reported() {
    let output = deepsearch()
        .args([
            "run",
            "--question",
            "q?",
            "--retriever-url",
            "http://127.0.0.1:9",
        ])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--collection"), "{stderr}");
}

#[tokio::test(flavor = "multi_thread")]
async fn run_against_mock_services_writes_result_and_progress() {
    let search = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/collections/manuals/search$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [
                { "id": "m1", "text": "The pump runs at 40 psi." },
                { "id": "m2", "text": "Service the pump every 6 months." }
            ]
        })))
        .mount(&search)
        .await;

    // Every generation gets the same reply; evaluation never parses, so
    // the run ends in a forced synthesis.
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "1. What pressure does the pump run at?",
            "done": true,
            "prompt_eval_count": 12,
            "eval_count": 8
        })))
        .mount(&llm)
        .await;

    let dir = tempdir().unwrap();
    let out = dir.path().join("result.json");
    let progress = dir.path().join("progress.jsonl");

    let mut cmd = deepsearch();
    cmd.env("OLLAMA_BASE_URL", llm.uri())
        .args([
            "run",
            "--question",
            "How do I maintain the pump?",
            "--collection",
            "manuals",
            "--provider",
            "ollama",
            "--max-iterations",
            "2",
        ])
        .arg("--retriever-url")
        .arg(search.uri())
        .arg("--out")
        .arg(&out)
        .arg("--progress")
        .arg(&progress);

    let output = tokio::task::spawn_blocking(move || cmd.output())
        .await
        .unwrap()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let result: ResultFile =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(result.question, "How do I maintain the pump?");
    assert_eq!(result.iterations, 2);
    assert!(result.beast_mode);
    assert_eq!(result.stop_reason, "max_iterations");
    assert_eq!(
        result.sub_questions,
        vec!["What pressure does the pump run at?".to_string()]
    );
    assert!(!result.answer.is_empty());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&result.answer));

    let lines = std::fs::read_to_string(&progress).unwrap();
    assert_eq!(lines.lines().count(), 2);
    assert_eq!(search.received_requests().await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_run_still_flushes_progress() {
    let search = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collections/manuals/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [{ "id": "m1", "text": "The pump runs at 40 psi." }]
        })))
        .mount(&search)
        .await;

    let llm = MockServer::start().await;
    let answer_marker = "answering questions from retrieved context";
    let ok = ResponseTemplate::new(200).set_body_json(json!({
        "response": "1. What pressure does the pump run at?",
        "done": true
    }));
    // First answer succeeds, the second is rejected.
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_string_contains(answer_marker))
        .respond_with(ok.clone())
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&llm)
        .await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_string_contains(answer_marker))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "bad prompt" })))
        .with_priority(2)
        .mount(&llm)
        .await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ok)
        .mount(&llm)
        .await;

    let dir = tempdir().unwrap();
    let progress = dir.path().join("progress.jsonl");

    let mut cmd = deepsearch();
    cmd.env("OLLAMA_BASE_URL", llm.uri())
        .args([
            "run",
            "--question",
            "How do I maintain the pump?",
            "--collection",
            "manuals",
            "--provider",
            "ollama",
            "--max-iterations",
            "2",
        ])
        .arg("--retriever-url")
        .arg(search.uri())
        .arg("--progress")
        .arg(&progress);

    let output = tokio::task::spawn_blocking(move || cmd.output())
        .await
        .unwrap()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bad prompt"), "{stderr}");

    let lines = std::fs::read_to_string(&progress).unwrap();
    assert_eq!(lines.lines().count(), 1);
    let first: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
    assert_eq!(first["iteration"], 1);
}
