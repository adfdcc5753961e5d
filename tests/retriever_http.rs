use deepsearch_harness::retriever::{CollectionHandle, HttpRetriever, RetrievalError, Retriever};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn http_retriever_posts_query_and_truncates_hits() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/collections/ai_docs/search"))
        .and(body_json(json!({ "query": "transformer attention", "limit": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [
                { "id": "doc_1", "text": "Transformers use self-attention.", "relevance": 0.91 },
                { "id": "doc_2", "text": "Attention weighs tokens.", "metadata": { "source": "wiki" } },
                { "id": "doc_3", "text": "Extra hit beyond the limit." }
            ]
        })))
        .mount(&server)
        .await;

    let retriever = HttpRetriever::new(&server.uri()).unwrap();
    let hits = retriever
        .search(&CollectionHandle::new("ai_docs"), "transformer attention", 2)
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "doc_1");
    assert_eq!(hits[0].relevance, Some(0.91));
    assert_eq!(hits[1].metadata["source"], "wiki");
}

#[tokio::test]
async fn http_retriever_empty_result_is_ok() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/collections/empty/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "hits": [] })))
        .mount(&server)
        .await;

    let retriever = HttpRetriever::new(&server.uri()).unwrap();
    let hits = retriever
        .search(&CollectionHandle::new("empty"), "anything", 3)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn http_retriever_surfaces_status_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/collections/missing/search"))
        .respond_with(ResponseTemplate::new(404).set_body_string("collection not found"))
        .mount(&server)
        .await;

    let retriever = HttpRetriever::new(&server.uri()).unwrap();
    let err = retriever
        .search(&CollectionHandle::new("missing"), "q", 3)
        .await
        .unwrap_err();
    match err {
        RetrievalError::Status { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "collection not found");
        }
        other => panic!("expected Status error, got {other:?}"),
    }
}

#[tokio::test]
async fn http_retriever_rejects_malformed_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/collections/docs/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let retriever = HttpRetriever::new(&server.uri()).unwrap();
    let err = retriever
        .search(&CollectionHandle::new("docs"), "q", 3)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidResponse(_)));
}
