use std::sync::Arc;

use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;

use br1efly_core_sdk::config::{
    MemoryConfigStore, KEY_API_KEY, KEY_API_TYPE, KEY_ENDPOINT, KEY_LANGUAGE, KEY_MODEL,
    KEY_PROMPTS,
};
use br1efly_core_sdk::history::{list_history, MemoryHistoryStore};
use br1efly_core_sdk::models::{MenuClick, Message};
use br1efly_core_sdk::prelude::*;

const CHAT_PATH: &str = "/v1/chat/completions";

fn ok_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    })
}

fn openai_store(extra: &[(&str, &str)]) -> MemoryConfigStore {
    let mut values = vec![
        (KEY_LANGUAGE, "english"),
        (KEY_API_TYPE, "openai"),
        (KEY_API_KEY, "sk-test"),
        (KEY_MODEL, "gpt-4"),
    ];
    values.extend_from_slice(extra);
    MemoryConfigStore::with_values(values)
}

fn completer(
    config: MemoryConfigStore,
    history: Arc<dyn HistoryStore>,
    server: &MockServer,
) -> Completer {
    Completer::new(Arc::new(config), history).with_openai_url(&server.url(CHAT_PATH))
}

/** 写入总是失败的历史存储。 */
struct BrokenHistory;

#[async_trait]
impl HistoryStore for BrokenHistory {
    async fn load(&self) -> Result<Vec<HistoryRecord>, StorageError> {
        Ok(Vec::new())
    }

    async fn save(&self, _records: &[HistoryRecord]) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk full".into()))
    }
}

/** 读取即失败的配置存储。 */
struct BrokenConfig;

#[async_trait]
impl ConfigStore for BrokenConfig {
    async fn get(&self, _key: &str) -> Result<String, StorageError> {
        Err(StorageError::Unavailable("sync storage offline".into()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("sync storage offline".into()))
    }
}

#[tokio::test]
async fn summarize_end_to_end_records_history() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(CHAT_PATH)
            .header("authorization", "Bearer sk-test")
            .json_body(json!({
                "model": "gpt-4",
                "messages": [
                    {"role": "system", "content": "Please summarize the following in one line."},
                    {"role": "user", "content": "Long text."},
                    {"role": "system", "content": "Answer in english"}
                ]
            }));
        then.status(200).json_body(ok_body("Short."));
    });

    let history = Arc::new(MemoryHistoryStore::new());
    let completer = completer(openai_store(&[]), history.clone(), &server);
    let click = MenuClick {
        action: "summarize".into(),
        text: "Long text.".into(),
        url: Some("https://example.org/a".into()),
    };

    let out = completer.run_click(&click).await.expect("completion");
    assert_eq!(out, "Short.");
    mock.assert();

    let list = list_history(history.as_ref()).await.expect("history");
    assert_eq!(list.len(), 1);
    let record = &list[0];
    assert_eq!(record.action, "summarize");
    assert_eq!(record.source_url, "https://example.org/a");
    assert_eq!(record.selection, "Long text.");
    assert_eq!(record.result.as_deref(), Some("Short."));
    assert_eq!(
        record.messages,
        vec![
            Message::system("Please summarize the following in one line."),
            Message::user("Long text."),
            Message::system("Answer in english"),
        ]
    );
}

#[tokio::test]
async fn missing_api_key_never_reaches_provider() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path(CHAT_PATH);
        then.status(200).json_body(ok_body("unused"));
    });

    let history = Arc::new(MemoryHistoryStore::new());
    let completer = completer(
        openai_store(&[(KEY_API_KEY, "")]),
        history.clone(),
        &server,
    );
    let err = completer
        .run_completion("summarize", "Long text.")
        .await
        .expect_err("missing key");

    assert!(matches!(err, CompletionError::MissingApiKey));
    assert_eq!(mock.hits(), 0);
    assert!(list_history(history.as_ref()).await.expect("history").is_empty());
}

#[tokio::test]
async fn azure_request_targets_deployment() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/openai/deployments/gpt-35-turbo/chat/completions")
            .query_param("api-version", "2023-03-15-preview")
            .header("api-key", "az-key")
            .json_body(json!({
                "messages": [
                    {"role": "system", "content": "Please proofread the following."},
                    {"role": "user", "content": "Teh text."},
                    {"role": "system", "content": "Answer in japanese"}
                ]
            }));
        then.status(200).json_body(ok_body("The text."));
    });

    let endpoint = format!("{}/", server.base_url());
    let config = MemoryConfigStore::with_values([
        (KEY_LANGUAGE, "japanese"),
        (KEY_API_TYPE, "azure"),
        (KEY_API_KEY, "az-key"),
        (KEY_MODEL, "gpt-35-turbo"),
        (KEY_ENDPOINT, endpoint.as_str()),
    ]);
    let completer = Completer::new(Arc::new(config), Arc::new(MemoryHistoryStore::new()));

    let out = completer
        .run_completion("proofreading", "Teh text.")
        .await
        .expect("azure completion");
    assert_eq!(out, "The text.");
    mock.assert();
}

#[tokio::test]
async fn unknown_and_empty_actions_are_rejected() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path(CHAT_PATH);
        then.status(200).json_body(ok_body("unused"));
    });

    let overlay = "summarize:\n  message: \"\"\n";
    let completer = completer(
        openai_store(&[(KEY_PROMPTS, overlay)]),
        Arc::new(MemoryHistoryStore::new()),
        &server,
    );

    let err = completer
        .run_completion("no_such_action", "x")
        .await
        .expect_err("unknown");
    assert!(matches!(err, CompletionError::UnknownAction(ref a) if a == "no_such_action"));
    assert_eq!(err.to_string(), "Sorry, no_such_action is not implemented yet.");

    let err = completer
        .run_completion("summarize", "x")
        .await
        .expect_err("empty message");
    assert!(matches!(err, CompletionError::UnknownAction(ref a) if a == "summarize"));
    assert_eq!(mock.hits(), 0);
}

#[tokio::test]
async fn history_failure_does_not_fail_completion() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(CHAT_PATH);
        then.status(200).json_body(ok_body("Short."));
    });

    let completer = completer(openai_store(&[]), Arc::new(BrokenHistory), &server);
    let out = completer
        .run_completion("summarize", "Long text.")
        .await
        .expect("completion despite history failure");
    assert_eq!(out, "Short.");
}

#[tokio::test]
async fn custom_prompt_dispatches_parameters() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path(CHAT_PATH).json_body(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "Explain like I'm five."},
                {"role": "user", "content": "Entropy."}
            ],
            "temperature": 0.7
        }));
        then.status(200).json_body(ok_body("Things get messy."));
    });

    let overlay = r#"
eli5:
  title: Explain like I'm five
  message: Explain like I'm five.
  translate: false
  parameters:
    temperature: 0.7
"#;
    let completer = completer(
        openai_store(&[(KEY_PROMPTS, overlay)]),
        Arc::new(MemoryHistoryStore::new()),
        &server,
    );
    let out = completer
        .run_completion("eli5", "Entropy.")
        .await
        .expect("custom prompt");
    assert_eq!(out, "Things get messy.");
    mock.assert();
}

#[tokio::test]
async fn provider_error_is_surfaced_without_history() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(CHAT_PATH);
        then.status(401)
            .json_body(json!({"error": {"message": "Incorrect API key provided"}}));
    });

    let history = Arc::new(MemoryHistoryStore::new());
    let completer = completer(openai_store(&[]), history.clone(), &server);
    let err = completer
        .run_completion("summarize", "Long text.")
        .await
        .expect_err("401");

    match err {
        CompletionError::ProviderHttp { status, detail, .. } => {
            assert_eq!(status, 401);
            assert_eq!(detail, "Incorrect API key provided");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(list_history(history.as_ref()).await.expect("history").is_empty());
}

#[tokio::test]
async fn config_store_failure_surfaces_storage_error() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path(CHAT_PATH);
        then.status(200).json_body(ok_body("unused"));
    });

    let history = Arc::new(MemoryHistoryStore::new());
    let completer = Completer::new(Arc::new(BrokenConfig), history.clone())
        .with_openai_url(&server.url(CHAT_PATH));
    let err = completer
        .run_completion("summarize", "Long text.")
        .await
        .expect_err("config unavailable");

    assert!(matches!(
        err,
        CompletionError::Storage(StorageError::Unavailable(_))
    ));
    assert!(!err.is_precondition());
    assert_eq!(mock.hits(), 0);
    assert!(list_history(history.as_ref()).await.expect("history").is_empty());
}

#[tokio::test]
async fn unreachable_provider_is_transport_error() {
    // 端口 1 上没有服务，连接会被拒绝
    let url = "http://127.0.0.1:1/v1/chat/completions";
    let history = Arc::new(MemoryHistoryStore::new());
    let completer =
        Completer::new(Arc::new(openai_store(&[])), history.clone()).with_openai_url(url);

    let err = completer
        .run_completion("summarize", "Long text.")
        .await
        .expect_err("connection refused");

    match err {
        CompletionError::Transport { url: failed, .. } => assert_eq!(failed, url),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(list_history(history.as_ref()).await.expect("history").is_empty());
}
