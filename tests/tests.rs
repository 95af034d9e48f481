// ../tests/tests.rs
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;

use pyq_creator::ai::ModelFetch;
use pyq_creator::cleanup::PatternList;
use pyq_creator::lexicon::{BookSelection, SelectionMode};
use pyq_creator::prompts::PromptBook;
use pyq_creator::watcher::Observation;
use pyq_creator::*;

const MODEL: &str = "test-model";
const KEY: &str = "sk-test";

fn dummy_world() -> Lexicon {
    let json_str = fs::read_to_string("tests/dummy_world_info.json")
        .expect("Failed to read dummy world info JSON file");
    serde_json::from_str(&json_str).expect("Failed to parse world info")
}

fn dummy_chat() -> Vec<ChatMessage> {
    let json_str =
        fs::read_to_string("tests/dummy_chat.json").expect("Failed to read dummy chat JSON file");
    serde_json::from_str(&json_str).expect("Failed to parse chat")
}

fn configured_store(base_url: &str) -> SettingsStore {
    let store = SettingsStore::in_memory();
    Settings::save_api(&store, base_url, KEY, MODEL).unwrap();
    store
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}
        ]
    })
}

fn bindings(host: Arc<MemoryHost>) -> HostBindings {
    let lexicon = StaticLexicon::new().with_source("nightcity", dummy_world());
    HostBindings::from_host(host, Arc::new(lexicon))
}

fn pipeline(store: SettingsStore, host: Arc<MemoryHost>) -> Pipeline {
    Pipeline::new(
        store,
        Keys::default(),
        &bindings(host),
        Arc::new(OpenAiClient::new()),
    )
}

#[derive(Default)]
struct CountingClient {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionClient for CountingClient {
    async fn complete(
        &self,
        _credentials: &Credentials,
        _messages: &[PromptMessage],
    ) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("<post>generated</post>".to_string())
    }

    async fn list_models(
        &self,
        _base_url: &str,
        _api_key: &str,
    ) -> Result<Vec<String>, PipelineError> {
        Ok(vec![MODEL.to_string()])
    }

    async fn ping(&self, _credentials: &Credentials) -> Result<String, PipelineError> {
        Ok("pong".to_string())
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn full_request_reaches_endpoint_and_display() {
    let server = MockServer::start_async().await;
    let store = configured_store(&server.base_url());
    let keys = Keys::default();

    Settings::set_sample_count(&store, &keys, 3);
    let mut patterns = PatternList::load(store.clone(), &keys);
    patterns.add("<think></think>");
    let mut prompts = PromptBook::load(store.clone(), &keys);
    prompts.add("write a post");
    prompts.add("disabled task");
    prompts.set_enabled(1, false);
    let mut selection = ReferenceSelection::new();
    selection.upsert(
        "nightcity",
        BookSelection {
            file_id: "nightcity".into(),
            enabled_uids: vec!["1".into(), "0".into(), "2".into(), "3".into()],
        },
    );
    selection.save(&store, &keys, SelectionMode::Static);

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer sk-test")
                .body_contains("\"model\":\"test-model\"")
                .body_contains("\"max_tokens\":20000")
                .body_contains("<Tasks>\\nwrite a post\\n</Tasks>")
                .body_contains("【nightcity - Afterlife,bar】\\nThe mercenaries' bar, run by Rogue.\\n\\n【nightcity - Night City】")
                .body_contains("【聊天记录参考】\\nDrinks on me, choom.\\nYou sure?\\nAlways sure.\\n</ChatHistory_Reference>");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(completion("<post>Night out</post>"));
        })
        .await;

    let host = Arc::new(MemoryHost::with_messages(dummy_chat()));
    let pipeline = pipeline(store, host);
    let text = pipeline.run(RunOrigin::Manual).await.unwrap();

    mock.assert_async().await;
    assert_eq!(text, "<post>Night out</post>");
    assert_eq!(pipeline.display().text(), "<post>Night out</post>");
}

#[tokio::test]
async fn http_500_is_displayed_with_status_code() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(500).body("upstream exploded");
        })
        .await;

    let host = Arc::new(MemoryHost::with_messages(dummy_chat()));
    let pipeline = pipeline(configured_store(&server.base_url()), host);
    let result = pipeline.run(RunOrigin::Manual).await;

    mock.assert_async().await;
    assert!(matches!(result, Err(PipelineError::HttpStatus(500))));
    assert_eq!(pipeline.display().text(), "生成失败: HTTP 500");
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let host = Arc::new(MemoryHost::with_messages(dummy_chat()));
    let pipeline = pipeline(configured_store(&base_url), host);
    let result = pipeline.run(RunOrigin::Manual).await;

    assert!(matches!(result, Err(PipelineError::Network(_))));
    assert!(pipeline.display().text().starts_with("生成失败: network error"));
}

#[tokio::test]
async fn unreadable_success_body_is_an_empty_response() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).body("<html>gateway login</html>");
        })
        .await;

    let host = Arc::new(MemoryHost::with_messages(dummy_chat()));
    let pipeline = pipeline(configured_store(&server.base_url()), host);
    let result = pipeline.run(RunOrigin::Manual).await;

    mock.assert_async().await;
    assert!(matches!(result, Err(PipelineError::EmptyResponse(_))));
    assert!(pipeline.display().text().starts_with("生成失败: empty response"));
}

#[tokio::test]
async fn empty_choices_show_sentinel() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(json!({"choices": []}));
        })
        .await;

    let pipeline = pipeline(
        configured_store(&server.base_url()),
        Arc::new(MemoryHost::new()),
    );
    assert_eq!(pipeline.run(RunOrigin::Manual).await.unwrap(), "[未生成内容]");
    assert_eq!(pipeline.display().text(), "[未生成内容]");
}

#[tokio::test]
async fn missing_configuration_sends_nothing() {
    let pipeline = Pipeline::new(
        SettingsStore::in_memory(),
        Keys::default(),
        &bindings(Arc::new(MemoryHost::new())),
        Arc::new(CountingClient::default()),
    );
    pipeline.display().show("previous output");

    let result = pipeline.run(RunOrigin::Manual).await;
    assert!(matches!(result, Err(PipelineError::ConfigMissing(_))));
    assert_eq!(pipeline.display().text(), "previous output");
}

#[tokio::test]
async fn model_list_is_parsed_and_cached() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/models")
                .header("authorization", "Bearer sk-test");
            then.status(200).json_body(json!({
                "object": "list",
                "data": [{"id": "gpt-a"}, {"id": "gpt-b"}, {"id": "gpt-a"}]
            }));
        })
        .await;

    let pipeline = pipeline(
        configured_store(&format!("{}/", server.base_url())),
        Arc::new(MemoryHost::new()),
    );
    let first = pipeline.models(false).await.unwrap();
    assert!(matches!(first, ModelFetch::Fetched(_)));
    assert_eq!(first.models().ids, vec!["gpt-a", "gpt-b"]);

    let second = pipeline.models(false).await.unwrap();
    assert!(matches!(second, ModelFetch::Cached(_)));
    assert_eq!(second.models().ids, vec!["gpt-a", "gpt-b"]);
    assert_eq!(mock.hits_async().await, 1);

    pipeline.models(true).await.unwrap();
    assert_eq!(mock.hits_async().await, 2);
}

#[tokio::test]
async fn unknown_model_shape_is_empty_response() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/models");
            then.status(200).json_body(json!({"object": "list"}));
        })
        .await;

    let client = OpenAiClient::new();
    let result = client.list_models(&server.base_url(), KEY).await;
    assert!(
        matches!(result, Err(PipelineError::EmptyResponse(ref msg)) if msg == "no models parsed")
    );
}

#[tokio::test]
async fn ping_sends_single_user_message() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_contains("{\"role\":\"user\",\"content\":\"ping\"}")
                .body_contains("\"max_tokens\":100");
            then.status(200).json_body(completion("pong"));
        })
        .await;

    let pipeline = pipeline(
        configured_store(&server.base_url()),
        Arc::new(MemoryHost::new()),
    );
    assert_eq!(pipeline.ping().await.unwrap(), "pong");
    mock.assert_async().await;
}

#[tokio::test]
async fn hosted_run_injects_into_last_assistant_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(completion("  <post>tagged</post>  "));
        })
        .await;

    let host = Arc::new(MemoryHost::with_messages(vec![
        ChatMessage::assistant("hello"),
        ChatMessage::user("hi"),
    ]));
    let pipeline = pipeline(configured_store(&server.base_url()), host.clone());

    assert!(pipeline.run_hosted().await.unwrap());
    assert_eq!(host.messages()[0].mes, "hello\n<post>tagged</post>");
}

#[tokio::test]
async fn hosted_run_skips_injection_on_failure() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(503);
        })
        .await;

    let host = Arc::new(MemoryHost::with_messages(vec![ChatMessage::assistant(
        "hello",
    )]));
    let pipeline = pipeline(configured_store(&server.base_url()), host.clone());

    assert!(pipeline.run_hosted().await.is_err());
    assert!(pipeline.display().text().contains("503"));
    assert_eq!(host.messages()[0].mes, "hello");
}

#[tokio::test]
async fn overlapping_panel_runs_are_rejected() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .delay(Duration::from_millis(300))
                .json_body(completion("slow"));
        })
        .await;

    let pipeline = pipeline(
        configured_store(&server.base_url()),
        Arc::new(MemoryHost::new()),
    );
    let (manual, auto) = tokio::join!(
        pipeline.run(RunOrigin::Manual),
        pipeline.run(RunOrigin::Auto)
    );

    assert_eq!(manual.unwrap(), "slow");
    assert!(matches!(auto, Err(PipelineError::Busy("panel"))));
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn swipe_injection_uses_addswipe_command() {
    let host = Arc::new(MemoryHost::with_messages(vec![ChatMessage::assistant(
        "first",
    )]));
    let store = configured_store("https://unused.example.com");
    let client = Arc::new(CountingClient::default());
    let controller = Controller::new(store, Keys::default(), &bindings(host.clone()), client);

    controller.generate_now().await.unwrap();
    controller.inject_swipe().unwrap();

    assert_eq!(host.sent(), vec!["/addswipe <post>generated</post>"]);
    assert_eq!(host.messages()[0].swipes, vec!["first", "<post>generated</post>"]);
}

#[tokio::test]
async fn user_message_moves_baseline_without_running() {
    let host = Arc::new(MemoryHost::with_messages(
        (0..5).map(|i| ChatMessage::assistant(format!("m{i}"))).collect(),
    ));
    let client = Arc::new(CountingClient::default());
    let store = configured_store("https://unused.example.com");
    let keys = Keys::default();
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        keys.clone(),
        &bindings(host.clone()),
        client.clone(),
    ));
    let mut watcher = TriggerWatcher::new(WatchMode::Auto, pipeline, host.clone());
    watcher.enable();
    assert_eq!(watcher.state().last_observed, 5);

    host.push(ChatMessage::user("just me"));
    let (observation, run) = watcher.handle_change();

    assert_eq!(observation, Observation::Ignored);
    assert!(run.is_none());
    assert_eq!(watcher.state().last_observed, 6);
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.get::<usize>(&keys.auto_last_count()), Some(6));
}

#[tokio::test]
async fn auto_mode_runs_on_new_assistant_message() {
    let host = Arc::new(MemoryHost::with_messages(vec![ChatMessage::assistant("old")]));
    let client = Arc::new(CountingClient::default());
    let store = configured_store("https://unused.example.com");
    let mut controller = Controller::new(
        store.clone(),
        Keys::default(),
        &bindings(host.clone()),
        client.clone(),
    );

    assert!(controller.toggle_auto(None));
    assert_eq!(store.get::<bool>(&Keys::default().auto_mode()), Some(true));

    host.push(ChatMessage::user("question"));
    host.push(ChatMessage::assistant("answer"));
    wait_for(|| controller.displayed() == "<post>generated</post>").await;
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.auto_state().last_observed, 3);

    assert!(!controller.toggle_auto(None));
    host.push(ChatMessage::assistant("ignored"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get::<bool>(&Keys::default().auto_mode()), Some(false));
}

#[tokio::test]
async fn hosted_mode_injects_on_new_assistant_message() {
    let host = Arc::new(MemoryHost::with_messages(vec![ChatMessage::assistant("old")]));
    let client = Arc::new(CountingClient::default());
    let mut controller = Controller::new(
        configured_store("https://unused.example.com"),
        Keys::default(),
        &bindings(host.clone()),
        client.clone(),
    );
    controller.toggle_hosted(Some(true));

    host.push(ChatMessage::assistant("reply"));
    wait_for(|| host.messages()[1].mes != "reply").await;
    assert_eq!(host.messages()[1].mes, "reply\n<post>generated</post>");

    // The edit notifies again but the length is unchanged, so nothing re-runs.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    controller.shutdown();
}

#[tokio::test]
async fn persisted_modes_are_restored() {
    let store = configured_store("https://unused.example.com");
    let keys = Keys::new("mapPlugin");
    store.set(&keys.hosted_mode(), &true);

    let host = Arc::new(MemoryHost::with_messages(dummy_chat()));
    let mut controller = Controller::new(
        store.clone(),
        keys,
        &bindings(host),
        Arc::new(CountingClient::default()),
    );
    controller.restore();

    assert!(!controller.auto_state().active);
    assert_eq!(
        controller.hosted_state(),
        TriggerState {
            active: true,
            last_observed: 4
        }
    );

    controller.shutdown();
    assert!(store.get::<bool>(&Keys::new("mapPlugin").hosted_mode()).unwrap());
}

#[test]
fn namespaces_do_not_share_prompts() {
    let store = SettingsStore::in_memory();
    PromptBook::load(store.clone(), &Keys::new("friendCircle")).add("posts");
    PromptBook::load(store.clone(), &Keys::new("mapPlugin")).add("map");

    let circle = PromptBook::load(store.clone(), &Keys::new("friendCircle"));
    assert_eq!(circle.enabled_texts(), vec!["posts"]);
}
