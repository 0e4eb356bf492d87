use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use salescope_agent::llm::{TokenUsage, ToolCall};
use salescope_agent::{
    AgentRuntime, ClassificationError, GenerationRequest, GenerationResponse, LlmClient,
    LlmError, ModelTier, QueryGuard, RuntimeParts, RuntimeSettings, SqlToolProvider, TurnError,
    TurnRequest,
};
use salescope_core::domain::intent::Route;
use salescope_core::domain::message::{ContentBlock, MessageContent, Role};
use salescope_core::domain::session::{SessionEntry, SessionId};
use salescope_db::migrations::run_pending;
use salescope_db::{
    connect_with_settings, DemoSalesDataset, InMemorySessionStore, PendingEntry, RepositoryError,
    SessionStore, SqlSalesRepository,
};

enum Step {
    Reply(GenerationResponse),
    Fail(LlmError),
    Stall,
}

#[derive(Default)]
struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<GenerationResponse>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    fn new(steps: Vec<Step>) -> Self {
        Self { steps: Mutex::new(steps.into()), ..Self::default() }
    }

    fn then_repeat(mut self, reply: GenerationResponse) -> Self {
        self.fallback = Some(reply);
        self
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.requests.lock().expect("lock").push(request);
        let step = self.steps.lock().expect("lock").pop_front();
        match step {
            Some(Step::Reply(reply)) => Ok(reply),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Stall) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(LlmError::Timeout)
            }
            None => self.fallback.clone().ok_or_else(|| LlmError::Parse("script exhausted".into())),
        }
    }
}

fn label(message_type: &str) -> Step {
    Step::Reply(GenerationResponse::text(json!({ "message_type": message_type }).to_string()))
}

fn say(text: &str) -> Step {
    Step::Reply(GenerationResponse::text(text))
}

fn call(id: &str, name: &str, arguments: Value) -> GenerationResponse {
    GenerationResponse {
        content: MessageContent::Blocks(vec![ContentBlock::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.clone(),
        }]),
        tool_calls: vec![ToolCall { id: id.to_string(), name: name.to_string(), arguments }],
        usage: TokenUsage::default(),
    }
}

struct Harness {
    runtime: AgentRuntime,
    backend: Arc<ScriptedBackend>,
    sessions: Arc<InMemorySessionStore>,
}

async fn harness(backend: ScriptedBackend, tweak: impl FnOnce(&mut RuntimeSettings)) -> Harness {
    let sessions = Arc::new(InMemorySessionStore::new(chrono::Duration::hours(24)));
    let backend = Arc::new(backend);
    let runtime = runtime_over(backend.clone(), sessions.clone(), tweak).await;
    Harness { runtime, backend, sessions }
}

async fn runtime_over(
    backend: Arc<ScriptedBackend>,
    sessions: Arc<dyn SessionStore>,
    tweak: impl FnOnce(&mut RuntimeSettings),
) -> AgentRuntime {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    run_pending(&pool).await.expect("migrate");
    DemoSalesDataset::load(&pool).await.expect("seed");

    let tools = SqlToolProvider::new(pool.clone(), QueryGuard::new(5, 100)).registry();

    let mut settings = RuntimeSettings {
        reference_date: Some("April 2025".to_string()),
        ..RuntimeSettings::default()
    };
    tweak(&mut settings);

    let parts =
        RuntimeParts::new(backend, sessions, Arc::new(SqlSalesRepository::new(pool)), tools);
    AgentRuntime::new(parts, settings).expect("runtime")
}

/// Session store whose exchange writes are slow, or refused outright.
struct SlowSessionStore {
    inner: InMemorySessionStore,
    write_delay: Duration,
    refuse_writes: bool,
}

impl SlowSessionStore {
    fn new(write_delay: Duration) -> Self {
        Self {
            inner: InMemorySessionStore::new(chrono::Duration::hours(24)),
            write_delay,
            refuse_writes: false,
        }
    }

    fn refusing() -> Self {
        Self { refuse_writes: true, ..Self::new(Duration::ZERO) }
    }
}

#[async_trait]
impl SessionStore for SlowSessionStore {
    async fn exists(&self, session_id: &SessionId) -> Result<bool, RepositoryError> {
        self.inner.exists(session_id).await
    }

    async fn append_exchange(
        &self,
        session_id: &SessionId,
        entries: Vec<PendingEntry>,
    ) -> Result<(), RepositoryError> {
        tokio::time::sleep(self.write_delay).await;
        if self.refuse_writes {
            return Err(RepositoryError::Encode("store is read-only".to_string()));
        }
        self.inner.append_exchange(session_id, entries).await
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<SessionEntry>, RepositoryError> {
        self.inner.list(session_id).await
    }

    async fn clear(&self, session_id: &SessionId) -> Result<(), RepositoryError> {
        self.inner.clear(session_id).await
    }

    async fn ttl_remaining(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<chrono::Duration>, RepositoryError> {
        self.inner.ttl_remaining(session_id).await
    }
}

fn session() -> SessionId {
    SessionId::parse("scenario-session").expect("session id")
}

#[tokio::test]
async fn greeting_takes_the_normal_path_and_stores_two_entries() {
    let h = harness(
        ScriptedBackend::new(vec![label("normal"), say("I'm doing well! How can I help with your sales data?")]),
        |_| {},
    )
    .await;

    let reply = h
        .runtime
        .handle_turn(TurnRequest::new(session(), "Hello, how are you?"), CancellationToken::new())
        .await
        .expect("turn");

    assert_eq!(reply.route, Route::Normal);
    assert!(!reply.is_error);
    assert_eq!(reply.response, "I'm doing well! How can I help with your sales data?");

    let requests = h.backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tier, ModelTier::Classifier);
    assert!(requests[1].tools.is_empty());

    let entries = h.sessions.list(&session()).await.expect("list");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].role, Role::User);
    assert_eq!(entries[0].content.primary_text(), "Hello, how are you?");
    assert_eq!(entries[1].role, Role::Assistant);
    assert_eq!(entries[1].metadata.as_ref().expect("metadata")["route"], "normal");
}

#[tokio::test]
async fn revenue_question_lists_tables_then_runs_a_capped_query() {
    let h = harness(
        ScriptedBackend::new(vec![
            label("analysis"),
            Step::Reply(call("c1", "list_tables", json!({}))),
            Step::Reply(call(
                "c2",
                "run_query",
                json!({
                    "sql": "SELECT period, SUM(revenue) AS total_revenue FROM products \
                            WHERE period = '2025-03' GROUP BY period"
                }),
            )),
            say("Total revenue in March 2025 is shown above."),
        ]),
        |_| {},
    )
    .await;

    let reply = h
        .runtime
        .handle_turn(
            TurnRequest::new(session(), "What was total revenue last month?"),
            CancellationToken::new(),
        )
        .await
        .expect("turn");

    assert_eq!(reply.route, Route::Analytical);
    assert!(!reply.is_error);
    assert_eq!(reply.response, "Total revenue in March 2025 is shown above.");

    let requests = h.backend.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[0].system_prompt.as_deref().is_some_and(|p| p.contains("April 2025")));

    let offered = requests[1].tools.iter().map(|tool| tool.name.as_str()).collect::<Vec<_>>();
    assert_eq!(offered, vec!["describe_schema", "list_tables", "run_query"]);

    let observations = requests[3]
        .messages
        .iter()
        .filter(|message| message.role == Role::Tool)
        .filter_map(|message| match &message.content {
            MessageContent::Blocks(blocks) => blocks.first().cloned(),
            MessageContent::Text(_) => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(observations.len(), 2);

    match &observations[0] {
        ContentBlock::ToolResult { name, output, .. } => {
            assert_eq!(name, "list_tables");
            assert_eq!(output["tables"], json!(["products"]));
        }
        other => panic!("unexpected block {other:?}"),
    }
    match &observations[1] {
        ContentBlock::ToolResult { name, output, .. } => {
            assert_eq!(name, "run_query");
            assert_eq!(output["limit"], 5);
            assert_eq!(output["row_count"], 1);
            assert_eq!(output["rows"][0]["period"], "2025-03");
            assert!(output["rows"][0]["total_revenue"].as_f64().is_some_and(|total| total > 0.0));
        }
        other => panic!("unexpected block {other:?}"),
    }

    assert_eq!(h.sessions.list(&session()).await.expect("list").len(), 2);
}

#[tokio::test]
async fn empty_message_with_malformed_classification_is_a_terminal_error() {
    let h = harness(ScriptedBackend::new(vec![say("not json at all")]), |_| {}).await;

    let error = h
        .runtime
        .handle_turn(TurnRequest::new(session(), ""), CancellationToken::new())
        .await
        .expect_err("malformed classification");

    assert!(matches!(error, TurnError::Classification(ClassificationError::Malformed(_))));
    assert!(!h.sessions.exists(&session()).await.expect("exists"));
}

#[tokio::test]
async fn runaway_analysis_ends_with_a_ceiling_message() {
    let h = harness(
        ScriptedBackend::new(vec![label("analysis")]).then_repeat(call(
            "loop",
            "run_query",
            json!({ "sql": "SELECT missing_column FROM products" }),
        )),
        |settings| settings.step_ceiling = 4,
    )
    .await;

    let reply = h
        .runtime
        .handle_turn(TurnRequest::new(session(), "Break it down by everything"), CancellationToken::new())
        .await
        .expect("turn");

    assert!(reply.is_error);
    assert!(reply.response.contains("within 4 steps"));
    assert_eq!(h.backend.requests().len(), 1 + 4);

    let entries = h.sessions.list(&session()).await.expect("list");
    assert_eq!(entries.len(), 2);
    assert!(entries[1].is_error());
}

#[tokio::test]
async fn backend_failure_inside_a_handler_becomes_an_error_message() {
    let h = harness(
        ScriptedBackend::new(vec![
            label("normal"),
            Step::Fail(LlmError::Api { status: 503, message: "overloaded".to_string() }),
        ]),
        |_| {},
    )
    .await;

    let reply = h
        .runtime
        .handle_turn(TurnRequest::new(session(), "Hi"), CancellationToken::new())
        .await
        .expect("turn");

    assert!(reply.is_error);
    assert!(reply.response.starts_with("Sorry, I couldn't complete that request:"));
}

#[tokio::test]
async fn analytical_alias_and_history_feed_are_honoured() {
    let h = harness(
        ScriptedBackend::new(vec![
            label("normal"),
            say("Hello!"),
            label("analytical"),
            say("Here is what I found."),
        ]),
        |settings| settings.include_history = true,
    )
    .await;

    h.runtime
        .handle_turn(TurnRequest::new(session(), "Hello"), CancellationToken::new())
        .await
        .expect("first turn");
    let reply = h
        .runtime
        .handle_turn(TurnRequest::new(session(), "And sales?"), CancellationToken::new())
        .await
        .expect("second turn");

    assert_eq!(reply.route, Route::Analytical);
    let prompt = h.backend.requests()[3].system_prompt.clone().expect("prompt");
    assert!(prompt.contains("USER: Hello\nASSISTANT: Hello!"));
}

#[tokio::test]
async fn cancelled_and_stalled_turns_do_not_persist() {
    let h = harness(ScriptedBackend::new(vec![Step::Stall]), |settings| {
        settings.turn_timeout = Duration::from_millis(50);
    })
    .await;

    let timed_out = h
        .runtime
        .handle_turn(TurnRequest::new(session(), "Hello"), CancellationToken::new())
        .await
        .expect_err("timeout");
    assert!(matches!(timed_out, TurnError::TimedOut(_)));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let cancelled = h
        .runtime
        .handle_turn(TurnRequest::new(session(), "Hello"), cancel)
        .await
        .expect_err("cancelled");
    assert!(matches!(cancelled, TurnError::Cancelled));

    assert!(h.sessions.list(&session()).await.expect("list").is_empty());
}

#[tokio::test]
async fn oversized_message_is_rejected_before_any_backend_call() {
    let h = harness(ScriptedBackend::default(), |settings| settings.max_message_chars = 10).await;

    let error = h
        .runtime
        .handle_turn(TurnRequest::new(session(), "this message is too long"), CancellationToken::new())
        .await
        .expect_err("too long");

    assert!(matches!(error, TurnError::InvalidMessage(_)));
    assert!(h.backend.requests().is_empty());
}

#[tokio::test]
async fn slow_session_write_does_not_count_against_the_turn_timeout() {
    let sessions = Arc::new(SlowSessionStore::new(Duration::from_millis(500)));
    let backend = Arc::new(ScriptedBackend::new(vec![label("normal"), say("Hi there!")]));
    let runtime = runtime_over(backend, sessions.clone(), |settings| {
        settings.turn_timeout = Duration::from_millis(200);
    })
    .await;

    let reply = runtime
        .handle_turn(TurnRequest::new(session(), "Hello"), CancellationToken::new())
        .await
        .expect("turn");
    assert_eq!(reply.response, "Hi there!");

    let roles = sessions
        .list(&session())
        .await
        .expect("list")
        .into_iter()
        .map(|entry| entry.role)
        .collect::<Vec<_>>();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn failed_session_write_is_a_persistence_error_and_stores_nothing() {
    let sessions = Arc::new(SlowSessionStore::refusing());
    let backend = Arc::new(ScriptedBackend::new(vec![label("normal"), say("Hi there!")]));
    let runtime = runtime_over(backend, sessions.clone(), |_| {}).await;

    let error = runtime
        .handle_turn(TurnRequest::new(session(), "Hello"), CancellationToken::new())
        .await
        .expect_err("write refused");

    assert!(matches!(error, TurnError::Persistence(_)));
    assert!(sessions.list(&session()).await.expect("list").is_empty());
}
