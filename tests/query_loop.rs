//! Query loop tests over a scripted model and in-memory MCP sessions.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use mcp_multiclient::ClientContext;
use mcp_multiclient::error::{ClientError, SessionError};
use mcp_multiclient::llm::{
    EventStream, LlmDriver, LlmProtocol, LlmRequest, LlmSettings, MessageRole, Orchestrator,
    Provider,
};
use mcp_multiclient::mcp::{
    McpRegistry, McpSession, RemoteTool, ServerSpec, SessionConnector, ToolOutput, TransportSpec,
};
use mcp_multiclient::normalized::NormalizedEvent;
use mcp_multiclient::repl::run_chat_loop;
use mcp_multiclient::session::Transcript;

// ─────────────────────────────────────────────────────────────────────────────
// Fakes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FakeSession {
    server: String,
    exited: Arc<AtomicBool>,
}

#[async_trait]
impl McpSession for FakeSession {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, SessionError> {
        Ok(["analyze_song", "explode"]
            .iter()
            .map(|name| RemoteTool {
                name: (*name).to_string(),
                description: Some(format!("{name} on {}", self.server)),
                input_schema: json!({"type": "object"}),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, SessionError> {
        match name {
            "explode" => Ok(ToolOutput::error("boom")),
            _ => Ok(ToolOutput::success(format!(
                "{}:{name}:{arguments}",
                self.server
            ))),
        }
    }

    fn is_closed(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    async fn close(self: Box<Self>) {}
}

/// Connects every spec except those named in `refuse`.
#[derive(Debug)]
struct FakeConnector {
    refuse: Vec<&'static str>,
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, spec: &ServerSpec) -> Result<Box<dyn McpSession>, SessionError> {
        if self.refuse.contains(&spec.name.as_str()) {
            return Err(SessionError::Transport("connection refused".into()));
        }
        Ok(Box::new(FakeSession {
            server: spec.name.clone(),
            ..Default::default()
        }))
    }
}

/// Replays one scripted event list per model turn and records each request.
#[derive(Debug, Default)]
struct ScriptedDriver {
    turns: Mutex<VecDeque<Vec<NormalizedEvent>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedDriver {
    fn new(turns: Vec<Vec<NormalizedEvent>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmDriver for ScriptedDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
        self.requests.lock().unwrap().push(req);
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("model unavailable"))?;
        Ok(Box::pin(futures::stream::iter(turn.into_iter().map(Ok))))
    }
}

fn spec(name: &str, enabled: bool) -> ServerSpec {
    ServerSpec {
        name: name.to_string(),
        transport: TransportSpec::Stdio {
            command: format!("{name}-server"),
            args: Vec::new(),
        },
        env: HashMap::new(),
        enabled,
    }
}

fn settings(max_tool_iterations: usize) -> LlmSettings {
    LlmSettings {
        base_url: "http://localhost:1".to_string(),
        api_key: None,
        model: "scripted".to_string(),
        protocol: LlmProtocol::Chat,
        provider: Provider::Generic,
        max_tokens: 256,
        max_tool_iterations,
        system_prompt: Some("test".to_string()),
    }
}

fn text_turn(text: &str) -> Vec<NormalizedEvent> {
    vec![
        NormalizedEvent::MessageDelta {
            text: text.to_string(),
        },
        NormalizedEvent::Done,
    ]
}

fn tool_turn(id: &str, name: &str, args: &str) -> Vec<NormalizedEvent> {
    vec![
        NormalizedEvent::ToolCallDelta {
            call_index: 0,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments_delta: Some(args.to_string()),
        },
        NormalizedEvent::ToolCallComplete {
            call_index: 0,
            id: id.to_string(),
            name: name.to_string(),
            arguments_json: args.to_string(),
        },
        NormalizedEvent::Done,
    ]
}

async fn registry(names: &[&str]) -> McpRegistry {
    let specs: Vec<ServerSpec> = names.iter().map(|n| spec(n, true)).collect();
    McpRegistry::connect_all(&specs, ".", &FakeConnector { refuse: Vec::new() })
        .await
        .unwrap()
}

async fn collect(
    orchestrator: &Orchestrator,
    registry: &mut McpRegistry,
    query: &str,
) -> Vec<NormalizedEvent> {
    orchestrator
        .run_query(registry, Vec::new(), query.to_string())
        .collect()
        .await
}

fn tool_results(events: &[NormalizedEvent]) -> Vec<(String, Option<String>, String, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            NormalizedEvent::ToolResult {
                name,
                server,
                content,
                success,
                ..
            } => Some((name.clone(), server.clone(), content.clone(), *success)),
            _ => None,
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Session manager
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_only_enabled_servers_are_activated() {
    let specs = vec![
        spec("lyrics", true),
        spec("weather", false),
        spec("files", true),
        spec("legacy", false),
    ];
    let reg = McpRegistry::connect_all(&specs, ".", &FakeConnector { refuse: Vec::new() })
        .await
        .unwrap();

    let names: Vec<&str> = reg.servers().map(|s| s.spec.name.as_str()).collect();
    assert_eq!(names, vec!["files", "lyrics"]);
    assert_eq!(reg.active_count(), 2);
    assert_eq!(reg.tools().len(), 4);
    assert!(reg.tools().iter().all(|t| t.server != "weather"));
}

#[tokio::test]
async fn test_failed_server_is_skipped() {
    let specs = vec![spec("lyrics", true), spec("broken", true)];
    let reg = McpRegistry::connect_all(
        &specs,
        ".",
        &FakeConnector {
            refuse: vec!["broken"],
        },
    )
    .await
    .unwrap();

    assert_eq!(reg.active_count(), 1);
    assert!(reg.resolve("lyrics.analyze_song").is_some());
    assert!(reg.resolve("broken.analyze_song").is_none());
}

#[tokio::test]
async fn test_startup_failures() {
    let none_enabled = vec![spec("weather", false)];
    let err = McpRegistry::connect_all(&none_enabled, ".", &FakeConnector { refuse: Vec::new() })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Config(_)));

    let all_broken = vec![spec("a", true), spec("b", true)];
    let err = McpRegistry::connect_all(
        &all_broken,
        ".",
        &FakeConnector {
            refuse: vec!["a", "b"],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ClientError::Connection { .. }));
}

#[tokio::test]
async fn test_exited_server_tools_are_withdrawn() {
    let exited = Arc::new(AtomicBool::new(false));
    let lyrics = FakeSession {
        server: "lyrics".to_string(),
        exited: Arc::clone(&exited),
    };
    let tools = lyrics.list_tools().await.unwrap();
    let mut reg = registry(&["files"]).await;
    reg.register(spec("lyrics", true), Box::new(lyrics), tools);
    assert_eq!(reg.tools().len(), 4);

    exited.store(true, Ordering::SeqCst);

    let driver = ScriptedDriver::new(vec![text_turn("Only files left.")]);
    let mut ctx = ClientContext {
        registry: reg,
        orchestrator: Orchestrator::with_driver(settings(10), driver.clone()),
        transcript: Transcript::with_session_id("session_exit", None),
        history_window: 10,
    };

    let input: &[u8] = b"What can you do?\nlist\n";
    let mut out = Vec::new();
    run_chat_loop(&mut ctx, input, &mut out).await.unwrap();
    let out = String::from_utf8(out).unwrap();

    let requests = driver.requests();
    assert_eq!(requests[0].tools.len(), 2);
    assert!(requests[0].tools.iter().all(|t| t.server == "files"));
    assert!(out.contains("lyrics (stdio, closed):"));
    assert_eq!(ctx.registry.active_count(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Query loop
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tool_call_round_trip() {
    let driver = ScriptedDriver::new(vec![
        tool_turn("call_1", "lyrics_analyze_song", r#"{"song_title":"Love Story"}"#),
        text_turn("It is a happy song."),
    ]);
    let orchestrator = Orchestrator::with_driver(settings(10), driver.clone());
    let mut reg = registry(&["lyrics", "files"]).await;

    let events = collect(&orchestrator, &mut reg, "Analyze Love Story").await;

    assert!(matches!(events.first(), Some(NormalizedEvent::StreamStart { .. })));
    assert_eq!(events.last(), Some(&NormalizedEvent::Done));

    let results = tool_results(&events);
    assert_eq!(results.len(), 1);
    let (name, server, content, success) = &results[0];
    assert_eq!(name, "lyrics_analyze_song");
    assert_eq!(server.as_deref(), Some("lyrics"));
    assert_eq!(content, r#"lyrics:analyze_song:{"song_title":"Love Story"}"#);
    assert!(success);

    let requests = driver.requests();
    assert_eq!(requests.len(), 2);
    // Tools from every session are offered, tagged with their server.
    assert_eq!(requests[0].tools.len(), 4);
    assert!(
        requests[0]
            .tools
            .iter()
            .any(|t| t.model_description().starts_with("[files]"))
    );

    let followup = &requests[1].messages;
    let tool_msg = followup.last().unwrap();
    assert_eq!(tool_msg.role, MessageRole::Tool);
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
    assert!(!tool_msg.is_error);
    assert_eq!(
        followup[followup.len() - 2].tool_calls.as_ref().map(Vec::len),
        Some(1)
    );
}

#[tokio::test]
async fn test_tool_error_is_fed_back_and_loop_continues() {
    let driver = ScriptedDriver::new(vec![
        tool_turn("call_1", "lyrics.explode", "{}"),
        text_turn("The tool failed, sorry."),
    ]);
    let orchestrator = Orchestrator::with_driver(settings(10), driver.clone());
    let mut reg = registry(&["lyrics"]).await;

    let events = collect(&orchestrator, &mut reg, "Break something").await;

    let results = tool_results(&events);
    assert_eq!(results[0].2, "Error: boom");
    assert!(!results[0].3);
    assert_eq!(events.last(), Some(&NormalizedEvent::Done));

    let requests = driver.requests();
    let tool_msg = requests[1].messages.last().unwrap();
    assert!(tool_msg.is_error);
    assert_eq!(reg.active_count(), 1);
}

#[tokio::test]
async fn test_unknown_tool_does_not_abort_query() {
    let driver = ScriptedDriver::new(vec![
        tool_turn("call_1", "nowhere_tool", "not json"),
        text_turn("No such tool."),
    ]);
    let orchestrator = Orchestrator::with_driver(settings(10), driver);
    let mut reg = registry(&["lyrics"]).await;

    let events = collect(&orchestrator, &mut reg, "Use a missing tool").await;

    let results = tool_results(&events);
    assert_eq!(results.len(), 1);
    assert!(results[0].1.is_none());
    assert!(results[0].2.contains("unknown tool"));
    assert!(!results[0].3);
    assert_eq!(events.last(), Some(&NormalizedEvent::Done));
}

#[tokio::test]
async fn test_max_iterations() {
    let driver = ScriptedDriver::new(
        (0..5)
            .map(|i| tool_turn(&format!("call_{i}"), "lyrics_analyze_song", "{}"))
            .collect(),
    );
    let orchestrator = Orchestrator::with_driver(settings(2), driver.clone());
    let mut reg = registry(&["lyrics"]).await;

    let events = collect(&orchestrator, &mut reg, "Loop forever").await;

    assert_eq!(driver.requests().len(), 2);
    assert!(matches!(
        events.last(),
        Some(NormalizedEvent::Error { code: Some(code), .. }) if code == "MAX_ITERATIONS"
    ));
}

#[tokio::test]
async fn test_model_failure_aborts_query() {
    let driver = ScriptedDriver::new(Vec::new());
    let orchestrator = Orchestrator::with_driver(settings(10), driver);
    let mut reg = registry(&["lyrics"]).await;

    let events = collect(&orchestrator, &mut reg, "Hello").await;

    assert!(matches!(events.last(), Some(NormalizedEvent::Error { .. })));
    assert!(!events.contains(&NormalizedEvent::Done));
}

// ─────────────────────────────────────────────────────────────────────────────
// Interactive loop
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_loop_session() {
    let driver = ScriptedDriver::new(vec![
        tool_turn("call_1", "lyrics_analyze_song", r#"{"song_title":"Style"}"#),
        text_turn("Style is upbeat."),
        text_turn("You asked about Style."),
    ]);
    let mut ctx = ClientContext {
        registry: registry(&["lyrics"]).await,
        orchestrator: Orchestrator::with_driver(settings(10), driver.clone()),
        transcript: Transcript::with_session_id("session_test", None),
        history_window: 10,
    };

    let input: &[u8] = b"list\n\nAnalyze Style\nWhat did I ask?\nHISTORY\nquit\nnever read\n";
    let mut out = Vec::new();
    run_chat_loop(&mut ctx, input, &mut out).await.unwrap();
    let out = String::from_utf8(out).unwrap();

    assert!(out.contains("lyrics (stdio, ready):"));
    assert!(out.contains("  - lyrics.analyze_song: analyze_song on lyrics"));
    assert!(out.contains("[Called lyrics_analyze_song on lyrics]"));
    assert!(out.contains("Style is upbeat."));
    assert!(out.contains("[1] User: Analyze Style"));
    assert!(out.contains("[2] Bot: You asked about Style."));

    assert_eq!(ctx.transcript.exchanges().len(), 2);
    assert!(
        ctx.transcript.exchanges()[0]
            .bot_response
            .ends_with("Style is upbeat.")
    );

    // The second query replays the first exchange.
    let requests = driver.requests();
    let second_query = &requests[2].messages;
    assert_eq!(second_query.len(), 3);
    assert_eq!(second_query[0].content, "Analyze Style");
}

#[tokio::test]
async fn test_chat_loop_ends_on_eof() {
    let driver = ScriptedDriver::new(Vec::new());
    let mut ctx = ClientContext {
        registry: registry(&["lyrics"]).await,
        orchestrator: Orchestrator::with_driver(settings(10), driver),
        transcript: Transcript::with_session_id("session_eof", None),
        history_window: 10,
    };

    let input: &[u8] = b"hello\n";
    let mut out = Vec::new();
    run_chat_loop(&mut ctx, input, &mut out).await.unwrap();
    let out = String::from_utf8(out).unwrap();

    assert!(out.contains("Error: model request failed: model unavailable"));
    assert_eq!(ctx.transcript.exchanges().len(), 1);
    assert!(ctx.transcript.exchanges()[0].bot_response.starts_with("Error:"));
}

/// A terminal whose writes always fail.
struct ClosedTerminal;

impl Write for ClosedTerminal {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_terminal_write_failure_is_not_a_model_error() {
    let driver = ScriptedDriver::new(vec![text_turn("Hello there.")]);
    let mut ctx = ClientContext {
        registry: registry(&["lyrics"]).await,
        orchestrator: Orchestrator::with_driver(settings(10), driver),
        transcript: Transcript::with_session_id("session_pipe", None),
        history_window: 10,
    };

    let err = ctx.process_query("Hi", &mut ClosedTerminal).await.unwrap_err();
    assert!(matches!(err, ClientError::Output(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    assert!(ctx.transcript.exchanges().is_empty());
}
