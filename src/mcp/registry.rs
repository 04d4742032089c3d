use crate::error::{ClientError, Result, SessionError};
use crate::mcp::config::ServerSpec;
use crate::mcp::session::{McpSession, SessionConnector, SessionState};
use crate::mcp::types::{RemoteTool, ToolDescriptor, ToolOutput};
use std::collections::{BTreeMap, HashMap};

/// Separator between server name and tool name in qualified names.
pub const DEFAULT_SEPARATOR: &str = ".";

/// Longest tool name the LLM APIs accept.
const MAX_WIRE_NAME_LEN: usize = 64;

/// One activated server: its connection, state and tool list.
#[derive(Debug)]
pub struct ServerSession {
    pub spec: ServerSpec,
    pub state: SessionState,
    pub tools: Vec<ToolDescriptor>,
    session: Option<Box<dyn McpSession>>,
}

/// Merged tool namespace over all active sessions.
///
/// Built once at startup and mutated only when a session closes.
#[derive(Debug)]
pub struct McpRegistry {
    separator: String,
    sessions: BTreeMap<String, ServerSession>,
    // qualified_name -> (server_name, local_name)
    tool_index: HashMap<String, (String, String)>,
    // wire_name -> qualified_name
    wire_index: HashMap<String, String>,
}

impl Default for McpRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl McpRegistry {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            sessions: BTreeMap::new(),
            tool_index: HashMap::new(),
            wire_index: HashMap::new(),
        }
    }

    /// Connect every enabled spec and register its tools.
    ///
    /// A server that fails to connect or list tools is logged and skipped.
    /// Fails only when nothing could be activated.
    pub async fn connect_all(
        specs: &[ServerSpec],
        separator: &str,
        connector: &dyn SessionConnector,
    ) -> Result<Self> {
        let mut registry = Self::new(separator);
        let enabled: Vec<&ServerSpec> = specs.iter().filter(|s| s.enabled).collect();

        for spec in specs.iter().filter(|s| !s.enabled) {
            tracing::info!(name: "mcp.server.skipped", server = %spec.name, "Skipping disabled server");
        }

        if enabled.is_empty() {
            return Err(ClientError::config("no enabled servers in configuration"));
        }

        for spec in enabled {
            tracing::info!(
                name: "mcp.server.connecting",
                server = %spec.name,
                transport = spec.transport_label(),
                "Connecting to MCP server"
            );

            let session = match connector.connect(spec).await {
                Ok(s) => s,
                Err(e) => {
                    let err = ClientError::Connection {
                        server: spec.name.clone(),
                        message: e.to_string(),
                    };
                    tracing::warn!(name: "mcp.server.failed", server = %spec.name, error = %err, "Skipping server");
                    continue;
                }
            };

            let tools = match session.list_tools().await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(
                        name: "mcp.server.failed",
                        server = %spec.name,
                        error = %e,
                        "tools/list failed, skipping server"
                    );
                    session.close().await;
                    continue;
                }
            };

            let registered = registry.register(spec.clone(), session, tools);
            tracing::info!(
                name: "mcp.server.connected",
                server = %spec.name,
                tool_count = registered.len(),
                "Connected to MCP server"
            );
        }

        if registry.sessions.is_empty() {
            return Err(ClientError::Connection {
                server: "*".to_string(),
                message: "no servers could be connected".to_string(),
            });
        }

        Ok(registry)
    }

    /// Add a ready session and namespace its tools.
    ///
    /// Returns the descriptors that were registered. A tool whose wire name
    /// collides with an already registered tool is skipped.
    pub fn register(
        &mut self,
        spec: ServerSpec,
        session: Box<dyn McpSession>,
        tools: Vec<RemoteTool>,
    ) -> Vec<ToolDescriptor> {
        let server_name = spec.name.clone();
        if self.sessions.contains_key(&server_name) {
            self.unregister_tools(&server_name);
        }

        let mut descriptors = Vec::with_capacity(tools.len());
        for t in tools {
            let qualified_name = self.qualify(&server_name, &t.name);
            let wire_name = Self::sanitize_tool_name(&qualified_name);

            if let Some(existing) = self.wire_index.get(&wire_name) {
                tracing::warn!(
                    name: "mcp.tool.collision",
                    tool = %qualified_name,
                    existing = %existing,
                    wire_name = %wire_name,
                    "Tool name collides after sanitizing, skipping"
                );
                continue;
            }

            self.tool_index
                .insert(qualified_name.clone(), (server_name.clone(), t.name.clone()));
            self.wire_index
                .insert(wire_name.clone(), qualified_name.clone());

            descriptors.push(ToolDescriptor {
                qualified_name,
                wire_name,
                server: server_name.clone(),
                local_name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            });
        }

        self.sessions.insert(
            server_name,
            ServerSession {
                spec,
                state: SessionState::Ready,
                tools: descriptors.clone(),
                session: Some(session),
            },
        );

        descriptors
    }

    /// `<server><separator><tool>`.
    pub fn qualify(&self, server_name: &str, tool_name: &str) -> String {
        format!("{server_name}{}{tool_name}", self.separator)
    }

    /// Sanitize tool names for LLM API compatibility (`^[a-zA-Z0-9_-]{1,64}$`).
    pub fn sanitize_tool_name(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .take(MAX_WIRE_NAME_LEN)
            .collect()
    }

    /// Merged tool list across all ready sessions.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.sessions
            .values()
            .filter(|s| s.state == SessionState::Ready)
            .flat_map(|s| s.tools.iter().cloned())
            .collect()
    }

    /// All sessions ever activated, including closed ones.
    pub fn servers(&self) -> impl Iterator<Item = &ServerSession> {
        self.sessions.values()
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.state == SessionState::Ready)
            .count()
    }

    /// Map a qualified or wire name to `(server, local_name)`.
    pub fn resolve(&self, name: &str) -> Option<&(String, String)> {
        self.tool_index.get(name).or_else(|| {
            self.wire_index
                .get(name)
                .and_then(|q| self.tool_index.get(q))
        })
    }

    /// Forward a tool call to the session that owns `name`.
    ///
    /// A remote-reported failure (`isError`) is returned as `Ok` with the
    /// flag set. A broken transport closes the owning session.
    pub async fn dispatch(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput> {
        let (server_name, local_name) = self
            .resolve(name)
            .cloned()
            .ok_or_else(|| ClientError::ToolNotFound(name.to_string()))?;

        let session = self
            .sessions
            .get(&server_name)
            .filter(|s| s.state == SessionState::Ready)
            .and_then(|s| s.session.as_ref())
            .ok_or_else(|| ClientError::ToolNotFound(name.to_string()))?;

        let qualified = self.qualify(&server_name, &local_name);
        match session.call_tool(&local_name, arguments).await {
            Ok(output) => Ok(output),
            Err(SessionError::Remote(message)) => Err(ClientError::ToolInvocation {
                tool: qualified,
                message,
            }),
            Err(SessionError::Transport(message)) => {
                tracing::warn!(
                    name: "mcp.server.closed",
                    server = %server_name,
                    error = %message,
                    "Session transport failed, removing its tools"
                );
                self.close_server(&server_name).await;
                Err(ClientError::ToolInvocation {
                    tool: qualified,
                    message: format!("server '{server_name}' disconnected: {message}"),
                })
            }
        }
    }

    /// Close every ready session whose transport has gone away.
    ///
    /// Returns the names of the servers that were closed.
    pub async fn close_dead_sessions(&mut self) -> Vec<String> {
        let dead: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state == SessionState::Ready)
            .filter(|(_, s)| s.session.as_ref().is_some_and(|session| session.is_closed()))
            .map(|(name, _)| name.clone())
            .collect();

        for name in &dead {
            tracing::warn!(
                name: "mcp.server.closed",
                server = %name,
                "Server connection lost, removing its tools"
            );
            self.close_server(name).await;
        }
        dead
    }

    /// Close one session and drop its tools for the rest of the run.
    pub async fn close_server(&mut self, server_name: &str) {
        self.unregister_tools(server_name);
        if let Some(entry) = self.sessions.get_mut(server_name) {
            entry.state = SessionState::Closed;
            entry.tools.clear();
            if let Some(session) = entry.session.take() {
                session.close().await;
            }
        }
    }

    fn unregister_tools(&mut self, server_name: &str) {
        self.tool_index.retain(|_, (server, _)| server != server_name);
        let tool_index = &self.tool_index;
        self.wire_index.retain(|_, q| tool_index.contains_key(q));
    }

    /// Close every session.
    pub async fn shutdown(&mut self) {
        let names: Vec<String> = self.sessions.keys().cloned().collect();
        for name in names {
            self.close_server(&name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::TransportSpec;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct EchoSession {
        fail_with: Option<SessionError>,
        exited: Arc<AtomicBool>,
    }

    #[async_trait]
    impl McpSession for EchoSession {
        async fn list_tools(&self) -> std::result::Result<Vec<RemoteTool>, SessionError> {
            Ok(Vec::new())
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: serde_json::Value,
        ) -> std::result::Result<ToolOutput, SessionError> {
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(ToolOutput::success(format!("{name}:{arguments}"))),
            }
        }

        fn is_closed(&self) -> bool {
            self.exited.load(Ordering::SeqCst)
        }

        async fn close(self: Box<Self>) {}
    }

    fn spec(name: &str) -> ServerSpec {
        ServerSpec {
            name: name.to_string(),
            transport: TransportSpec::Stdio {
                command: "true".into(),
                args: Vec::new(),
            },
            env: HashMap::new(),
            enabled: true,
        }
    }

    fn tool(name: &str) -> RemoteTool {
        RemoteTool {
            name: name.to_string(),
            description: Some(format!("{name} tool")),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    fn echo() -> Box<dyn McpSession> {
        Box::new(EchoSession::default())
    }

    #[test]
    fn test_same_tool_on_two_servers_does_not_collide() {
        let mut reg = McpRegistry::default();
        reg.register(spec("alpha"), echo(), vec![tool("x")]);
        reg.register(spec("beta"), echo(), vec![tool("x")]);

        let mut names: Vec<String> = reg.tools().into_iter().map(|t| t.qualified_name).collect();
        names.sort();
        assert_eq!(names, vec!["alpha.x", "beta.x"]);
        assert_eq!(reg.resolve("alpha.x"), Some(&("alpha".into(), "x".into())));
        assert_eq!(reg.resolve("beta_x"), Some(&("beta".into(), "x".into())));
    }

    #[test]
    fn test_wire_collision_skips_later_tool() {
        let mut reg = McpRegistry::default();
        reg.register(spec("a_b"), echo(), vec![tool("c")]);
        let added = reg.register(spec("a"), echo(), vec![tool("b_c")]);
        assert!(added.is_empty());
        assert_eq!(reg.tools().len(), 1);
    }

    #[test]
    fn test_custom_separator() {
        let mut reg = McpRegistry::new("__");
        let added = reg.register(spec("time"), echo(), vec![tool("now")]);
        assert_eq!(added[0].qualified_name, "time__now");
        assert_eq!(added[0].wire_name, "time__now");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "s".repeat(80);
        assert_eq!(McpRegistry::sanitize_tool_name(&long).len(), 64);
        assert_eq!(McpRegistry::sanitize_tool_name("a.b:c"), "a_b_c");
    }

    #[tokio::test]
    async fn test_dispatch_strips_prefix() {
        let mut reg = McpRegistry::default();
        reg.register(spec("alpha"), echo(), vec![tool("x")]);
        let out = reg
            .dispatch("alpha.x", serde_json::json!({"k": 1}))
            .await
            .unwrap();
        assert_eq!(out.text, r#"x:{"k":1}"#);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let mut reg = McpRegistry::default();
        reg.register(spec("alpha"), echo(), vec![tool("x")]);
        let err = reg
            .dispatch("alpha.y", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ToolNotFound(n) if n == "alpha.y"));
    }

    #[tokio::test]
    async fn test_remote_error_keeps_session() {
        let mut reg = McpRegistry::default();
        let failing = Box::new(EchoSession {
            fail_with: Some(SessionError::Remote("bad args".into())),
            ..Default::default()
        });
        reg.register(spec("alpha"), failing, vec![tool("x")]);

        let err = reg.dispatch("alpha.x", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::ToolInvocation { .. }));
        assert_eq!(reg.active_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_closes_session() {
        let mut reg = McpRegistry::default();
        let broken = Box::new(EchoSession {
            fail_with: Some(SessionError::Transport("broken pipe".into())),
            ..Default::default()
        });
        reg.register(spec("alpha"), broken, vec![tool("x")]);
        reg.register(spec("beta"), echo(), vec![tool("y")]);

        let err = reg.dispatch("alpha.x", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::ToolInvocation { .. }));
        assert_eq!(reg.active_count(), 1);

        let closed = reg.servers().find(|s| s.spec.name == "alpha").unwrap();
        assert_eq!(closed.state, SessionState::Closed);

        let err = reg.dispatch("alpha.x", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::ToolNotFound(_)));
        assert!(reg.dispatch("beta.y", serde_json::json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_exited_server_is_closed_and_its_tools_removed() {
        let mut reg = McpRegistry::default();
        let exited = Arc::new(AtomicBool::new(false));
        let dying = Box::new(EchoSession {
            exited: Arc::clone(&exited),
            ..Default::default()
        });
        reg.register(spec("alpha"), dying, vec![tool("x")]);
        reg.register(spec("beta"), echo(), vec![tool("y")]);

        assert!(reg.close_dead_sessions().await.is_empty());
        assert_eq!(reg.tools().len(), 2);

        exited.store(true, Ordering::SeqCst);
        assert_eq!(reg.close_dead_sessions().await, vec!["alpha".to_string()]);

        let alpha = reg.servers().find(|s| s.spec.name == "alpha").unwrap();
        assert_eq!(alpha.state, SessionState::Closed);
        let names: Vec<String> = reg.tools().into_iter().map(|t| t.qualified_name).collect();
        assert_eq!(names, vec!["beta.y"]);
        assert!(matches!(
            reg.dispatch("alpha.x", serde_json::json!({})).await,
            Err(ClientError::ToolNotFound(_))
        ));
    }
}
