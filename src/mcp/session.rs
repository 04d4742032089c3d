//! Live connections to MCP servers.
//!
//! Both transports are driven by the `rmcp` client; they differ only in how
//! the connection is opened. Everything downstream talks to the
//! [`McpSession`] capability set.

use crate::error::SessionError;
use crate::mcp::config::{ServerSpec, TransportSpec};
use crate::mcp::types::{RemoteTool, ToolOutput};
use async_trait::async_trait;
use rmcp::{
    ServiceError,
    model::{CallToolRequestParam, PaginatedRequestParam},
    service::ServiceExt,
    transport::{StreamableHttpClientTransport, TokioChildProcess},
};
use tokio::process::Command;

type DynClientService = rmcp::service::RunningService<
    rmcp::service::RoleClient,
    Box<dyn rmcp::service::DynService<rmcp::service::RoleClient>>,
>;

/// Lifecycle of one server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// The capability set every server connection provides.
#[async_trait]
pub trait McpSession: Send + Sync + std::fmt::Debug {
    /// All tools the server exposes, following pagination.
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, SessionError>;

    /// Invoke one tool by its server-local name.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, SessionError>;

    /// Whether the underlying transport has gone away, e.g. the server
    /// process exited.
    fn is_closed(&self) -> bool {
        false
    }

    /// Tear the connection down.
    async fn close(self: Box<Self>);
}

/// Opens sessions for server specs.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, spec: &ServerSpec) -> Result<Box<dyn McpSession>, SessionError>;
}

/// An `rmcp` client session over either transport.
pub struct RmcpSession {
    server_name: String,
    service: DynClientService,
}

impl std::fmt::Debug for RmcpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmcpSession")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl RmcpSession {
    /// Spawn or dial the server and complete the MCP initialize handshake.
    pub async fn open(spec: &ServerSpec) -> Result<Self, SessionError> {
        let service = match &spec.transport {
            TransportSpec::Stdio { command, args } => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                for (k, v) in &spec.env {
                    cmd.env(k, v);
                }

                let transport = TokioChildProcess::new(cmd).map_err(|e| {
                    SessionError::Transport(format!("failed to spawn '{command}': {e}"))
                })?;
                ().into_dyn().serve(transport).await.map_err(|e| {
                    SessionError::Transport(format!("initialize failed: {e}"))
                })?
            }

            TransportSpec::Http { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.clone());
                ().into_dyn().serve(transport).await.map_err(|e| {
                    SessionError::Transport(format!("initialize failed for {url}: {e}"))
                })?
            }
        };

        Ok(Self {
            server_name: spec.name.clone(),
            service,
        })
    }
}

fn classify(err: ServiceError) -> SessionError {
    match err {
        ServiceError::McpError(data) => SessionError::Remote(data.message.to_string()),
        other => SessionError::Transport(other.to_string()),
    }
}

#[async_trait]
impl McpSession for RmcpSession {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, SessionError> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.take().map(|c| PaginatedRequestParam { cursor: Some(c) });
            let result = self.service.list_tools(params).await.map_err(classify)?;
            out.extend(result.tools.into_iter().map(RemoteTool::from));

            match result.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(out)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, SessionError> {
        let res = self
            .service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: arguments.as_object().cloned(),
            })
            .await
            .map_err(classify)?;

        Ok(ToolOutput::from_call_result(&res))
    }

    fn is_closed(&self) -> bool {
        self.service.peer().is_transport_closed()
    }

    async fn close(self: Box<Self>) {
        let Self {
            server_name,
            service,
            ..
        } = *self;
        if let Err(e) = service.cancel().await {
            tracing::debug!(server = %server_name, error = %e, "Error closing MCP session");
        }
    }
}

/// Production connector backed by `rmcp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RmcpConnector;

#[async_trait]
impl SessionConnector for RmcpConnector {
    async fn connect(&self, spec: &ServerSpec) -> Result<Box<dyn McpSession>, SessionError> {
        let session = RmcpSession::open(spec).await?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_spawn_failure_is_transport_error() {
        let spec = ServerSpec {
            name: "ghost".into(),
            transport: TransportSpec::Stdio {
                command: "/definitely/not/a/real/mcp-server".into(),
                args: Vec::new(),
            },
            env: HashMap::new(),
            enabled: true,
        };
        let err = RmcpConnector.connect(&spec).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Ready.to_string(), "ready");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }
}
