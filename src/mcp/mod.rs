//! Model Context Protocol (MCP) client side.
//!
//! Connects to stdio and streamable-HTTP MCP servers, merges their tools
//! into one namespace and routes tool calls back to the owning server.
//!
//! # Configuration
//!
//! Servers are described in JSON or TOML:
//!
//! ```toml
//! [servers.lyrics]
//! command = "target/debug/lyrics-server"
//!
//! [servers.weather]
//! script = "weather.py"
//! env = { API_KEY = "${WEATHER_API_KEY}" }
//! enabled = false
//!
//! [servers.remote]
//! url = "https://example.com/mcp"
//! ```
//!
//! # Tool Namespacing
//!
//! Tools are namespaced by server name: `server_name.tool_name`
//! (e.g., `lyrics.analyze_song`). The model sees the sanitized form
//! `lyrics_analyze_song`; both resolve on dispatch.

pub mod config;
pub mod registry;
pub mod session;
pub mod types;

pub use config::{ServerSpec, TransportSpec, load_server_specs};
pub use registry::{DEFAULT_SEPARATOR, McpRegistry};
pub use session::{McpSession, RmcpConnector, SessionConnector, SessionState};
pub use types::{RemoteTool, ToolDescriptor, ToolOutput};
