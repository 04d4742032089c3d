//! MCP tool surface of the lyrics server.

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;

use super::analysis;
use super::catalog::{self, resolve_title};
use super::client::LyricsClient;

/// Name the server reports during initialization.
pub const SERVER_NAME: &str = "lyrics";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SongRequest {
    /// Song title from the catalog, e.g. "Love Story"
    pub song_title: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CompareRequest {
    /// First song title
    pub song_a: String,
    /// Second song title
    pub song_b: String,
}

/// Lyrics retrieval and analysis tools.
#[derive(Clone)]
pub struct LyricsServer {
    client: LyricsClient,
    tool_router: ToolRouter<Self>,
}

impl std::fmt::Debug for LyricsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LyricsServer")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

fn text_result(text: String) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text)])
}

fn error_result(text: String) -> CallToolResult {
    CallToolResult::error(vec![Content::text(text)])
}

impl LyricsServer {
    /// Catalog title for `input`, or a tool error listing the catalog.
    fn lookup(input: &str) -> Result<&'static str, CallToolResult> {
        resolve_title(input).ok_or_else(|| {
            error_result(format!(
                "Unknown song '{input}'. Available songs:\n{}",
                catalog::catalog_listing()
            ))
        })
    }

    async fn lyrics_for(&self, input: &str) -> Result<(&'static str, String), CallToolResult> {
        let title = Self::lookup(input)?;
        match self.client.fetch(title).await {
            Ok(lyrics) => Ok((title, lyrics)),
            Err(e) => {
                tracing::warn!(name: "lyrics.tool.failed", song = %title, error = %e, "Could not fetch lyrics");
                Err(error_result(format!("Unable to fetch lyrics for '{title}': {e}")))
            }
        }
    }
}

#[tool_router]
impl LyricsServer {
    pub fn new(client: LyricsClient) -> Self {
        Self {
            client,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Get the full lyrics of a song from the catalog")]
    pub async fn get_song_lyrics(
        &self,
        Parameters(req): Parameters<SongRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(match self.lyrics_for(&req.song_title).await {
            Ok((title, lyrics)) => text_result(format!(
                "{title} by {}\n\n{}",
                self.client.artist(),
                lyrics.trim()
            )),
            Err(err) => err,
        })
    }

    #[tool(
        description = "Analyze a song: word statistics, sentiment, themes and most frequent words"
    )]
    pub async fn analyze_song(
        &self,
        Parameters(req): Parameters<SongRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(match self.lyrics_for(&req.song_title).await {
            Ok((title, lyrics)) => text_result(analysis::format_analysis(title, &lyrics)),
            Err(err) => err,
        })
    }

    #[tool(description = "Compare two songs side by side: statistics, sentiment and shared words")]
    pub async fn compare_songs(
        &self,
        Parameters(req): Parameters<CompareRequest>,
    ) -> Result<CallToolResult, McpError> {
        let (title_a, lyrics_a) = match self.lyrics_for(&req.song_a).await {
            Ok(found) => found,
            Err(err) => return Ok(err),
        };
        let (title_b, lyrics_b) = match self.lyrics_for(&req.song_b).await {
            Ok(found) => found,
            Err(err) => return Ok(err),
        };
        Ok(text_result(analysis::format_comparison(
            title_a, &lyrics_a, title_b, &lyrics_b,
        )))
    }

    #[tool(description = "Word and line statistics of a song, without sentiment or themes")]
    pub async fn get_song_stats_only(
        &self,
        Parameters(req): Parameters<SongRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(match self.lyrics_for(&req.song_title).await {
            Ok((title, lyrics)) => {
                text_result(analysis::format_stats(title, &analysis::text_stats(&lyrics)))
            }
            Err(err) => err,
        })
    }

    #[tool(description = "List the songs this server knows")]
    pub async fn list_songs(&self) -> Result<CallToolResult, McpError> {
        Ok(text_result(format!(
            "Songs by {}:\n{}",
            self.client.artist(),
            catalog::catalog_listing()
        )))
    }
}

#[tool_handler]
impl ServerHandler for LyricsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(format!(
                "Lyrics tools for songs by {}. Call list_songs to see valid titles.",
                self.client.artist()
            )),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
