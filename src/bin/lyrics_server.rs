//! Lyrics MCP server over stdio.
//!
//! `LYRICS_API_BASE` overrides the lyrics API and `LYRICS_ARTIST` the artist.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use rmcp::{ServiceExt, transport::stdio};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_multiclient::lyrics::{DEFAULT_API_BASE, LyricsClient, LyricsServer, catalog::ARTIST};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the MCP transport; logs go to stderr only.
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let _ = dotenvy::dotenv();

    let base = std::env::var("LYRICS_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
    let artist = std::env::var("LYRICS_ARTIST").unwrap_or_else(|_| ARTIST.to_string());
    let client = LyricsClient::new(&base, artist)?;

    tracing::info!(name: "lyrics.server.started", api_base = %base, artist = %client.artist(), "Lyrics MCP server starting");

    let service = LyricsServer::new(client).serve(stdio()).await?;
    service.waiting().await?;

    tracing::info!(name: "lyrics.server.stopped", "Lyrics MCP server stopped");
    Ok(())
}
