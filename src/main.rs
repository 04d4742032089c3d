//! MCP multi-server chat client
//!
//! Entry point: load configuration, connect servers, run the chat loop.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::map_err_ignore)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::unused_async)]
#![allow(clippy::default_trait_access)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::process::ExitCode;

use clap::Parser;
use dotenvy::dotenv;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_multiclient::ClientContext;
use mcp_multiclient::config::{Cli, ClientSettings};
use mcp_multiclient::llm::Orchestrator;
use mcp_multiclient::mcp::{McpRegistry, RmcpConnector, load_server_specs};
use mcp_multiclient::repl::run_chat_loop;
use mcp_multiclient::session::Transcript;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so they never interleave with the conversation (M-LOG-STRUCTURED)
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    // Load .env (if present)
    let _ = dotenv();

    let cli = Cli::parse();

    if let Some(path) = &cli.env_file {
        if let Err(e) = dotenvy::from_path(path) {
            eprintln!("Configuration error: cannot read {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = ClientSettings::load(&cli)?;

    info!(
        name: "llm.config.loaded",
        base_url = %settings.llm.base_url,
        model = %settings.llm.model,
        protocol = ?settings.llm.effective_protocol(),
        "LLM configuration loaded"
    );

    let specs = load_server_specs(&cli.target)?;
    let registry = McpRegistry::connect_all(&specs, &cli.separator, &RmcpConnector).await?;

    let active: Vec<&str> = registry
        .servers()
        .map(|s| s.spec.name.as_str())
        .collect();
    println!(
        "Connected to {} server(s): {}",
        active.len(),
        active.join(", ")
    );
    println!("Available tools: {}", registry.tools().len());

    for tool in registry.tools() {
        info!(name: "mcp.tool.discovered", tool = %tool.qualified_name, "MCP tool discovered");
    }

    let mut ctx = ClientContext {
        registry,
        orchestrator: Orchestrator::new(settings.llm),
        transcript: Transcript::new(cli.log_file.clone()),
        history_window: settings.history_window,
    };

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    let result = run_chat_loop(&mut ctx, stdin, &mut stdout).await;

    ctx.registry.shutdown().await;
    println!("Goodbye!");

    result
}
