use crate::error::{ClientError, Result};
use crate::llm::{DEFAULT_AZURE_API_VERSION, LlmProtocol, LlmSettings, Provider};
use crate::mcp::DEFAULT_SEPARATOR;
use clap::Parser;
use config::{Config, Environment};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;
pub const DEFAULT_HISTORY_WINDOW: usize = 10;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Tools from connected MCP servers \
are available; each tool description starts with its server name in brackets. Use tools when they help \
answer the question, and explain tool errors to the user.";

#[derive(Parser, Debug)]
#[command(name = "mcp-client", author, version, about, long_about = None)]
pub struct Cli {
    /// Server config file (.json, .toml, .tml) or a single MCP server script
    pub target: PathBuf,

    /// Separator between server name and tool name
    #[arg(long, env = "MCP_TOOL_SEPARATOR", default_value = DEFAULT_SEPARATOR)]
    pub separator: String,

    /// Extra .env file to load (after ./.env)
    #[arg(long, env = "ENV_FILE")]
    pub env_file: Option<PathBuf>,

    /// Append every exchange to this JSON log file
    #[arg(long, env = "CHAT_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Model override (takes precedence over LLM_MODEL)
    #[arg(long)]
    pub model: Option<String>,
}

/// Raw `LLM_*` settings after layering defaults and environment.
#[derive(Debug, Deserialize, Clone)]
struct LlmConfig {
    base_url: String,
    model: String,
    #[serde(default)]
    api_key: Option<String>,
    protocol: String,
    max_tokens: u32,
    max_tool_iterations: usize,
    history_window: usize,
    #[serde(default)]
    system_prompt: Option<String>,
}

/// Everything the client needs besides the server list.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub llm: LlmSettings,
    /// Completed exchanges replayed into each new query.
    pub history_window: usize,
}

impl ClientSettings {
    /// Layer defaults, `LLM_*` environment variables and CLI overrides.
    ///
    /// Priority: CLI flag > `LLM_*` env var > `ANTHROPIC_API_KEY` (key only) > defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        let raw = build_llm_config(cli).map_err(ClientError::config)?;

        let base_url = raw.base_url.trim().to_string();
        if base_url.is_empty() {
            return Err(ClientError::config("LLM_BASE_URL cannot be empty"));
        }
        let model = raw.model.trim().to_string();
        if model.is_empty() {
            return Err(ClientError::config("LLM_MODEL cannot be empty"));
        }

        let protocol: LlmProtocol = raw.protocol.parse().map_err(ClientError::Config)?;
        let provider = azure_deployment(Provider::detect_from_url(&base_url))?;
        let api_key = raw.api_key.filter(|k| !k.trim().is_empty());

        if api_key.is_none() && provider.requires_api_key() {
            return Err(ClientError::config(
                "missing API key: set LLM_API_KEY or ANTHROPIC_API_KEY (e.g. in .env)",
            ));
        }

        let system_prompt = match raw.system_prompt {
            Some(p) if p.trim().is_empty() => None,
            Some(p) => Some(p),
            None => Some(DEFAULT_SYSTEM_PROMPT.to_string()),
        };

        Ok(Self {
            llm: LlmSettings {
                base_url,
                api_key,
                model,
                protocol,
                provider,
                max_tokens: raw.max_tokens,
                max_tool_iterations: raw.max_tool_iterations.max(1),
                system_prompt,
            },
            history_window: raw.history_window,
        })
    }
}

/// Fill in the Azure deployment from `AZURE_DEPLOYMENT_NAME` / `AZURE_API_VERSION`.
fn azure_deployment(provider: Provider) -> Result<Provider> {
    let Provider::AzureOpenAI { .. } = provider else {
        return Ok(provider);
    };

    let non_empty = |var: &str| env::var(var).ok().filter(|v| !v.trim().is_empty());
    let deployment_name = non_empty("AZURE_DEPLOYMENT_NAME").ok_or_else(|| {
        ClientError::config("Azure OpenAI requires AZURE_DEPLOYMENT_NAME to be set")
    })?;
    let api_version =
        non_empty("AZURE_API_VERSION").unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());

    Ok(Provider::AzureOpenAI {
        deployment_name: deployment_name.trim().to_string(),
        api_version: api_version.trim().to_string(),
    })
}

fn build_llm_config(cli: &Cli) -> std::result::Result<LlmConfig, config::ConfigError> {
    let mut builder = Config::builder()
        .set_default("base_url", DEFAULT_BASE_URL)?
        .set_default("model", DEFAULT_MODEL)?
        .set_default("protocol", "auto")?
        .set_default("max_tokens", i64::from(DEFAULT_MAX_TOKENS))?
        .set_default("max_tool_iterations", DEFAULT_MAX_TOOL_ITERATIONS as u64)?
        .set_default("history_window", DEFAULT_HISTORY_WINDOW as u64)?;

    // The Anthropic SDK convention, used only when LLM_API_KEY is absent.
    let llm_key_set = env::var("LLM_API_KEY").is_ok_and(|k| !k.trim().is_empty());
    if !llm_key_set {
        if let Ok(key) = env::var("ANTHROPIC_API_KEY") {
            builder = builder.set_default("api_key", key)?;
        }
    }

    // E.g. LLM_BASE_URL, LLM_MAX_TOKENS=2048
    builder = builder.add_source(
        Environment::with_prefix("LLM")
            .try_parsing(true)
            .ignore_empty(true),
    );

    if let Some(model) = &cli.model {
        builder = builder.set_override("model", model.as_str())?;
    }

    builder.build()?.try_deserialize()
}
