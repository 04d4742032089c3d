use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

/// Extensions recognized as structured server config files.
const CONFIG_EXTENSIONS: &[&str] = &["json", "toml", "tml"];

/// Interpreter used when an entry names neither a command nor a known script type.
const DEFAULT_COMMAND: &str = "python";

/// On-disk config file: `{ "servers": { <name>: <entry> } }`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerEntry>,
}

/// One raw entry of the `servers` table, before command detection.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct McpServerEntry {
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// How a server is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    /// Local subprocess speaking MCP over stdin/stdout.
    Stdio { command: String, args: Vec<String> },
    /// Remote server over streamable HTTP.
    Http { url: String },
}

/// A fully resolved server description. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub transport: TransportSpec,
    /// Environment overrides for this server's process only.
    pub env: HashMap<String, String>,
    pub enabled: bool,
}

impl ServerSpec {
    /// Resolve a raw config entry.
    ///
    /// `script` is prepended to `args`; a missing `command` is derived from
    /// the first argument's extension.
    pub fn from_entry(name: &str, entry: &McpServerEntry) -> Self {
        let transport = if let Some(url) = &entry.url {
            TransportSpec::Http {
                url: expand_env_placeholders(url),
            }
        } else {
            let mut args = entry.args.clone();
            if let Some(script) = &entry.script {
                args.insert(0, script.clone());
            }
            let command = entry.command.clone().unwrap_or_else(|| {
                args.first()
                    .and_then(|first| interpreter_for(first))
                    .unwrap_or(DEFAULT_COMMAND)
                    .to_string()
            });
            TransportSpec::Stdio { command, args }
        };

        Self {
            name: name.to_string(),
            transport,
            env: expand_env_map(&entry.env),
            enabled: entry.enabled,
        }
    }

    /// Synthesize the spec for a bare script path (single-server mode).
    ///
    /// `.py` and `.js` scripts run under their interpreter; anything else is
    /// executed directly.
    pub fn from_script(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ClientError::config(format!("invalid server script path: {}", path.display()))
            })?
            .to_string();

        let path_str = path.to_string_lossy().into_owned();
        let transport = match interpreter_for(&path_str) {
            Some(interpreter) => TransportSpec::Stdio {
                command: interpreter.to_string(),
                args: vec![path_str],
            },
            None => TransportSpec::Stdio {
                command: path_str,
                args: Vec::new(),
            },
        };

        Ok(Self {
            name,
            transport,
            env: HashMap::new(),
            enabled: true,
        })
    }

    /// Short transport label for listings.
    pub fn transport_label(&self) -> &'static str {
        match self.transport {
            TransportSpec::Stdio { .. } => "stdio",
            TransportSpec::Http { .. } => "http",
        }
    }
}

fn interpreter_for(script: &str) -> Option<&'static str> {
    let ext = Path::new(script)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)?;
    match ext.as_str() {
        "py" => Some("python"),
        "js" => Some("node"),
        _ => None,
    }
}

/// Whether `path` names a structured config file rather than a server script.
pub fn is_config_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

pub fn load_mcp_config(path: impl AsRef<Path>) -> Result<McpConfig> {
    let path = path.as_ref();
    let txt = fs::read_to_string(path)
        .map_err(|e| ClientError::config(format!("cannot read {}: {e}", path.display())))?;
    parse_mcp_config(path, &txt)
}

fn parse_mcp_config(path: &Path, txt: &str) -> Result<McpConfig> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "json" => serde_json::from_str(txt)
            .map_err(|e| ClientError::config(format!("invalid JSON in {}: {e}", path.display()))),
        "toml" | "tml" => toml::from_str(txt)
            .map_err(|e| ClientError::config(format!("invalid TOML in {}: {e}", path.display()))),
        other => Err(ClientError::config(format!(
            "unsupported configuration file format: .{other}"
        ))),
    }
}

/// Produce the ordered server specs for a CLI target.
///
/// Config files yield one spec per entry (disabled entries included);
/// any other path yields exactly one enabled spec for that script.
pub fn load_server_specs(target: impl AsRef<Path>) -> Result<Vec<ServerSpec>> {
    let target = target.as_ref();
    if !is_config_path(target) {
        return Ok(vec![ServerSpec::from_script(target)?]);
    }

    let cfg = load_mcp_config(target)?;
    Ok(cfg
        .servers
        .iter()
        .map(|(name, entry)| ServerSpec::from_entry(name, entry))
        .collect())
}

/// Expand "${VAR}" placeholders from the process environment.
/// Unknown variables are left unchanged.
pub fn expand_env_placeholders(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(v) => out.push_str(&v),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}
