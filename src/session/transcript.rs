//! Per-run conversation transcript and the JSON interaction log.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Message;

/// One completed query and what the user saw in response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub bot_response: String,
}

/// The log file layout: session id -> exchanges.
type LogFile = BTreeMap<String, Vec<Exchange>>;

/// History of the current run, optionally mirrored to a log file.
#[derive(Debug)]
pub struct Transcript {
    session_id: String,
    exchanges: Vec<Exchange>,
    log_file: Option<PathBuf>,
}

impl Transcript {
    pub fn new(log_file: Option<PathBuf>) -> Self {
        Self::with_session_id(Self::generate_session_id(Utc::now()), log_file)
    }

    pub fn with_session_id(session_id: impl Into<String>, log_file: Option<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            exchanges: Vec::new(),
            log_file,
        }
    }

    /// `session_<YYYYmmdd_HHMMSS>`.
    pub fn generate_session_id(now: DateTime<Utc>) -> String {
        format!("session_{}", now.format("%Y%m%d_%H%M%S"))
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Append an exchange and persist it when a log file is configured.
    pub fn record(
        &mut self,
        user_message: impl Into<String>,
        bot_response: impl Into<String>,
    ) -> anyhow::Result<()> {
        self.exchanges.push(Exchange {
            timestamp: Utc::now(),
            user_message: user_message.into(),
            bot_response: bot_response.into(),
        });

        if let Some(path) = &self.log_file {
            let mut all = load_log(path);
            all.insert(self.session_id.clone(), self.exchanges.clone());
            fs::write(path, serde_json::to_string_pretty(&all)?)?;
        }
        Ok(())
    }

    /// The last `window` exchanges as alternating user/assistant turns.
    ///
    /// Exchanges that produced no response text are left out.
    pub fn history_messages(&self, window: usize) -> Vec<Message> {
        let skip = self.exchanges.len().saturating_sub(window);
        self.exchanges[skip..]
            .iter()
            .filter(|e| !e.bot_response.trim().is_empty())
            .flat_map(|e| {
                [
                    Message::user(e.user_message.clone()),
                    Message::assistant(e.bot_response.clone()),
                ]
            })
            .collect()
    }
}

/// Read an existing log; a missing or corrupt file counts as empty.
fn load_log(path: &Path) -> LogFile {
    fs::read_to_string(path)
        .ok()
        .and_then(|txt| serde_json::from_str(&txt).ok())
        .unwrap_or_default()
}
