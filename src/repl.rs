//! Interactive chat loop: Await-Input → query → Final-Answer → Await-Input.

use std::io::Write;

use futures::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::ClientContext;
use crate::error::ClientError;
use crate::normalized::{NormalizedEvent, event_name};

/// Characters of a response shown by `history`.
const HISTORY_PREVIEW_CHARS: usize = 200;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    List,
    History,
    Empty,
    Query(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed.to_lowercase().as_str() {
            "" => Self::Empty,
            "quit" | "exit" => Self::Quit,
            "list" => Self::List,
            "history" => Self::History,
            _ => Self::Query(trimmed.to_string()),
        }
    }
}

impl ClientContext {
    /// Resolve one query, streaming output to `out`.
    ///
    /// Returns the text shown to the user. A model failure aborts the query
    /// with [`ClientError::Model`]; tool failures do not. A failed write to
    /// `out` is [`ClientError::Output`].
    pub async fn process_query<W: Write>(
        &mut self,
        query: &str,
        out: &mut W,
    ) -> Result<String, ClientError> {
        let history = self.transcript.history_messages(self.history_window);
        let stream = self
            .orchestrator
            .run_query(&mut self.registry, history, query.to_string());
        futures::pin_mut!(stream);

        let mut shown = String::new();
        let mut at_line_start = true;

        while let Some(event) = stream.next().await {
            tracing::trace!(name: "query.event", event = event_name(&event), "Query event");
            match event {
                NormalizedEvent::MessageDelta { text } => {
                    write!(out, "{text}")?;
                    out.flush().ok();
                    at_line_start = text.ends_with('\n');
                    shown.push_str(&text);
                }
                NormalizedEvent::ToolResult {
                    name,
                    server,
                    content,
                    success,
                    ..
                } => {
                    let line = match (success, server) {
                        (true, Some(server)) => format!("[Called {name} on {server}]"),
                        (true, None) => format!("[Called {name}]"),
                        (false, _) => format!("[{name} failed: {content}]"),
                    };
                    let sep = if at_line_start { "" } else { "\n" };
                    writeln!(out, "{sep}{line}")?;
                    at_line_start = true;
                    if !shown.is_empty() && !shown.ends_with('\n') {
                        shown.push('\n');
                    }
                    shown.push_str(&line);
                    shown.push('\n');
                }
                NormalizedEvent::Error { message, .. } => {
                    if !at_line_start {
                        writeln!(out).ok();
                    }
                    return Err(ClientError::Model(message));
                }
                NormalizedEvent::Done => break,
                NormalizedEvent::StreamStart { .. }
                | NormalizedEvent::ToolCallDelta { .. }
                | NormalizedEvent::ToolCallComplete { .. } => {}
            }
        }

        if !at_line_start {
            writeln!(out).ok();
        }
        Ok(shown.trim_end().to_string())
    }

    /// `list`: active servers and their tools.
    pub fn write_servers<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "\n=== Connected Servers ===")?;
        for server in self.registry.servers() {
            writeln!(
                out,
                "\n{} ({}, {}):",
                server.spec.name,
                server.spec.transport_label(),
                server.state
            )?;
            if server.tools.is_empty() {
                writeln!(out, "  (no tools)")?;
            }
            for tool in &server.tools {
                if tool.description.is_empty() {
                    writeln!(out, "  - {}", tool.qualified_name)?;
                } else {
                    writeln!(out, "  - {}: {}", tool.qualified_name, tool.description)?;
                }
            }
        }
        Ok(())
    }

    /// `history`: exchanges of this run.
    pub fn write_history<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let exchanges = self.transcript.exchanges();
        if exchanges.is_empty() {
            writeln!(out, "No conversation history in this session.")?;
            return Ok(());
        }

        writeln!(out, "\n=== History ({}) ===", self.transcript.session_id())?;
        for (i, e) in exchanges.iter().enumerate() {
            let n = i + 1;
            writeln!(out, "\n[{n}] User: {}", e.user_message)?;
            writeln!(out, "[{n}] Bot: {}", preview(&e.bot_response))?;
        }
        Ok(())
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > HISTORY_PREVIEW_CHARS {
        let head: String = text.chars().take(HISTORY_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Read commands until `quit` or end of input.
pub async fn run_chat_loop<R, W>(
    ctx: &mut ClientContext,
    input: R,
    out: &mut W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "\n=== MCP Multi-Client Started! ===")?;
    writeln!(out, "Commands:")?;
    writeln!(out, "  - Type your queries")?;
    writeln!(out, "  - 'list' to see available servers and tools")?;
    writeln!(out, "  - 'history' to see this session's conversation")?;
    writeln!(out, "  - 'quit' to exit")?;

    let mut lines = input.lines();

    loop {
        write!(out, "\nQuery: ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };

        match Command::parse(&line) {
            Command::Quit => break,
            Command::Empty => {}
            Command::List => {
                ctx.registry.close_dead_sessions().await;
                ctx.write_servers(out)?;
            }
            Command::History => ctx.write_history(out)?,
            Command::Query(query) => {
                writeln!(out)?;
                let response = match ctx.process_query(&query, out).await {
                    Ok(text) => text,
                    Err(ClientError::Output(e)) => return Err(e.into()),
                    Err(e) => {
                        tracing::warn!(name: "query.failed", error = %e, "Query aborted");
                        writeln!(out, "\nError: {e}")?;
                        format!("Error: {e}")
                    }
                };
                if let Err(e) = ctx.transcript.record(query, response) {
                    tracing::warn!(name: "transcript.write_failed", error = %e, "Could not write chat log");
                }
            }
        }
    }

    Ok(())
}
