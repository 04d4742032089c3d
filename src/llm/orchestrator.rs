//! LLM orchestrator with tool loop execution.
//!
//! The orchestrator manages the complete lifecycle of one user query:
//! 1. Send the conversation and the merged tool list to the LLM
//! 2. Stream the response, detecting tool calls
//! 3. Execute tool calls one at a time via the MCP registry
//! 4. Feed tool results back to the LLM
//! 5. Repeat until the model produces a final response
//!
//! Tool failures never end the query; they are sent back to the model as
//! error results. Model failures end the query with an
//! [`NormalizedEvent::Error`].

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use uuid::Uuid;

use crate::mcp::McpRegistry;
use crate::normalized::NormalizedEvent;

use super::{
    ChatCompletionsDriver, LlmDriver, LlmProtocol, LlmRequest, LlmSettings, Message,
    MessagesDriver, ToolCall,
};

/// Accumulated state for a streaming tool call.
#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// LLM orchestrator with tool loop execution.
#[derive(Clone)]
pub struct Orchestrator {
    settings: LlmSettings,
    driver: Arc<dyn LlmDriver>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator with the driver matching the settings' protocol.
    pub fn new(settings: LlmSettings) -> Self {
        let driver: Arc<dyn LlmDriver> = match settings.effective_protocol() {
            LlmProtocol::Messages => Arc::new(MessagesDriver::new(settings.clone())),
            LlmProtocol::Chat | LlmProtocol::Auto => {
                Arc::new(ChatCompletionsDriver::new(settings.clone()))
            }
        };
        Self { settings, driver }
    }

    /// Create an orchestrator over an explicit driver.
    pub fn with_driver(settings: LlmSettings, driver: Arc<dyn LlmDriver>) -> Self {
        Self { settings, driver }
    }

    /// Get the LLM settings.
    #[must_use]
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    /// Resolve one user query.
    ///
    /// `history` holds earlier user/assistant turns; `query` is appended as
    /// the new user turn. The returned stream ends with either
    /// [`NormalizedEvent::Done`] or [`NormalizedEvent::Error`].
    #[allow(clippy::too_many_lines)]
    pub fn run_query<'a>(
        &'a self,
        registry: &'a mut McpRegistry,
        history: Vec<Message>,
        query: String,
    ) -> impl Stream<Item = NormalizedEvent> + 'a {
        let request_id = Uuid::new_v4().to_string();
        let mut messages = history;
        messages.push(Message::user(query));

        tracing::info!(
            request_id = %request_id,
            message_count = messages.len(),
            tool_count = registry.tools().len(),
            "Starting query"
        );

        async_stream::stream! {
            yield NormalizedEvent::StreamStart {
                request_id: request_id.clone(),
            };

            let mut iteration = 0;

            loop {
                if iteration >= self.settings.max_tool_iterations {
                    tracing::error!(
                        request_id = %request_id,
                        iteration = iteration,
                        max_iterations = self.settings.max_tool_iterations,
                        "Maximum tool loop iterations exceeded"
                    );
                    yield NormalizedEvent::Error {
                        message: "Maximum tool loop iterations exceeded".to_string(),
                        code: Some("MAX_ITERATIONS".to_string()),
                    };
                    break;
                }
                iteration += 1;

                // Recomputed every turn: a session may have closed during the last round.
                registry.close_dead_sessions().await;
                let req = LlmRequest {
                    system: self.settings.system_prompt.clone(),
                    messages: messages.clone(),
                    tools: registry.tools(),
                };

                tracing::debug!(
                    request_id = %request_id,
                    iteration = iteration,
                    message_count = req.messages.len(),
                    tool_count = req.tools.len(),
                    "Sending request to LLM driver"
                );

                let driver_stream = match self.driver.stream(req).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(
                            request_id = %request_id,
                            iteration = iteration,
                            error = %e,
                            "Failed to create driver stream"
                        );
                        yield NormalizedEvent::Error {
                            message: e.to_string(),
                            code: None,
                        };
                        break;
                    }
                };

                let mut tool_accumulators: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();
                let mut assistant_text = String::new();
                let mut tool_phase = false;
                let mut failed = false;

                futures::pin_mut!(driver_stream);

                while let Some(result) = driver_stream.next().await {
                    match result {
                        Ok(event) => match event {
                            NormalizedEvent::MessageDelta { ref text } => {
                                assistant_text.push_str(text);
                                yield event;
                            }
                            NormalizedEvent::ToolCallDelta {
                                call_index,
                                ref id,
                                ref name,
                                ref arguments_delta,
                            } => {
                                let acc = tool_accumulators.entry(call_index).or_default();
                                if acc.id.is_none() {
                                    acc.id.clone_from(id);
                                }
                                if acc.name.is_none() {
                                    acc.name.clone_from(name);
                                }
                                if let Some(delta) = arguments_delta {
                                    acc.arguments.push_str(delta);
                                }
                                yield event;
                            }
                            NormalizedEvent::ToolCallComplete { .. } => {
                                tool_phase = true;
                                yield event;
                            }
                            NormalizedEvent::Done => {}
                            NormalizedEvent::Error { .. } => {
                                failed = true;
                                yield event;
                                break;
                            }
                            NormalizedEvent::StreamStart { .. } | NormalizedEvent::ToolResult { .. } => {}
                        },
                        Err(e) => {
                            tracing::error!(request_id = %request_id, error = %e, "Driver stream failed");
                            failed = true;
                            yield NormalizedEvent::Error {
                                message: e.to_string(),
                                code: None,
                            };
                            break;
                        }
                    }
                }

                if failed {
                    break;
                }

                let tool_calls: Vec<ToolCall> = if tool_phase {
                    tool_accumulators
                        .values()
                        .filter_map(|acc| {
                            Some(ToolCall {
                                id: acc.id.clone()?,
                                name: acc.name.clone()?,
                                arguments: acc.arguments.clone(),
                            })
                        })
                        .collect()
                } else {
                    Vec::new()
                };

                if tool_calls.is_empty() {
                    tracing::info!(
                        request_id = %request_id,
                        iteration = iteration,
                        "Final answer received"
                    );
                    yield NormalizedEvent::Done;
                    break;
                }

                messages.push(Message::assistant_with_tool_calls(
                    assistant_text.clone(),
                    tool_calls.clone(),
                ));

                // One call at a time; each is awaited before the next.
                for tool_call in &tool_calls {
                    let server = registry.resolve(&tool_call.name).map(|(s, _)| s.clone());

                    tracing::info!(
                        request_id = %request_id,
                        iteration = iteration,
                        tool_id = %tool_call.id,
                        tool_name = %tool_call.name,
                        "Executing tool call"
                    );

                    let (content, success) = match registry
                        .dispatch(&tool_call.name, tool_call.arguments_json())
                        .await
                    {
                        Ok(output) if output.is_error => {
                            tracing::warn!(
                                request_id = %request_id,
                                tool_name = %tool_call.name,
                                "Tool reported an error"
                            );
                            (format!("Error: {}", output.text), false)
                        }
                        Ok(output) => {
                            tracing::debug!(
                                request_id = %request_id,
                                tool_name = %tool_call.name,
                                result_length = output.text.len(),
                                "Tool call succeeded"
                            );
                            (output.text, true)
                        }
                        Err(e) => {
                            tracing::warn!(
                                request_id = %request_id,
                                tool_name = %tool_call.name,
                                error = %e,
                                "Tool call failed"
                            );
                            (format!("Error: {e}"), false)
                        }
                    };

                    yield NormalizedEvent::ToolResult {
                        id: tool_call.id.clone(),
                        name: tool_call.name.clone(),
                        server,
                        content: content.clone(),
                        success,
                    };

                    messages.push(Message::tool_result(tool_call.id.clone(), content, !success));
                }
            }
        }
    }
}
