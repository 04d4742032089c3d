//! `OpenAI` Chat Completions API driver.
//!
//! This module implements the [`LlmDriver`] trait for the Chat Completions
//! API (`/v1/chat/completions`), supporting streaming responses and tool calls.
//! Any OpenAI-compatible endpoint (Azure, `OpenRouter`, Groq, local servers)
//! goes through here.

use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use futures::StreamExt;
use serde_json::{Value, json};

use crate::normalized::NormalizedEvent;

use super::{
    EventStream, LlmDriver, LlmRequest, LlmSettings, Message, MessageRole, Provider,
    find_frame_boundary,
};

/// Accumulated state for a streaming tool call.
#[derive(Default)]
struct ToolAccum {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

/// Driver for the `OpenAI` Chat Completions API.
///
/// Connects to `/v1/chat/completions` and streams responses as
/// [`NormalizedEvent`]s.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn build_body(&self, req: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.settings.model,
            "stream": true,
            "max_tokens": self.settings.max_tokens,
            "messages": render_messages(req.system.as_deref(), &req.messages),
        });
        // An empty or null tools array is rejected by some providers.
        let tools = render_tools(req);
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

/// Render the conversation in Chat Completions form.
pub(crate) fn render_messages(system: Option<&str>, messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system {
        out.push(json!({ "role": "system", "content": system }));
    }

    for m in messages {
        let v = match m.role {
            MessageRole::User => json!({ "role": "user", "content": m.content }),
            MessageRole::Assistant => match &m.tool_calls {
                Some(calls) if !calls.is_empty() => json!({
                    "role": "assistant",
                    "content": if m.content.is_empty() { Value::Null } else { Value::String(m.content.clone()) },
                    "tool_calls": calls.iter().map(|tc| json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.name, "arguments": tc.arguments }
                    })).collect::<Vec<_>>()
                }),
                _ => json!({ "role": "assistant", "content": m.content }),
            },
            MessageRole::Tool => json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id,
                "content": m.content
            }),
        };
        out.push(v);
    }
    out
}

fn render_tools(req: &LlmRequest) -> Vec<Value> {
    req.tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.wire_name,
                    "description": t.model_description(),
                    "parameters": t.input_schema
                }
            })
        })
        .collect()
}

/// Incremental parser for Chat Completions `data:` payloads.
#[derive(Default)]
pub(crate) struct ChatStreamParser {
    tool_accum: BTreeMap<usize, ToolAccum>,
}

impl ChatStreamParser {
    /// Translate one `data:` payload into normalized events.
    pub(crate) fn feed(&mut self, data: &str) -> anyhow::Result<Vec<NormalizedEvent>> {
        let mut events = Vec::new();
        if data == "[DONE]" {
            events.push(NormalizedEvent::Done);
            return Ok(events);
        }

        let v: Value = serde_json::from_str(data).context("invalid chat completions chunk")?;
        if let Some(err) = v.get("error") {
            return Err(anyhow!("provider error: {err}"));
        }

        let choice = &v["choices"][0];
        let delta = &choice["delta"];

        // Assistant text delta
        if let Some(s) = delta.get("content").and_then(|x| x.as_str()) {
            if !s.is_empty() {
                events.push(NormalizedEvent::MessageDelta {
                    text: s.to_string(),
                });
            }
        }

        // Tool calls streaming deltas
        if let Some(arr) = delta.get("tool_calls").and_then(|x| x.as_array()) {
            for tc in arr {
                let idx = tc
                    .get("index")
                    .and_then(Value::as_u64)
                    .and_then(|i| usize::try_from(i).ok())
                    .unwrap_or(0);
                let id = tc
                    .get("id")
                    .and_then(|x| x.as_str())
                    .map(ToString::to_string);
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|x| x.as_str())
                    .map(ToString::to_string);
                let args_delta = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|x| x.as_str())
                    .map(ToString::to_string);

                let entry = self.tool_accum.entry(idx).or_default();
                if entry.id.is_none() {
                    entry.id.clone_from(&id);
                }
                if entry.name.is_none() {
                    entry.name.clone_from(&name);
                }
                if let Some(ad) = &args_delta {
                    entry.args.push_str(ad);
                }

                events.push(NormalizedEvent::ToolCallDelta {
                    call_index: idx,
                    id,
                    name,
                    arguments_delta: args_delta,
                });
            }
        }

        // Completion boundary: signal tool phase via finish_reason
        if choice.get("finish_reason").and_then(|x| x.as_str()) == Some("tool_calls") {
            for (idx, a) in &self.tool_accum {
                if let (Some(id), Some(name)) = (&a.id, &a.name) {
                    events.push(NormalizedEvent::ToolCallComplete {
                        call_index: *idx,
                        id: id.clone(),
                        name: name.clone(),
                        arguments_json: a.args.clone(),
                    });
                }
            }
        }

        Ok(events)
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
        let url = self.settings.provider.build_chat_url(&self.settings.base_url);
        let body = self.build_body(&req);

        let mut rb = self.http.post(&url).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = match self.settings.provider {
                Provider::AzureOpenAI { .. } => rb.header("api-key", k),
                _ => rb.bearer_auth(k),
            };
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("chat completions request failed ({status}): {text}"));
        }
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();
            let mut parser = ChatStreamParser::default();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some((pos, len)) = find_frame_boundary(&buf) {
                    let frame = buf.drain(..pos + len).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for line in text.lines() {
                        let line = line.trim();
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        for event in parser.feed(data.trim())? {
                            yield event;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(out))
    }
}
