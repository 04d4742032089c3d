//! Anthropic Messages API driver.
//!
//! Streams `/v1/messages` server-sent events and maps them onto
//! [`NormalizedEvent`]s. Tool results are sent back as `tool_result` blocks
//! inside a user turn, as the API requires.

use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use futures::StreamExt;
use serde_json::{Value, json};

use crate::normalized::NormalizedEvent;

use super::provider::ANTHROPIC_VERSION;
use super::{
    EventStream, LlmDriver, LlmRequest, LlmSettings, Message, MessageRole, Provider,
    find_frame_boundary,
};

/// Accumulated state for a streaming `tool_use` block.
#[derive(Default)]
struct ToolAccum {
    id: String,
    name: String,
    args: String,
}

/// Driver for the Anthropic Messages API.
#[derive(Clone)]
pub struct MessagesDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for MessagesDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagesDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl MessagesDriver {
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
            "max_tokens": self.settings.max_tokens,
            "stream": true,
            "messages": render_messages(&req.messages),
        });
        if let Some(system) = &req.system {
            body["system"] = Value::String(system.clone());
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.wire_name,
                            "description": t.model_description(),
                            "input_schema": t.input_schema
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

/// Render the conversation as Messages API turns.
///
/// Consecutive tool results are merged into a single user turn.
pub(crate) fn render_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    let mut pending_results: Vec<Value> = Vec::new();

    for m in messages {
        if m.role != MessageRole::Tool && !pending_results.is_empty() {
            out.push(json!({ "role": "user", "content": std::mem::take(&mut pending_results) }));
        }

        match m.role {
            MessageRole::User => out.push(json!({ "role": "user", "content": m.content })),
            MessageRole::Assistant => {
                let mut blocks = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": m.content }));
                }
                for tc in m.tool_calls.iter().flatten() {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.arguments_json()
                    }));
                }
                // Empty text blocks are rejected; consecutive user turns are not.
                if !blocks.is_empty() {
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
            }
            MessageRole::Tool => pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": m.tool_call_id,
                "content": m.content,
                "is_error": m.is_error
            })),
        }
    }

    if !pending_results.is_empty() {
        out.push(json!({ "role": "user", "content": pending_results }));
    }
    out
}

/// Incremental parser for Messages API stream events.
#[derive(Default)]
pub(crate) struct MessagesStreamParser {
    tool_accum: BTreeMap<usize, ToolAccum>,
}

impl MessagesStreamParser {
    /// Translate one `data:` payload into normalized events.
    pub(crate) fn feed(&mut self, data: &str) -> anyhow::Result<Vec<NormalizedEvent>> {
        let v: Value = serde_json::from_str(data).context("invalid messages stream event")?;
        let mut events = Vec::new();
        let index = v
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|i| usize::try_from(i).ok())
            .unwrap_or(0);

        match v.get("type").and_then(Value::as_str).unwrap_or_default() {
            "content_block_start" => {
                let block = &v["content_block"];
                if block["type"] == "tool_use" {
                    let id = block["id"].as_str().unwrap_or_default().to_string();
                    let name = block["name"].as_str().unwrap_or_default().to_string();
                    self.tool_accum.insert(
                        index,
                        ToolAccum {
                            id: id.clone(),
                            name: name.clone(),
                            args: String::new(),
                        },
                    );
                    events.push(NormalizedEvent::ToolCallDelta {
                        call_index: index,
                        id: Some(id),
                        name: Some(name),
                        arguments_delta: None,
                    });
                } else if let Some(text) = block["text"].as_str().filter(|t| !t.is_empty()) {
                    events.push(NormalizedEvent::MessageDelta {
                        text: text.to_string(),
                    });
                }
            }
            "content_block_delta" => {
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or_default() {
                    "text_delta" => {
                        if let Some(text) = delta["text"].as_str().filter(|t| !t.is_empty()) {
                            events.push(NormalizedEvent::MessageDelta {
                                text: text.to_string(),
                            });
                        }
                    }
                    "input_json_delta" => {
                        let partial = delta["partial_json"].as_str().unwrap_or_default();
                        if let Some(acc) = self.tool_accum.get_mut(&index) {
                            acc.args.push_str(partial);
                        }
                        events.push(NormalizedEvent::ToolCallDelta {
                            call_index: index,
                            id: None,
                            name: None,
                            arguments_delta: Some(partial.to_string()),
                        });
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                if v["delta"]["stop_reason"] == "tool_use" {
                    for (idx, a) in &self.tool_accum {
                        events.push(NormalizedEvent::ToolCallComplete {
                            call_index: *idx,
                            id: a.id.clone(),
                            name: a.name.clone(),
                            arguments_json: a.args.clone(),
                        });
                    }
                }
            }
            "message_stop" => events.push(NormalizedEvent::Done),
            "error" => {
                let message = v["error"]["message"].as_str().unwrap_or("unknown error");
                return Err(anyhow!("provider error: {message}"));
            }
            // message_start, content_block_stop, ping
            _ => {}
        }

        Ok(events)
    }
}

#[async_trait::async_trait]
impl LlmDriver for MessagesDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
        let url = Provider::build_messages_url(&self.settings.base_url);
        let body = self.build_body(&req);

        let mut rb = self
            .http
            .post(&url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = rb.header("x-api-key", k);
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("messages request failed ({status}): {text}"));
        }
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();
            let mut parser = MessagesStreamParser::default();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some((pos, len)) = find_frame_boundary(&buf) {
                    let frame = buf.drain(..pos + len).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for line in text.lines() {
                        let Some(data) = line.trim().strip_prefix("data:") else {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;

    #[test]
    fn test_tool_results_merge_into_one_user_turn() {
        let messages = vec![
            Message::user("compare two songs"),
            Message::assistant_with_tool_calls(
                "Let me look.",
                vec![
                    ToolCall {
                        id: "tu_1".into(),
                        name: "lyrics_get_song_stats_only".into(),
                        arguments: r#"{"song_title":"Style"}"#.into(),
                    },
                    ToolCall {
                        id: "tu_2".into(),
                        name: "lyrics_get_song_stats_only".into(),
                        arguments: String::new(),
                    },
                ],
            ),
            Message::tool_result("tu_1", "words: 300", false),
            Message::tool_result("tu_2", "Error: unknown tool", true),
        ];

        let rendered = render_messages(&messages);
        assert_eq!(rendered.len(), 3);
        let assistant = &rendered[1]["content"];
        assert_eq!(assistant[0]["type"], "text");
        assert_eq!(assistant[1]["input"]["song_title"], "Style");
        assert_eq!(assistant[2]["input"], json!({}));

        let results = rendered[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["is_error"], true);
    }

    #[test]
    fn test_empty_assistant_turn_is_dropped() {
        let messages = vec![
            Message::user("hello"),
            Message::assistant(""),
            Message::user("still there?"),
        ];
        let rendered = render_messages(&messages);
        assert_eq!(rendered.len(), 2);
        assert!(rendered.iter().all(|m| m["role"] == "user"));
    }

    #[test]
    fn test_parser_tool_use_flow() {
        let mut p = MessagesStreamParser::default();
        p.feed(r#"{"type":"message_start","message":{}}"#).unwrap();
        let text = p
            .feed(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Checking"}}"#)
            .unwrap();
        assert_eq!(text, vec![NormalizedEvent::MessageDelta { text: "Checking".into() }]);

        p.feed(r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_1","name":"lyrics_analyze_song","input":{}}}"#)
            .unwrap();
        p.feed(r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"song_title\":"}}"#)
            .unwrap();
        p.feed(r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"Cardigan\"}"}}"#)
            .unwrap();
        let complete = p
            .feed(r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#)
            .unwrap();
        assert_eq!(
            complete,
            vec![NormalizedEvent::ToolCallComplete {
                call_index: 1,
                id: "tu_1".into(),
                name: "lyrics_analyze_song".into(),
                arguments_json: r#"{"song_title":"Cardigan"}"#.into(),
            }]
        );
        assert_eq!(
            p.feed(r#"{"type":"message_stop"}"#).unwrap(),
            vec![NormalizedEvent::Done]
        );
    }

    #[test]
    fn test_parser_error_event() {
        let mut p = MessagesStreamParser::default();
        let err = p
            .feed(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }
}
