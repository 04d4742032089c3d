use serde::{Deserialize, Serialize};

/// A tool as advertised by one server, before namespacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

impl From<rmcp::model::Tool> for RemoteTool {
    fn from(t: rmcp::model::Tool) -> Self {
        Self {
            name: t.name.to_string(),
            description: t.description.as_deref().map(ToString::to_string),
            input_schema: serde_json::Value::Object((*t.input_schema).clone()),
        }
    }
}

/// A tool in the merged namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    /// `<server><separator><local_name>`.
    pub qualified_name: String,
    /// Name presented to the model; `qualified_name` with disallowed chars replaced.
    pub wire_name: String,
    pub server: String,
    pub local_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Description as shown to the model, tagged with the owning server.
    pub fn model_description(&self) -> String {
        if self.description.is_empty() {
            format!("[{}]", self.server)
        } else {
            format!("[{}] {}", self.server, self.description)
        }
    }
}

/// Flattened result of one `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// Flatten a `tools/call` result: text items joined with newlines,
    /// other items rendered as JSON.
    pub fn from_call_result(result: &rmcp::model::CallToolResult) -> Self {
        let value = serde_json::to_value(result).unwrap_or_default();
        let mut parts = Vec::new();

        if let Some(items) = value.get("content").and_then(|c| c.as_array()) {
            for item in items {
                match item.get("text").and_then(|t| t.as_str()) {
                    Some(text) => parts.push(text.to_string()),
                    None => parts.push(item.to_string()),
                }
            }
        }
        if parts.is_empty() {
            if let Some(structured) = value.get("structuredContent").filter(|v| !v.is_null()) {
                parts.push(structured.to_string());
            }
        }

        Self {
            text: parts.join("\n"),
            is_error: result.is_error.unwrap_or(false),
        }
    }
}
