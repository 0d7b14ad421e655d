//! MCP wire types (JSON-RPC 2.0)
//!
//! Only the server side of the subset we speak: `initialize`, `ping`,
//! `tools/list` and `tools/call`.

use crate::config::DispatchSettings;
use crate::speech::{EngineChoice, SpeechRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Protocol version we answer with when the client does not name one
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC 2.0 request or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(PARSE_ERROR, format!("Parse error: {}", detail))
    }

    pub fn invalid_request(detail: impl std::fmt::Display) -> Self {
        Self::new(INVALID_REQUEST, format!("Invalid request: {}", detail))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {}", detail))
    }
}

/// `initialize` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Tool definition advertised by `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpTool>,
}

/// `tools/call` params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// `tools/call` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// A single text item
    pub fn text(text: impl Into<String>, is_error: bool) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: Some(is_error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

fn default_speed() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Arguments of the `speak` tool
///
/// Missing optional numbers fall back to the configured defaults.
/// `timeout_seconds` stays `None` when absent, which selects auto mode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeakArgs {
    pub text: String,
    #[serde(default)]
    pub engine: Option<EngineChoice>,
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub warmup: bool,
    #[serde(default)]
    pub wait_for_completion: bool,
    #[serde(default)]
    pub dedupe_seconds: Option<f64>,
    #[serde(default)]
    pub hard_timeout_seconds: Option<f64>,
}

impl SpeakArgs {
    pub fn into_request(self, settings: &DispatchSettings) -> SpeechRequest {
        let mut request = SpeechRequest::with_settings(self.text, settings)
            .engine(self.engine.unwrap_or_default())
            .speed(self.speed)
            .warmup(self.warmup)
            .wait(self.wait_for_completion);
        request.timeout_seconds = self.timeout_seconds;
        if let Some(dedupe) = self.dedupe_seconds {
            request = request.dedupe(dedupe);
        }
        if let Some(hard) = self.hard_timeout_seconds {
            request = request.hard_timeout(hard);
        }
        request
    }
}

/// Arguments of the `stop_speech` tool
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StopArgs {
    #[serde(default = "default_true")]
    pub all: bool,
}

impl Default for StopArgs {
    fn default() -> Self {
        Self { all: true }
    }
}

/// Tools exposed by this server
pub fn tool_definitions(settings: &DispatchSettings) -> Vec<McpTool> {
    vec![
        McpTool {
            name: "speak".to_string(),
            description: Some(
                "Speak text aloud. engine can be auto, say, swift or espeak.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "engine": {
                        "type": "string",
                        "enum": ["auto", "say", "swift", "espeak"],
                        "default": "auto"
                    },
                    "speed": {
                        "type": "number",
                        "default": 1.0,
                        "minimum": settings.min_speed,
                        "maximum": settings.max_speed
                    },
                    "timeout_seconds": {
                        "type": "number",
                        "description": "Wait budget hint for wait_for_completion; omit for automatic"
                    },
                    "warmup": { "type": "boolean", "default": false },
                    "wait_for_completion": { "type": "boolean", "default": false },
                    "dedupe_seconds": {
                        "type": "number",
                        "default": settings.default_dedupe_seconds
                    },
                    "hard_timeout_seconds": {
                        "type": "number",
                        "default": settings.hard_timeout_seconds
                    }
                },
                "required": ["text"]
            }),
        },
        McpTool {
            name: "stop_speech".to_string(),
            description: Some("Stop speech that is currently playing.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "all": { "type": "boolean", "default": true }
                }
            }),
        },
    ]
}
