//! Line-oriented MCP server
//!
//! Reads one JSON-RPC message per line and writes one response per line.
//! `tools/call` is handled on its own thread so that a caller blocked in
//! a synchronous `speak` can still be interrupted by `stop_speech`.

use super::protocol::{
    tool_definitions, CallToolParams, CallToolResult, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo, SpeakArgs,
    StopArgs, ToolsCapability, DEFAULT_PROTOCOL_VERSION, INTERNAL_ERROR,
};
use crate::speech::Dispatcher;
use crate::Result;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// MCP server bound to a dispatcher
#[derive(Clone)]
pub struct Server {
    dispatcher: Dispatcher,
}

impl Server {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serve until `reader` reaches EOF
    ///
    /// Before returning, waits for outstanding tool calls and for any
    /// fire-and-forget speech they started.
    pub fn serve<R, W>(&self, mut reader: R, writer: Arc<Mutex<W>>) -> Result<()>
    where
        R: BufRead,
        W: Write + Send + 'static,
    {
        let mut calls: Vec<JoinHandle<()>> = Vec::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }

            // Undecodable bytes get the same answer as undecodable JSON
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    let response =
                        JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error(e));
                    write_response(&writer, &response)?;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            let request = match parse_request(line) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(response) => {
                    write_response(&writer, &response)?;
                    continue;
                }
            };

            if request.method == "tools/call" {
                let server = self.clone();
                let writer = Arc::clone(&writer);
                calls.retain(|h| !h.is_finished());
                calls.push(thread::spawn(move || {
                    let response = server.handle_request(request);
                    if let Some(response) = response {
                        if let Err(e) = write_response(&writer, &response) {
                            error!("Failed to write response: {}", e);
                        }
                    }
                }));
            } else if let Some(response) = self.handle_request(request) {
                write_response(&writer, &response)?;
            }
        }

        info!("Input closed, waiting for outstanding work");
        for call in calls {
            if call.join().is_err() {
                warn!("Tool call thread panicked");
            }
        }
        self.dispatcher.wait_idle();
        Ok(())
    }

    /// Handle one request; `None` for notifications
    pub fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            debug!("Notification: {}", request.method);
            return None;
        };

        let outcome = match request.method.as_str() {
            "initialize" => self.initialize(request.params.as_ref()),
            "ping" => Ok(json!({})),
            "tools/list" => to_result(ListToolsResult {
                tools: tool_definitions(self.dispatcher.settings()),
            }),
            "tools/call" => self.call_tool(request.params),
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                debug!("Request {} failed: {}", request.method, e.message);
                JsonRpcResponse::failure(id, e)
            }
        })
    }

    fn initialize(&self, params: Option<&Value>) -> std::result::Result<Value, JsonRpcError> {
        let version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        info!("Client initialized (protocol {})", version);

        to_result(InitializeResult {
            protocol_version: version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: ServerInfo {
                name: crate::APP_NAME.to_string(),
                version: crate::VERSION.to_string(),
            },
        })
    }

    fn call_tool(&self, params: Option<Value>) -> std::result::Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
        let call: CallToolParams =
            serde_json::from_value(params).map_err(JsonRpcError::invalid_params)?;
        let arguments = call.arguments.unwrap_or_else(|| json!({}));

        let result = match call.name.as_str() {
            "speak" => {
                let args: SpeakArgs =
                    serde_json::from_value(arguments).map_err(JsonRpcError::invalid_params)?;
                let request = args.into_request(self.dispatcher.settings());
                let outcome = self.dispatcher.speak(&request);
                info!("speak: {}", outcome);
                CallToolResult::text(outcome.to_string(), outcome.is_error())
            }
            "stop_speech" => {
                let args: StopArgs =
                    serde_json::from_value(arguments).map_err(JsonRpcError::invalid_params)?;
                let status = self.dispatcher.stop_speech(args.all);
                info!("stop_speech: {}", status);
                CallToolResult::text(status, false)
            }
            other => {
                return Err(JsonRpcError::invalid_params(format!(
                    "Unknown tool: {}",
                    other
                )))
            }
        };

        to_result(result)
    }
}

/// Parse one input line
///
/// `Ok(None)` means the line was a malformed notification that gets no
/// reply; `Err` carries the error response to send.
fn parse_request(line: &str) -> std::result::Result<Option<JsonRpcRequest>, JsonRpcResponse> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| JsonRpcResponse::failure(Value::Null, JsonRpcError::parse_error(e)))?;

    let id = value.get("id").cloned();
    match serde_json::from_value::<JsonRpcRequest>(value) {
        Ok(request) if request.jsonrpc == "2.0" => Ok(Some(request)),
        Ok(_) => match id {
            Some(id) => Err(JsonRpcResponse::failure(
                id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            )),
            None => Ok(None),
        },
        Err(e) => match id {
            Some(id) => Err(JsonRpcResponse::failure(id, JsonRpcError::invalid_request(e))),
            None => {
                warn!("Dropping malformed notification: {}", e);
                Ok(None)
            }
        },
    }
}

fn to_result<T: Serialize>(value: T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
}

fn write_response<W: Write>(writer: &Mutex<W>, response: &JsonRpcResponse) -> Result<()> {
    let line = serde_json::to_string(response)?;
    let mut out = writer.lock().unwrap_or_else(|e| e.into_inner());
    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchSettings;
    use crate::speech::EngineRegistry;

    fn server() -> Server {
        let settings = DispatchSettings::default();
        let engines = EngineRegistry::new(Vec::new(), settings.default_wpm);
        Server::new(Dispatcher::with_engines(settings, engines))
    }

    fn request(line: &str) -> JsonRpcRequest {
        parse_request(line).unwrap().unwrap()
    }

    #[test]
    fn test_initialize_echoes_version() {
        let resp = server()
            .handle_request(request(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26"}}"#,
            ))
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], "agent-say");
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[test]
    fn test_tools_list() {
        let resp = server()
            .handle_request(request(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#))
            .unwrap();
        let tools = resp.result.unwrap()["tools"].clone();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["speak", "stop_speech"]);
    }

    #[test]
    fn test_unknown_method() {
        let resp = server()
            .handle_request(request(r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#))
            .unwrap();
        assert_eq!(resp.error.unwrap().code, crate::mcp::protocol::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_notification_gets_no_reply() {
        let req = request(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert!(server().handle_request(req).is_none());
    }

    #[test]
    fn test_parse_errors() {
        let resp = parse_request("{not json").unwrap_err();
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.error.unwrap().code, crate::mcp::protocol::PARSE_ERROR);

        let resp = parse_request(r#"{"jsonrpc":"2.0","id":4}"#).unwrap_err();
        assert_eq!(resp.id, json!(4));
        assert_eq!(resp.error.unwrap().code, crate::mcp::protocol::INVALID_REQUEST);
    }

    #[test]
    fn test_speak_without_engine_is_tool_error() {
        let resp = server()
            .handle_request(request(
                r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"speak","arguments":{"text":"Hello"}}}"#,
            ))
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(
            result["content"][0]["text"],
            "No available speech engine (say/swift/espeak)."
        );
    }

    #[test]
    fn test_bad_tool_arguments() {
        let resp = server()
            .handle_request(request(
                r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"name":"speak","arguments":{}}}"#,
            ))
            .unwrap();
        assert_eq!(resp.error.unwrap().code, crate::mcp::protocol::INVALID_PARAMS);

        let resp = server()
            .handle_request(request(
                r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"sing"}}"#,
            ))
            .unwrap();
        assert_eq!(resp.error.unwrap().code, crate::mcp::protocol::INVALID_PARAMS);
    }

    #[test]
    fn test_stop_with_nothing_running() {
        let resp = server()
            .handle_request(request(
                r#"{"jsonrpc":"2.0","id":8,"method":"tools/call","params":{"name":"stop_speech"}}"#,
            ))
            .unwrap();
        assert_eq!(resp.result.unwrap()["content"][0]["text"], "No active speech.");
    }
}
