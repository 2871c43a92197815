//! JSON command surface
//!
//! A thin request/response layer over the node's public operations, shared
//! by every front end (shell, Bluetooth, TCP). Each request names a command
//! with JSON arguments; each response carries `success`, an optional
//! `message`, optional structured `data`, and a stable `error_code` on
//! failure.

use crate::error::MeshError;
use crate::node::Node;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

impl ApiRequest {
    pub fn new(command: &str, args: Value) -> Self {
        Self {
            command: command.to_string(),
            args,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ApiResponse {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: Some(message.to_string()),
            data: None,
            error_code: None,
        }
    }

    fn ok_with(message: &str, data: Value) -> Self {
        Self {
            success: true,
            message: Some(message.to_string()),
            data: Some(data),
            error_code: None,
        }
    }

    fn err(error: &MeshError) -> Self {
        Self {
            success: false,
            message: Some(error.to_string()),
            data: None,
            error_code: Some(error.code().to_string()),
        }
    }

    fn err_code(code: &str, message: &str) -> Self {
        Self {
            success: false,
            message: Some(message.to_string()),
            data: None,
            error_code: Some(code.to_string()),
        }
    }
}

/// Stateless dispatcher over a node
pub struct Api;

impl Api {
    /// Execute one request against the node
    pub fn handle(node: &mut Node, request: &ApiRequest, now: u64) -> ApiResponse {
        match request.command.as_str() {
            "send_message" => {
                let (Some(to), Some(text)) = (
                    request.args.get("to").and_then(Value::as_str),
                    request.args.get("text").and_then(Value::as_str),
                ) else {
                    return ApiResponse::err_code("BAD_ARGS", "expected args: to, text");
                };
                match node.send_message(to, text, now) {
                    Ok(()) => ApiResponse::ok("message routed"),
                    Err(err) => ApiResponse::err(&err),
                }
            }
            "send_public_message" => {
                let Some(text) = request.args.get("text").and_then(Value::as_str) else {
                    return ApiResponse::err_code("BAD_ARGS", "expected args: text");
                };
                match node.send_public_message(text, now) {
                    Ok(()) => ApiResponse::ok("broadcast accepted"),
                    Err(err) => ApiResponse::err(&err),
                }
            }
            "send_emergency_message" => {
                let Some(text) = request.args.get("text").and_then(Value::as_str) else {
                    return ApiResponse::err_code("BAD_ARGS", "expected args: text");
                };
                match node.send_emergency_message(text, now) {
                    Ok(()) => ApiResponse::ok("emergency broadcast accepted"),
                    Err(err) => ApiResponse::err(&err),
                }
            }
            "set_stationary" => {
                let Some(stationary) = request.args.get("stationary").and_then(Value::as_bool)
                else {
                    return ApiResponse::err_code("BAD_ARGS", "expected args: stationary");
                };
                node.set_stationary(stationary, now);
                ApiResponse::ok(if stationary {
                    "node is now stationary"
                } else {
                    "node is now mobile"
                })
            }
            "factory_reset" => match node.factory_reset() {
                Ok(()) => ApiResponse::ok("identity cleared, restart required"),
                Err(err) => ApiResponse::err(&err),
            },
            "get_node_info" => {
                let info = node.node_info(now);
                ApiResponse::ok_with("node info", json!(info))
            }
            "get_known_nodes" => {
                let nodes = node.known_nodes();
                ApiResponse::ok_with(&format!("{} known nodes", nodes.len()), json!(nodes))
            }
            "get_network_stats" => {
                let stats = node.network_stats();
                ApiResponse::ok_with("network statistics", json!(stats))
            }
            "get_radio_config" => {
                let config = node.radio_config();
                ApiResponse::ok_with("radio configuration", json!(config))
            }
            other => ApiResponse::err_code("UNKNOWN_COMMAND", &format!("unknown command: {}", other)),
        }
    }

    /// Line-oriented variant: JSON request in, JSON response out
    pub fn handle_json(node: &mut Node, request_json: &str, now: u64) -> String {
        let response = match serde_json::from_str::<ApiRequest>(request_json) {
            Ok(request) => Self::handle(node, &request, now),
            Err(err) => ApiResponse::err_code("BAD_REQUEST", &format!("unparseable request: {}", err)),
        };
        serde_json::to_string(&response).unwrap_or_else(|_| {
            r#"{"success":false,"error_code":"INTERNAL"}"#.to_string()
        })
    }
}
