use super::constants::jsonrpc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound JSON-RPC call. Without an `id` it is a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc::VERSION.to_string(),
            method: method.into(),
            params: params.filter(|p| p.is_object() || p.is_array()),
            id: None,
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC error object `{code, message, data?}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(jsonrpc::PARSE_ERROR, jsonrpc::PARSE_ERROR_MESSAGE)
    }

    pub fn invalid_request() -> Self {
        Self::new(jsonrpc::INVALID_REQUEST, jsonrpc::INVALID_REQUEST_MESSAGE)
    }

    pub fn method_not_found() -> Self {
        Self::new(jsonrpc::METHOD_NOT_FOUND, jsonrpc::METHOD_NOT_FOUND_MESSAGE)
    }

    /// Lenient conversion of a server-supplied error value. Some servers send
    /// the code as a string, others omit the message.
    pub fn from_value(value: &Value) -> Self {
        if let Ok(error) = serde_json::from_value::<Self>(value.clone()) {
            return error;
        }

        let code = match value.get("code") {
            Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
            _ => 0,
        };
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self {
            code,
            message,
            data: value.get("data").cloned(),
        }
    }
}

/// Protocol-level reply the client sends for frames it cannot accept
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorReply {
    pub jsonrpc: String,
    pub error: RpcErrorObject,
    pub id: Value,
}

impl RpcErrorReply {
    pub fn new(error: RpcErrorObject, id: Value) -> Self {
        Self {
            jsonrpc: jsonrpc::VERSION.to_string(),
            error,
            id,
        }
    }
}

/// Server push `{method, params}`; never stored
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}
