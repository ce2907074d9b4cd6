use crate::types::constants::jsonrpc;
use crate::types::{Notification, RpcErrorObject, RpcErrorReply};
use serde_json::Value;

/// One element of an inbound frame, classified by its JSON-RPC shape
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `{result, id}`: completes a pending call
    Response { id: Option<u64>, result: Value },

    /// `{error, id}`: fails a pending call
    Error { id: Option<u64>, error: RpcErrorObject },

    /// `{method}` without id: server push
    Notification(Notification),

    /// `{method, id}`: the server calling the client, which is never accepted
    Call { id: Value, method: String },

    /// Missing or wrong `jsonrpc` version
    Invalid { id: Value },

    /// Valid envelope with nothing actionable (e.g. an error without id)
    Unknown,
}

impl InboundMessage {
    /// Classify a single decoded JSON value
    pub fn classify(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::Invalid { id: Value::Null };
        };

        if object.get("jsonrpc").and_then(Value::as_str) != Some(jsonrpc::VERSION) {
            return Self::Invalid {
                id: object.get("id").cloned().unwrap_or(Value::Null),
            };
        }

        if let (Some(result), Some(id)) = (object.get("result"), object.get("id")) {
            return Self::Response {
                id: parse_id(id),
                result: result.clone(),
            };
        }

        if let Some(method) = object.get("method").and_then(Value::as_str) {
            if let Some(id) = object.get("id") {
                return Self::Call {
                    id: id.clone(),
                    method: method.to_string(),
                };
            }
            return Self::Notification(Notification {
                method: method.to_string(),
                params: object.get("params").cloned(),
            });
        }

        if let (Some(error), Some(id)) = (object.get("error"), object.get("id")) {
            return Self::Error {
                id: parse_id(id),
                error: RpcErrorObject::from_value(error),
            };
        }

        Self::Unknown
    }

    /// Protocol-level reply owed to the server for this message, if any
    pub fn reply(&self) -> Option<RpcErrorReply> {
        match self {
            Self::Call { id, .. } => Some(RpcErrorReply::new(
                RpcErrorObject::method_not_found(),
                id.clone(),
            )),
            Self::Invalid { id } => Some(RpcErrorReply::new(
                RpcErrorObject::invalid_request(),
                id.clone(),
            )),
            _ => None,
        }
    }
}

/// Correlation ids are integers, but some peers echo them back as strings
fn parse_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_success_response() {
        let message = InboundMessage::classify(&json!({"jsonrpc": "2.0", "result": 5, "id": 3}));
        assert_eq!(
            message,
            InboundMessage::Response {
                id: Some(3),
                result: json!(5)
            }
        );
    }

    #[test]
    fn test_classify_string_id() {
        let message = InboundMessage::classify(&json!({"jsonrpc": "2.0", "result": null, "id": "12"}));
        assert_eq!(
            message,
            InboundMessage::Response {
                id: Some(12),
                result: Value::Null
            }
        );
    }

    #[test]
    fn test_classify_error_response() {
        let message = InboundMessage::classify(&json!({
            "jsonrpc": "2.0",
            "error": {"code": -32603, "message": "Internal error"},
            "id": 9
        }));
        assert_eq!(
            message,
            InboundMessage::Error {
                id: Some(9),
                error: RpcErrorObject::new(-32603, "Internal error")
            }
        );
    }

    #[test]
    fn test_classify_notification() {
        let message = InboundMessage::classify(&json!({
            "jsonrpc": "2.0",
            "method": "/services/power/batteryLevelChanged",
            "params": {"value": 80}
        }));
        assert_eq!(
            message,
            InboundMessage::Notification(Notification {
                method: "/services/power/batteryLevelChanged".to_string(),
                params: Some(json!({"value": 80})),
            })
        );
        assert!(message.reply().is_none());
    }

    #[test]
    fn test_inbound_call_is_refused() {
        let message = InboundMessage::classify(&json!({"jsonrpc": "2.0", "method": "Echo", "id": 4}));
        let reply = message.reply().unwrap();
        assert_eq!(reply.error.code, jsonrpc::METHOD_NOT_FOUND);
        assert_eq!(reply.id, json!(4));
    }

    #[test]
    fn test_wrong_version_is_invalid() {
        let message = InboundMessage::classify(&json!({"jsonrpc": "1.0", "result": 1, "id": 2}));
        let reply = message.reply().unwrap();
        assert_eq!(reply.error.code, jsonrpc::INVALID_REQUEST);
        assert_eq!(reply.id, json!(2));

        let message = InboundMessage::classify(&json!({"result": 1}));
        assert_eq!(message.reply().unwrap().id, Value::Null);

        let message = InboundMessage::classify(&json!(42));
        assert_eq!(message, InboundMessage::Invalid { id: Value::Null });
    }

    #[test]
    fn test_error_without_id_is_ignored() {
        let message = InboundMessage::classify(&json!({
            "jsonrpc": "2.0",
            "error": {"code": -32000, "message": "oops"}
        }));
        assert_eq!(message, InboundMessage::Unknown);
        assert!(message.reply().is_none());
    }
}
