use super::InboundMessage;
use crate::transport::TransportState;
use crate::types::{CallError, Notification, Result, RpcErrorObject, RpcErrorReply};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Routes inbound frames to pending calls and notification listeners
pub struct MessageRouter {
    state: Arc<Mutex<TransportState>>,
}

impl MessageRouter {
    pub(crate) fn new_with_state(state: Arc<Mutex<TransportState>>) -> Self {
        Self { state }
    }

    /// Routes one text frame. Returns the reply frame owed to the server, if any.
    pub async fn route_frame(&self, text: &str) -> Result<Option<String>> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to parse frame: {} - Raw: {}", e, text);
                return Ok(Some(Self::parse_error_reply()?));
            }
        };

        match value {
            Value::Array(items) => {
                let mut replies = Vec::new();
                for item in items.iter() {
                    if let Some(reply) = self.route(InboundMessage::classify(item)).await {
                        replies.push(reply);
                    }
                }

                // a batch of notifications requires no response
                if replies.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(serde_json::to_string(&replies)?))
                }
            }
            Value::Object(_) => match self.route(InboundMessage::classify(&value)).await {
                Some(reply) => Ok(Some(serde_json::to_string(&reply)?)),
                None => Ok(None),
            },
            _ => {
                tracing::warn!("Frame is neither an object nor a batch: {}", text);
                Ok(Some(Self::parse_error_reply()?))
            }
        }
    }

    /// Routes a single classified message, returning any protocol-level reply
    async fn route(&self, message: InboundMessage) -> Option<RpcErrorReply> {
        let reply = message.reply();

        match message {
            InboundMessage::Response { id, result } => {
                self.complete(id, Ok(result)).await;
            }
            InboundMessage::Error { id, error } => {
                self.complete(id, Err(CallError::Remote(error))).await;
            }
            InboundMessage::Notification(notification) => {
                self.dispatch(&notification).await;
            }
            InboundMessage::Call { method, .. } => {
                tracing::warn!("Refusing inbound call to '{}'", method);
            }
            InboundMessage::Invalid { id } => {
                tracing::warn!("Received invalid JSON-RPC message (id {})", id);
            }
            InboundMessage::Unknown => {
                tracing::debug!("Ignoring unrecognized JSON-RPC message");
            }
        }

        reply
    }

    /// Resolves the pending call matching `id`
    async fn complete(&self, id: Option<u64>, result: crate::types::CallResult) {
        let Some(id) = id else {
            tracing::debug!("Response without usable id, ignoring");
            return;
        };

        let completed = self.state.lock().await.pending.complete(id, result);
        if completed {
            tracing::debug!("Handled response for call {}", id);
        } else {
            tracing::debug!("No pending call for response id {} (expired?)", id);
        }
    }

    /// Invokes every handler registered for the notification's method
    async fn dispatch(&self, notification: &Notification) {
        let handlers = {
            let state = self.state.lock().await;
            state.handlers_for(&notification.method)
        };

        if handlers.is_empty() {
            tracing::debug!("No listener for notification '{}'", notification.method);
            return;
        }

        tracing::debug!(
            "Dispatching notification '{}' to {} listener(s)",
            notification.method,
            handlers.len()
        );
        for handler in handlers {
            handler(notification);
        }
    }

    fn parse_error_reply() -> Result<String> {
        let reply = RpcErrorReply::new(RpcErrorObject::parse_error(), Value::Null);
        Ok(serde_json::to_string(&reply)?)
    }
}
