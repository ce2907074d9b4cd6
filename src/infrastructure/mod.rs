// Infrastructure module - Socket, HTTP and background task plumbing
pub mod http;
pub mod liveness;
pub mod task_manager;
pub mod websocket;

pub use http::{TokenFetcher, http_endpoint, token_url, websocket_url, ws_endpoint};
pub use liveness::LivenessMonitor;
pub use task_manager::TaskManager;
pub use websocket::{WebSocketFactory, WsStream};
