use super::message::RpcErrorObject;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors that can occur when using the Torc client.
#[derive(Error, Debug)]
pub enum TorcError {
    /// WebSocket protocol error (connection failed, invalid frame, etc.)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// General connection error with descriptive message
    #[error("Connection error: {0}")]
    Connection(String),

    /// Token endpoint refused or returned something unusable
    #[error("Authentication error: {0}")]
    Auth(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error (token fetch)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error (malformed endpoint URL)
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Attempted operation while no socket is attached
    #[error("Not connected")]
    NotConnected,

    /// The target service or method is not known to this connection
    #[error("Unrecognized call: {service}/{method}")]
    UnrecognizedCall { service: String, method: String },

    /// Every call id is taken by a call still awaiting its response
    #[error("All {0} call ids are in flight")]
    CallIdsExhausted(u64),

    /// A remote call made on the caller's behalf failed
    #[error("Call failed: {0}")]
    Call(#[from] CallError),
}

/// Terminal failure of a single remote call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// The server answered with a JSON-RPC error object
    #[error("Remote error {}: {}", .0.code, .0.message)]
    Remote(RpcErrorObject),

    /// No response arrived before the call timeout
    #[error("Call expired without a response")]
    Expired,

    /// The transport went away before the call resolved
    #[error("Call dropped")]
    Dropped,

    /// The server answered with something this client cannot use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Why a service subscription could not be established.
#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("Cannot subscribe to unknown service '{0}'")]
    UnknownService(String),

    #[error("Already subscribed to '{0}'")]
    AlreadySubscribed(String),

    #[error("Subscription to '{service}' rejected: {cause}")]
    Rejected { service: String, cause: CallError },

    /// The connection dropped before the server acknowledged
    #[error("Subscription to '{0}' closed before acknowledgement")]
    Closed(String),

    #[error("Subscription to '{service}' failed: {source}")]
    Transport {
        service: String,
        #[source]
        source: TorcError,
    },
}

impl SubscriptionError {
    /// Name of the service the failed subscription targeted
    pub fn service(&self) -> &str {
        match self {
            Self::UnknownService(service)
            | Self::AlreadySubscribed(service)
            | Self::Closed(service) => service,
            Self::Rejected { service, .. } | Self::Transport { service, .. } => service,
        }
    }
}

/// Convenience type alias for `Result<T, TorcError>`.
pub type Result<T> = std::result::Result<T, TorcError>;

/// Outcome of one remote call.
pub type CallResult = std::result::Result<serde_json::Value, CallError>;
