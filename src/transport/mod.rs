// Transport module - JSON-RPC correlation and the socket state machine
pub mod core;
pub mod pending;
pub mod state;
pub mod status;

pub(crate) use self::core::TransportInner;
pub use self::core::{BatchCall, StatusEvents, Transport, TransportOptions};
pub use pending::{PendingCalls, PendingResponse};
pub(crate) use state::TransportState;
pub use state::{ListenerId, NotificationHandler, OutboundFrame};
pub use status::SocketStatus;
