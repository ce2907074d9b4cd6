// Messaging module - Inbound classification and frame routing
pub mod inbound;
pub mod router;

pub use inbound::InboundMessage;
pub use router::MessageRouter;
