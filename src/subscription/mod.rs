// Subscription module - Service schemas and per-caller property fan-out
mod core;
pub mod multiplexer;
pub mod schema;

pub(crate) use self::core::Subscription;
pub use self::core::{PropertyChange, ServiceSubscription, SubscriptionEvent, SubscriptionInfo};
pub use multiplexer::SubscriptionMultiplexer;
pub use schema::{
    MethodSignature, PropertyDescriptor, ReturnFormat, ServiceDescriptor, ServiceList, ServiceSchema,
    SubProtocolInfo, default_service_list, parse_return_formats, parse_service_list,
    parse_websocket_protocols,
};
