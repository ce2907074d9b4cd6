/// JSON-RPC protocol strings (magic strings layer)
pub mod jsonrpc {
    pub const VERSION: &str = "2.0";

    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;

    pub const PARSE_ERROR_MESSAGE: &str = "Parse error";
    pub const INVALID_REQUEST_MESSAGE: &str = "Invalid request";
    pub const METHOD_NOT_FOUND_MESSAGE: &str = "Method not found";
}

/// Implicit methods every Torc service exposes
pub mod service_methods {
    pub const SUBSCRIBE: &str = "Subscribe";
    pub const UNSUBSCRIBE: &str = "Unsubscribe";
    pub const GET_SERVICE_DESCRIPTION: &str = "GetServiceDescription";
    pub const GET_WEBSOCKET_TOKEN: &str = "GetWebSocketToken";
}

/// Properties advertised by the discovery service
pub mod discovery_properties {
    pub const SERVICE_LIST: &str = "serviceList";
    pub const RETURN_FORMATS: &str = "returnFormats";
    pub const WEBSOCKET_PROTOCOLS: &str = "webSocketProtocols";
}

/// WebSocket sub-protocol
pub const SUB_PROTOCOL: &str = "torc.json-rpc";

/// Name and path of the built-in discovery service
pub const SERVICES_NAME: &str = "services";
pub const SERVICES_PATH: &str = "/services/";

/// Query parameter carrying the WebSocket token
pub const ACCESS_TOKEN_PARAM: &str = "accesstoken";

/// Call ids wrap back to 1 once they pass this ceiling
pub const MAX_RPC_ID: u64 = 0x2000000;

/// Calls without a response are failed after this long (milliseconds)
pub const DEFAULT_CALL_TIMEOUT: u64 = 60_000;

/// Expiry sweep interval (milliseconds)
pub const DEFAULT_EXPIRY_INTERVAL: u64 = 10_000;

/// Reconnect poll interval while the host is visible (milliseconds)
pub const DEFAULT_RECONNECT_INTERVAL: u64 = 2_000;
