/// Socket lifecycle as seen by callers.
///
/// `NotConnected → Connecting → Connected → Ready → Disconnecting → NotConnected`.
/// `Ready` is asserted by the connection manager once the service catalog is
/// known; it is the first point at which arbitrary services can be subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketStatus {
    NotConnected,
    Connecting,
    Connected,
    Ready,
    Disconnecting,
}

impl SocketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "Not connected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Ready => "Ready",
            Self::Disconnecting => "Disconnecting",
        }
    }

    /// True while a socket exists or is being opened
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Ready)
    }

    /// True once the socket is open
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Connected | Self::Ready)
    }
}

impl std::fmt::Display for SocketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
