use std::fmt;

/// Lifecycle of a session with one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No transport; waiting to start a connection attempt
    Idle,
    /// Hello sent, waiting for the device to answer
    Connecting,
    /// Device is dumping its state, waiting for `InCm`
    Initializing,
    /// Normal operation
    Working,
    /// Device went quiet, probing it with ack requests
    Recovering,
}

impl SessionState {
    /// Whether a transport is open in this state
    pub fn has_link(self) -> bool {
        !matches!(self, SessionState::Idle)
    }

    /// Whether the device has completed initialization in this state
    pub fn is_established(self) -> bool {
        matches!(self, SessionState::Working | SessionState::Recovering)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Initializing => "initializing",
            SessionState::Working => "working",
            SessionState::Recovering => "recovering",
        };
        f.write_str(name)
    }
}
