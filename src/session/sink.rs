use crate::protocol::{Command, SessionState};

/// Consumer of the commands a session receives.
///
/// Called from the session driver, in wire order. Only `apply` is required;
/// the other hooks are for observing the session.
pub trait CommandSink: Send {
    /// Handles one decoded command
    fn apply(&mut self, command: &Command);

    /// The session moved from `from` to `to`
    fn on_state_change(&mut self, from: SessionState, to: SessionState) {
        let _ = (from, to);
    }

    /// The device assigned a new session uid
    fn on_uid_change(&mut self, old: u16, new: u16) {
        let _ = (old, new);
    }
}

impl<F> CommandSink for F
where
    F: FnMut(&Command) + Send,
{
    fn apply(&mut self, command: &Command) {
        self(command)
    }
}
