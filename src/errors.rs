//! Error types for the monitor client.

/// Result type alias for monitor operations.
pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while driving a monitor session.
///
/// Channel-level failures (`Connection`, `Protocol`, `Timeout`) come from the
/// dispatcher; the remaining variants classify hypervisor-reported failures
/// of individual typed operations.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The channel could not be established, or closed under us.
    #[error("monitor channel unavailable: {0}")]
    Connection(String),

    /// The console produced a reply we cannot make sense of.
    #[error("monitor protocol violation: {0}")]
    Protocol(String),

    /// No data arrived within the configured wait bound.
    #[error("timed out waiting for monitor reply")]
    Timeout,

    /// A referenced device, address, or secret does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A match query resolved to more than one candidate.
    #[error("ambiguous match: {0}")]
    Ambiguous(String),

    /// The hypervisor rejected the command; carries its own failure text.
    #[error("monitor command '{command}' failed: {reason}")]
    OperationFailed { command: String, reason: String },
}

impl MonitorError {
    pub(crate) fn connection(context: impl std::fmt::Display) -> Self {
        MonitorError::Connection(context.to_string())
    }

    pub(crate) fn protocol(context: impl std::fmt::Display) -> Self {
        MonitorError::Protocol(context.to_string())
    }

    pub(crate) fn failed(command: &str, reason: impl std::fmt::Display) -> Self {
        MonitorError::OperationFailed {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }
}
