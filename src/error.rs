use thiserror::Error;

/// The public error surface of this crate.
///
/// Protocol-level issues (malformed JSON, an unknown `type`, a response
/// whose `id` is no longer pending) are deliberately **not** represented
/// here: per the wire contract, those are logged and dropped, never
/// surfaced to a caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BidiError {
    /// [`crate::Transport::start`] exhausted its startup timeout without
    /// establishing a connection.
    #[error("startup timed out before the connection became ready")]
    StartupTimeout,

    /// `start` was called on a transport/session that is already running.
    #[error("already started")]
    AlreadyStarted,

    /// An operation that requires a live connection was attempted before
    /// `start` completed, or after `stop`.
    #[error("not started")]
    NotStarted,

    /// [`crate::Transport::send`] could not acquire the send mutex within
    /// `data_timeout`.
    #[error("timed out acquiring the send mutex")]
    SendContention,

    /// The underlying connection was aborted by a transport-level error.
    #[error("connection aborted: {0}")]
    ConnectionAborted(String),

    /// No response arrived for a command before its deadline.
    #[error("command `{method}` timed out waiting for a response")]
    CommandTimeout { method: String },

    /// The remote end replied with `{"type": "error", ...}`.
    #[error("command failed: {error}: {message}")]
    CommandFailed {
        error: String,
        message: String,
        stacktrace: Option<String>,
    },

    /// The session was stopped while the command was in flight, or the
    /// caller issued a command after the session had already stopped.
    #[error("session is closed")]
    SessionClosed,

    /// The command id counter would have wrapped. Practically
    /// unreachable at `u64` width for any session's lifetime.
    #[error("command id space exhausted")]
    IdExhausted,
}
