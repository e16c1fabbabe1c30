use std::time::Duration;

/// Tunables for [`crate::Session`] and the layers beneath it.
///
/// The core never reads these from the environment, a CLI, or a config
/// file — that glue belongs to the binary embedding this crate. Callers
/// who want that are expected to populate a `Config` themselves (e.g.
/// with `envy`/`clap`, the way a Komodo binary builds its own config).
#[derive(Debug, Clone)]
pub struct Config {
    /// Total wall-clock budget for [`crate::Transport::start`], across all
    /// retry attempts combined. Default 10s.
    pub startup_timeout: Duration,
    /// Budget for the graceful close handshake in
    /// [`crate::Transport::stop`]. Default 10s.
    pub shutdown_timeout: Duration,
    /// Budget for acquiring the send mutex in [`crate::Transport::send`].
    /// Default 10s.
    pub data_timeout: Duration,
    /// Default per-command deadline, overridable per call to
    /// [`crate::Session::execute`]. Default 5s.
    pub command_timeout: Duration,
    /// Inbound fragment buffer size. Default 4096 bytes.
    ///
    /// Kept for forward compatibility with remote ends that care about
    /// negotiated buffer sizes; frame reassembly itself is delegated to
    /// `tokio-tungstenite` (see DESIGN.md).
    pub buffer_size: usize,
    /// Backoff between connection attempts during startup. Default 500ms.
    pub startup_retry_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
            data_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            buffer_size: 4096,
            startup_retry_interval: Duration::from_millis(500),
        }
    }
}
