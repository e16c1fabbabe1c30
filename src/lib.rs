//! Transport and dispatch core for a [WebDriver BiDi] client: a
//! bidirectional JSON-over-WebSocket control channel between a test
//! harness and a browser remote end.
//!
//! This crate deliberately stops at the opaque `{method, params}` layer.
//! Per-module typed command/event wrappers (browsing-context, input,
//! script, ...) are expected to be built on top, using [`Codec`] as the
//! seam — see [`execute_with_codec`].
//!
//! [WebDriver BiDi]: https://w3c.github.io/webdriver-bidi/

mod config;
mod dispatcher;
mod error;
mod events;
mod protocol;
mod session;
mod transport;

pub use config::Config;
pub use error::BidiError;
pub use events::SubscriptionHandle;
pub use protocol::Codec;
pub use session::Session;

use std::time::Duration;

use serde_json::Value;

/// Encodes `command` via `codec`, issues it through `session`, and
/// decodes the raw `result` back into a typed value.
///
/// This is the one piece of glue a typed module layer needs once it has
/// a [`Codec`] impl — [`Session`] itself stays generic-free and only
/// ever handles raw JSON.
pub async fn execute_with_codec<C: Codec>(
    session: &Session,
    codec: &C,
    command: &C::Command,
    timeout: Option<Duration>,
) -> Result<C::CommandResult, ExecuteError<C::Error>> {
    let (method, params) = codec.encode(command);
    let result = session
        .execute(method, params, timeout)
        .await
        .map_err(ExecuteError::Bidi)?;
    codec
        .decode_result(method, result)
        .map_err(ExecuteError::Decode)
}

/// Decodes one inbound event's raw `params` via `codec`, given the
/// `method` name the [`Session`]'s subscriber handler was called with.
pub fn decode_event_with_codec<C: Codec>(
    codec: &C,
    method: &str,
    params: Value,
) -> Result<C::Event, C::Error> {
    codec.decode_event(method, params)
}

/// Error returned by [`execute_with_codec`]: either the core failed to
/// get a result at all, or the codec failed to decode a result it did
/// get.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E: std::error::Error + Send + Sync + 'static> {
    #[error(transparent)]
    Bidi(#[from] BidiError),
    #[error("failed to decode command result: {0}")]
    Decode(E),
}
