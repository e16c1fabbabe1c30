//! Wire-level message shapes and the codec seam.
//!
//! The core never constructs a typed command or event itself — it only
//! ever sees `{method, params}` pairs and a raw `result`/`error` JSON
//! object. Per-module typed wrappers (browsing-context, input, script, ...)
//! are external collaborators that sit on top of [`Codec`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outbound command envelope: `{ id, method, params }`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CommandEnvelope<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

/// Inbound `{"type": "success", ...}` response.
///
/// Deserialized directly off the parsed [`Value`] rather than through a
/// tagged enum: mixing `#[serde(flatten)]` with internally-tagged enums
/// is fragile, and the `type` field has already been inspected by the
/// caller (see [`crate::dispatcher::Dispatcher::dispatch_inbound`]) by
/// the time one of these is built.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SuccessEnvelope {
    pub id: u64,
    pub result: Value,
    #[serde(flatten)]
    #[allow(dead_code)]
    pub extra: Map<String, Value>,
}

/// Inbound `{"type": "error", ...}` response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub id: u64,
    pub error: String,
    pub message: String,
    pub stacktrace: Option<String>,
    #[serde(flatten)]
    #[allow(dead_code)]
    pub extra: Map<String, Value>,
}

/// Inbound spontaneous event envelope: `{ type: "event", method, params }`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EventEnvelope {
    pub method: String,
    pub params: Value,
    #[serde(flatten)]
    #[allow(dead_code)]
    pub extra: Map<String, Value>,
}

/// The seam between this crate and the per-module typed command/event
/// wrappers it deliberately does not implement (spec.md section 1, Out
/// of scope).
///
/// A module layer built on top of [`crate::Session`] implements this once
/// per protocol version and gets `execute_with_codec`/event decoding for
/// free; the core itself only ever handles `Self::encode`'s raw output.
pub trait Codec: Send + Sync {
    type Command;
    type Event;
    type CommandResult;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Turns a typed command into the `(method, params)` pair the core
    /// sends on the wire.
    fn encode(&self, command: &Self::Command) -> (&'static str, Value);

    /// Turns an inbound event's raw `params` into a typed event, using
    /// `method` as the discriminator.
    fn decode_event(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Self::Event, Self::Error>;

    /// Turns a command's raw `result` into a typed result.
    fn decode_result(
        &self,
        method: &str,
        result: Value,
    ) -> Result<Self::CommandResult, Self::Error>;
}
