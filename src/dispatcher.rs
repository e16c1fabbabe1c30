//! Multiplexes commands and events over [`crate::Transport`]: owns the
//! command-id counter, the pending-command table, and inbound routing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::BidiError;
use crate::events::EventRouter;
use crate::protocol::{CommandEnvelope, ErrorEnvelope, EventEnvelope, SuccessEnvelope};
use crate::transport::Transport;

enum SlotOutcome {
    Success(Value),
    Error {
        error: String,
        message: String,
        stacktrace: Option<String>,
    },
}

struct PendingSlot {
    #[allow(dead_code)]
    method: String,
    tx: oneshot::Sender<SlotOutcome>,
}

pub(crate) struct Dispatcher {
    next_id: Mutex<u64>,
    pending: Mutex<HashMap<u64, PendingSlot>>,
    transport: Arc<Transport>,
    events: Arc<EventRouter>,
    default_command_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<Transport>,
        events: Arc<EventRouter>,
        default_command_timeout: Duration,
    ) -> Self {
        Self {
            next_id: Mutex::new(1),
            pending: Mutex::new(HashMap::new()),
            transport,
            events,
            default_command_timeout,
        }
    }

    fn next_id(&self) -> Result<u64, BidiError> {
        let mut guard = self.next_id.lock().unwrap();
        let current = *guard;
        let next = current.checked_add(1).ok_or(BidiError::IdExhausted)?;
        *guard = next;
        Ok(current)
    }

    /// Issues a command and awaits its response, timeout, or shutdown —
    /// whichever fires first.
    pub async fn execute(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, BidiError> {
        let id = self.next_id()?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(
            id,
            PendingSlot {
                method: method.to_string(),
                tx,
            },
        );

        let envelope = CommandEnvelope {
            id,
            method,
            params,
        };
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(e) => {
                self.pending.lock().unwrap().remove(&id);
                return Err(BidiError::ConnectionAborted(format!(
                    "failed to encode command: {e}"
                )));
            }
        };

        if let Err(e) = self.transport.send(text).await {
            self.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        let deadline = timeout.unwrap_or(self.default_command_timeout);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(SlotOutcome::Success(result))) => Ok(result),
            Ok(Ok(SlotOutcome::Error {
                error,
                message,
                stacktrace,
            })) => Err(BidiError::CommandFailed {
                error,
                message,
                stacktrace,
            }),
            // The sender was dropped without completing the slot: the
            // session was stopped and drained the pending table.
            Ok(Err(_)) => Err(BidiError::SessionClosed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(BidiError::CommandTimeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Parses one whole inbound message and routes it. Malformed JSON,
    /// an unknown `type`, or a response whose `id` is no longer pending
    /// are logged and dropped — they never fail a caller or tear down
    /// the session.
    pub fn dispatch_inbound(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "malformed inbound message, dropping");
                return;
            }
        };

        match value.get("type").and_then(Value::as_str) {
            Some("success") => match serde_json::from_value::<SuccessEnvelope>(value) {
                Ok(envelope) => {
                    self.handle_response(envelope.id, SlotOutcome::Success(envelope.result))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed success envelope, dropping");
                }
            },
            Some("error") => match serde_json::from_value::<ErrorEnvelope>(value) {
                Ok(envelope) => self.handle_response(
                    envelope.id,
                    SlotOutcome::Error {
                        error: envelope.error,
                        message: envelope.message,
                        stacktrace: envelope.stacktrace,
                    },
                ),
                Err(e) => {
                    tracing::warn!(error = %e, "malformed error envelope, dropping");
                }
            },
            Some("event") => match serde_json::from_value::<EventEnvelope>(value) {
                Ok(event) => self.events.deliver(&event.method, event.params),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "malformed event envelope, dropping"
                    );
                }
            },
            Some(other) => {
                tracing::warn!(ty = other, "unknown inbound message type, dropping");
            }
            None => {
                tracing::warn!("inbound message missing `type` field, dropping");
            }
        }
    }

    fn handle_response(&self, id: u64, outcome: SlotOutcome) {
        let slot = self.pending.lock().unwrap().remove(&id);
        match slot {
            Some(slot) => {
                // Ignoring the send error: the caller already timed out
                // and dropped its receiver.
                let _ = slot.tx.send(outcome);
            }
            None => {
                tracing::warn!(id, "response for unknown or no-longer-pending command id, dropping");
            }
        }
    }

    /// Completes every outstanding slot with [`BidiError::SessionClosed`]
    /// by dropping its sender, and empties the table. Called once, from
    /// `Session::stop`.
    pub fn drain_pending(&self) {
        let pending: Vec<_> = self.pending.lock().unwrap().drain().collect();
        drop(pending);
    }
}
