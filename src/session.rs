//! The public entry point: holds one [`Transport`], one [`Dispatcher`],
//! one event router, and enforces the session state machine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::BidiError;
use crate::events::{EventHandler, EventRouter, SubscriptionHandle};
use crate::transport::Transport;

/// `Unstarted -> Running -> Stopped`. Monotonic: `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Unstarted,
    Running,
    Stopped,
}

/// The driver facade. Construct with [`Session::new`], connect with
/// [`Session::start`], issue commands with [`Session::execute`], and
/// subscribe to events with [`Session::on`].
pub struct Session {
    state: Mutex<SessionState>,
    transport: Arc<Transport>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<EventRouter>,
    inbound_cancel: CancellationToken,
    inbound_loop: Mutex<Option<JoinHandle<()>>>,
    received_rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl Session {
    /// Builds a session with the given [`Config`]. Nothing is connected
    /// until [`Session::start`] is called.
    pub fn new(config: Config) -> Self {
        let command_timeout = config.command_timeout;
        let (transport, received_rx) = Transport::new(config);
        let transport = Arc::new(transport);
        let events = EventRouter::new();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&transport),
            Arc::clone(&events),
            command_timeout,
        ));

        Self {
            state: Mutex::new(SessionState::Unstarted),
            transport,
            dispatcher,
            events,
            inbound_cancel: CancellationToken::new(),
            inbound_loop: Mutex::new(None),
            received_rx: Mutex::new(Some(received_rx)),
        }
    }

    /// Opens the WebSocket to `url` and starts the inbound-processing
    /// loop. Rejected with [`BidiError::AlreadyStarted`] unless the
    /// session is `Unstarted`.
    pub async fn start(&self, url: &str) -> Result<(), BidiError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Unstarted {
                return Err(BidiError::AlreadyStarted);
            }
            *state = SessionState::Running;
        }

        self.transport.start(url).await.inspect_err(|_| {
            *self.state.lock().unwrap() = SessionState::Unstarted;
        })?;

        let received_rx = self
            .received_rx
            .lock()
            .unwrap()
            .take()
            .expect("received_rx only taken once, on start");
        let dispatcher = Arc::clone(&self.dispatcher);
        let cancel = self.inbound_cancel.clone();
        let join = tokio::spawn(inbound_loop(received_rx, dispatcher, cancel));
        *self.inbound_loop.lock().unwrap() = Some(join);

        Ok(())
    }

    /// Issues a command and awaits its outcome. Rejected with
    /// [`BidiError::NotStarted`] unless the session is `Running`.
    pub async fn execute(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, BidiError> {
        match *self.state.lock().unwrap() {
            SessionState::Unstarted => return Err(BidiError::NotStarted),
            SessionState::Stopped => return Err(BidiError::SessionClosed),
            SessionState::Running => {}
        }
        self.dispatcher.execute(method, params, timeout).await
    }

    /// Subscribes `handler` to events for `method`. Allowed regardless of
    /// session state, mirroring a caller wiring up listeners before
    /// `start`.
    pub fn on<F>(&self, method: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&str, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.events.subscribe(method, handler)
    }

    /// Removes a subscription. Idempotent; unknown handles are no-ops.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.events.unsubscribe(handle);
    }

    /// Idempotent graceful shutdown: drains the pending-command table
    /// with [`BidiError::SessionClosed`], then tears down the transport
    /// and the inbound loop. The second and later calls return
    /// immediately.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == SessionState::Stopped {
                return;
            }
            *state = SessionState::Stopped;
        }

        self.dispatcher.drain_pending();
        self.transport.stop().await;

        self.inbound_cancel.cancel();
        let join = self.inbound_loop.lock().unwrap().take();
        if let Some(join) = join {
            let _ = join.await;
        }
    }
}

/// Processes one received text at a time, in arrival order, until
/// cancelled or the channel closes.
async fn inbound_loop(
    mut received_rx: mpsc::Receiver<String>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = received_rx.recv() => next,
        };
        match next {
            Some(text) => dispatcher.dispatch_inbound(&text),
            None => break,
        }
    }
}
