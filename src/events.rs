//! Maps event method names to an ordered list of subscribers and
//! delivers events in wire-arrival order.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// A handler bound to a specific event method name. Returning `Err`
/// (or panicking) is caught and logged; it never prevents subsequent
/// handlers from running.
pub type EventHandler = Arc<dyn Fn(&str, Value) -> anyhow::Result<()> + Send + Sync>;

/// Opaque token returned by [`EventRouter::subscribe`], used to remove a
/// handler with [`EventRouter::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[derive(Clone)]
struct Subscriber {
    handle: SubscriptionHandle,
    handler: EventHandler,
}

#[derive(Default)]
pub(crate) struct EventRouter {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    index: Mutex<HashMap<u64, String>>,
    next_handle: Mutex<u64>,
}

impl EventRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(
        &self,
        method: impl Into<String>,
        handler: EventHandler,
    ) -> SubscriptionHandle {
        let method = method.into();
        let id = {
            let mut next = self.next_handle.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        let handle = SubscriptionHandle(id);

        self.index.lock().unwrap().insert(id, method.clone());
        self.subscribers
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push(Subscriber { handle, handler });

        handle
    }

    /// Idempotent: an unknown handle is a no-op. Takes effect on the
    /// next event if called re-entrantly from within a handler.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let Some(method) = self.index.lock().unwrap().remove(&handle.0) else {
            return;
        };
        if let Some(subs) = self.subscribers.lock().unwrap().get_mut(&method) {
            subs.retain(|s| s.handle != handle);
        }
    }

    /// Invokes every subscriber for `method`, in insertion order, with a
    /// clone of `params` each. A handler's failure or panic is caught and
    /// logged without affecting the rest.
    ///
    /// The subscriber list is snapshotted (cheap: an `Arc` clone per
    /// handler) before the lock is released, so a handler that calls
    /// `subscribe`/`unsubscribe` re-entrantly neither deadlocks nor
    /// affects the delivery already in progress.
    pub fn deliver(&self, method: &str, params: Value) {
        let snapshot: Vec<Subscriber> = {
            let subscribers = self.subscribers.lock().unwrap();
            match subscribers.get(method) {
                Some(subs) => subs.clone(),
                None => return,
            }
        };

        for sub in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| {
                (sub.handler)(method, params.clone())
            }));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(method, error = %e, "event handler returned an error");
                }
                Err(_) => {
                    tracing::error!(method, "event handler panicked");
                }
            }
        }
    }
}
