//! Notification routing.
//!
//! Id-less inbound messages are classified by method and fanned out to the
//! handlers registered for that interest:
//!
//! | Method | Registry | Payload |
//! |--------|----------|---------|
//! | `stream/chunk` | stream-chunk | [`StreamChunk`] |
//! | `stream/end` | stream-end | [`StreamEnd`] |
//! | `approval/required` | approval | [`ApprovalRequired`] |
//! | `event/<category>` or anything else | general, keyed by category | [`SessionEvent`] |
//!
//! Handlers run on the inbound task in registration order. The handler list
//! is snapshotted before invocation, so a handler may subscribe or
//! unsubscribe without deadlocking. A panicking handler is logged and the
//! remaining handlers still run.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, trace, warn};

use crate::identifiers::HandlerId;
use crate::protocol::{
    ApprovalRequired, Notification, NotificationKind, SessionEvent, StreamChunk, StreamEnd,
};

// ============================================================================
// Types
// ============================================================================

/// Shared handler callback.
type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered handler list for one interest.
struct Registry<T> {
    handlers: Vec<(HandlerId, Handler<T>)>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<T> Registry<T> {
    fn add(&mut self, handler: Handler<T>) -> HandlerId {
        let id = HandlerId::generate();
        self.handlers.push((id, handler));
        id
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(h, _)| *h != id);
        self.handlers.len() != before
    }

    fn snapshot(&self) -> Vec<Handler<T>> {
        self.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
    }
}

/// Which registry a subscription lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Interest {
    Event(String),
    StreamChunk,
    StreamEnd,
    Approval,
}

#[derive(Default)]
struct Registries {
    events: Mutex<FxHashMap<String, Registry<SessionEvent>>>,
    stream_chunks: Mutex<Registry<StreamChunk>>,
    stream_ends: Mutex<Registry<StreamEnd>>,
    approvals: Mutex<Registry<ApprovalRequired>>,
}

// ============================================================================
// Subscription
// ============================================================================

/// Disposer returned by every `on*` registration.
///
/// Dropping it keeps the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    registries: Weak<Registries>,
    interest: Interest,
    id: HandlerId,
}

impl Subscription {
    /// Removes the handler. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registries) = self.registries.upgrade() else {
            return false;
        };

        match &self.interest {
            Interest::Event(category) => {
                let mut events = registries.events.lock();
                let removed = events
                    .get_mut(category)
                    .is_some_and(|registry| registry.remove(self.id));
                if events.get(category).is_some_and(|r| r.handlers.is_empty()) {
                    events.remove(category);
                }
                removed
            }
            Interest::StreamChunk => registries.stream_chunks.lock().remove(self.id),
            Interest::StreamEnd => registries.stream_ends.lock().remove(self.id),
            Interest::Approval => registries.approvals.lock().remove(self.id),
        }
    }

    /// Handler id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("interest", &self.interest)
            .field("id", &self.id)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Fans notifications out to handler registries.
#[derive(Clone, Default)]
pub(crate) struct Router {
    registries: Arc<Registries>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscription(&self, interest: Interest, id: HandlerId) -> Subscription {
        Subscription {
            registries: Arc::downgrade(&self.registries),
            interest,
            id,
        }
    }

    /// Registers a handler for a general event category.
    pub fn on(&self, category: &str, handler: Handler<SessionEvent>) -> Subscription {
        let id = self
            .registries
            .events
            .lock()
            .entry(category.to_string())
            .or_default()
            .add(handler);
        self.subscription(Interest::Event(category.to_string()), id)
    }

    /// Registers a `stream/chunk` handler.
    pub fn on_stream_chunk(&self, handler: Handler<StreamChunk>) -> Subscription {
        let id = self.registries.stream_chunks.lock().add(handler);
        self.subscription(Interest::StreamChunk, id)
    }

    /// Registers a `stream/end` handler.
    pub fn on_stream_end(&self, handler: Handler<StreamEnd>) -> Subscription {
        let id = self.registries.stream_ends.lock().add(handler);
        self.subscription(Interest::StreamEnd, id)
    }

    /// Registers an `approval/required` handler.
    pub fn on_approval_required(&self, handler: Handler<ApprovalRequired>) -> Subscription {
        let id = self.registries.approvals.lock().add(handler);
        self.subscription(Interest::Approval, id)
    }

    /// Number of handlers registered for a general category.
    pub fn handler_count(&self, category: &str) -> usize {
        self.registries
            .events
            .lock()
            .get(category)
            .map_or(0, |r| r.handlers.len())
    }

    /// Routes one inbound notification.
    pub fn dispatch(&self, notification: Notification) {
        let method = notification.method.as_str();
        match NotificationKind::classify(method) {
            NotificationKind::StreamChunk => {
                let handlers = self.registries.stream_chunks.lock().snapshot();
                Self::deliver_typed(method, notification.params, &handlers);
            }
            NotificationKind::StreamEnd => {
                let handlers = self.registries.stream_ends.lock().snapshot();
                Self::deliver_typed(method, notification.params, &handlers);
            }
            NotificationKind::ApprovalRequired => {
                let handlers = self.registries.approvals.lock().snapshot();
                Self::deliver_typed(method, notification.params, &handlers);
            }
            NotificationKind::Event { category } => {
                let event = SessionEvent {
                    category: category.to_string(),
                    method: notification.method.clone(),
                    params: notification.params.unwrap_or(Value::Null),
                };
                self.emit(&event);
            }
        }
    }

    /// Delivers a session event to its category's handlers.
    ///
    /// Categories nobody listens to are ignored.
    pub fn emit(&self, event: &SessionEvent) {
        let handlers = match self.registries.events.lock().get(&event.category) {
            Some(registry) => registry.snapshot(),
            None => {
                trace!(category = %event.category, "No handlers for event");
                return;
            }
        };
        Self::invoke(&event.method, event, &handlers);
    }

    fn deliver_typed<T: DeserializeOwned>(
        method: &str,
        params: Option<Value>,
        handlers: &[Handler<T>],
    ) {
        if handlers.is_empty() {
            return;
        }

        match serde_json::from_value::<T>(params.unwrap_or(Value::Null)) {
            Ok(payload) => Self::invoke(method, &payload, handlers),
            Err(e) => warn!(method, error = %e, "Dropping notification with invalid params"),
        }
    }

    fn invoke<T>(method: &str, payload: &T, handlers: &[Handler<T>]) {
        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                error!(method, panic = panic_message(&*panic), "Notification handler panicked");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ============================================================================
// Tests
// ============================================================================
