//! In-process publish/subscribe with run-to-completion delivery.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use recall_schema::{topic_matches, Event};
use tracing::{trace, warn};

use crate::scheduler::Teardown;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

type Handler = Rc<RefCell<Box<dyn FnMut(&Event)>>>;

struct Subscriber {
    id: SubscriptionId,
    pattern: String,
    handler: Handler,
}

#[derive(Default)]
struct BridgeState {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    queue: VecDeque<Event>,
    delivered: u64,
    published: u64,
}

/// Shared handle to the session's event bridge.
///
/// Subscribers of a topic are invoked synchronously in registration order.
/// An event published from inside a handler is queued and delivered once
/// every subscriber of the current event has returned.
#[derive(Clone, Default)]
pub struct EventBridge {
    state: Rc<RefCell<BridgeState>>,
    dispatching: Rc<Cell<bool>>,
}

struct DispatchGuard<'a>(&'a Cell<bool>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every topic selected by `pattern`
    /// (exact topic, `prefix*`, or `*`).
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) + 'static,
    {
        let mut state = self.state.borrow_mut();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.subscribers.push(Subscriber {
            id,
            pattern: pattern.to_string(),
            handler: Rc::new(RefCell::new(Box::new(handler))),
        });
        id
    }

    /// Subscribe and register the matching unsubscription with `teardown`.
    pub fn subscribe_scoped<F>(&self, teardown: &mut Teardown, pattern: &str, handler: F)
    where
        F: FnMut(&Event) + 'static,
    {
        let id = self.subscribe(pattern, handler);
        let bridge = self.clone();
        teardown.defer(move || {
            bridge.unsubscribe(id);
        });
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.subscribers.len();
        state.subscribers.retain(|subscriber| subscriber.id != id);
        before != state.subscribers.len()
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.state
            .borrow()
            .subscribers
            .iter()
            .any(|subscriber| subscriber.id == id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.borrow().subscribers.len()
    }

    /// Handler invocations since construction.
    pub fn delivered(&self) -> u64 {
        self.state.borrow().delivered
    }

    pub fn published(&self) -> u64 {
        self.state.borrow().published
    }

    pub fn publish(&self, event: Event) {
        {
            let mut state = self.state.borrow_mut();
            state.published += 1;
            state.queue.push_back(event);
        }
        if self.dispatching.get() {
            return;
        }
        self.dispatching.set(true);
        let _guard = DispatchGuard(&self.dispatching);

        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                state.queue.pop_front().map(|event| {
                    let topic = event.topic();
                    let handlers: Vec<(SubscriptionId, Handler)> = state
                        .subscribers
                        .iter()
                        .filter(|subscriber| topic_matches(topic, &subscriber.pattern))
                        .map(|subscriber| (subscriber.id, Rc::clone(&subscriber.handler)))
                        .collect();
                    (event, handlers)
                })
            };
            let Some((event, handlers)) = next else {
                break;
            };
            trace!(
                target: "recall::bridge",
                topic = event.topic(),
                subscribers = handlers.len(),
                "event.dispatch"
            );

            for (id, handler) in handlers {
                if !self.is_subscribed(id) {
                    continue;
                }
                match handler.try_borrow_mut() {
                    Ok(mut handler) => {
                        (&mut **handler)(&event);
                        self.state.borrow_mut().delivered += 1;
                    }
                    Err(_) => warn!(
                        target: "recall::bridge",
                        %id,
                        topic = event.topic(),
                        "event.handler_busy"
                    ),
                }
            }
        }
    }
}
