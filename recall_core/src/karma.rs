//! Karma ledger seam.
//!
//! The ledger is owned by the surrounding experience; components receive it
//! as an explicit dependency and only ever read it or request named deltas.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use recall_schema::{KarmaChannel, KarmaDelta, KarmaState};
use tracing::{debug, warn};

use crate::scheduler::Teardown;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KarmaSubscription(pub u64);

pub type KarmaCallback = Box<dyn FnMut(KarmaChannel, &KarmaState)>;

pub trait KarmaLedger {
    fn state(&self) -> KarmaState;

    fn add_karma(&self, channel: KarmaChannel, amount: f64);

    /// Invoke `callback` with the updated snapshot whenever `channel` changes.
    fn subscribe(&self, channel: KarmaChannel, callback: KarmaCallback) -> KarmaSubscription;

    fn unsubscribe(&self, subscription: KarmaSubscription);
}

pub type SharedKarmaLedger = Rc<dyn KarmaLedger>;

/// Apply a named delta, logging the reason.
pub fn apply_delta(ledger: &dyn KarmaLedger, delta: &KarmaDelta) {
    debug!(
        target: "recall::karma",
        name = %delta.name,
        channel = %delta.channel,
        amount = delta.amount,
        "karma.delta_applied"
    );
    ledger.add_karma(delta.channel, delta.amount);
}

/// Subscribe to every channel, registering the unsubscriptions with `teardown`.
pub fn subscribe_all<F>(ledger: &SharedKarmaLedger, teardown: &mut Teardown, callback: F)
where
    F: FnMut(KarmaChannel, &KarmaState) + 'static,
{
    let shared: Rc<RefCell<F>> = Rc::new(RefCell::new(callback));
    for channel in KarmaChannel::ALL {
        let shared = Rc::clone(&shared);
        let subscription = ledger.subscribe(
            channel,
            Box::new(move |channel, state| {
                if let Ok(mut callback) = shared.try_borrow_mut() {
                    (&mut *callback)(channel, state);
                }
            }),
        );
        let ledger = Rc::clone(ledger);
        teardown.defer(move || ledger.unsubscribe(subscription));
    }
}

struct LedgerSubscriber {
    id: KarmaSubscription,
    channel: KarmaChannel,
    callback: Rc<RefCell<KarmaCallback>>,
}

/// Session-scoped ledger kept in memory.
#[derive(Default)]
pub struct InMemoryKarmaLedger {
    state: RefCell<KarmaState>,
    subscribers: RefCell<Vec<LedgerSubscriber>>,
    next_id: Cell<u64>,
}

impl InMemoryKarmaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: KarmaState) -> Self {
        Self {
            state: RefCell::new(state.sanitized()),
            ..Self::default()
        }
    }

    pub fn shared(self) -> Rc<Self> {
        Rc::new(self)
    }

    /// Overwrite a channel, notifying its subscribers.
    pub fn set(&self, channel: KarmaChannel, value: f64) {
        let current = self.state.borrow().get(channel);
        self.add_karma(channel, value - current);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn notify(&self, channel: KarmaChannel) {
        let snapshot = *self.state.borrow();
        let callbacks: Vec<Rc<RefCell<KarmaCallback>>> = self
            .subscribers
            .borrow()
            .iter()
            .filter(|subscriber| subscriber.channel == channel)
            .map(|subscriber| Rc::clone(&subscriber.callback))
            .collect();
        for callback in callbacks {
            match callback.try_borrow_mut() {
                Ok(mut callback) => (&mut **callback)(channel, &snapshot),
                Err(_) => warn!(
                    target: "recall::karma",
                    %channel,
                    "karma.callback_busy"
                ),
            }
        }
    }
}

impl KarmaLedger for InMemoryKarmaLedger {
    fn state(&self) -> KarmaState {
        *self.state.borrow()
    }

    fn add_karma(&self, channel: KarmaChannel, amount: f64) {
        if !amount.is_finite() {
            warn!(
                target: "recall::karma",
                %channel,
                amount,
                "karma.non_finite_delta_ignored"
            );
            return;
        }
        if amount == 0.0 {
            return;
        }
        self.state.borrow_mut().add(channel, amount);
        self.notify(channel);
    }

    fn subscribe(&self, channel: KarmaChannel, callback: KarmaCallback) -> KarmaSubscription {
        let id = KarmaSubscription(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers.borrow_mut().push(LedgerSubscriber {
            id,
            channel,
            callback: Rc::new(RefCell::new(callback)),
        });
        id
    }

    fn unsubscribe(&self, subscription: KarmaSubscription) {
        self.subscribers
            .borrow_mut()
            .retain(|subscriber| subscriber.id != subscription);
    }
}
