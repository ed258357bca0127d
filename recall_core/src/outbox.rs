//! Deferred side effects.
//!
//! Components mutate their state under a `RefCell` borrow and queue every
//! outgoing effect in an [`Outbox`]. [`Outlets::run`] flushes the queue once
//! the borrow is released, so handlers reached through the bridge can call
//! back into the same component.

use std::cell::RefCell;
use std::rc::Rc;

use recall_schema::Event;
use tracing::trace;

use crate::audio::{AudioCommand, SharedAudio};
use crate::event_bridge::EventBridge;
use crate::presentation::{PresentationWrite, SharedPresentation};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Publish(Event),
    Present(PresentationWrite),
    Audio(AudioCommand),
}

#[derive(Debug, Default)]
pub struct Outbox {
    effects: Vec<Effect>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, event: Event) {
        self.effects.push(Effect::Publish(event));
    }

    pub fn present(&mut self, write: PresentationWrite) {
        self.effects.push(Effect::Present(write));
    }

    pub fn audio(&mut self, command: AudioCommand) {
        self.effects.push(Effect::Audio(command));
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}

/// Destinations shared by every component of a session.
#[derive(Clone)]
pub struct Outlets {
    bridge: EventBridge,
    presentation: SharedPresentation,
    audio: Option<SharedAudio>,
}

impl Outlets {
    pub fn new(
        bridge: EventBridge,
        presentation: SharedPresentation,
        audio: Option<SharedAudio>,
    ) -> Self {
        Self {
            bridge,
            presentation,
            audio,
        }
    }

    pub fn bridge(&self) -> &EventBridge {
        &self.bridge
    }

    pub fn presentation(&self) -> &SharedPresentation {
        &self.presentation
    }

    pub fn audio(&self) -> Option<&SharedAudio> {
        self.audio.as_ref()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// False when no channel is attached or the channel is busy.
    pub fn audio_ready(&self) -> bool {
        self.audio
            .as_ref()
            .and_then(|audio| audio.try_borrow().ok().map(|audio| audio.is_ready()))
            .unwrap_or(false)
    }

    pub fn audio_level(&self) -> Option<f64> {
        self.audio
            .as_ref()
            .and_then(|audio| audio.try_borrow().ok().map(|audio| audio.degradation_level()))
    }

    pub fn reduced_motion(&self) -> bool {
        self.presentation
            .try_borrow()
            .map(|sink| sink.reduced_motion_preferred())
            .unwrap_or(false)
    }

    /// Borrow `state` mutably, run `f`, release the borrow and flush the
    /// collected effects.
    pub fn run<S, R>(&self, state: &RefCell<S>, f: impl FnOnce(&mut S, &mut Outbox) -> R) -> R {
        let mut outbox = Outbox::new();
        let result = {
            let mut state = state.borrow_mut();
            f(&mut state, &mut outbox)
        };
        self.flush(outbox);
        result
    }

    pub fn flush(&self, outbox: Outbox) {
        for effect in outbox.into_effects() {
            match effect {
                Effect::Publish(event) => self.bridge.publish(event),
                Effect::Present(write) => write.apply(&mut *self.presentation.borrow_mut()),
                Effect::Audio(command) => match self.audio.as_ref() {
                    Some(audio) => command.apply(&mut *audio.borrow_mut()),
                    None => trace!(target: "recall::audio", ?command, "audio.command_dropped"),
                },
            }
        }
    }
}

/// Wrap a concrete collaborator so it can be handed out as a trait object
/// while the caller keeps typed access.
pub fn share<T>(value: T) -> Rc<RefCell<T>> {
    Rc::new(RefCell::new(value))
}
