//! Timed recognition challenge with bounded extensions.

use std::cell::RefCell;
use std::rc::Rc;

use recall_schema::{Event, RecognitionMethod};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::RecognitionConfig;
use crate::levels;
use crate::outbox::{Outbox, Outlets};
use crate::scheduler::{Scheduler, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum RecognitionState {
    #[default]
    Idle,
    Open,
    Recognized,
    TimedOut,
}

impl RecognitionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecognitionState::Recognized | RecognitionState::TimedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecognitionSettings {
    pub base_duration_ms: u64,
    pub extension_duration_ms: u64,
    pub max_extensions: u32,
    pub warning_threshold: f64,
}

impl RecognitionSettings {
    pub fn with_base_duration(mut self, base_duration_ms: u64) -> Self {
        self.base_duration_ms = base_duration_ms;
        self
    }
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self::from(&RecognitionConfig::default())
    }
}

impl From<&RecognitionConfig> for RecognitionSettings {
    fn from(config: &RecognitionConfig) -> Self {
        Self {
            base_duration_ms: config.base_duration_ms(),
            extension_duration_ms: config.extension_duration_ms(),
            max_extensions: config.max_extensions(),
            warning_threshold: config.warning_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionSession {
    pub start_ms: u64,
    pub base_duration_ms: u64,
    pub extension_duration_ms: u64,
    pub max_extensions: u32,
    pub warning_threshold: f64,
    pub extensions_granted: u32,
    pub total_duration_ms: u64,
    pub state: RecognitionState,
    pub attempts: u32,
    pub last_progress: f64,
    warned_this_period: bool,
}

impl RecognitionSession {
    fn new(settings: RecognitionSettings, now_ms: u64) -> Self {
        Self {
            start_ms: now_ms,
            base_duration_ms: settings.base_duration_ms,
            extension_duration_ms: settings.extension_duration_ms,
            max_extensions: settings.max_extensions,
            warning_threshold: levels::unit(settings.warning_threshold),
            extensions_granted: 0,
            total_duration_ms: settings.base_duration_ms,
            state: RecognitionState::Open,
            attempts: 0,
            last_progress: 0.0,
            warned_this_period: false,
        }
    }

    pub fn deadline_ms(&self) -> u64 {
        self.start_ms.saturating_add(self.total_duration_ms)
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.deadline_ms().saturating_sub(now_ms)
    }
}

/// What an attempt did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Ignored,
    Recorded,
    Extended { deadline_ms: u64 },
    ExtensionRejected,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecognitionMetrics {
    pub windows_opened: u64,
    pub attempts: u64,
    pub extensions_granted: u64,
    pub extensions_rejected: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub ignored_calls: u64,
}

/// Window state machine without timers; callers own the timeout.
#[derive(Debug, Default)]
pub struct RecognitionCore {
    session: Option<RecognitionSession>,
    generation: u64,
    metrics: RecognitionMetrics,
}

impl RecognitionCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&RecognitionSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> RecognitionState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or_default()
    }

    /// Identifies the live session so stale timeouts can be ignored.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn metrics(&self) -> &RecognitionMetrics {
        &self.metrics
    }

    /// Start a session, replacing one that is still open. Returns the
    /// deadline, or `None` when the current session already finished.
    pub fn open(
        &mut self,
        settings: RecognitionSettings,
        now_ms: u64,
        out: &mut Outbox,
    ) -> Option<u64> {
        match self.state() {
            state if state.is_terminal() => {
                self.metrics.ignored_calls += 1;
                debug!(target: "recall::recognition", ?state, "window.open_ignored");
                return None;
            }
            RecognitionState::Open => {
                debug!(target: "recall::recognition", "window.replaced");
            }
            _ => {}
        }
        let session = RecognitionSession::new(settings, now_ms);
        let deadline = session.deadline_ms();
        out.publish(Event::WindowOpened {
            duration_ms: session.total_duration_ms,
        });
        info!(
            target: "recall::recognition",
            duration_ms = session.total_duration_ms,
            max_extensions = session.max_extensions,
            "window.opened"
        );
        self.session = Some(session);
        self.generation += 1;
        self.metrics.windows_opened += 1;
        Some(deadline)
    }

    /// Drop the current session and return to `Idle`. Pending timeouts for
    /// the dropped session become stale.
    pub fn reset(&mut self) {
        if self.session.take().is_some() {
            self.generation += 1;
            debug!(target: "recall::recognition", "window.reset");
        }
    }

    pub fn record_attempt(
        &mut self,
        method: RecognitionMethod,
        progress: f64,
        out: &mut Outbox,
    ) -> AttemptOutcome {
        let Some(session) = self.session.as_mut().filter(|s| s.state == RecognitionState::Open)
        else {
            self.metrics.ignored_calls += 1;
            return AttemptOutcome::Ignored;
        };
        let progress = levels::unit(progress);
        session.attempts += 1;
        session.last_progress = progress;
        self.metrics.attempts += 1;
        out.publish(Event::RecognitionAttempt { method, progress });

        if progress < session.warning_threshold || session.warned_this_period {
            return AttemptOutcome::Recorded;
        }
        session.warned_this_period = true;

        if session.extensions_granted >= session.max_extensions {
            self.metrics.extensions_rejected += 1;
            out.publish(Event::TimeExtended {
                extension_ms: 0,
                extensions_granted: session.extensions_granted,
                total_duration_ms: session.total_duration_ms,
            });
            debug!(
                target: "recall::recognition",
                granted = session.extensions_granted,
                "window.extension_rejected"
            );
            return AttemptOutcome::ExtensionRejected;
        }

        session.extensions_granted += 1;
        session.total_duration_ms = session
            .total_duration_ms
            .saturating_add(session.extension_duration_ms);
        session.warned_this_period = false;
        self.metrics.extensions_granted += 1;
        out.publish(Event::TimeExtended {
            extension_ms: session.extension_duration_ms,
            extensions_granted: session.extensions_granted,
            total_duration_ms: session.total_duration_ms,
        });
        info!(
            target: "recall::recognition",
            extensions_granted = session.extensions_granted,
            total_duration_ms = session.total_duration_ms,
            "window.extended"
        );
        AttemptOutcome::Extended {
            deadline_ms: session.deadline_ms(),
        }
    }

    /// `Open → Recognized`. Returns false when the window is not open.
    pub fn complete(&mut self, method: RecognitionMethod, now_ms: u64, out: &mut Outbox) -> bool {
        let Some(session) = self.session.as_mut().filter(|s| s.state == RecognitionState::Open)
        else {
            self.metrics.ignored_calls += 1;
            return false;
        };
        session.state = RecognitionState::Recognized;
        let elapsed_ms = now_ms.saturating_sub(session.start_ms);
        self.metrics.successes += 1;
        out.publish(Event::RecognitionSucceeded { method, elapsed_ms });
        info!(
            target: "recall::recognition",
            %method,
            elapsed_ms,
            "window.recognized"
        );
        true
    }

    /// `Open → TimedOut` for the session identified by `generation`.
    pub fn time_out(&mut self, generation: u64, out: &mut Outbox) -> bool {
        if generation != self.generation {
            return false;
        }
        let Some(session) = self.session.as_mut().filter(|s| s.state == RecognitionState::Open)
        else {
            return false;
        };
        session.state = RecognitionState::TimedOut;
        self.metrics.timeouts += 1;
        out.publish(Event::RecognitionFailed {});
        info!(
            target: "recall::recognition",
            attempts = session.attempts,
            extensions_granted = session.extensions_granted,
            "window.timed_out"
        );
        true
    }
}

struct WindowInner {
    core: RefCell<RecognitionCore>,
    timeout: RefCell<Option<TimerHandle>>,
    outlets: Outlets,
    scheduler: Scheduler,
}

impl WindowInner {
    fn cancel_timeout(&self) {
        if let Some(handle) = self.timeout.borrow_mut().take() {
            self.scheduler.cancel(handle);
        }
    }

    fn schedule_timeout(self: &Rc<Self>, deadline_ms: u64) {
        self.cancel_timeout();
        let generation = self.core.borrow().generation();
        let delay = deadline_ms.saturating_sub(self.scheduler.now_ms());
        let weak = Rc::downgrade(self);
        let handle = self.scheduler.after(delay, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.timeout.borrow_mut().take();
                inner
                    .outlets
                    .run(&inner.core, |core, out| core.time_out(generation, out));
            }
        });
        *self.timeout.borrow_mut() = Some(handle);
    }
}

/// Scheduler-bound recognition window.
pub struct RecognitionWindow {
    inner: Rc<WindowInner>,
    settings: RecognitionSettings,
}

impl RecognitionWindow {
    pub fn new(settings: RecognitionSettings, scheduler: Scheduler, outlets: Outlets) -> Self {
        Self {
            inner: Rc::new(WindowInner {
                core: RefCell::new(RecognitionCore::new()),
                timeout: RefCell::new(None),
                outlets,
                scheduler,
            }),
            settings,
        }
    }

    pub fn settings(&self) -> RecognitionSettings {
        self.settings
    }

    /// Open with the default settings.
    pub fn open_default(&self) -> bool {
        self.open(self.settings)
    }

    /// Open a session. A finished window stays finished until [`reset`].
    ///
    /// [`reset`]: RecognitionWindow::reset
    pub fn open(&self, settings: RecognitionSettings) -> bool {
        let now_ms = self.inner.scheduler.now_ms();
        let deadline = self
            .inner
            .outlets
            .run(&self.inner.core, |core, out| core.open(settings, now_ms, out));
        match deadline {
            Some(deadline) => {
                self.inner.schedule_timeout(deadline);
                true
            }
            None => false,
        }
    }

    /// Return to `Idle` so the next phase can open a new window.
    pub fn reset(&self) {
        self.inner.cancel_timeout();
        self.inner.core.borrow_mut().reset();
    }

    pub fn record_attempt(&self, method: RecognitionMethod, progress: f64) -> AttemptOutcome {
        let outcome = self.inner.outlets.run(&self.inner.core, |core, out| {
            core.record_attempt(method, progress, out)
        });
        if let AttemptOutcome::Extended { deadline_ms } = outcome {
            self.inner.schedule_timeout(deadline_ms);
        }
        outcome
    }

    pub fn complete(&self, method: RecognitionMethod) -> bool {
        let now_ms = self.inner.scheduler.now_ms();
        let completed = self
            .inner
            .outlets
            .run(&self.inner.core, |core, out| core.complete(method, now_ms, out));
        if completed {
            self.inner.cancel_timeout();
        }
        completed
    }

    pub fn state(&self) -> RecognitionState {
        self.inner.core.borrow().state()
    }

    pub fn session(&self) -> Option<RecognitionSession> {
        self.inner.core.borrow().session().cloned()
    }

    pub fn remaining_ms(&self) -> Option<u64> {
        let now_ms = self.inner.scheduler.now_ms();
        self.inner
            .core
            .borrow()
            .session()
            .filter(|session| session.state == RecognitionState::Open)
            .map(|session| session.remaining_ms(now_ms))
    }

    pub fn metrics(&self) -> RecognitionMetrics {
        self.inner.core.borrow().metrics().clone()
    }

    pub fn destroy(&self) {
        self.inner.cancel_timeout();
    }
}

impl Drop for RecognitionWindow {
    fn drop(&mut self) {
        self.inner.cancel_timeout();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bridge::EventBridge;
    use crate::outbox::share;
    use crate::presentation::HeadlessPresentation;

    fn window() -> (RecognitionWindow, Scheduler, Rc<RefCell<Vec<Event>>>) {
        let scheduler = Scheduler::new();
        let bridge = EventBridge::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        {
            let events = Rc::clone(&events);
            bridge.subscribe("recognition:*", move |event| {
                events.borrow_mut().push(event.clone())
            });
        }
        let outlets = Outlets::new(bridge, share(HeadlessPresentation::new()), None);
        let window = RecognitionWindow::new(
            RecognitionSettings::default(),
            scheduler.clone(),
            outlets,
        );
        (window, scheduler, events)
    }

    #[test]
    fn timeout_fires_at_deadline() {
        let (window, scheduler, events) = window();
        window.open_default();
        scheduler.advance_by(14_999);
        assert_eq!(window.state(), RecognitionState::Open);
        scheduler.advance_by(1);
        assert_eq!(window.state(), RecognitionState::TimedOut);
        assert_eq!(events.borrow().last(), Some(&Event::RecognitionFailed {}));
    }

    #[test]
    fn late_warning_extends_once_per_period() {
        let (window, scheduler, events) = window();
        window.open_default();
        scheduler.advance_to(12_000);
        assert_eq!(
            window.record_attempt(RecognitionMethod::Engagement, 0.8),
            AttemptOutcome::Extended { deadline_ms: 20_000 }
        );
        assert_eq!(
            events.borrow().last(),
            Some(&Event::TimeExtended {
                extension_ms: 5000,
                extensions_granted: 1,
                total_duration_ms: 20_000,
            })
        );
        scheduler.advance_to(19_999);
        assert_eq!(window.state(), RecognitionState::Open);
        assert_eq!(window.remaining_ms(), Some(1));
        scheduler.advance_to(20_000);
        assert_eq!(window.state(), RecognitionState::TimedOut);
    }

    #[test]
    fn extensions_stop_at_maximum() {
        let (window, scheduler, events) = window();
        window.open_default();
        for _ in 0..2 {
            assert!(matches!(
                window.record_attempt(RecognitionMethod::Click, 0.9),
                AttemptOutcome::Extended { .. }
            ));
        }
        assert_eq!(
            window.record_attempt(RecognitionMethod::Click, 0.95),
            AttemptOutcome::ExtensionRejected
        );
        assert_eq!(
            window.record_attempt(RecognitionMethod::Click, 0.99),
            AttemptOutcome::Recorded
        );
        let session = window.session().expect("open session");
        assert_eq!(session.extensions_granted, 2);
        assert_eq!(session.total_duration_ms, 25_000);
        scheduler.advance_to(25_000);
        assert_eq!(window.state(), RecognitionState::TimedOut);
        assert_eq!(window.metrics().extensions_rejected, 1);
        let extended: Vec<_> = events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::TimeExtended {
                    extension_ms,
                    extensions_granted,
                    total_duration_ms,
                } => Some((*extension_ms, *extensions_granted, *total_duration_ms)),
                _ => None,
            })
            .collect();
        assert_eq!(
            extended,
            vec![(5_000, 1, 20_000), (5_000, 2, 25_000), (0, 2, 25_000)]
        );
    }

    #[test]
    fn finished_window_ignores_open_until_reset() {
        let (window, scheduler, events) = window();
        assert!(window.open_default());
        assert!(window.complete(RecognitionMethod::Click));
        assert!(!window.open_default());
        assert!(!window.complete(RecognitionMethod::Click));
        assert_eq!(window.state(), RecognitionState::Recognized);
        assert_eq!(scheduler.pending(), 0);

        let opened = |events: &Rc<RefCell<Vec<Event>>>| {
            events
                .borrow()
                .iter()
                .filter(|event| matches!(event, Event::WindowOpened { .. }))
                .count()
        };
        assert_eq!(opened(&events), 1);
        assert_eq!(window.metrics().successes, 1);

        window.reset();
        assert_eq!(window.state(), RecognitionState::Idle);
        assert!(window.open_default());
        assert_eq!(opened(&events), 2);
        scheduler.advance_by(15_000);
        assert_eq!(window.state(), RecognitionState::TimedOut);
        assert!(!window.open_default());
    }

    #[test]
    fn reset_invalidates_pending_timeout() {
        let (window, scheduler, events) = window();
        window.open_default();
        scheduler.advance_to(5_000);
        window.reset();
        assert_eq!(scheduler.pending(), 0);
        scheduler.advance_to(30_000);
        assert_eq!(window.state(), RecognitionState::Idle);
        assert!(!events.borrow().contains(&Event::RecognitionFailed {}));
    }

    #[test]
    fn completion_is_idempotent_and_cancels_timeout() {
        let (window, scheduler, events) = window();
        window.open_default();
        scheduler.advance_to(4_000);
        assert!(window.complete(RecognitionMethod::Keypress));
        assert!(!window.complete(RecognitionMethod::Keypress));
        assert_eq!(scheduler.pending(), 0);
        scheduler.advance_to(30_000);
        assert_eq!(window.state(), RecognitionState::Recognized);
        let successes = events
            .borrow()
            .iter()
            .filter(|event| matches!(event, Event::RecognitionSucceeded { .. }))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(
            window.record_attempt(RecognitionMethod::Click, 0.9),
            AttemptOutcome::Ignored
        );
    }

    #[test]
    fn reopening_replaces_session_and_old_timeout() {
        let (window, scheduler, _events) = window();
        window.open_default();
        scheduler.advance_to(10_000);
        window.open(RecognitionSettings::default().with_base_duration(3_000));
        scheduler.advance_to(12_999);
        assert_eq!(window.state(), RecognitionState::Open);
        scheduler.advance_to(13_000);
        assert_eq!(window.state(), RecognitionState::TimedOut);
        assert_eq!(window.metrics().timeouts, 1);
    }

    #[test]
    fn progress_is_sanitized() {
        let mut core = RecognitionCore::new();
        let mut out = Outbox::new();
        core.open(RecognitionSettings::default(), 0, &mut out);
        core.record_attempt(RecognitionMethod::Touch, f64::NAN, &mut out);
        assert_eq!(core.session().map(|s| s.last_progress), Some(0.0));
        core.record_attempt(RecognitionMethod::Touch, 7.0, &mut out);
        assert_eq!(core.session().map(|s| s.last_progress), Some(1.0));
    }

    #[test]
    fn destroy_leaves_no_timers() {
        let (window, scheduler, _events) = window();
        window.open_default();
        window.destroy();
        assert_eq!(scheduler.pending(), 0);
    }
}
