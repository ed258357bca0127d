//! Audio/visual degradation synchronization and audio fallback.
//!
//! [`SyncCore`] holds the reconciled levels, the fallback state and the
//! visual parameter cache. [`SyncController`] feeds it from the event bridge,
//! the karma ledger and its own timers.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use recall_schema::{
    AudioParameters, Event, IntensitySignal, KarmaState, VisualParameters,
    AUDIO_CONTEXT_RESUMED, AUDIO_CONTEXT_SUSPENDED, AUDIO_DEGRADATION_CHANGED,
    AUDIO_INITIALIZATION_FAILED, CORRUPTION_UPDATED,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audio::{AudioCommand, AudioFault};
use crate::config::{ChannelWeights, FeedbackConfig, RecallConfig, SyncConfig};
use crate::feedback::{amplify, audio_command, feedback_for};
use crate::karma::{subscribe_all, SharedKarmaLedger};
use crate::levels;
use crate::mapping::{apply_guidance, map_audio_to_visual, reduce_motion};
use crate::outbox::{Outbox, Outlets};
use crate::presentation::PresentationWrite;
use crate::scheduler::{Scheduler, Teardown, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SyncState {
    pub audio_level: f64,
    pub visual_level: f64,
    /// Latest aggregate reported by the corruption engine.
    pub engine_level: f64,
    pub last_sync_ms: u64,
    pub sync_threshold: f64,
    pub sync_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioFallbackState {
    pub is_active: bool,
    pub visual_guidance_level: f64,
    pub reason: Option<String>,
    pub activated_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncMetrics {
    pub health_checks: u64,
    pub stale_checks: u64,
    pub missed_syncs: u64,
    pub audio_updates: u64,
    pub audio_commands: u64,
    pub fallback_activations: u64,
    pub fallback_deactivations: u64,
    pub rhythm_beats: u64,
    pub feedback_dispatched: u64,
    pub audio_feedback_skipped: u64,
}

#[derive(Debug)]
pub struct SyncCore {
    config: SyncConfig,
    feedback: FeedbackConfig,
    weights: ChannelWeights,
    state: SyncState,
    fallback: AudioFallbackState,
    has_audio: bool,
    audio_ready: bool,
    reduced_motion: bool,
    visual: VisualParameters,
    beat: u64,
    metrics: SyncMetrics,
}

impl SyncCore {
    pub fn new(config: &RecallConfig, has_audio: bool, audio_ready: bool, reduced_motion: bool) -> Self {
        let sync = config.sync().clone();
        Self {
            state: SyncState {
                audio_level: 0.0,
                visual_level: 0.0,
                engine_level: 0.0,
                last_sync_ms: 0,
                sync_threshold: sync.sync_threshold(),
                sync_interval_ms: sync.health_check_interval_ms(),
            },
            fallback: AudioFallbackState {
                is_active: false,
                visual_guidance_level: 1.0,
                reason: None,
                activated_at_ms: None,
            },
            feedback: config.feedback().clone(),
            weights: config.corruption().channel_weights().clone(),
            config: sync,
            has_audio,
            audio_ready: has_audio && audio_ready,
            reduced_motion,
            visual: VisualParameters::default(),
            beat: 0,
            metrics: SyncMetrics::default(),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn fallback(&self) -> &AudioFallbackState {
        &self.fallback
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn audio_ready(&self) -> bool {
        self.audio_ready
    }

    /// Audio can take commands: attached, ready and not in fallback.
    pub fn audio_usable(&self) -> bool {
        self.has_audio && self.audio_ready && !self.fallback.is_active
    }

    pub fn mark_audio_ready(&mut self) {
        if self.has_audio {
            self.audio_ready = true;
        }
    }

    /// Current visual parameters after guidance.
    pub fn effective_visual(&self) -> VisualParameters {
        if self.fallback.is_active {
            apply_guidance(self.visual, self.fallback.visual_guidance_level)
        } else {
            self.visual
        }
    }

    fn set_visual_level(&mut self, level: f64, out: &mut Outbox) {
        self.state.visual_level = levels::unit(level);
        out.present(PresentationWrite::Intensity(
            IntensitySignal::DegradationLevel,
            self.state.visual_level,
        ));
        out.publish(Event::DegradationLevelChanged {
            level: self.state.visual_level,
        });
    }

    fn present_visual(&self, out: &mut Outbox) {
        for (signal, value) in self.effective_visual().signals() {
            out.present(PresentationWrite::Intensity(signal, value));
        }
    }

    /// Audio reported a level: lock visual to it. In fallback the engine
    /// keeps driving visual and the report is only recorded.
    pub fn on_audio_level(&mut self, level: f64, now_ms: u64, out: &mut Outbox) {
        let level = levels::unit(level);
        self.state.audio_level = level;
        self.state.last_sync_ms = now_ms;
        self.mark_audio_ready();
        self.metrics.audio_updates += 1;
        if self.fallback.is_active {
            return;
        }
        self.set_visual_level(level, out);
    }

    /// The corruption engine published a new aggregate.
    pub fn on_engine_level(&mut self, level: f64, out: &mut Outbox) {
        let level = levels::unit(level);
        self.state.engine_level = level;
        if self.fallback.is_active {
            if level != self.state.visual_level {
                self.set_visual_level(level, out);
            }
            return;
        }
        if !self.audio_usable() {
            return;
        }
        if (level - self.state.audio_level).abs() > self.state.sync_threshold {
            self.state.audio_level = level;
            self.metrics.audio_commands += 1;
            out.audio(AudioCommand::SetDegradationLevel(level));
            if level != self.state.visual_level {
                self.set_visual_level(level, out);
            }
        }
    }

    /// Periodic reconciliation. `polled` is the audio channel's own level.
    pub fn health_check(&mut self, now_ms: u64, polled: Option<f64>, out: &mut Outbox) {
        self.metrics.health_checks += 1;
        if !self.audio_usable() {
            return;
        }
        if now_ms.saturating_sub(self.state.last_sync_ms) <= self.config.stale_threshold_ms() {
            return;
        }
        self.metrics.stale_checks += 1;
        self.state.last_sync_ms = now_ms;
        let Some(audio) = polled else {
            return;
        };
        let audio = levels::unit(audio);
        self.state.audio_level = audio;

        let visual = self.state.visual_level;
        let drift = (audio - visual).abs();
        let threshold = self.state.sync_threshold;
        if drift <= threshold {
            return;
        }
        let pulled = visual + (audio - visual) * self.config.drift_correction_rate();
        let corrected = levels::bounded(pulled, audio - threshold, audio + threshold);
        self.metrics.missed_syncs += 1;
        debug!(
            target: "recall::sync",
            drift,
            audio,
            corrected,
            missed_syncs = self.metrics.missed_syncs,
            "sync.drift_corrected"
        );
        out.publish(Event::DriftCorrected {
            drift,
            level: levels::unit(corrected),
            missed_syncs: self.metrics.missed_syncs,
        });
        self.set_visual_level(corrected, out);
    }

    /// Returns true when fallback was entered by this call.
    pub fn enter_fallback(&mut self, fault: &AudioFault, now_ms: u64, out: &mut Outbox) -> bool {
        if self.fallback.is_active {
            return false;
        }
        let reason = fault.to_string();
        self.fallback = AudioFallbackState {
            is_active: true,
            visual_guidance_level: self.config.visual_guidance_level(),
            reason: Some(reason.clone()),
            activated_at_ms: Some(now_ms),
        };
        self.metrics.fallback_activations += 1;
        warn!(target: "recall::sync", %reason, "sync.audio_fallback_activated");
        out.publish(Event::AudioFallbackActivated { reason });
        out.present(PresentationWrite::FallbackIndicator(true));
        self.present_visual(out);
        if self.state.engine_level != self.state.visual_level {
            self.set_visual_level(self.state.engine_level, out);
        }
        true
    }

    /// Returns true when fallback was left by this call.
    pub fn exit_fallback(&mut self, now_ms: u64, out: &mut Outbox) -> bool {
        if !self.fallback.is_active {
            return false;
        }
        if !self.has_audio {
            debug!(target: "recall::sync", "sync.resume_without_audio_ignored");
            return false;
        }
        self.fallback = AudioFallbackState {
            is_active: false,
            visual_guidance_level: 1.0,
            reason: None,
            activated_at_ms: None,
        };
        self.audio_ready = true;
        self.metrics.fallback_deactivations += 1;
        info!(target: "recall::sync", "sync.audio_fallback_deactivated");
        out.publish(Event::AudioFallbackDeactivated {});
        out.present(PresentationWrite::FallbackIndicator(false));
        self.present_visual(out);

        self.state.audio_level = self.state.visual_level;
        self.state.last_sync_ms = now_ms;
        self.metrics.audio_commands += 1;
        out.audio(AudioCommand::SetDegradationLevel(self.state.visual_level));
        true
    }

    pub fn apply_audio_parameters(&mut self, params: &AudioParameters, out: &mut Outbox) {
        let mut visual = map_audio_to_visual(params, self.config.mapping());
        if self.reduced_motion {
            visual = reduce_motion(visual, self.config.reduced_motion_scale());
        }
        self.visual = visual;
        self.present_visual(out);
    }

    pub fn karma_changed(&mut self, karma: &KarmaState, out: &mut Outbox) {
        let weighted = self.weights.weighted_total(karma);
        let intensity = levels::unit(weighted.abs() * self.config.karma_intensity_scale());
        out.present(PresentationWrite::Intensity(
            IntensitySignal::KarmaIntensity,
            intensity,
        ));
    }

    pub fn recognition_feedback(&mut self, event: &Event, out: &mut Outbox) {
        let Some(pair) = feedback_for(event, &self.feedback) else {
            return;
        };
        let visual = if self.fallback.is_active {
            amplify(pair.visual, self.fallback.visual_guidance_level)
        } else {
            pair.visual
        };
        out.present(PresentationWrite::Feedback(visual));
        self.metrics.feedback_dispatched += 1;

        if !self.audio_usable() {
            self.metrics.audio_feedback_skipped += 1;
            return;
        }
        if let Some(command) = audio_command(&pair.audio, &self.feedback) {
            self.metrics.audio_commands += 1;
            out.audio(command);
        }
    }

    pub fn rhythm_beat(&mut self, out: &mut Outbox) {
        if !self.fallback.is_active {
            return;
        }
        self.beat += 1;
        self.metrics.rhythm_beats += 1;
        let intensity = self.state.visual_level.max(self.config.rhythm_floor())
            * self.fallback.visual_guidance_level;
        out.present(PresentationWrite::RhythmPulse {
            beat: self.beat,
            intensity,
        });
        out.publish(Event::VisualRhythm {
            beat: self.beat,
            intensity,
        });
    }
}

struct SyncInner {
    core: RefCell<SyncCore>,
    rhythm: Cell<Option<TimerHandle>>,
    outlets: Outlets,
    scheduler: Scheduler,
}

impl SyncInner {
    fn run<R>(&self, f: impl FnOnce(&mut SyncCore, &mut Outbox) -> R) -> R {
        self.outlets.run(&self.core, f)
    }

    fn enter_fallback(self: &Rc<Self>, fault: AudioFault) {
        let now_ms = self.scheduler.now_ms();
        if self.run(|core, out| core.enter_fallback(&fault, now_ms, out)) {
            self.start_rhythm();
        }
    }

    fn exit_fallback(&self) {
        let now_ms = self.scheduler.now_ms();
        if self.run(|core, out| core.exit_fallback(now_ms, out)) {
            self.stop_rhythm();
        }
    }

    fn start_rhythm(self: &Rc<Self>) {
        if self.rhythm.get().is_some() {
            return;
        }
        let period = self.core.borrow().config().rhythm_interval_ms();
        let weak = Rc::downgrade(self);
        let handle = self.scheduler.every(period, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.run(|core, out| core.rhythm_beat(out));
            }
        });
        self.rhythm.set(Some(handle));
    }

    fn stop_rhythm(&self) {
        if let Some(handle) = self.rhythm.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn health_check(&self) {
        let now_ms = self.scheduler.now_ms();
        let polled = self.outlets.audio_level();
        self.run(|core, out| core.health_check(now_ms, polled, out));
    }

    fn init_timeout(self: &Rc<Self>, timeout_ms: u64) {
        if self.outlets.audio_ready() {
            self.core.borrow_mut().mark_audio_ready();
        }
        if !self.core.borrow().audio_ready() {
            self.enter_fallback(AudioFault::InitializationTimeout { timeout_ms });
        }
    }
}

/// Session-facing synchronization controller.
pub struct SyncController {
    inner: Rc<SyncInner>,
    teardown: Teardown,
}

impl SyncController {
    pub fn new(config: &RecallConfig, scheduler: Scheduler, outlets: Outlets) -> Self {
        let core = SyncCore::new(
            config,
            outlets.has_audio(),
            outlets.audio_ready(),
            outlets.reduced_motion(),
        );
        Self {
            inner: Rc::new(SyncInner {
                core: RefCell::new(core),
                rhythm: Cell::new(None),
                outlets,
                scheduler,
            }),
            teardown: Teardown::new(),
        }
    }

    /// Arm the timers and subscriptions. Without an audio channel the
    /// controller starts in fallback.
    pub fn start(&mut self, ledger: Option<&SharedKarmaLedger>) {
        let (health_interval, init_timeout) = {
            let core = self.inner.core.borrow();
            (
                core.config().health_check_interval_ms(),
                core.config().audio_init_timeout_ms(),
            )
        };

        let weak = Rc::downgrade(&self.inner);
        self.teardown.defer(move || {
            if let Some(inner) = weak.upgrade() {
                inner.stop_rhythm();
            }
        });

        if self.inner.outlets.has_audio() {
            let weak = Rc::downgrade(&self.inner);
            let handle = self.inner.scheduler.after(init_timeout, move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.init_timeout(init_timeout);
                }
            });
            self.teardown.track_timer(&self.inner.scheduler, handle);
        } else {
            self.inner.enter_fallback(AudioFault::Unavailable);
        }

        let weak = Rc::downgrade(&self.inner);
        let handle = self.inner.scheduler.every(health_interval, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.health_check();
            }
        });
        self.teardown.track_timer(&self.inner.scheduler, handle);

        self.subscribe_bridge();

        if let Some(ledger) = ledger {
            let initial = ledger.state();
            self.inner.run(|core, out| core.karma_changed(&initial, out));
            let weak = Rc::downgrade(&self.inner);
            subscribe_all(ledger, &mut self.teardown, move |_, karma| {
                if let Some(inner) = weak.upgrade() {
                    inner.run(|core, out| core.karma_changed(karma, out));
                }
            });
        }
    }

    fn subscribe_bridge(&mut self) {
        let bridge = self.inner.outlets.bridge().clone();

        let weak = Rc::downgrade(&self.inner);
        bridge.subscribe_scoped(&mut self.teardown, AUDIO_DEGRADATION_CHANGED, move |event| {
            if let (Some(inner), Event::AudioDegradationChanged { level, .. }) =
                (weak.upgrade(), event)
            {
                let now_ms = inner.scheduler.now_ms();
                inner.run(|core, out| core.on_audio_level(*level, now_ms, out));
            }
        });

        let weak = Rc::downgrade(&self.inner);
        bridge.subscribe_scoped(&mut self.teardown, AUDIO_INITIALIZATION_FAILED, move |event| {
            if let (Some(inner), Event::AudioInitializationFailed { error }) =
                (weak.upgrade(), event)
            {
                inner.enter_fallback(AudioFault::InitializationFailed(error.clone()));
            }
        });

        let weak = Rc::downgrade(&self.inner);
        bridge.subscribe_scoped(&mut self.teardown, AUDIO_CONTEXT_SUSPENDED, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.enter_fallback(AudioFault::ContextSuspended);
            }
        });

        let weak = Rc::downgrade(&self.inner);
        bridge.subscribe_scoped(&mut self.teardown, AUDIO_CONTEXT_RESUMED, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.exit_fallback();
            }
        });

        let weak = Rc::downgrade(&self.inner);
        bridge.subscribe_scoped(&mut self.teardown, CORRUPTION_UPDATED, move |event| {
            if let (Some(inner), Event::CorruptionUpdated { level, .. }) = (weak.upgrade(), event)
            {
                inner.run(|core, out| core.on_engine_level(*level, out));
            }
        });

        let weak = Rc::downgrade(&self.inner);
        bridge.subscribe_scoped(&mut self.teardown, "recognition:*", move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.run(|core, out| core.recognition_feedback(event, out));
            }
        });
    }

    pub fn audio_degradation_changed(&self, level: f64, source: &str) {
        self.inner.outlets.bridge().publish(Event::AudioDegradationChanged {
            level,
            source: source.to_string(),
        });
    }

    pub fn initialization_failed(&self, error: &str) {
        self.inner.outlets.bridge().publish(Event::AudioInitializationFailed {
            error: error.to_string(),
        });
    }

    pub fn context_suspended(&self) {
        self.inner
            .outlets
            .bridge()
            .publish(Event::AudioContextSuspended {});
    }

    pub fn context_resumed(&self) {
        self.inner
            .outlets
            .bridge()
            .publish(Event::AudioContextResumed {});
    }

    pub fn apply_audio_parameters(&self, params: &AudioParameters) {
        self.inner
            .run(|core, out| core.apply_audio_parameters(params, out));
    }

    pub fn karma_changed(&self, karma: &KarmaState) {
        self.inner.run(|core, out| core.karma_changed(karma, out));
    }

    /// Run one health check now, outside the periodic timer.
    pub fn health_check(&self) {
        self.inner.health_check();
    }

    pub fn state(&self) -> SyncState {
        *self.inner.core.borrow().state()
    }

    pub fn fallback(&self) -> AudioFallbackState {
        self.inner.core.borrow().fallback().clone()
    }

    pub fn is_fallback_active(&self) -> bool {
        self.inner.core.borrow().fallback().is_active
    }

    pub fn effective_visual(&self) -> VisualParameters {
        self.inner.core.borrow().effective_visual()
    }

    pub fn rhythm_running(&self) -> bool {
        self.inner
            .rhythm
            .get()
            .map(|handle| self.inner.scheduler.is_pending(handle))
            .unwrap_or(false)
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.inner.core.borrow().metrics().clone()
    }

    pub fn destroy(&mut self) {
        self.teardown.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{RecordingAudio, SharedAudio};
    use crate::event_bridge::EventBridge;
    use crate::outbox::share;
    use crate::presentation::HeadlessPresentation;
    use recall_schema::{FeedbackAction, RecognitionMethod};

    struct Rig {
        scheduler: Scheduler,
        bridge: EventBridge,
        presentation: Rc<RefCell<HeadlessPresentation>>,
        audio: Rc<RefCell<RecordingAudio>>,
        controller: SyncController,
    }

    fn rig(with_audio: bool) -> Rig {
        let scheduler = Scheduler::new();
        let bridge = EventBridge::new();
        let presentation = share(HeadlessPresentation::new());
        let audio = share(RecordingAudio::ready());
        let channel: Option<SharedAudio> = if with_audio {
            Some(audio.clone())
        } else {
            None
        };
        let outlets = Outlets::new(bridge.clone(), presentation.clone(), channel);
        let mut controller =
            SyncController::new(&RecallConfig::default(), scheduler.clone(), outlets);
        controller.start(None);
        Rig {
            scheduler,
            bridge,
            presentation,
            audio,
            controller,
        }
    }

    #[test]
    fn audio_reports_lock_visual_level() {
        let rig = rig(true);
        rig.controller.audio_degradation_changed(0.4, "synth");
        let state = rig.controller.state();
        assert_eq!(state.audio_level, 0.4);
        assert_eq!(state.visual_level, 0.4);
        assert_eq!(
            rig.presentation
                .borrow()
                .intensity(IntensitySignal::DegradationLevel),
            Some(0.4)
        );
    }

    #[test]
    fn stale_drift_is_pulled_inside_threshold() {
        let rig = rig(true);
        rig.audio.borrow_mut().drift_to(0.6);
        rig.scheduler.advance_by(1_100);
        let state = rig.controller.state();
        assert!((state.audio_level - state.visual_level).abs() <= state.sync_threshold + 1e-12);
        assert_eq!(rig.controller.metrics().missed_syncs, 1);
    }

    #[test]
    fn engine_level_is_pushed_to_audio_beyond_threshold() {
        let rig = rig(true);
        rig.bridge.publish(Event::CorruptionUpdated {
            level: 0.03,
            tracked: 1,
        });
        assert!(rig.audio.borrow().commands().is_empty());
        rig.bridge.publish(Event::CorruptionUpdated {
            level: 0.2,
            tracked: 1,
        });
        assert_eq!(
            rig.audio.borrow().commands(),
            &[AudioCommand::SetDegradationLevel(0.2)]
        );
        let state = rig.controller.state();
        assert_eq!(state.audio_level, 0.2);
        assert_eq!(state.visual_level, 0.2);
    }

    #[test]
    fn audio_reports_in_fallback_leave_visual_to_engine() {
        let rig = rig(true);
        rig.bridge.publish(Event::CorruptionUpdated {
            level: 0.3,
            tracked: 1,
        });
        rig.controller.context_suspended();
        rig.controller.audio_degradation_changed(0.9, "synth");

        let state = rig.controller.state();
        assert_eq!(state.audio_level, 0.9);
        assert_eq!(state.engine_level, 0.3);
        assert_eq!(state.visual_level, state.engine_level);
        assert_eq!(
            rig.presentation
                .borrow()
                .intensity(IntensitySignal::DegradationLevel),
            Some(0.3)
        );

        rig.audio.borrow_mut().take_commands();
        rig.controller.context_resumed();
        assert_eq!(
            rig.audio.borrow().commands(),
            &[AudioCommand::SetDegradationLevel(0.3)]
        );
    }

    #[test]
    fn missing_audio_starts_in_fallback_with_rhythm() {
        let rig = rig(false);
        assert!(rig.controller.is_fallback_active());
        assert!(rig.presentation.borrow().fallback_indicator());
        rig.scheduler.advance_by(1_600);
        assert_eq!(rig.presentation.borrow().pulses().len(), 2);
        assert_eq!(
            rig.controller.fallback().reason.as_deref(),
            Some("no audio channel attached")
        );
    }

    #[test]
    fn fallback_entry_and_exit_are_idempotent() {
        let rig = rig(true);
        rig.controller.context_suspended();
        rig.controller.initialization_failed("device lost");
        assert_eq!(rig.controller.metrics().fallback_activations, 1);
        assert_eq!(
            rig.controller.fallback().reason.as_deref(),
            Some("audio context suspended")
        );
        assert!(rig.controller.rhythm_running());

        rig.controller.context_resumed();
        rig.controller.context_resumed();
        let metrics = rig.controller.metrics();
        assert_eq!(metrics.fallback_deactivations, 1);
        assert!(!rig.controller.rhythm_running());
        assert!(!rig.presentation.borrow().fallback_indicator());

        let beats = rig.presentation.borrow().pulses().len();
        rig.scheduler.advance_by(5_000);
        assert_eq!(rig.presentation.borrow().pulses().len(), beats);
    }

    #[test]
    fn unready_audio_falls_back_after_timeout() {
        let scheduler = Scheduler::new();
        let outlets = Outlets::new(
            EventBridge::new(),
            share(HeadlessPresentation::new()),
            Some(share(RecordingAudio::new())),
        );
        let mut controller =
            SyncController::new(&RecallConfig::default(), scheduler.clone(), outlets);
        controller.start(None);
        scheduler.advance_by(4_999);
        assert!(!controller.is_fallback_active());
        scheduler.advance_by(1);
        assert!(controller.is_fallback_active());
        assert_eq!(
            controller.fallback().reason.as_deref(),
            Some("audio not ready after 5000 ms")
        );
    }

    #[test]
    fn fallback_amplifies_visual_parameters() {
        let rig = rig(true);
        let params = AudioParameters {
            granular_size: 40.0,
            ..AudioParameters::default()
        };
        rig.controller.apply_audio_parameters(&params);
        assert_eq!(
            rig.presentation.borrow().intensity(IntensitySignal::VisualGrain),
            Some(0.4)
        );
        rig.controller.context_suspended();
        let grain = rig
            .presentation
            .borrow()
            .intensity(IntensitySignal::VisualGrain)
            .unwrap_or_default();
        assert!((grain - 0.6).abs() < 1e-12);
        rig.controller.context_resumed();
        assert_eq!(
            rig.presentation.borrow().intensity(IntensitySignal::VisualGrain),
            Some(0.4)
        );
    }

    #[test]
    fn recognition_feedback_reaches_both_channels() {
        let rig = rig(true);
        rig.bridge.publish(Event::RecognitionSucceeded {
            method: RecognitionMethod::Click,
            elapsed_ms: 100,
        });
        assert_eq!(
            rig.presentation.borrow().feedback().last().map(|cue| cue.action),
            Some(FeedbackAction::Clarity)
        );
        assert_eq!(
            rig.audio.borrow().commands().last(),
            Some(&AudioCommand::AchieveResonance)
        );
    }

    #[test]
    fn feedback_without_audio_is_visual_only() {
        let rig = rig(false);
        rig.bridge.publish(Event::RecognitionFailed {});
        let cue = rig.presentation.borrow().feedback().last().copied();
        assert_eq!(cue.map(|cue| cue.action), Some(FeedbackAction::Fracture));
        assert!((cue.map(|cue| cue.intensity).unwrap_or_default() - 0.8 * 1.5).abs() < 1e-12);
        assert_eq!(rig.controller.metrics().audio_feedback_skipped, 1);
    }

    #[test]
    fn karma_intensity_is_clamped() {
        let rig = rig(true);
        rig.controller
            .karma_changed(&KarmaState::new(0.0, 0.0, 0.0, 30.0));
        let intensity = rig
            .presentation
            .borrow()
            .intensity(IntensitySignal::KarmaIntensity)
            .unwrap_or_default();
        assert!((intensity - 0.3).abs() < 1e-12);
        rig.controller
            .karma_changed(&KarmaState::new(0.0, 0.0, 0.0, 500.0));
        assert_eq!(
            rig.presentation
                .borrow()
                .intensity(IntensitySignal::KarmaIntensity),
            Some(1.0)
        );
    }

    #[test]
    fn destroy_releases_timers_and_subscriptions() {
        let mut rig = rig(false);
        assert!(rig.controller.rhythm_running());
        rig.controller.destroy();
        assert_eq!(rig.scheduler.pending(), 0);
        assert_eq!(rig.bridge.subscriber_count(), 0);
    }
}
