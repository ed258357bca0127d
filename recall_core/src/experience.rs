//! One recall session: every component wired to a shared scheduler, bridge
//! and collaborator set.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use recall_schema::{FragmentId, KarmaDelta, RECOGNITION_FAILED, RECOGNITION_SUCCEEDED};
use tracing::info;

use crate::audio::{RecordingAudio, SharedAudio};
use crate::config::RecallConfig;
use crate::corruption::CorruptionEngine;
use crate::event_bridge::EventBridge;
use crate::karma::{apply_delta, InMemoryKarmaLedger, SharedKarmaLedger};
use crate::metrics::SessionMetrics;
use crate::outbox::{share, Outlets};
use crate::presentation::{HeadlessPresentation, SharedPresentation};
use crate::recognition::{RecognitionSettings, RecognitionWindow};
use crate::scheduler::{Scheduler, Teardown};
use crate::sync::SyncController;

pub struct Experience {
    config: Arc<RecallConfig>,
    scheduler: Scheduler,
    bridge: EventBridge,
    ledger: SharedKarmaLedger,
    corruption: CorruptionEngine,
    recognition: RecognitionWindow,
    sync: SyncController,
    teardown: Teardown,
    destroyed: bool,
}

impl Experience {
    pub fn new(
        config: Arc<RecallConfig>,
        ledger: SharedKarmaLedger,
        presentation: SharedPresentation,
        audio: Option<SharedAudio>,
    ) -> Self {
        let scheduler = Scheduler::new();
        let bridge = EventBridge::new();
        let outlets = Outlets::new(bridge.clone(), presentation, audio);

        let mut sync = SyncController::new(&config, scheduler.clone(), outlets.clone());
        let mut corruption = CorruptionEngine::new(
            config.corruption().clone(),
            scheduler.clone(),
            outlets.clone(),
        );
        let recognition = RecognitionWindow::new(
            RecognitionSettings::from(config.recognition()),
            scheduler.clone(),
            outlets,
        );

        let mut teardown = Teardown::new();
        subscribe_outcome_deltas(
            &bridge,
            &mut teardown,
            &ledger,
            RECOGNITION_SUCCEEDED,
            config.karma_deltas().on_success().to_vec(),
        );
        subscribe_outcome_deltas(
            &bridge,
            &mut teardown,
            &ledger,
            RECOGNITION_FAILED,
            config.karma_deltas().on_failure().to_vec(),
        );

        corruption.start(&ledger);
        sync.start(Some(&ledger));

        info!(
            target: "recall::experience",
            fallback = sync.is_fallback_active(),
            "experience.started"
        );

        Self {
            config,
            scheduler,
            bridge,
            ledger,
            corruption,
            recognition,
            sync,
            teardown,
            destroyed: false,
        }
    }

    pub fn config(&self) -> &RecallConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn bridge(&self) -> &EventBridge {
        &self.bridge
    }

    pub fn ledger(&self) -> &SharedKarmaLedger {
        &self.ledger
    }

    pub fn corruption(&self) -> &CorruptionEngine {
        &self.corruption
    }

    pub fn recognition(&self) -> &RecognitionWindow {
        &self.recognition
    }

    pub fn sync(&self) -> &SyncController {
        &self.sync
    }

    pub fn now_ms(&self) -> u64 {
        self.scheduler.now_ms()
    }

    pub fn advance_by(&self, delta_ms: u64) {
        self.scheduler.advance_by(delta_ms);
    }

    pub fn advance_to(&self, target_ms: u64) {
        self.scheduler.advance_to(target_ms);
    }

    pub fn track_fragment(&self, id: impl Into<FragmentId>, content: &str) -> bool {
        self.corruption.track_fragment(id, content)
    }

    pub fn metrics(&self) -> SessionMetrics {
        let sync_state = self.sync.state();
        SessionMetrics {
            now_ms: self.scheduler.now_ms(),
            timers_pending: self.scheduler.pending(),
            timers_fired: self.scheduler.fired(),
            events_published: self.bridge.published(),
            events_delivered: self.bridge.delivered(),
            karma: self.ledger.state(),
            aggregate_corruption: self.corruption.aggregate_level(),
            tracked_fragments: self.corruption.tracked(),
            recognition_state: self.recognition.state(),
            fallback_active: self.sync.is_fallback_active(),
            audio_level: sync_state.audio_level,
            visual_level: sync_state.visual_level,
            corruption: self.corruption.metrics(),
            recognition: self.recognition.metrics(),
            sync: self.sync.metrics(),
        }
    }

    /// Release every timer and subscription owned by the session.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.recognition.destroy();
        self.sync.destroy();
        self.corruption.destroy();
        self.teardown.release();
        info!(
            target: "recall::experience",
            pending_timers = self.scheduler.pending(),
            subscribers = self.bridge.subscriber_count(),
            "experience.destroyed"
        );
    }
}

impl Drop for Experience {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn subscribe_outcome_deltas(
    bridge: &EventBridge,
    teardown: &mut Teardown,
    ledger: &SharedKarmaLedger,
    topic: &'static str,
    deltas: Vec<KarmaDelta>,
) {
    if deltas.is_empty() {
        return;
    }
    let ledger = Rc::downgrade(ledger);
    bridge.subscribe_scoped(teardown, topic, move |_| {
        if let Some(ledger) = ledger.upgrade() {
            for delta in &deltas {
                apply_delta(ledger.as_ref(), delta);
            }
        }
    });
}

/// Typed handles to the headless collaborators of an [`Experience`].
pub struct HeadlessRig {
    pub experience: Experience,
    pub ledger: Rc<InMemoryKarmaLedger>,
    pub presentation: Rc<RefCell<HeadlessPresentation>>,
    pub audio: Option<Rc<RefCell<RecordingAudio>>>,
}

/// Build a session with in-memory collaborators. With `with_audio` the
/// recording audio channel starts ready.
pub fn build_headless_experience(config: Arc<RecallConfig>, with_audio: bool) -> HeadlessRig {
    let ledger = InMemoryKarmaLedger::new().shared();
    let presentation = share(HeadlessPresentation::new());
    let audio = with_audio.then(|| share(RecordingAudio::ready()));
    let shared_ledger: SharedKarmaLedger = ledger.clone();
    let shared_audio: Option<SharedAudio> = audio.clone().map(|audio| audio as SharedAudio);
    let experience = Experience::new(config, shared_ledger, presentation.clone(), shared_audio);
    HeadlessRig {
        experience,
        ledger,
        presentation,
        audio,
    }
}
