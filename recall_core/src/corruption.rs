//! Karma-driven fragment corruption.
//!
//! [`CorruptionState`] owns the per-fragment records and is driven purely by
//! method calls; [`CorruptionEngine`] binds it to the scheduler, the karma
//! ledger and the event bridge.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use recall_schema::{
    CorruptionTier, Event, FragmentId, KarmaState, AUDIO_DEGRADATION_CHANGED, RECOGNITION_SUCCEEDED,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CorruptionConfig;
use crate::glitch::{derive_content, tier_intensity};
use crate::karma::{subscribe_all, SharedKarmaLedger};
use crate::levels;
use crate::outbox::{Outbox, Outlets};
use crate::presentation::PresentationWrite;
use crate::scheduler::{Scheduler, Teardown};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FragmentCorruptionRecord {
    id: FragmentId,
    original_content: String,
    current_content: String,
    corruption_level: f64,
    tier: CorruptionTier,
    last_update_ms: u64,
}

impl FragmentCorruptionRecord {
    fn new(id: FragmentId, content: &str, now_ms: u64) -> Self {
        Self {
            id,
            original_content: content.to_string(),
            current_content: content.to_string(),
            corruption_level: 0.0,
            tier: CorruptionTier::Minimal,
            last_update_ms: now_ms,
        }
    }

    pub fn id(&self) -> &FragmentId {
        &self.id
    }

    pub fn original_content(&self) -> &str {
        &self.original_content
    }

    pub fn current_content(&self) -> &str {
        &self.current_content
    }

    pub fn corruption_level(&self) -> f64 {
        self.corruption_level
    }

    pub fn tier(&self) -> CorruptionTier {
        self.tier
    }

    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms
    }

    /// Move to `level`, re-deriving content. Returns true when anything the
    /// presentation shows has changed.
    fn set_level(&mut self, level: f64, config: &CorruptionConfig) -> bool {
        let level = levels::bounded(level, 0.0, config.max_corruption_level());
        let previous = render_key(self.corruption_level, config);
        self.corruption_level = level;
        if render_key(level, config) == previous {
            return false;
        }
        let content = derive_content(&self.original_content, level, config);
        let tier = CorruptionTier::from_level(level);
        let changed = content != self.current_content || tier != self.tier;
        self.current_content = content;
        self.tier = tier;
        changed
    }

    fn presentation(&self, config: &CorruptionConfig) -> PresentationWrite {
        PresentationWrite::FragmentTier {
            fragment: self.id.clone(),
            tier: self.tier,
            content: self.current_content.clone(),
            intensity: tier_intensity(self.corruption_level, config),
        }
    }
}

/// Everything [`derive_content`] reads from a level.
fn render_key(level: f64, config: &CorruptionConfig) -> (u32, bool) {
    (levels::millis(level), level > config.substitution_threshold())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorruptionMetrics {
    pub ticks: u64,
    pub karma_updates: u64,
    pub purifications: u64,
    pub fragments_purified: u64,
    pub level_syncs: u64,
    pub unknown_fragment_refs: u64,
    pub duplicate_tracks: u64,
}

/// Per-fragment corruption records plus the karma snapshot in force.
#[derive(Debug)]
pub struct CorruptionState {
    config: CorruptionConfig,
    records: BTreeMap<FragmentId, FragmentCorruptionRecord>,
    karma: KarmaState,
    metrics: CorruptionMetrics,
}

impl CorruptionState {
    pub fn new(config: CorruptionConfig) -> Self {
        Self {
            config,
            records: BTreeMap::new(),
            karma: KarmaState::default(),
            metrics: CorruptionMetrics::default(),
        }
    }

    pub fn config(&self) -> &CorruptionConfig {
        &self.config
    }

    pub fn karma(&self) -> &KarmaState {
        &self.karma
    }

    pub fn metrics(&self) -> &CorruptionMetrics {
        &self.metrics
    }

    pub fn record(&self, id: &FragmentId) -> Option<&FragmentCorruptionRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &FragmentCorruptionRecord> {
        self.records.values()
    }

    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    pub fn fragment_ids(&self) -> Vec<FragmentId> {
        self.records.keys().cloned().collect()
    }

    /// Mean level across tracked fragments, 0 when nothing is tracked.
    pub fn aggregate_level(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.records.values().map(|r| r.corruption_level).sum();
        sum / self.records.len() as f64
    }

    /// Growth per second under the current karma snapshot.
    pub fn growth_rate(&self) -> f64 {
        let weighted_total = self.config.channel_weights().weighted_total(&self.karma);
        let karma_influence =
            levels::non_negative(-weighted_total * self.config.karma_multiplier());
        levels::non_negative(
            self.config.base_corruption_rate()
                + karma_influence * self.config.karma_influence_scale(),
        )
    }

    pub fn track(&mut self, id: FragmentId, content: &str, now_ms: u64, out: &mut Outbox) -> bool {
        if self.records.contains_key(&id) {
            self.metrics.duplicate_tracks += 1;
            warn!(target: "recall::corruption", fragment = %id, "fragment.already_tracked");
            return false;
        }
        let record = FragmentCorruptionRecord::new(id.clone(), content, now_ms);
        out.present(record.presentation(&self.config));
        debug!(target: "recall::corruption", fragment = %id, "fragment.tracked");
        self.records.insert(id, record);
        true
    }

    pub fn untrack(&mut self, id: &FragmentId, out: &mut Outbox) -> bool {
        if self.records.remove(id).is_none() {
            self.unknown(id);
            return false;
        }
        out.present(PresentationWrite::ClearFragment(id.clone()));
        debug!(target: "recall::corruption", fragment = %id, "fragment.untracked");
        true
    }

    /// Accrue growth for the time elapsed since each record's last update,
    /// then publish the aggregate level.
    pub fn tick(&mut self, now_ms: u64, out: &mut Outbox) {
        let rate = self.growth_rate();
        for record in self.records.values_mut() {
            let elapsed_ms = now_ms.saturating_sub(record.last_update_ms);
            record.last_update_ms = now_ms.max(record.last_update_ms);
            if elapsed_ms == 0 {
                continue;
            }
            let delta = rate * (elapsed_ms as f64 / 1000.0);
            if record.set_level(record.corruption_level + delta, &self.config) {
                out.present(record.presentation(&self.config));
            }
        }
        self.metrics.ticks += 1;
        out.publish(Event::CorruptionUpdated {
            level: self.aggregate_level(),
            tracked: self.records.len(),
        });
    }

    /// Settle growth under the old snapshot, then adopt `karma`.
    pub fn observe_karma(&mut self, karma: KarmaState, now_ms: u64, out: &mut Outbox) {
        self.tick(now_ms, out);
        self.karma = karma.sanitized();
        self.metrics.karma_updates += 1;
    }

    pub fn purify(&mut self, ids: &[FragmentId], out: &mut Outbox) -> usize {
        let strength = self.config.purification_strength();
        let mut purified = Vec::new();
        for id in ids {
            let Some(record) = self.records.get_mut(id) else {
                self.unknown(id);
                continue;
            };
            if record.set_level(record.corruption_level - strength, &self.config) {
                out.present(record.presentation(&self.config));
            }
            purified.push(id.clone());
        }
        if purified.is_empty() {
            return 0;
        }
        let count = purified.len();
        self.metrics.purifications += 1;
        self.metrics.fragments_purified += count as u64;
        debug!(target: "recall::corruption", count, strength, "fragment.purified");
        out.publish(Event::CorruptionPurified {
            fragments: purified,
            strength,
        });
        out.publish(Event::CorruptionUpdated {
            level: self.aggregate_level(),
            tracked: self.records.len(),
        });
        count
    }

    /// Accrue growth up to `now_ms`, then purify every tracked fragment.
    pub fn purify_all(&mut self, now_ms: u64, out: &mut Outbox) -> usize {
        self.tick(now_ms, out);
        let ids = self.fragment_ids();
        self.purify(&ids, out)
    }

    /// Blend every record toward `level`. Publishes nothing so that an audio
    /// report never loops back to the audio channel.
    pub fn sync_with_level(&mut self, level: f64, out: &mut Outbox) {
        let target = levels::bounded(level, 0.0, self.config.max_corruption_level());
        let blend = self.config.blend_rate();
        for record in self.records.values_mut() {
            let next = record.corruption_level + (target - record.corruption_level) * blend;
            if record.set_level(next, &self.config) {
                out.present(record.presentation(&self.config));
            }
        }
        self.metrics.level_syncs += 1;
    }

    fn unknown(&mut self, id: &FragmentId) {
        self.metrics.unknown_fragment_refs += 1;
        warn!(target: "recall::corruption", fragment = %id, "fragment.unknown");
    }
}

struct EngineInner {
    state: RefCell<CorruptionState>,
    outlets: Outlets,
    scheduler: Scheduler,
}

impl EngineInner {
    fn run<R>(&self, f: impl FnOnce(&mut CorruptionState, &mut Outbox) -> R) -> R {
        self.outlets.run(&self.state, f)
    }
}

/// Session-facing handle around [`CorruptionState`].
pub struct CorruptionEngine {
    inner: Rc<EngineInner>,
    teardown: Teardown,
}

impl CorruptionEngine {
    pub fn new(config: CorruptionConfig, scheduler: Scheduler, outlets: Outlets) -> Self {
        Self {
            inner: Rc::new(EngineInner {
                state: RefCell::new(CorruptionState::new(config)),
                outlets,
                scheduler,
            }),
            teardown: Teardown::new(),
        }
    }

    /// Start the periodic tick and subscribe to karma, audio level reports
    /// and recognition success.
    pub fn start(&mut self, ledger: &SharedKarmaLedger) {
        let now_ms = self.inner.scheduler.now_ms();
        let initial = ledger.state();
        self.inner.run(|state, out| state.observe_karma(initial, now_ms, out));

        let period = self.inner.state.borrow().config().tick_interval_ms();
        let weak = Rc::downgrade(&self.inner);
        let handle = self.inner.scheduler.every(period, move |now_ms| {
            if let Some(inner) = weak.upgrade() {
                inner.run(|state, out| state.tick(now_ms, out));
            }
        });
        self.teardown.track_timer(&self.inner.scheduler, handle);

        let weak = Rc::downgrade(&self.inner);
        subscribe_all(ledger, &mut self.teardown, move |_, karma| {
            if let Some(inner) = weak.upgrade() {
                let now_ms = inner.scheduler.now_ms();
                inner.run(|state, out| state.observe_karma(*karma, now_ms, out));
            }
        });

        let bridge = self.inner.outlets.bridge().clone();
        let weak: Weak<EngineInner> = Rc::downgrade(&self.inner);
        bridge.subscribe_scoped(&mut self.teardown, AUDIO_DEGRADATION_CHANGED, move |event| {
            if let (Some(inner), Event::AudioDegradationChanged { level, .. }) =
                (weak.upgrade(), event)
            {
                inner.run(|state, out| state.sync_with_level(*level, out));
            }
        });

        let weak = Rc::downgrade(&self.inner);
        bridge.subscribe_scoped(&mut self.teardown, RECOGNITION_SUCCEEDED, move |_| {
            if let Some(inner) = weak.upgrade() {
                let now_ms = inner.scheduler.now_ms();
                inner.run(|state, out| state.purify_all(now_ms, out));
            }
        });
    }

    pub fn track_fragment(&self, id: impl Into<FragmentId>, content: &str) -> bool {
        let now_ms = self.inner.scheduler.now_ms();
        let id = id.into();
        self.inner.run(|state, out| state.track(id, content, now_ms, out))
    }

    pub fn untrack_fragment(&self, id: &FragmentId) -> bool {
        self.inner.run(|state, out| state.untrack(id, out))
    }

    pub fn tick(&self) {
        let now_ms = self.inner.scheduler.now_ms();
        self.inner.run(|state, out| state.tick(now_ms, out));
    }

    pub fn purify(&self, ids: &[FragmentId]) -> usize {
        self.inner.run(|state, out| state.purify(ids, out))
    }

    pub fn sync_with_level(&self, level: f64) {
        self.inner.run(|state, out| state.sync_with_level(level, out));
    }

    pub fn level(&self, id: &FragmentId) -> Option<f64> {
        self.inner.state.borrow().record(id).map(|r| r.corruption_level())
    }

    pub fn content(&self, id: &FragmentId) -> Option<String> {
        self.inner
            .state
            .borrow()
            .record(id)
            .map(|r| r.current_content().to_string())
    }

    pub fn tier(&self, id: &FragmentId) -> Option<CorruptionTier> {
        self.inner.state.borrow().record(id).map(|r| r.tier())
    }

    pub fn record(&self, id: &FragmentId) -> Option<FragmentCorruptionRecord> {
        self.inner.state.borrow().record(id).cloned()
    }

    pub fn aggregate_level(&self) -> f64 {
        self.inner.state.borrow().aggregate_level()
    }

    pub fn tracked(&self) -> usize {
        self.inner.state.borrow().tracked()
    }

    pub fn metrics(&self) -> CorruptionMetrics {
        self.inner.state.borrow().metrics().clone()
    }

    /// Cancel the tick timer and drop every subscription.
    pub fn destroy(&mut self) {
        self.teardown.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecallConfig;
    use crate::event_bridge::EventBridge;
    use crate::karma::{InMemoryKarmaLedger, KarmaLedger};
    use crate::outbox::{share, Effect};
    use crate::presentation::HeadlessPresentation;
    use recall_schema::KarmaChannel;

    fn state() -> CorruptionState {
        CorruptionState::new(RecallConfig::default().corruption().clone())
    }

    fn id(name: &str) -> FragmentId {
        FragmentId::from(name)
    }

    #[test]
    fn zero_karma_grows_at_base_rate() {
        let mut state = state();
        let mut out = Outbox::new();
        state.track(id("f"), "hello", 0, &mut out);
        state.tick(1000, &mut out);
        let level = state.record(&id("f")).map(|r| r.corruption_level()).unwrap_or(-1.0);
        assert!((level - 0.001).abs() < 1e-12);
    }

    #[test]
    fn void_karma_accelerates_growth() {
        let mut calm = state();
        let mut haunted = state();
        let mut out = Outbox::new();
        calm.track(id("f"), "hello", 0, &mut out);
        haunted.track(id("f"), "hello", 0, &mut out);
        haunted.observe_karma(KarmaState::new(0.0, 0.0, 0.0, 100.0), 0, &mut out);
        for second in 1..=10 {
            calm.tick(second * 1000, &mut out);
            haunted.tick(second * 1000, &mut out);
        }
        let calm_level = calm.aggregate_level();
        let haunted_level = haunted.aggregate_level();
        assert!((calm_level - 0.01).abs() < 1e-9);
        assert!((haunted_level - 0.51).abs() < 1e-9);
        let record = haunted.record(&id("f")).expect("tracked");
        assert_ne!(record.current_content(), "hello");
        assert_eq!(record.tier(), CorruptionTier::Severe);
    }

    #[test]
    fn content_depends_only_on_quantized_level() {
        let text = "a letter folded into the coat pocket";
        let mut early = state();
        let mut late = state();
        let mut out = Outbox::new();
        for state in [&mut early, &mut late] {
            state.track(id("f"), text, 0, &mut out);
            state.observe_karma(KarmaState::new(0.0, 0.0, 0.0, 100.0), 0, &mut out);
        }
        early.tick(1_962, &mut out);
        late.tick(1_978, &mut out);

        let early = early.record(&id("f")).expect("tracked").clone();
        let late = late.record(&id("f")).expect("tracked").clone();
        assert_ne!(early.corruption_level(), late.corruption_level());
        assert_eq!(levels::millis(early.corruption_level()), 100);
        assert_eq!(levels::millis(late.corruption_level()), 100);
        assert_eq!(early.current_content(), late.current_content());
        assert_eq!(
            early.current_content(),
            derive_content(text, 0.1005, RecallConfig::default().corruption())
        );
    }

    #[test]
    fn levels_never_exceed_maximum() {
        let mut state = state();
        let mut out = Outbox::new();
        state.track(id("f"), "hello", 0, &mut out);
        state.observe_karma(KarmaState::new(0.0, 0.0, 0.0, 10_000.0), 0, &mut out);
        state.tick(3_600_000, &mut out);
        assert_eq!(state.aggregate_level(), 1.0);
        assert_eq!(
            state.record(&id("f")).map(|r| r.tier()),
            Some(CorruptionTier::Complete)
        );
    }

    #[test]
    fn purification_lowers_level_and_reverts_content() {
        let mut state = state();
        let mut out = Outbox::new();
        state.track(id("f"), "hello", 0, &mut out);
        state.observe_karma(KarmaState::new(0.0, 0.0, 0.0, 100.0), 0, &mut out);
        state.tick(6000, &mut out);
        let before = state.aggregate_level();
        assert!(before > 0.3);

        let mut out = Outbox::new();
        assert_eq!(state.purify(&[id("f"), id("ghost")], &mut out), 1);
        let after = state.aggregate_level();
        assert!((before - after - 0.3).abs() < 1e-9);
        assert_eq!(state.metrics().unknown_fragment_refs, 1);
        let topics: Vec<&str> = out
            .effects()
            .iter()
            .filter_map(|effect| match effect {
                Effect::Publish(event) => Some(event.topic()),
                _ => None,
            })
            .collect();
        assert_eq!(topics, vec!["corruption:purified", "corruption:updated"]);

        state.purify(&[id("f")], &mut Outbox::new());
        assert_eq!(state.aggregate_level(), 0.0);
        assert_eq!(
            state.record(&id("f")).map(|r| r.current_content().to_string()),
            Some("hello".to_string())
        );
    }

    #[test]
    fn level_sync_blends_without_publishing() {
        let mut state = state();
        let mut out = Outbox::new();
        state.track(id("a"), "alpha", 0, &mut out);
        let mut out = Outbox::new();
        state.sync_with_level(0.8, &mut out);
        assert!((state.aggregate_level() - 0.08).abs() < 1e-12);
        assert!(out
            .effects()
            .iter()
            .all(|effect| !matches!(effect, Effect::Publish(_))));
    }

    #[test]
    fn unknown_fragments_are_counted_not_fatal() {
        let mut state = state();
        let mut out = Outbox::new();
        assert!(!state.untrack(&id("nobody"), &mut out));
        assert!(state.track(id("f"), "x", 0, &mut out));
        assert!(!state.track(id("f"), "y", 0, &mut out));
        assert_eq!(state.metrics().unknown_fragment_refs, 1);
        assert_eq!(state.metrics().duplicate_tracks, 1);
        assert_eq!(state.record(&id("f")).map(|r| r.original_content()), Some("x"));
    }

    #[test]
    fn engine_ticks_on_schedule_and_releases_on_destroy() {
        let scheduler = Scheduler::new();
        let bridge = EventBridge::new();
        let presentation = share(HeadlessPresentation::new());
        let outlets = Outlets::new(bridge.clone(), presentation.clone(), None);
        let ledger = InMemoryKarmaLedger::new().shared();
        let shared: SharedKarmaLedger = ledger.clone();

        let mut engine = CorruptionEngine::new(
            RecallConfig::default().corruption().clone(),
            scheduler.clone(),
            outlets,
        );
        engine.start(&shared);
        engine.track_fragment("f", "hello");
        assert_eq!(
            presentation.borrow().fragment(&id("f")).map(|view| view.tier),
            Some(CorruptionTier::Minimal)
        );

        ledger.add_karma(KarmaChannel::Void, 100.0);
        scheduler.advance_by(10_000);
        assert!((engine.aggregate_level() - 0.51).abs() < 1e-9);
        assert_eq!(
            presentation.borrow().fragment(&id("f")).map(|view| view.tier),
            Some(CorruptionTier::Severe)
        );

        engine.destroy();
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(bridge.subscriber_count(), 0);
        assert_eq!(ledger.subscriber_count(), 0);
    }
}
