//! Presentation collaborator seam.
//!
//! The engine never touches rendering primitives; it writes opaque named
//! scalars, per-fragment tier labels and feedback cues through
//! [`PresentationSink`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use recall_schema::{CorruptionTier, FeedbackCue, FragmentId, IntensitySignal};
use serde::Serialize;

pub trait PresentationSink {
    fn reduced_motion_preferred(&self) -> bool;

    fn set_intensity(&mut self, signal: IntensitySignal, value: f64);

    fn set_fragment_tier(
        &mut self,
        fragment: &FragmentId,
        tier: CorruptionTier,
        content: &str,
        intensity: f64,
    );

    fn clear_fragment(&mut self, fragment: &FragmentId);

    fn set_fallback_indicator(&mut self, active: bool);

    fn rhythm_pulse(&mut self, beat: u64, intensity: f64);

    fn play_feedback(&mut self, cue: &FeedbackCue);
}

pub type SharedPresentation = Rc<RefCell<dyn PresentationSink>>;

/// A single write destined for the presentation sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PresentationWrite {
    Intensity(IntensitySignal, f64),
    FragmentTier {
        fragment: FragmentId,
        tier: CorruptionTier,
        content: String,
        intensity: f64,
    },
    ClearFragment(FragmentId),
    FallbackIndicator(bool),
    RhythmPulse { beat: u64, intensity: f64 },
    Feedback(FeedbackCue),
}

impl PresentationWrite {
    pub fn apply(&self, sink: &mut dyn PresentationSink) {
        match self {
            PresentationWrite::Intensity(signal, value) => sink.set_intensity(*signal, *value),
            PresentationWrite::FragmentTier {
                fragment,
                tier,
                content,
                intensity,
            } => sink.set_fragment_tier(fragment, *tier, content, *intensity),
            PresentationWrite::ClearFragment(fragment) => sink.clear_fragment(fragment),
            PresentationWrite::FallbackIndicator(active) => sink.set_fallback_indicator(*active),
            PresentationWrite::RhythmPulse { beat, intensity } => {
                sink.rhythm_pulse(*beat, *intensity)
            }
            PresentationWrite::Feedback(cue) => sink.play_feedback(cue),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FragmentView {
    pub tier: CorruptionTier,
    pub content: String,
    pub intensity: f64,
}

/// Presentation sink for headless hosts and tests: keeps the latest value of
/// every signal and a log of pulses and feedback cues.
#[derive(Debug, Default, Serialize)]
pub struct HeadlessPresentation {
    reduced_motion: bool,
    intensities: BTreeMap<IntensitySignal, f64>,
    fragments: BTreeMap<FragmentId, FragmentView>,
    fallback_indicator: bool,
    pulses: Vec<(u64, f64)>,
    feedback: Vec<FeedbackCue>,
}

impl HeadlessPresentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reduced_motion(reduced_motion: bool) -> Self {
        Self {
            reduced_motion,
            ..Self::default()
        }
    }

    pub fn shared(self) -> Rc<RefCell<HeadlessPresentation>> {
        Rc::new(RefCell::new(self))
    }

    pub fn intensity(&self, signal: IntensitySignal) -> Option<f64> {
        self.intensities.get(&signal).copied()
    }

    pub fn fragment(&self, fragment: &FragmentId) -> Option<&FragmentView> {
        self.fragments.get(fragment)
    }

    pub fn fallback_indicator(&self) -> bool {
        self.fallback_indicator
    }

    pub fn pulses(&self) -> &[(u64, f64)] {
        &self.pulses
    }

    pub fn feedback(&self) -> &[FeedbackCue] {
        &self.feedback
    }
}

impl PresentationSink for HeadlessPresentation {
    fn reduced_motion_preferred(&self) -> bool {
        self.reduced_motion
    }

    fn set_intensity(&mut self, signal: IntensitySignal, value: f64) {
        self.intensities.insert(signal, value);
    }

    fn set_fragment_tier(
        &mut self,
        fragment: &FragmentId,
        tier: CorruptionTier,
        content: &str,
        intensity: f64,
    ) {
        self.fragments.insert(
            fragment.clone(),
            FragmentView {
                tier,
                content: content.to_string(),
                intensity,
            },
        );
    }

    fn clear_fragment(&mut self, fragment: &FragmentId) {
        self.fragments.remove(fragment);
    }

    fn set_fallback_indicator(&mut self, active: bool) {
        self.fallback_indicator = active;
    }

    fn rhythm_pulse(&mut self, beat: u64, intensity: f64) {
        self.pulses.push((beat, intensity));
    }

    fn play_feedback(&mut self, cue: &FeedbackCue) {
        self.feedback.push(*cue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_schema::FeedbackAction;

    #[test]
    fn writes_land_in_headless_sink() {
        let mut sink = HeadlessPresentation::new();
        let fragment = FragmentId::from("f1");
        PresentationWrite::Intensity(IntensitySignal::VisualGrain, 0.3).apply(&mut sink);
        PresentationWrite::FragmentTier {
            fragment: fragment.clone(),
            tier: CorruptionTier::Severe,
            content: "h#llo".into(),
            intensity: 0.7,
        }
        .apply(&mut sink);
        PresentationWrite::Feedback(FeedbackCue {
            action: FeedbackAction::Clarity,
            intensity: 1.0,
            duration_ms: 2000,
        })
        .apply(&mut sink);

        assert_eq!(sink.intensity(IntensitySignal::VisualGrain), Some(0.3));
        assert_eq!(
            sink.fragment(&fragment).map(|view| view.tier),
            Some(CorruptionTier::Severe)
        );
        assert_eq!(sink.feedback().len(), 1);

        PresentationWrite::ClearFragment(fragment.clone()).apply(&mut sink);
        assert!(sink.fragment(&fragment).is_none());
    }
}
