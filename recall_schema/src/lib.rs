//! Shared data contracts for the Recall recognition experience.
//!
//! Everything here is plain serializable data: karma snapshots, fragment
//! identifiers, corruption tiers, the audio/visual parameter vectors exchanged
//! with external collaborators, and the event payloads carried by the
//! in-process event bridge.

pub mod events;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use events::*;

/// Largest karma magnitude the engine will reason about.
pub const KARMA_ABS_LIMIT: f64 = 1.0e6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum KarmaChannel {
    Computational,
    Emotional,
    Temporal,
    Void,
}

impl KarmaChannel {
    pub const ALL: [KarmaChannel; 4] = [
        KarmaChannel::Computational,
        KarmaChannel::Emotional,
        KarmaChannel::Temporal,
        KarmaChannel::Void,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KarmaChannel::Computational => "computational",
            KarmaChannel::Emotional => "emotional",
            KarmaChannel::Temporal => "temporal",
            KarmaChannel::Void => "void",
        }
    }
}

impl fmt::Display for KarmaChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the four karma channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct KarmaState {
    pub computational: f64,
    pub emotional: f64,
    pub temporal: f64,
    pub void: f64,
}

impl KarmaState {
    pub fn new(computational: f64, emotional: f64, temporal: f64, void: f64) -> Self {
        Self {
            computational,
            emotional,
            temporal,
            void,
        }
    }

    pub fn get(&self, channel: KarmaChannel) -> f64 {
        match channel {
            KarmaChannel::Computational => self.computational,
            KarmaChannel::Emotional => self.emotional,
            KarmaChannel::Temporal => self.temporal,
            KarmaChannel::Void => self.void,
        }
    }

    pub fn get_mut(&mut self, channel: KarmaChannel) -> &mut f64 {
        match channel {
            KarmaChannel::Computational => &mut self.computational,
            KarmaChannel::Emotional => &mut self.emotional,
            KarmaChannel::Temporal => &mut self.temporal,
            KarmaChannel::Void => &mut self.void,
        }
    }

    pub fn add(&mut self, channel: KarmaChannel, amount: f64) {
        let slot = self.get_mut(channel);
        *slot = sanitize_karma(*slot + amount);
    }

    /// Unweighted sum of every channel.
    pub fn total(&self) -> f64 {
        KarmaChannel::ALL
            .iter()
            .map(|channel| self.get(*channel))
            .sum()
    }

    /// Copy with NaN channels zeroed and magnitudes clamped to [`KARMA_ABS_LIMIT`].
    pub fn sanitized(&self) -> Self {
        Self {
            computational: sanitize_karma(self.computational),
            emotional: sanitize_karma(self.emotional),
            temporal: sanitize_karma(self.temporal),
            void: sanitize_karma(self.void),
        }
    }
}

fn sanitize_karma(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-KARMA_ABS_LIMIT, KARMA_ABS_LIMIT)
    }
}

/// A named karma adjustment requested by the engine (purification reward,
/// attachment penalty, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KarmaDelta {
    pub name: String,
    pub channel: KarmaChannel,
    pub amount: f64,
}

impl KarmaDelta {
    pub fn new(name: impl Into<String>, channel: KarmaChannel, amount: f64) -> Self {
        Self {
            name: name.into(),
            channel,
            amount,
        }
    }
}

/// Identifier of a content fragment shown on the presentation surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct FragmentId(pub String);

impl FragmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FragmentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FragmentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered corruption bands.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionTier {
    #[default]
    Minimal,
    Moderate,
    Severe,
    Complete,
}

impl CorruptionTier {
    pub const ALL: [CorruptionTier; 4] = [
        CorruptionTier::Minimal,
        CorruptionTier::Moderate,
        CorruptionTier::Severe,
        CorruptionTier::Complete,
    ];

    pub fn from_level(level: f64) -> Self {
        if level.is_nan() || level < 0.25 {
            CorruptionTier::Minimal
        } else if level < 0.5 {
            CorruptionTier::Moderate
        } else if level < 0.75 {
            CorruptionTier::Severe
        } else {
            CorruptionTier::Complete
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CorruptionTier::Minimal => "minimal",
            CorruptionTier::Moderate => "moderate",
            CorruptionTier::Severe => "severe",
            CorruptionTier::Complete => "complete",
        }
    }
}

impl fmt::Display for CorruptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualifying user signal that counts towards recognition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMethod {
    Click,
    Keypress,
    Touch,
    /// Sustained hover or gaze over the fragment.
    Engagement,
    Confirm,
}

impl RecognitionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionMethod::Click => "click",
            RecognitionMethod::Keypress => "keypress",
            RecognitionMethod::Touch => "touch",
            RecognitionMethod::Engagement => "engagement",
            RecognitionMethod::Confirm => "confirm",
        }
    }
}

impl fmt::Display for RecognitionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameter vector reported by the audio degradation synthesizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioParameters {
    pub pitch_instability: f64,
    pub harmonic_count: f64,
    pub noise_level: f64,
    pub time_stretch: f64,
    pub harmonic_jitter: f64,
    pub granular_size: f64,
}

impl Default for AudioParameters {
    fn default() -> Self {
        Self {
            pitch_instability: 0.0,
            harmonic_count: 0.0,
            noise_level: 0.0,
            time_stretch: 1.0,
            harmonic_jitter: 0.0,
            granular_size: 0.0,
        }
    }
}

/// Visual intensities derived from [`AudioParameters`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VisualParameters {
    pub visual_jitter: f64,
    pub visual_complexity: f64,
    pub corruption_intensity: f64,
    pub animation_speed_multiplier: f64,
    pub chromatic_aberration_px: f64,
    pub visual_grain: f64,
}

impl Default for VisualParameters {
    fn default() -> Self {
        Self {
            visual_jitter: 0.0,
            visual_complexity: 0.0,
            corruption_intensity: 0.0,
            animation_speed_multiplier: 1.0,
            chromatic_aberration_px: 0.0,
            visual_grain: 0.0,
        }
    }
}

impl VisualParameters {
    pub fn signals(&self) -> [(IntensitySignal, f64); 6] {
        [
            (IntensitySignal::VisualJitter, self.visual_jitter),
            (IntensitySignal::VisualComplexity, self.visual_complexity),
            (IntensitySignal::CorruptionIntensity, self.corruption_intensity),
            (
                IntensitySignal::AnimationSpeedMultiplier,
                self.animation_speed_multiplier,
            ),
            (
                IntensitySignal::ChromaticAberrationPx,
                self.chromatic_aberration_px,
            ),
            (IntensitySignal::VisualGrain, self.visual_grain),
        ]
    }
}

/// Named scalar written to the presentation collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IntensitySignal {
    VisualJitter,
    VisualComplexity,
    CorruptionIntensity,
    AnimationSpeedMultiplier,
    ChromaticAberrationPx,
    VisualGrain,
    KarmaIntensity,
    DegradationLevel,
}

impl IntensitySignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntensitySignal::VisualJitter => "visual_jitter",
            IntensitySignal::VisualComplexity => "visual_complexity",
            IntensitySignal::CorruptionIntensity => "corruption_intensity",
            IntensitySignal::AnimationSpeedMultiplier => "animation_speed_multiplier",
            IntensitySignal::ChromaticAberrationPx => "chromatic_aberration_px",
            IntensitySignal::VisualGrain => "visual_grain",
            IntensitySignal::KarmaIntensity => "karma_intensity",
            IntensitySignal::DegradationLevel => "degradation_level",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Burst,
    Resonance,
    AccelerateDegradation,
    Pulse,
    Clarity,
    Fracture,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Burst => "burst",
            FeedbackAction::Resonance => "resonance",
            FeedbackAction::AccelerateDegradation => "accelerate_degradation",
            FeedbackAction::Pulse => "pulse",
            FeedbackAction::Clarity => "clarity",
            FeedbackAction::Fracture => "fracture",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeedbackCue {
    pub action: FeedbackAction,
    pub intensity: f64,
    pub duration_ms: u64,
}

/// Paired audio/visual response to a recognition outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeedbackPair {
    pub audio: FeedbackCue,
    pub visual: FeedbackCue,
}
