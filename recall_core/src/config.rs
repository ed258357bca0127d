use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use recall_schema::{CorruptionTier, KarmaChannel, KarmaDelta, KarmaState};
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_RECALL_CONFIG: &str = include_str!("data/recall_config.json");
pub const RECALL_CONFIG_PATH_ENV: &str = "RECALL_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    recognition: RecognitionConfig,
    corruption: CorruptionConfig,
    sync: SyncConfig,
    feedback: FeedbackConfig,
    karma_deltas: KarmaDeltaConfig,
}

impl RecallConfig {
    pub fn builtin() -> Arc<Self> {
        match Self::from_json_str(BUILTIN_RECALL_CONFIG) {
            Ok(config) => Arc::new(config),
            Err(err) => {
                tracing::error!(
                    target: "recall::config",
                    error = %err,
                    "recall_config.builtin_parse_failed"
                );
                Arc::new(Self::default())
            }
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, RecallConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| RecallConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = RecallConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn recognition(&self) -> &RecognitionConfig {
        &self.recognition
    }

    pub fn corruption(&self) -> &CorruptionConfig {
        &self.corruption
    }

    pub fn sync(&self) -> &SyncConfig {
        &self.sync
    }

    pub fn feedback(&self) -> &FeedbackConfig {
        &self.feedback
    }

    pub fn karma_deltas(&self) -> &KarmaDeltaConfig {
        &self.karma_deltas
    }
}

#[derive(Debug, Error)]
pub enum RecallConfigError {
    #[error("failed to parse recall config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read recall config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    base_duration_ms: u64,
    extension_duration_ms: u64,
    max_extensions: u32,
    warning_threshold: f64,
}

impl RecognitionConfig {
    pub fn base_duration_ms(&self) -> u64 {
        self.base_duration_ms
    }

    pub fn extension_duration_ms(&self) -> u64 {
        self.extension_duration_ms
    }

    pub fn max_extensions(&self) -> u32 {
        self.max_extensions
    }

    pub fn warning_threshold(&self) -> f64 {
        self.warning_threshold
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            base_duration_ms: 15_000,
            extension_duration_ms: 5_000,
            max_extensions: 2,
            warning_threshold: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CorruptionConfig {
    tick_interval_ms: u64,
    base_corruption_rate: f64,
    karma_influence_scale: f64,
    karma_multiplier: f64,
    max_corruption_level: f64,
    purification_strength: f64,
    blend_rate: f64,
    substitution_threshold: f64,
    seed_salt: u64,
    channel_weights: ChannelWeights,
    glyphs: String,
    markers: Vec<String>,
    truncation_marker: String,
    tiers: TierProfiles,
}

impl CorruptionConfig {
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }

    pub fn base_corruption_rate(&self) -> f64 {
        self.base_corruption_rate
    }

    pub fn karma_influence_scale(&self) -> f64 {
        self.karma_influence_scale
    }

    pub fn karma_multiplier(&self) -> f64 {
        self.karma_multiplier
    }

    /// Upper bound for every fragment level, kept inside `[0, 1]`.
    pub fn max_corruption_level(&self) -> f64 {
        crate::levels::unit(self.max_corruption_level)
    }

    pub fn purification_strength(&self) -> f64 {
        crate::levels::non_negative(self.purification_strength)
    }

    pub fn blend_rate(&self) -> f64 {
        crate::levels::unit(self.blend_rate)
    }

    pub fn substitution_threshold(&self) -> f64 {
        self.substitution_threshold
    }

    pub fn seed_salt(&self) -> u64 {
        self.seed_salt
    }

    pub fn channel_weights(&self) -> &ChannelWeights {
        &self.channel_weights
    }

    pub fn glyphs(&self) -> &str {
        &self.glyphs
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn truncation_marker(&self) -> &str {
        &self.truncation_marker
    }

    pub fn tiers(&self) -> &TierProfiles {
        &self.tiers
    }
}

impl Default for CorruptionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            base_corruption_rate: 0.001,
            karma_influence_scale: 0.001,
            karma_multiplier: 0.5,
            max_corruption_level: 1.0,
            purification_strength: 0.3,
            blend_rate: 0.1,
            substitution_threshold: 0.05,
            seed_salt: 1337,
            channel_weights: ChannelWeights::default(),
            glyphs: "#%&@$*?!░▒▓█".to_string(),
            markers: vec![
                "[?]".to_string(),
                "▒▒".to_string(),
                "<ERR>".to_string(),
                "…".to_string(),
            ],
            truncation_marker: "…".to_string(),
            tiers: TierProfiles::default(),
        }
    }
}

/// Per-channel weights of the karma total that drives corruption growth.
///
/// The karma "sum" read by the growth formula is this weighted total, not
/// the raw channel sum. Negative weighted totals accelerate corruption.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChannelWeights {
    computational: f64,
    emotional: f64,
    temporal: f64,
    void: f64,
}

impl ChannelWeights {
    pub fn weight(&self, channel: KarmaChannel) -> f64 {
        match channel {
            KarmaChannel::Computational => self.computational,
            KarmaChannel::Emotional => self.emotional,
            KarmaChannel::Temporal => self.temporal,
            KarmaChannel::Void => self.void,
        }
    }

    pub fn weighted_total(&self, karma: &KarmaState) -> f64 {
        let karma = karma.sanitized();
        KarmaChannel::ALL
            .iter()
            .map(|channel| self.weight(*channel) * karma.get(*channel))
            .sum()
    }
}

impl Default for ChannelWeights {
    fn default() -> Self {
        Self {
            computational: 1.0,
            emotional: 1.0,
            temporal: 1.0,
            void: -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TierProfile {
    substitution: f64,
    truncation: f64,
    marker_insertion: f64,
    intensity: f64,
}

impl TierProfile {
    pub fn new(substitution: f64, truncation: f64, marker_insertion: f64, intensity: f64) -> Self {
        Self {
            substitution,
            truncation,
            marker_insertion,
            intensity,
        }
    }

    pub fn substitution(&self) -> f64 {
        crate::levels::unit(self.substitution)
    }

    pub fn truncation(&self) -> f64 {
        crate::levels::unit(self.truncation)
    }

    pub fn marker_insertion(&self) -> f64 {
        crate::levels::unit(self.marker_insertion)
    }

    pub fn intensity(&self) -> f64 {
        crate::levels::unit(self.intensity)
    }
}

impl Default for TierProfile {
    fn default() -> Self {
        Self::new(0.05, 0.0, 0.0, 0.1)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TierProfiles {
    minimal: TierProfile,
    moderate: TierProfile,
    severe: TierProfile,
    complete: TierProfile,
}

impl TierProfiles {
    pub fn profile(&self, tier: CorruptionTier) -> &TierProfile {
        match tier {
            CorruptionTier::Minimal => &self.minimal,
            CorruptionTier::Moderate => &self.moderate,
            CorruptionTier::Severe => &self.severe,
            CorruptionTier::Complete => &self.complete,
        }
    }
}

impl Default for TierProfiles {
    fn default() -> Self {
        Self {
            minimal: TierProfile::new(0.05, 0.0, 0.0, 0.1),
            moderate: TierProfile::new(0.15, 0.05, 0.1, 0.35),
            severe: TierProfile::new(0.3, 0.2, 0.3, 0.65),
            complete: TierProfile::new(0.6, 0.4, 0.6, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    health_check_interval_ms: u64,
    stale_threshold_ms: u64,
    sync_threshold: f64,
    drift_correction_rate: f64,
    audio_init_timeout_ms: u64,
    visual_guidance_level: f64,
    rhythm_interval_ms: u64,
    rhythm_floor: f64,
    karma_intensity_scale: f64,
    reduced_motion_scale: f64,
    mapping: MappingConfig,
}

impl SyncConfig {
    pub fn health_check_interval_ms(&self) -> u64 {
        self.health_check_interval_ms
    }

    pub fn stale_threshold_ms(&self) -> u64 {
        self.stale_threshold_ms
    }

    pub fn sync_threshold(&self) -> f64 {
        crate::levels::unit(self.sync_threshold)
    }

    pub fn drift_correction_rate(&self) -> f64 {
        crate::levels::unit(self.drift_correction_rate)
    }

    pub fn audio_init_timeout_ms(&self) -> u64 {
        self.audio_init_timeout_ms
    }

    /// Multiplier applied to visual intensities during audio fallback.
    pub fn visual_guidance_level(&self) -> f64 {
        if self.visual_guidance_level.is_finite() {
            self.visual_guidance_level.max(1.0)
        } else {
            1.0
        }
    }

    pub fn rhythm_interval_ms(&self) -> u64 {
        self.rhythm_interval_ms
    }

    pub fn rhythm_floor(&self) -> f64 {
        crate::levels::unit(self.rhythm_floor)
    }

    pub fn karma_intensity_scale(&self) -> f64 {
        crate::levels::non_negative(self.karma_intensity_scale)
    }

    pub fn reduced_motion_scale(&self) -> f64 {
        crate::levels::unit(self.reduced_motion_scale)
    }

    pub fn mapping(&self) -> &MappingConfig {
        &self.mapping
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 100,
            stale_threshold_ms: 1_000,
            sync_threshold: 0.05,
            drift_correction_rate: 0.5,
            audio_init_timeout_ms: 5_000,
            visual_guidance_level: 1.5,
            rhythm_interval_ms: 800,
            rhythm_floor: 0.2,
            karma_intensity_scale: 0.01,
            reduced_motion_scale: 0.3,
            mapping: MappingConfig::default(),
        }
    }
}

/// Ratios used to translate audio degradation parameters into visual ones.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pitch_divisor: f64,
    harmonic_divisor: f64,
    noise_scale: f64,
    min_animation_speed: f64,
    max_animation_speed: f64,
    aberration_scale: f64,
    grain_divisor: f64,
}

impl MappingConfig {
    pub fn pitch_divisor(&self) -> f64 {
        self.pitch_divisor
    }

    pub fn harmonic_divisor(&self) -> f64 {
        self.harmonic_divisor
    }

    pub fn noise_scale(&self) -> f64 {
        self.noise_scale
    }

    pub fn min_animation_speed(&self) -> f64 {
        self.min_animation_speed
    }

    pub fn max_animation_speed(&self) -> f64 {
        self.max_animation_speed.max(self.min_animation_speed)
    }

    pub fn aberration_scale(&self) -> f64 {
        self.aberration_scale
    }

    pub fn grain_divisor(&self) -> f64 {
        self.grain_divisor
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            pitch_divisor: 15.0,
            harmonic_divisor: 10.0,
            noise_scale: 1.0,
            min_animation_speed: 0.1,
            max_animation_speed: 4.0,
            aberration_scale: 10.0,
            grain_divisor: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CueConfig {
    intensity: f64,
    duration_ms: u64,
}

impl CueConfig {
    pub fn new(intensity: f64, duration_ms: u64) -> Self {
        Self {
            intensity,
            duration_ms,
        }
    }

    pub fn intensity(&self) -> f64 {
        crate::levels::non_negative(self.intensity)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

impl Default for CueConfig {
    fn default() -> Self {
        Self::new(1.0, 500)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    attempt: CueConfig,
    success: CueConfig,
    failure: CueConfig,
    failure_acceleration: f64,
}

impl FeedbackConfig {
    pub fn attempt(&self) -> &CueConfig {
        &self.attempt
    }

    pub fn success(&self) -> &CueConfig {
        &self.success
    }

    pub fn failure(&self) -> &CueConfig {
        &self.failure
    }

    /// Audio degradation added per unit of failure intensity.
    pub fn failure_acceleration(&self) -> f64 {
        crate::levels::non_negative(self.failure_acceleration)
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            attempt: CueConfig::new(0.6, 300),
            success: CueConfig::new(1.0, 2_000),
            failure: CueConfig::new(0.8, 1_500),
            failure_acceleration: 0.1,
        }
    }
}

/// Named karma deltas requested when a recognition window resolves.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct KarmaDeltaConfig {
    on_success: Vec<KarmaDelta>,
    on_failure: Vec<KarmaDelta>,
}

impl KarmaDeltaConfig {
    pub fn on_success(&self) -> &[KarmaDelta] {
        &self.on_success
    }

    pub fn on_failure(&self) -> &[KarmaDelta] {
        &self.on_failure
    }
}

impl Default for KarmaDeltaConfig {
    fn default() -> Self {
        Self {
            on_success: vec![
                KarmaDelta::new("recognition_clarity", KarmaChannel::Emotional, 10.0),
                KarmaDelta::new("temporal_alignment", KarmaChannel::Temporal, 5.0),
            ],
            on_failure: vec![KarmaDelta::new(
                "attachment_penalty",
                KarmaChannel::Void,
                15.0,
            )],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecallConfigHandle(pub Arc<RecallConfig>);

impl RecallConfigHandle {
    pub fn new(config: Arc<RecallConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<RecallConfig> {
        Arc::clone(&self.0)
    }

    pub fn config(&self) -> &RecallConfig {
        &self.0
    }

    pub fn replace(&mut self, config: Arc<RecallConfig>) {
        self.0 = config;
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecallConfigMetadata {
    path: Option<PathBuf>,
}

impl RecallConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Load the config named by `RECALL_CONFIG_PATH`, falling back to the
/// builtin copy when the variable is unset or the file is unusable.
pub fn load_recall_config_from_env() -> (Arc<RecallConfig>, RecallConfigMetadata) {
    if let Some(path) = env::var(RECALL_CONFIG_PATH_ENV).ok().map(PathBuf::from) {
        match RecallConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "recall::config",
                    path = %path.display(),
                    "recall_config.loaded=file"
                );
                return (Arc::new(config), RecallConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "recall::config",
                    path = %path.display(),
                    error = %err,
                    "recall_config.load_failed"
                );
            }
        }
    }

    let config = RecallConfig::builtin();
    tracing::info!(target: "recall::config", "recall_config.loaded=builtin");
    (config, RecallConfigMetadata::new(None))
}
