//! Event topics and payloads carried by the event bridge.

use serde::{Deserialize, Serialize};

use crate::{FragmentId, RecognitionMethod};

pub const RECOGNITION_WINDOW_OPENED: &str = "recognition:windowOpened";
pub const RECOGNITION_ATTEMPT: &str = "recognition:attempt";
pub const RECOGNITION_TIME_EXTENDED: &str = "recognition:timeExtended";
pub const RECOGNITION_SUCCEEDED: &str = "recognition:succeeded";
pub const RECOGNITION_FAILED: &str = "recognition:failed";
pub const AUDIO_DEGRADATION_CHANGED: &str = "audio:degradationChanged";
pub const AUDIO_INITIALIZATION_FAILED: &str = "audio:initializationFailed";
pub const AUDIO_CONTEXT_SUSPENDED: &str = "audio:contextSuspended";
pub const AUDIO_CONTEXT_RESUMED: &str = "audio:contextResumed";
pub const DEGRADATION_LEVEL_CHANGED: &str = "degradation:levelChanged";
pub const DEGRADATION_DRIFT_CORRECTED: &str = "degradation:driftCorrected";
pub const DEGRADATION_AUDIO_FALLBACK_ACTIVATED: &str = "degradation:audioFallbackActivated";
pub const DEGRADATION_AUDIO_FALLBACK_DEACTIVATED: &str = "degradation:audioFallbackDeactivated";
pub const DEGRADATION_VISUAL_RHYTHM: &str = "degradation:visualRhythm";
pub const CORRUPTION_UPDATED: &str = "corruption:updated";
pub const CORRUPTION_PURIFIED: &str = "corruption:purified";

/// Every message that travels over the event bridge.
///
/// Serialized as `{"topic": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload")]
pub enum Event {
    #[serde(rename = "recognition:windowOpened")]
    WindowOpened { duration_ms: u64 },
    #[serde(rename = "recognition:attempt")]
    RecognitionAttempt {
        method: RecognitionMethod,
        progress: f64,
    },
    #[serde(rename = "recognition:timeExtended")]
    TimeExtended {
        extension_ms: u64,
        extensions_granted: u32,
        total_duration_ms: u64,
    },
    #[serde(rename = "recognition:succeeded")]
    RecognitionSucceeded {
        method: RecognitionMethod,
        elapsed_ms: u64,
    },
    #[serde(rename = "recognition:failed")]
    RecognitionFailed {},
    #[serde(rename = "audio:degradationChanged")]
    AudioDegradationChanged { level: f64, source: String },
    #[serde(rename = "audio:initializationFailed")]
    AudioInitializationFailed { error: String },
    #[serde(rename = "audio:contextSuspended")]
    AudioContextSuspended {},
    #[serde(rename = "audio:contextResumed")]
    AudioContextResumed {},
    #[serde(rename = "degradation:levelChanged")]
    DegradationLevelChanged { level: f64 },
    #[serde(rename = "degradation:driftCorrected")]
    DriftCorrected {
        drift: f64,
        level: f64,
        missed_syncs: u64,
    },
    #[serde(rename = "degradation:audioFallbackActivated")]
    AudioFallbackActivated { reason: String },
    #[serde(rename = "degradation:audioFallbackDeactivated")]
    AudioFallbackDeactivated {},
    #[serde(rename = "degradation:visualRhythm")]
    VisualRhythm { beat: u64, intensity: f64 },
    #[serde(rename = "corruption:updated")]
    CorruptionUpdated { level: f64, tracked: usize },
    #[serde(rename = "corruption:purified")]
    CorruptionPurified {
        fragments: Vec<FragmentId>,
        strength: f64,
    },
}

impl Event {
    pub fn topic(&self) -> &'static str {
        match self {
            Event::WindowOpened { .. } => RECOGNITION_WINDOW_OPENED,
            Event::RecognitionAttempt { .. } => RECOGNITION_ATTEMPT,
            Event::TimeExtended { .. } => RECOGNITION_TIME_EXTENDED,
            Event::RecognitionSucceeded { .. } => RECOGNITION_SUCCEEDED,
            Event::RecognitionFailed {} => RECOGNITION_FAILED,
            Event::AudioDegradationChanged { .. } => AUDIO_DEGRADATION_CHANGED,
            Event::AudioInitializationFailed { .. } => AUDIO_INITIALIZATION_FAILED,
            Event::AudioContextSuspended {} => AUDIO_CONTEXT_SUSPENDED,
            Event::AudioContextResumed {} => AUDIO_CONTEXT_RESUMED,
            Event::DegradationLevelChanged { .. } => DEGRADATION_LEVEL_CHANGED,
            Event::DriftCorrected { .. } => DEGRADATION_DRIFT_CORRECTED,
            Event::AudioFallbackActivated { .. } => DEGRADATION_AUDIO_FALLBACK_ACTIVATED,
            Event::AudioFallbackDeactivated {} => DEGRADATION_AUDIO_FALLBACK_DEACTIVATED,
            Event::VisualRhythm { .. } => DEGRADATION_VISUAL_RHYTHM,
            Event::CorruptionUpdated { .. } => CORRUPTION_UPDATED,
            Event::CorruptionPurified { .. } => CORRUPTION_PURIFIED,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Returns true when `topic` is selected by a subscription pattern.
///
/// Patterns are exact topics, `*` for everything, or a prefix ending in `*`
/// such as `recognition:*`.
pub fn topic_matches(topic: &str, pattern: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        topic.starts_with(prefix)
    } else {
        topic == pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_topic_tag() {
        let event = Event::RecognitionSucceeded {
            method: RecognitionMethod::Click,
            elapsed_ms: 1200,
        };
        let json: serde_json::Value =
            serde_json::from_str(&event.to_json().expect("serialize")).expect("reparse");
        assert_eq!(json["topic"], "recognition:succeeded");
        assert_eq!(json["payload"]["method"], "click");
        assert_eq!(json["payload"]["elapsed_ms"], 1200);
    }

    #[test]
    fn empty_payload_events_roundtrip() {
        let json = Event::RecognitionFailed {}.to_json().expect("serialize");
        let parsed: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, Event::RecognitionFailed {});
        assert_eq!(parsed.topic(), RECOGNITION_FAILED);
    }

    #[test]
    fn wildcard_patterns_match_prefixes() {
        assert!(topic_matches(RECOGNITION_ATTEMPT, "recognition:*"));
        assert!(topic_matches(AUDIO_CONTEXT_RESUMED, "*"));
        assert!(topic_matches(RECOGNITION_FAILED, RECOGNITION_FAILED));
        assert!(!topic_matches(AUDIO_CONTEXT_RESUMED, "recognition:*"));
        assert!(!topic_matches("recognition:attempt", "recognition:attempts"));
    }
}
