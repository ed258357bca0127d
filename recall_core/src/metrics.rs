use recall_schema::KarmaState;
use serde::Serialize;

use crate::corruption::CorruptionMetrics;
use crate::recognition::{RecognitionMetrics, RecognitionState};
use crate::sync::SyncMetrics;

/// Read-only snapshot of a session's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionMetrics {
    pub now_ms: u64,
    pub timers_pending: usize,
    pub timers_fired: u64,
    pub events_published: u64,
    pub events_delivered: u64,
    pub karma: KarmaState,
    pub aggregate_corruption: f64,
    pub tracked_fragments: usize,
    pub recognition_state: RecognitionState,
    pub fallback_active: bool,
    pub audio_level: f64,
    pub visual_level: f64,
    pub corruption: CorruptionMetrics,
    pub recognition: RecognitionMetrics,
    pub sync: SyncMetrics,
}

impl SessionMetrics {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Absolute drift between the reconciled audio and visual levels.
    pub fn drift(&self) -> f64 {
        (self.audio_level - self.visual_level).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_nested_counters() {
        let metrics = SessionMetrics {
            now_ms: 1200,
            audio_level: 0.6,
            visual_level: 0.55,
            ..SessionMetrics::default()
        };
        let json = metrics.to_json().expect("serialize metrics");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["now_ms"], 1200);
        assert_eq!(value["recognition_state"], "Idle");
        assert!(value["sync"]["missed_syncs"].is_u64());
        assert!((metrics.drift() - 0.05).abs() < 1e-9);
    }
}
