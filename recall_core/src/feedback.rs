//! Paired audio/visual responses to recognition outcomes.

use recall_schema::{Event, FeedbackAction, FeedbackCue, FeedbackPair};

use crate::audio::AudioCommand;
use crate::config::{CueConfig, FeedbackConfig};
use crate::levels;

fn cue(action: FeedbackAction, config: &CueConfig, scale: f64) -> FeedbackCue {
    FeedbackCue {
        action,
        intensity: config.intensity() * scale,
        duration_ms: config.duration_ms(),
    }
}

/// Feedback for a recognition event; `None` for every other topic.
pub fn feedback_for(event: &Event, config: &FeedbackConfig) -> Option<FeedbackPair> {
    match event {
        Event::RecognitionAttempt { progress, .. } => {
            let scale = levels::unit(*progress);
            Some(FeedbackPair {
                audio: cue(FeedbackAction::Burst, config.attempt(), scale),
                visual: cue(FeedbackAction::Pulse, config.attempt(), scale),
            })
        }
        Event::RecognitionSucceeded { .. } => Some(FeedbackPair {
            audio: cue(FeedbackAction::Resonance, config.success(), 1.0),
            visual: cue(FeedbackAction::Clarity, config.success(), 1.0),
        }),
        Event::RecognitionFailed {} => Some(FeedbackPair {
            audio: cue(FeedbackAction::AccelerateDegradation, config.failure(), 1.0),
            visual: cue(FeedbackAction::Fracture, config.failure(), 1.0),
        }),
        _ => None,
    }
}

/// Translate the audio half of a pair into a channel command.
pub fn audio_command(cue: &FeedbackCue, config: &FeedbackConfig) -> Option<AudioCommand> {
    match cue.action {
        FeedbackAction::Burst => Some(AudioCommand::Burst {
            intensity: cue.intensity,
            duration_secs: cue.duration_ms as f64 / 1000.0,
        }),
        FeedbackAction::Resonance => Some(AudioCommand::AchieveResonance),
        FeedbackAction::AccelerateDegradation => Some(AudioCommand::AccelerateDegradation(
            config.failure_acceleration() * cue.intensity,
        )),
        FeedbackAction::Pulse | FeedbackAction::Clarity | FeedbackAction::Fracture => None,
    }
}

pub fn amplify(cue: FeedbackCue, guidance: f64) -> FeedbackCue {
    FeedbackCue {
        intensity: cue.intensity * guidance,
        ..cue
    }
}
