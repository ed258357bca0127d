//! Audio collaborator seam.
//!
//! Synthesis happens elsewhere; the engine only issues commands and reads
//! back the current degradation level.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::levels;

pub trait AudioChannel {
    /// True once the audio context can accept commands.
    fn is_ready(&self) -> bool;

    fn set_degradation_level(&mut self, level: f64);

    fn burst(&mut self, intensity: f64, duration_secs: f64);

    fn achieve_resonance(&mut self);

    fn accelerate_degradation(&mut self, amount: f64);

    fn degradation_level(&self) -> f64;
}

pub type SharedAudio = Rc<RefCell<dyn AudioChannel>>;

/// Why the audio channel is considered unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioFault {
    #[error("audio initialization failed: {0}")]
    InitializationFailed(String),
    #[error("audio context suspended")]
    ContextSuspended,
    #[error("audio not ready after {timeout_ms} ms")]
    InitializationTimeout { timeout_ms: u64 },
    #[error("no audio channel attached")]
    Unavailable,
}

/// Commands the engine can send to the audio collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AudioCommand {
    SetDegradationLevel(f64),
    Burst { intensity: f64, duration_secs: f64 },
    AchieveResonance,
    AccelerateDegradation(f64),
}

impl AudioCommand {
    pub fn apply(&self, audio: &mut dyn AudioChannel) {
        match *self {
            AudioCommand::SetDegradationLevel(level) => audio.set_degradation_level(level),
            AudioCommand::Burst {
                intensity,
                duration_secs,
            } => audio.burst(intensity, duration_secs),
            AudioCommand::AchieveResonance => audio.achieve_resonance(),
            AudioCommand::AccelerateDegradation(amount) => audio.accelerate_degradation(amount),
        }
    }
}

/// Headless audio channel that records every command it receives.
///
/// Level changes are applied locally and never echoed back, which is what a
/// host without a synthesizer looks like.
#[derive(Debug, Default)]
pub struct RecordingAudio {
    ready: bool,
    level: f64,
    commands: Vec<AudioCommand>,
}

impl RecordingAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready() -> Self {
        Self {
            ready: true,
            ..Self::default()
        }
    }

    pub fn shared(self) -> Rc<RefCell<RecordingAudio>> {
        Rc::new(RefCell::new(self))
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Move the level without going through a command, as a synthesizer
    /// drifting on its own would.
    pub fn drift_to(&mut self, level: f64) {
        self.level = levels::unit(level);
    }

    pub fn commands(&self) -> &[AudioCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<AudioCommand> {
        std::mem::take(&mut self.commands)
    }
}

impl AudioChannel for RecordingAudio {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn set_degradation_level(&mut self, level: f64) {
        self.level = levels::unit(level);
        self.commands.push(AudioCommand::SetDegradationLevel(self.level));
    }

    fn burst(&mut self, intensity: f64, duration_secs: f64) {
        debug!(target: "recall::audio", intensity, duration_secs, "audio.burst");
        self.commands.push(AudioCommand::Burst {
            intensity,
            duration_secs,
        });
    }

    fn achieve_resonance(&mut self) {
        self.commands.push(AudioCommand::AchieveResonance);
    }

    fn accelerate_degradation(&mut self, amount: f64) {
        self.level = levels::unit(self.level + amount);
        self.commands.push(AudioCommand::AccelerateDegradation(amount));
    }

    fn degradation_level(&self) -> f64 {
        self.level
    }
}
