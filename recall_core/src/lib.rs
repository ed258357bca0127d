//! Recognition-window and karma-driven corruption engine.
//!
//! A single-threaded session core: a virtual-clock [`Scheduler`], an
//! in-process [`EventBridge`], and three components wired together by
//! [`Experience`]:
//!
//! - [`RecognitionWindow`] runs the timed challenge with bounded extensions.
//! - [`CorruptionEngine`] grows per-fragment corruption from time and karma.
//! - [`SyncController`] keeps audio and visual degradation within a bounded
//!   drift and falls back to visual guidance when audio is unavailable.
//!
//! Rendering, audio synthesis and karma storage stay outside the crate
//! behind [`PresentationSink`], [`AudioChannel`] and [`KarmaLedger`].

pub mod audio;
pub mod config;
pub mod corruption;
pub mod event_bridge;
pub mod experience;
pub mod feedback;
pub mod glitch;
mod hashing;
pub mod karma;
pub mod levels;
pub mod log_capture;
pub mod mapping;
pub mod metrics;
pub mod outbox;
pub mod presentation;
pub mod recognition;
pub mod scheduler;
pub mod sync;

pub use audio::{AudioChannel, AudioCommand, AudioFault, RecordingAudio, SharedAudio};
pub use config::{
    load_recall_config_from_env, RecallConfig, RecallConfigError, RecallConfigHandle,
    RecallConfigMetadata, BUILTIN_RECALL_CONFIG, RECALL_CONFIG_PATH_ENV,
};
pub use corruption::{
    CorruptionEngine, CorruptionMetrics, CorruptionState, FragmentCorruptionRecord,
};
pub use event_bridge::{EventBridge, SubscriptionId};
pub use experience::{build_headless_experience, Experience, HeadlessRig};
pub use glitch::derive_content;
pub use karma::{
    apply_delta, InMemoryKarmaLedger, KarmaLedger, KarmaSubscription, SharedKarmaLedger,
};
pub use log_capture::{LogCapture, LogCaptureLayer, LogEnvelope};
pub use metrics::SessionMetrics;
pub use outbox::{share, Effect, Outbox, Outlets};
pub use presentation::{
    FragmentView, HeadlessPresentation, PresentationSink, PresentationWrite, SharedPresentation,
};
pub use recognition::{
    AttemptOutcome, RecognitionMetrics, RecognitionSession, RecognitionSettings,
    RecognitionState, RecognitionWindow,
};
pub use scheduler::{Scheduler, Teardown, TimerHandle};
pub use sync::{AudioFallbackState, SyncController, SyncMetrics, SyncState};

pub use recall_schema::{
    AudioParameters, CorruptionTier, Event, FeedbackAction, FeedbackCue, FeedbackPair,
    FragmentId, IntensitySignal, KarmaChannel, KarmaDelta, KarmaState, RecognitionMethod,
    VisualParameters,
};
