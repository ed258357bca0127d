mod common;

use recall_core::{AudioCommand, Event, FragmentId, KarmaChannel, KarmaLedger};

#[test]
fn health_check_pulls_visual_back_within_threshold() {
    let rig = common::session(true);
    let experience = &rig.experience;
    let corrections = common::record_events(experience.bridge(), "degradation:driftCorrected");
    let audio = rig.audio.clone().expect("audio attached");

    audio.borrow_mut().drift_to(0.6);
    experience.advance_to(1_100);

    let state = experience.sync().state();
    assert_eq!(state.audio_level, 0.6);
    assert!((state.audio_level - state.visual_level).abs() <= state.sync_threshold + 1e-9);
    assert_eq!(experience.sync().metrics().missed_syncs, 1);
    assert_eq!(corrections.borrow().len(), 1);
    assert!(!experience.sync().is_fallback_active());
}

#[test]
fn reported_audio_level_stays_within_threshold_through_health_checks() {
    let rig = common::session(true);
    let experience = &rig.experience;
    experience.track_fragment("f", "hello");

    experience.sync().audio_degradation_changed(0.6, "test");
    let threshold = experience.sync().state().sync_threshold;
    for _ in 0..30 {
        experience.advance_by(100);
        let state = experience.sync().state();
        assert!(
            (state.audio_level - state.visual_level).abs() <= threshold + 1e-9,
            "drift {} at {} ms",
            (state.audio_level - state.visual_level).abs(),
            experience.now_ms()
        );
    }
    assert!(experience.sync().metrics().stale_checks > 0);
    assert!(!experience.sync().is_fallback_active());
}

#[test]
fn audio_reports_during_fallback_do_not_drive_visual() {
    let rig = common::session(true);
    let experience = &rig.experience;
    experience.track_fragment("f", "hello");
    rig.ledger.add_karma(KarmaChannel::Void, 100.0);
    experience.advance_by(2_000);

    experience.sync().context_suspended();
    experience.sync().audio_degradation_changed(0.9, "test");

    let state = experience.sync().state();
    assert_eq!(state.audio_level, 0.9);
    assert!(state.engine_level > 0.1);
    assert_eq!(state.visual_level, state.engine_level);
}

#[test]
fn audio_reports_lock_visual_and_nudge_fragments() {
    let rig = common::session(true);
    let experience = &rig.experience;
    let fragment = FragmentId::from("f");
    experience.track_fragment(fragment.clone(), "hello");

    experience.sync().audio_degradation_changed(0.8, "synth");

    assert_eq!(experience.sync().state().visual_level, 0.8);
    let level = experience.corruption().level(&fragment).unwrap_or_default();
    assert!((level - 0.08).abs() < 1e-12);
}

#[test]
fn session_without_audio_starts_in_fallback() {
    let rig = common::session(false);
    let experience = &rig.experience;
    let fallback = experience.sync().fallback();
    assert!(fallback.is_active);
    assert_eq!(fallback.reason.as_deref(), Some("no audio channel attached"));
    assert!(fallback.visual_guidance_level >= 1.0);
    assert!(rig.presentation.borrow().fallback_indicator());

    experience.track_fragment("f", "hello");
    rig.ledger.add_karma(KarmaChannel::Void, 100.0);
    experience.advance_by(3_000);
    let state = experience.sync().state();
    assert!((state.visual_level - experience.corruption().aggregate_level()).abs() < 1e-12);
    assert!(experience.sync().rhythm_running());

    experience.sync().context_resumed();
    assert!(experience.sync().is_fallback_active());
}

#[test]
fn suspend_and_resume_are_idempotent() {
    let rig = common::session(true);
    let experience = &rig.experience;
    let events = common::record_events(experience.bridge(), "degradation:audioFallback*");
    let rhythm = common::record_events(experience.bridge(), "degradation:visualRhythm");

    experience.sync().context_suspended();
    experience.sync().context_suspended();
    assert!(experience.sync().rhythm_running());
    assert_eq!(
        experience.sync().fallback().reason.as_deref(),
        Some("audio context suspended")
    );
    experience.advance_by(1_600);
    assert_eq!(rhythm.borrow().len(), 2);

    experience.sync().context_resumed();
    experience.sync().context_resumed();
    assert!(!experience.sync().is_fallback_active());
    assert!(!experience.sync().rhythm_running());
    experience.advance_by(1_600);
    assert_eq!(rhythm.borrow().len(), 2);

    assert_eq!(
        common::topics(&events),
        vec![
            "degradation:audioFallbackActivated",
            "degradation:audioFallbackDeactivated",
        ]
    );
    let visual = experience.sync().state().visual_level;
    let audio = rig.audio.clone().expect("audio attached");
    assert!(audio
        .borrow()
        .commands()
        .contains(&AudioCommand::SetDegradationLevel(visual)));
}

#[test]
fn initialization_failure_names_the_reason() {
    let rig = common::session(true);
    let experience = &rig.experience;
    let events = common::record_events(experience.bridge(), "degradation:audioFallbackActivated");

    experience.sync().initialization_failed("device lost");

    assert_eq!(
        events.borrow().first(),
        Some(&Event::AudioFallbackActivated {
            reason: "audio initialization failed: device lost".to_string(),
        })
    );
    let metrics = experience.sync().metrics();
    assert_eq!(metrics.fallback_activations, 1);
}

#[test]
fn ready_audio_survives_init_timeout() {
    let rig = common::session(true);
    rig.experience.advance_by(6_000);
    assert!(!rig.experience.sync().is_fallback_active());
    assert_eq!(rig.experience.sync().metrics().fallback_activations, 0);
}
