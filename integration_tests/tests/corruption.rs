mod common;

use recall_core::{
    CorruptionTier, Event, FragmentId, KarmaChannel, KarmaLedger, LogCapture, RecognitionMethod,
};
use tracing_subscriber::prelude::*;

#[test]
fn zero_karma_grows_at_base_rate() {
    let rig = common::session(true);
    let fragment = FragmentId::from("f");
    rig.experience.track_fragment(fragment.clone(), "hello");
    rig.experience.advance_by(1_000);
    let level = rig.experience.corruption().level(&fragment).unwrap_or_default();
    assert!((level - 0.001).abs() < 1e-12);
    assert_eq!(rig.experience.corruption().content(&fragment).as_deref(), Some("hello"));
}

#[test]
fn void_karma_materially_accelerates_corruption() {
    let calm = common::session(true);
    let haunted = common::session(true);
    let fragment = FragmentId::from("f");
    calm.experience.track_fragment(fragment.clone(), "hello");
    haunted.experience.track_fragment(fragment.clone(), "hello");
    haunted.ledger.add_karma(KarmaChannel::Void, 100.0);

    calm.experience.advance_by(10_000);
    haunted.experience.advance_by(10_000);

    let calm_level = calm.experience.corruption().level(&fragment).unwrap_or_default();
    let haunted_level = haunted.experience.corruption().level(&fragment).unwrap_or_default();
    assert!(haunted_level > calm_level * 10.0);
    assert!(haunted_level > 0.5);

    let content = haunted.experience.corruption().content(&fragment);
    assert!(content.is_some());
    assert_ne!(content.as_deref(), Some("hello"));
    let view = haunted
        .presentation
        .borrow()
        .fragment(&fragment)
        .cloned()
        .expect("fragment presented");
    assert_eq!(view.tier, CorruptionTier::Severe);
    assert_eq!(Some(view.content), content);
}

#[test]
fn recognition_success_purifies_tracked_fragments() {
    let rig = common::session(true);
    let experience = &rig.experience;
    let purified = common::record_events(experience.bridge(), "corruption:purified");
    experience.track_fragment("a", "first memory");
    experience.track_fragment("b", "second memory");
    rig.ledger.add_karma(KarmaChannel::Void, 100.0);
    experience.recognition().open_default();
    experience.advance_by(8_000);
    let before = experience.corruption().aggregate_level();

    experience.recognition().complete(RecognitionMethod::Click);

    let after = experience.corruption().aggregate_level();
    assert!((before - after - 0.3).abs() < 1e-9);
    assert_eq!(
        purified.borrow().first(),
        Some(&Event::CorruptionPurified {
            fragments: vec![FragmentId::from("a"), FragmentId::from("b")],
            strength: 0.3,
        })
    );
}

#[test]
fn untracking_clears_presentation_and_unknown_ids_warn() {
    let rig = common::session(true);
    let experience = &rig.experience;
    experience.track_fragment("f", "hello");
    assert!(rig.presentation.borrow().fragment(&FragmentId::from("f")).is_some());

    let capture = LogCapture::new();
    let subscriber = tracing_subscriber::registry().with(capture.layer());
    tracing::subscriber::with_default(subscriber, || {
        assert!(experience.corruption().untrack_fragment(&FragmentId::from("f")));
        assert!(!experience.corruption().untrack_fragment(&FragmentId::from("ghost")));
    });

    assert!(rig.presentation.borrow().fragment(&FragmentId::from("f")).is_none());
    assert_eq!(experience.corruption().metrics().unknown_fragment_refs, 1);
    let warnings: Vec<_> = capture
        .drain()
        .into_iter()
        .filter(|log| log.level == "WARN" && log.message == "fragment.unknown")
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].target, "recall::corruption");
    assert_eq!(warnings[0].field("fragment"), Some(&serde_json::json!("ghost")));
}
