#![allow(dead_code)]

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Once};

use recall_core::{
    build_headless_experience, load_recall_config_from_env, Event, EventBridge, HeadlessRig,
    RecallConfig, RECALL_CONFIG_PATH_ENV,
};

static INIT: Once = Once::new();

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_recall_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test recall config at {}",
            config_path.display()
        );

        std::env::set_var(RECALL_CONFIG_PATH_ENV, &config_path);
    });
}

pub fn test_config() -> Arc<RecallConfig> {
    ensure_test_config();
    let (config, metadata) = load_recall_config_from_env();
    assert!(metadata.path().is_some(), "fixture config should load from file");
    config
}

pub fn session(with_audio: bool) -> HeadlessRig {
    build_headless_experience(test_config(), with_audio)
}

/// Record every event whose topic matches `pattern`.
pub fn record_events(bridge: &EventBridge, pattern: &str) -> Rc<RefCell<Vec<Event>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    bridge.subscribe(pattern, move |event| sink.borrow_mut().push(event.clone()));
    events
}

pub fn topics(events: &Rc<RefCell<Vec<Event>>>) -> Vec<&'static str> {
    events.borrow().iter().map(|event| event.topic()).collect()
}
