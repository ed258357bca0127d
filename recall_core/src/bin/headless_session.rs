use std::io::{self, BufRead};
use std::thread;

use crossbeam_channel::{unbounded, Receiver};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use recall_core::{
    build_headless_experience, load_recall_config_from_env, AudioParameters, FragmentId,
    HeadlessRig, KarmaChannel, KarmaLedger, LogCapture, LogEnvelope, RecognitionMethod,
};

enum Command {
    Advance(u64),
    Open,
    Reset,
    Attempt { method: RecognitionMethod, progress: f64 },
    Complete(RecognitionMethod),
    Track { id: String, content: String },
    Untrack(String),
    Karma { channel: KarmaChannel, amount: f64 },
    AudioLevel(f64),
    AudioParams(AudioParameters),
    Suspend,
    Resume,
    Fail(String),
    Show(String),
    Metrics,
    Quit,
}

fn main() {
    if std::env::args().any(|arg| arg == "--json-logs") {
        let capture = LogCapture::new();
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(capture.layer())
            .init();
        spawn_log_printer(capture.receiver());
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    let (config, metadata) = load_recall_config_from_env();
    let with_audio = !std::env::args().any(|arg| arg == "--no-audio");
    let rig = build_headless_experience(config, with_audio);

    info!(
        target: "recall::session",
        config = metadata
            .path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "builtin".to_string()),
        with_audio,
        "Recall headless session ready"
    );

    let commands = spawn_stdin_listener();
    while let Ok(command) = commands.recv() {
        if !handle_command(&rig, command) {
            break;
        }
    }

    print_metrics(&rig);
}

/// Print captured log envelopes to stderr, one JSON object per line.
fn spawn_log_printer(receiver: Receiver<LogEnvelope>) {
    thread::spawn(move || {
        for envelope in receiver.iter() {
            if let Ok(json) = serde_json::to_string(&envelope) {
                eprintln!("{json}");
            }
        }
    });
}

fn spawn_stdin_listener() -> Receiver<Command> {
    let (sender, receiver) = unbounded::<Command>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("Command read error: {}", err);
                    break;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match parse_command(trimmed) {
                Some(cmd) => {
                    if sender.send(cmd).is_err() {
                        break;
                    }
                }
                None => warn!("Invalid command: {}", trimmed),
            }
        }
    });
    receiver
}

fn parse_method(input: Option<&str>) -> Option<RecognitionMethod> {
    match input.unwrap_or("click") {
        "click" => Some(RecognitionMethod::Click),
        "keypress" => Some(RecognitionMethod::Keypress),
        "touch" => Some(RecognitionMethod::Touch),
        "engagement" => Some(RecognitionMethod::Engagement),
        "confirm" => Some(RecognitionMethod::Confirm),
        _ => None,
    }
}

fn parse_channel(input: &str) -> Option<KarmaChannel> {
    KarmaChannel::ALL
        .into_iter()
        .find(|channel| channel.as_str() == input)
}

fn parse_command(input: &str) -> Option<Command> {
    let mut parts = input.split_whitespace();
    match parts.next()? {
        "advance" => {
            let amount = parts.next().unwrap_or("1000").parse().ok()?;
            Some(Command::Advance(amount))
        }
        "open" => Some(Command::Open),
        "reset" => Some(Command::Reset),
        "attempt" => {
            let method = parse_method(parts.next())?;
            let progress = parts.next().unwrap_or("0").parse().ok()?;
            Some(Command::Attempt { method, progress })
        }
        "complete" => Some(Command::Complete(parse_method(parts.next())?)),
        "track" => {
            let id = parts.next()?.to_string();
            let content = parts.collect::<Vec<_>>().join(" ");
            Some(Command::Track { id, content })
        }
        "untrack" => Some(Command::Untrack(parts.next()?.to_string())),
        "karma" => {
            let channel = parse_channel(parts.next()?)?;
            let amount = parts.next()?.parse().ok()?;
            Some(Command::Karma { channel, amount })
        }
        "audio" => Some(Command::AudioLevel(parts.next()?.parse().ok()?)),
        "params" => {
            let json = parts.collect::<Vec<_>>().join(" ");
            serde_json::from_str(&json).ok().map(Command::AudioParams)
        }
        "suspend" => Some(Command::Suspend),
        "resume" => Some(Command::Resume),
        "fail" => Some(Command::Fail(parts.collect::<Vec<_>>().join(" "))),
        "show" => Some(Command::Show(parts.next()?.to_string())),
        "metrics" => Some(Command::Metrics),
        "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

fn handle_command(rig: &HeadlessRig, command: Command) -> bool {
    let experience = &rig.experience;
    match command {
        Command::Advance(delta) => experience.advance_by(delta),
        Command::Open => {
            if !experience.recognition().open_default() {
                warn!(
                    target: "recall::session",
                    state = ?experience.recognition().state(),
                    "window.already_finished"
                );
            }
        }
        Command::Reset => experience.recognition().reset(),
        Command::Attempt { method, progress } => {
            let outcome = experience.recognition().record_attempt(method, progress);
            info!(target: "recall::session", ?outcome, "attempt.recorded");
        }
        Command::Complete(method) => {
            experience.recognition().complete(method);
        }
        Command::Track { id, content } => {
            experience.track_fragment(id, &content);
        }
        Command::Untrack(id) => {
            experience.corruption().untrack_fragment(&FragmentId::from(id));
        }
        Command::Karma { channel, amount } => rig.ledger.add_karma(channel, amount),
        Command::AudioLevel(level) => experience.sync().audio_degradation_changed(level, "cli"),
        Command::AudioParams(params) => experience.sync().apply_audio_parameters(&params),
        Command::Suspend => experience.sync().context_suspended(),
        Command::Resume => experience.sync().context_resumed(),
        Command::Fail(reason) => experience.sync().initialization_failed(&reason),
        Command::Show(id) => {
            let id = FragmentId::from(id);
            match experience.corruption().record(&id) {
                Some(record) => match serde_json::to_string(&record) {
                    Ok(json) => println!("{json}"),
                    Err(err) => warn!("Failed to serialize fragment: {}", err),
                },
                None => warn!(target: "recall::session", fragment = %id, "fragment.unknown"),
            }
        }
        Command::Metrics => print_metrics(rig),
        Command::Quit => return false,
    }
    true
}

fn print_metrics(rig: &HeadlessRig) {
    match rig.experience.metrics().to_json() {
        Ok(json) => println!("{json}"),
        Err(err) => warn!("Failed to serialize metrics: {}", err),
    }
}
