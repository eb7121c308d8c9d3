use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use clamp_bench::cell::FitzHughNagumoCell;
use clamp_bench::config::{BenchConfig, Pacing};
use clamp_bench::session::Session;
use clamp_core::controller::ExecutionMode;

fn scratch(name: &str) -> PathBuf {
    env::temp_dir().join(format!("clamp-bench-{}-{name}", process::id()))
}

fn session(transcript: Option<PathBuf>) -> Session<FitzHughNagumoCell> {
    let config = BenchConfig {
        pacing: Pacing::Fast,
        slot_capacity: 256,
        transcript,
        ..BenchConfig::default()
    };
    Session::start(&config, FitzHughNagumoCell::default()).expect("session starts")
}

fn first(lines: &[String]) -> &str {
    lines.first().map_or("", String::as_str)
}

#[test]
fn protocol_survives_a_save_and_load() {
    let path = scratch("protocol.txt");
    let mut session = session(None);

    let added = session
        .handle_command("protocol add pace bcl=10 beats=2 dout=1")
        .expect("transcript ok");
    assert_eq!(first(&added), "OK step 1 stored");
    session
        .handle_command("protocol add wait wait=20")
        .expect("transcript ok");

    let saved = session
        .handle_command(&format!("protocol save {}", path.display()))
        .expect("transcript ok");
    assert!(first(&saved).starts_with("OK protocol saved"), "{saved:?}");

    session.handle_command("protocol clear").expect("transcript ok");
    assert!(session.executor().protocol().is_empty());

    let loaded = session
        .handle_command(&format!("protocol load {}", path.display()))
        .expect("transcript ok");
    assert_eq!(first(&loaded), "OK protocol loaded (2 steps)");

    let listing = session.handle_command("protocol list").expect("transcript ok");
    assert_eq!(first(&listing), " 1. Pace : 2 beats - 10ms BCL | DO(1)");
    assert_eq!(listing[1], " 2. Wait : 20ms");

    let _ = fs::remove_file(path);
}

#[test]
fn replies_report_rejections_and_syntax_errors() {
    let mut session = session(None);

    assert_eq!(
        first(&session.handle_command("pace start").expect("transcript ok")),
        "OK start-pace"
    );
    let busy = session
        .handle_command("threshold start")
        .expect("transcript ok");
    assert_eq!(first(&busy), "ERR rejected pace mode is active");

    let garbled = session.handle_command("pace sideways").expect("transcript ok");
    assert!(first(&garbled).starts_with("ERR syntax"), "{garbled:?}");

    let status = session.handle_command("status").expect("transcript ok");
    assert!(first(&status).starts_with("mode pace"), "{status:?}");
    assert!(status.iter().any(|line| line.trim() == "bcl=1000ms"));

    let empty = session.handle_command("protocol start").expect("transcript ok");
    assert!(first(&empty).starts_with("ERR rejected"), "{empty:?}");
}

#[test]
fn waveform_files_load_into_a_slot() {
    let path = scratch("waveform.txt");
    fs::write(&path, "# clamp trace\n-80, -20\n10 # peak\n").expect("scratch file");
    let mut session = session(None);

    let loaded = session
        .handle_command(&format!("buffer load 3 {}", path.display()))
        .expect("transcript ok");
    assert_eq!(first(&loaded), "OK buffer 3 loaded (3 samples)");

    let missing = session
        .handle_command("buffer load 3 /nonexistent/trace.txt")
        .expect("transcript ok");
    assert!(first(&missing).starts_with("ERR buffer"), "{missing:?}");

    let _ = fs::remove_file(path);
}

#[test]
fn events_and_transcript_follow_the_run() {
    let transcript = scratch("transcript.log");
    let mut session = session(Some(transcript.clone()));

    let mut lines = session.handle_command("pace start").expect("transcript ok");
    let deadline = Instant::now() + Duration::from_secs(5);
    while !lines.iter().any(|line| line.contains("mode-changed pace")) {
        assert!(Instant::now() < deadline, "no mode event in {lines:?}");
        std::thread::sleep(Duration::from_millis(5));
        lines.extend(session.handle_command("").expect("transcript ok"));
    }
    assert_eq!(session.rig().snapshot().mode, ExecutionMode::Pace);

    let text = fs::read_to_string(&transcript).expect("transcript written");
    assert!(text.contains("HOST> pace start"));
    assert!(text.contains("BENCH< OK start-pace"));
    assert!(text.contains("TICK < EVENT t="));

    drop(session);
    let _ = fs::remove_file(transcript);
}

#[test]
fn queued_stimulus_magnitude_reaches_the_next_start() {
    let mut session = session(None);

    session.handle_command("set stim-mag=7").expect("transcript ok");
    session.handle_command("set bcl=500").expect("transcript ok");
    let started = session.handle_command("pace start").expect("transcript ok");
    assert_eq!(first(&started), "OK start-pace");

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.rig().snapshot().mode != ExecutionMode::Pace {
        assert!(Instant::now() < deadline, "pace never started");
        std::thread::sleep(Duration::from_millis(5));
    }
    let snapshot = session.rig().snapshot();
    assert!((snapshot.stim_magnitude_na - 7.0).abs() < f64::EPSILON);

    let status = session.handle_command("status").expect("transcript ok");
    assert!(status.iter().any(|line| line.trim() == "stim-mag=7nA"), "{status:?}");
}
