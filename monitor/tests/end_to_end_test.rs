//! End-to-end tests for the log pipeline: file to audio calls.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vrcnotif_monitor::audio::{AudioCall, Clip, RecordingAudio};
use vrcnotif_monitor::monitor::run_log_pipeline;
use vrcnotif_monitor::tailer::TailerConfig;
use vrcnotif_monitor::types::SessionState;

// =============================================================================
// Test Helpers
// =============================================================================

const PREFIX: &str = "2024.06.01 20:15:03 Log        -  [Behaviour] ";

fn append_lines(path: &Path, lines: &[&str]) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .expect("Failed to open log file");
    for line in lines {
        writeln!(file, "{PREFIX}{line}").expect("Failed to append");
    }
}

async fn wait_for_calls(audio: &RecordingAudio, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while audio.calls().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("Timed out, calls so far: {:?}", audio.calls()));
}

fn fast_config() -> TailerConfig {
    TailerConfig {
        scan_interval: Duration::from_millis(10),
        max_empty_scans: 100,
    }
}

// =============================================================================
// Scenario Tests
// =============================================================================

/// Feeds a full session through the pipeline and checks every audio call.
#[tokio::test]
async fn test_session_scenario() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("output_log_2024-06-01_20-00-00.txt");
    fs::write(&log, format!("{PREFIX}OnPlayerJoined Ghost\n")).unwrap();

    let audio = RecordingAudio::new();
    let cancel = CancellationToken::new();
    let pipeline = tokio::spawn(run_log_pipeline(
        dir.path().to_path_buf(),
        fast_config(),
        Arc::new(audio.clone()),
        cancel.clone(),
    ));

    // Opening the first file starts out of room.
    wait_for_calls(&audio, 2).await;

    append_lines(
        &log,
        &[
            "Authenticated via Steam",
            "OnPlayerJoined Alice",
            "Unrelated noise",
            "Lifting black fade now",
            "OnPlayerLeftRoom",
            "OnPlayerLeft Bob",
            "OnLeftRoom",
        ],
    );
    wait_for_calls(&audio, 9).await;

    cancel.cancel();
    let state = pipeline.await.unwrap().unwrap();

    assert_eq!(
        audio.calls(),
        vec![
            AudioCall::SetHostVolume(0.0),
            AudioCall::LoadLoop(Clip::Ambience),
            AudioCall::PlayOnce(Clip::LoggedIn),
            AudioCall::PlayOnce(Clip::Join),
            AudioCall::SetHostVolume(1.0),
            AudioCall::StopLoop,
            AudioCall::PlayOnce(Clip::Leave),
            AudioCall::SetHostVolume(0.0),
            AudioCall::LoadLoop(Clip::Ambience),
        ]
    );
    assert_eq!(
        state,
        SessionState {
            in_room: false,
            volume_muted: true,
        }
    );
}

/// Entering a world leaves the host unmuted with no ambience.
#[tokio::test]
async fn test_left_room_then_scene_ready_ends_in_room() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("output_log_1.txt");
    fs::write(&log, "").unwrap();

    let audio = RecordingAudio::new();
    let cancel = CancellationToken::new();
    let pipeline = tokio::spawn(run_log_pipeline(
        dir.path().to_path_buf(),
        fast_config(),
        Arc::new(audio.clone()),
        cancel.clone(),
    ));

    wait_for_calls(&audio, 2).await;
    append_lines(&log, &["OnLeftRoom", "Lifting black fade"]);
    wait_for_calls(&audio, 6).await;

    cancel.cancel();
    let state = pipeline.await.unwrap().unwrap();

    assert_eq!(
        &audio.calls()[2..],
        &[
            AudioCall::SetHostVolume(0.0),
            AudioCall::LoadLoop(Clip::Ambience),
            AudioCall::SetHostVolume(1.0),
            AudioCall::StopLoop,
        ]
    );
    assert_eq!(
        state,
        SessionState {
            in_room: true,
            volume_muted: false,
        }
    );
}
