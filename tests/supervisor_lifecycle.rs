//! Supervisor lifecycle tests
//!
//! Each test points the relay at a small shell script standing in for
//! FFmpeg, so start/stop/failure paths run against a real child process
//! with an in-memory SQLite log store behind the aggregator.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use yt_live_relay::{
    config::Config,
    database::Database,
    errors::StreamError,
    models::{BatchState, BatchView, LogRecord, StreamParams, StreamTarget},
    services::{END_MARKER, START_MARKER},
    Stores, SupervisorState,
};

const STREAM_KEY: &str = "abcd-efgh-ijkl-mnop";

/// Announces its output URL like FFmpeg does, then streams "forever"
const LONG_RUNNING: &str = r#"#!/bin/sh
for a in "$@"; do last="$a"; done
echo "Output #0, flv, to '$last':" >&2
exec sleep 30
"#;

const QUICK_SUCCESS: &str = r#"#!/bin/sh
echo "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'video.mp4':"
printf 'frame=   30 fps= 30\rframe=   60 fps= 30\n' >&2
exit 0
"#;

const FAILING: &str = r#"#!/bin/sh
echo "[tcp @ 0x5581] Connection to tcp://a.rtmp.youtube.com:1935 failed: Connection refused" >&2
exit 1
"#;

/// Metadata with a Latin-1 byte, followed by more output on both streams
const LATIN1_METADATA: &str = r#"#!/bin/sh
printf '    title           : caf\351\n' >&2
echo "after-metadata stderr" >&2
echo "after-metadata stdout"
exit 0
"#;

/// Exits after the `-t` value, as FFmpeg does with a duration limit
const HONOURS_LIMIT: &str = r#"#!/bin/sh
limit=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-t" ]; then limit="$a"; fi
  prev="$a"
done
echo "limit=$limit" >&2
sleep "${limit:-30}"
exit 0
"#;

struct Fixture {
    dir: TempDir,
    video: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("video.mp4");
        std::fs::write(&video, b"not really a video").unwrap();
        Self { dir, video }
    }

    fn script(&self, name: &str, body: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn params(&self) -> StreamParams {
        StreamParams::new(&self.video, StreamTarget::StreamKey(STREAM_KEY.to_string()))
    }
}

async fn state_with_ffmpeg(command: &str) -> SupervisorState {
    let mut config = Config::default();
    config.ffmpeg.command = command.to_string();
    config.ffmpeg.stop_timeout_seconds = 2;

    let database = Database::in_memory().await.unwrap();
    SupervisorState::with_stores(config, Stores::sqlite(&database))
}

async fn wait_finished(state: &SupervisorState, index: u32) -> BatchView {
    tokio::time::timeout(Duration::from_secs(15), state.supervisor.wait_for_batch(index))
        .await
        .expect("batch did not finish in time")
        .unwrap()
}

/// Poll until a tail line contains `needle`
async fn wait_for_line(state: &SupervisorState, index: u32, needle: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let view = state.supervisor.status(index).await.unwrap();
        if view.log_tail.iter().any(|l| l.contains(needle)) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no '{}' in tail: {:?}",
            needle,
            view.log_tail
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn persisted(state: &SupervisorState, index: u32) -> Vec<LogRecord> {
    state.logs.flush().await;
    state
        .log_sink
        .query(Some(state.session_id()), 1000)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.batch_index == Some(index))
        .collect()
}

fn count_end_markers(records: &[LogRecord]) -> usize {
    records
        .iter()
        .filter(|r| r.message.starts_with(END_MARKER))
        .count()
}

#[tokio::test]
async fn test_start_on_running_index_is_rejected() {
    let fixture = Fixture::new();
    let state = state_with_ffmpeg(&fixture.script("ffmpeg", LONG_RUNNING)).await;

    state.supervisor.start_batch(1, fixture.params()).await.unwrap();
    let before = state.supervisor.status(1).await.unwrap();

    let err = state
        .supervisor
        .start_batch(1, fixture.params())
        .await
        .unwrap_err();
    assert_eq!(err, StreamError::AlreadyRunning(1));

    let after = state.supervisor.status(1).await.unwrap();
    assert_eq!(after.state, BatchState::Running);
    assert_eq!(after.start_time, before.start_time);

    state.supervisor.stop_batch(1).await.unwrap();
    wait_finished(&state, 1).await;
    state.shutdown().await;
}

#[tokio::test]
async fn test_stop_ends_with_single_terminal_record() {
    let fixture = Fixture::new();
    let state = state_with_ffmpeg(&fixture.script("ffmpeg", LONG_RUNNING)).await;

    state.supervisor.start_batch(1, fixture.params()).await.unwrap();
    wait_for_line(&state, 1, "Output #0").await;

    state.supervisor.stop_batch(1).await.unwrap();
    let view = wait_finished(&state, 1).await;
    assert_eq!(view.state, BatchState::Stopped);
    assert!(view.ended_at.is_some());

    let records = persisted(&state, 1).await;
    assert_eq!(count_end_markers(&records), 1);
    for record in &records {
        assert!(!record.message.contains(STREAM_KEY), "leaked key: {}", record.message);
        assert_eq!(record.stream_key.as_deref(), Some("abcd****"));
    }
    assert!(records
        .iter()
        .any(|r| r.message.contains("rtmp://a.rtmp.youtube.com/live2/****")));

    state.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_batches_are_independent() {
    let fixture = Fixture::new();
    let state = state_with_ffmpeg(&fixture.script("ffmpeg", LONG_RUNNING)).await;

    state.supervisor.start_batch(1, fixture.params()).await.unwrap();
    let mut second = fixture.params();
    second.target = StreamTarget::ExplicitUrl("rtmp://backup.example/live/qrst-uvwx".to_string());
    state.supervisor.start_batch(2, second).await.unwrap();

    assert_eq!(
        state.supervisor.list_active().await.into_iter().collect::<Vec<_>>(),
        vec![1, 2]
    );

    state.supervisor.stop_batch(1).await.unwrap();
    assert_eq!(wait_finished(&state, 1).await.state, BatchState::Stopped);

    let other = state.supervisor.status(2).await.unwrap();
    assert_eq!(other.state, BatchState::Running);
    assert_eq!(other.target_display, "rtmp://backup.example/live/****");
    assert_eq!(
        state.supervisor.list_active().await.into_iter().collect::<Vec<_>>(),
        vec![2]
    );

    state.shutdown().await;
}

#[tokio::test]
async fn test_quick_exit_logs_start_and_end() {
    let fixture = Fixture::new();
    let state = state_with_ffmpeg(&fixture.script("ffmpeg", QUICK_SUCCESS)).await;

    state.supervisor.start_batch(5, fixture.params()).await.unwrap();
    let view = wait_finished(&state, 5).await;

    assert_eq!(view.state, BatchState::Stopped);
    assert!(view.failure.is_none());
    assert!(view.log_tail.first().unwrap().contains(START_MARKER));
    assert!(view.log_tail.last().unwrap().contains(END_MARKER));
    // Carriage-return progress updates become separate lines
    assert!(view.log_tail.iter().any(|l| l.ends_with("frame=   30 fps= 30")));
    assert!(view.log_tail.iter().any(|l| l.ends_with("frame=   60 fps= 30")));

    let records = persisted(&state, 5).await;
    assert_eq!(count_end_markers(&records), 1);
    assert!(records.last().unwrap().message.starts_with(START_MARKER));

    state.shutdown().await;
}

#[tokio::test]
async fn test_non_utf8_output_keeps_streaming_logs() {
    let fixture = Fixture::new();
    let state = state_with_ffmpeg(&fixture.script("ffmpeg", LATIN1_METADATA)).await;

    state.supervisor.start_batch(1, fixture.params()).await.unwrap();
    let view = wait_finished(&state, 1).await;

    assert_eq!(view.state, BatchState::Stopped, "{:?}", view.failure);
    assert!(view.log_tail.iter().any(|l| l.ends_with("title           : caf\u{FFFD}")));
    assert!(view.log_tail.iter().any(|l| l.ends_with("after-metadata stderr")));
    assert!(view.log_tail.iter().any(|l| l.ends_with("after-metadata stdout")));

    let records = persisted(&state, 1).await;
    assert_eq!(count_end_markers(&records), 1);
    assert!(records.iter().any(|r| r.message == "after-metadata stderr"));

    state.shutdown().await;
}

#[tokio::test]
async fn test_duration_limited_batch_stops_on_its_own() {
    let fixture = Fixture::new();
    let state = state_with_ffmpeg(&fixture.script("ffmpeg", HONOURS_LIMIT)).await;

    let mut params = fixture.params();
    params.duration_limit_secs = Some(2);
    state.supervisor.start_batch(1, params).await.unwrap();

    let view = wait_finished(&state, 1).await;
    assert_eq!(view.state, BatchState::Stopped);
    assert_eq!(view.duration_limit_secs, Some(2));
    assert!(view.log_tail.iter().any(|l| l.contains("limit=2")));
    assert!(view.log_tail.iter().any(|l| l.contains(START_MARKER)));
    assert!(view.log_tail.iter().any(|l| l.contains(END_MARKER)));

    state.shutdown().await;
}

#[tokio::test]
async fn test_non_zero_exit_marks_failed() {
    let fixture = Fixture::new();
    let state = state_with_ffmpeg(&fixture.script("ffmpeg", FAILING)).await;

    state.supervisor.start_batch(1, fixture.params()).await.unwrap();
    let view = wait_finished(&state, 1).await;

    assert_eq!(view.state, BatchState::Failed);
    let failure = view.failure.unwrap();
    assert!(failure.contains("Connection refused"), "{}", failure);

    let records = persisted(&state, 1).await;
    assert_eq!(count_end_markers(&records), 1);
    assert_eq!(records[0].log_type.to_string(), "ERROR");

    state.shutdown().await;
}

#[tokio::test]
async fn test_missing_executable_marks_failed() {
    let fixture = Fixture::new();
    let missing = fixture.dir.path().join("no-such-ffmpeg");
    let state = state_with_ffmpeg(&missing.to_string_lossy()).await;

    state.supervisor.start_batch(1, fixture.params()).await.unwrap();
    let view = wait_finished(&state, 1).await;

    assert_eq!(view.state, BatchState::Failed);
    assert!(view.failure.unwrap().contains("Failed to spawn"));
    state.shutdown().await;
}

#[tokio::test]
async fn test_missing_video_fails_without_touching_other_batches() {
    let fixture = Fixture::new();
    let state = state_with_ffmpeg(&fixture.script("ffmpeg", LONG_RUNNING)).await;

    state.supervisor.start_batch(1, fixture.params()).await.unwrap();

    let mut broken = fixture.params();
    broken.video_path = Path::new("/nonexistent/video.mp4").to_path_buf();
    state.supervisor.start_batch(2, broken).await.unwrap();

    let failed = wait_finished(&state, 2).await;
    assert_eq!(failed.state, BatchState::Failed);
    assert!(failed.failure.unwrap().contains("/nonexistent/video.mp4"));

    assert_eq!(
        state.supervisor.status(1).await.unwrap().state,
        BatchState::Running
    );

    // Restarting the failed index is allowed and archives the old run
    let mut retry = fixture.params();
    retry.video_path = Path::new("/nonexistent/again.mp4").to_path_buf();
    state.supervisor.start_batch(2, retry).await.unwrap();
    wait_finished(&state, 2).await;
    assert_eq!(state.supervisor.history().await.len(), 1);

    state.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let fixture = Fixture::new();
    let state = state_with_ffmpeg(&fixture.script("ffmpeg", LONG_RUNNING)).await;
    let supervisor = state.supervisor.clone();

    for index in 1..=3 {
        supervisor.start_batch(index, fixture.params()).await.unwrap();
    }
    assert_eq!(supervisor.list_active().await.len(), 3);

    tokio::time::timeout(Duration::from_secs(20), state.shutdown())
        .await
        .expect("shutdown hung");

    assert!(supervisor.list_active().await.is_empty());
    for view in supervisor.list_all().await {
        assert_eq!(view.state, BatchState::Stopped);
    }
}
