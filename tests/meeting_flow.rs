//! End-to-end flow through the wired daemon, with in-memory audio and
//! backend: a meeting tab is detected, recording starts on its own, a manual
//! toggle stops it, and the upload is polled until the backend is done.

use meetscribe::app::Daemon;
use meetscribe::config::{Config, PlatformEntry};
use meetscribe::events::SessionEvent;
use meetscribe::messaging::{Envelope, Message, Origin, Reply};
use meetscribe::session::SessionState;
use meetscribe::tabs::{RegisteredTabs, ScreenshotCommand, TabInfo};
use meetscribe::testing::{FakeAudioBackend, FakeMeetingBackend, RecordingIndicator};
use meetscribe::upload::{JobResult, JobStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(15);

async fn wait_for<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut pick: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pick(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

fn config() -> Config {
    let mut config = Config::default();
    config.recording.auto_start_delay_seconds = 1;
    config.recording.chunk_interval_ms = 50;
    config.backend.poll_interval_seconds = 1;
    config.platforms.extra.push(PlatformEntry {
        domain: "meet.example.com".to_string(),
        name: "Example Meet".to_string(),
        priority: 4,
    });
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_detect_record_stop_upload_and_poll() {
    let audio = FakeAudioBackend::new();
    let backend = FakeMeetingBackend::new().with_statuses(vec![
        Ok(JobStatus::Pending),
        Ok(JobStatus::Processing),
        Ok(JobStatus::Completed),
    ]);
    let indicator = RecordingIndicator::new();
    let (tabs, tab_events) = RegisteredTabs::new(ScreenshotCommand::disabled());

    let daemon = Daemon::build(
        config(),
        None,
        tabs.clone(),
        Arc::new(audio.clone()),
        Arc::new(backend.clone()),
        Arc::new(indicator.clone()),
    )
    .unwrap();
    let mut events = daemon.events.subscribe();
    let shutdown = CancellationToken::new();
    daemon.start(tab_events, shutdown.clone());

    // The browser shim reports a meeting tab
    tabs.update(TabInfo {
        id: 7,
        url: "https://meet.example.com/room-42".to_string(),
        title: Some("Quarterly planning".to_string()),
        capture_target: None,
    })
    .await;

    let started = wait_for(&mut events, |e| matches!(e, SessionEvent::Started(_))).await;
    let SessionEvent::Started(snapshot) = started else {
        unreachable!()
    };
    assert!(snapshot.recording);
    assert_eq!(snapshot.tab_id, Some(7));
    assert_eq!(snapshot.platform.as_deref(), Some("Example Meet"));
    assert_eq!(audio.counters().mic_opened(), 1);
    assert_eq!(audio.counters().tab_opened(), 1);

    // Let a few chunks accumulate, then stop by hand
    tokio::time::sleep(Duration::from_millis(300)).await;
    let reply = daemon
        .bus
        .request(
            Envelope::to_background(Message::ToggleRecording),
            Origin::extension(),
            WAIT,
        )
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Recording(false)));
    assert_eq!(daemon.orchestrator.state(), SessionState::Idle);
    assert_eq!(audio.counters().mic_released(), 1);
    assert_eq!(audio.counters().tab_released(), 1);

    let submitted = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::UploadSubmitted { .. })
    })
    .await;
    assert!(matches!(
        submitted,
        SessionEvent::UploadSubmitted { ref job_id, .. } if job_id == "job-1"
    ));

    let uploads = backend.uploads();
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert!(!upload.artifact.mic.is_empty());
    assert!(!upload.artifact.tab.is_empty());
    assert_eq!(upload.metadata.title, "Quarterly planning");
    assert_eq!(upload.metadata.platform.as_deref(), Some("Example Meet"));
    assert_eq!(
        upload.metadata.url.as_deref(),
        Some("https://meet.example.com/room-42")
    );
    assert_eq!(
        Some(upload.metadata.date.clone()),
        snapshot.start_time.map(|t| t.to_rfc3339())
    );

    let finished = wait_for(&mut events, |e| matches!(e, SessionEvent::JobFinished(_))).await;
    let SessionEvent::JobFinished(outcome) = finished else {
        unreachable!()
    };
    assert_eq!(outcome.job_id, "job-1");
    assert_eq!(outcome.result, JobResult::Completed);
    assert_eq!(backend.status_requests(), 3);
    assert!(!daemon.uploads.is_polling("job-1"));
    assert_eq!(daemon.uploads.recent_outcomes(), vec![outcome]);

    // Closing the tab afterwards does not start anything new
    tabs.close(7).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(daemon.orchestrator.state(), SessionState::Idle);

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_navigation_away_stops_and_uploads() {
    let audio = FakeAudioBackend::new();
    let backend = FakeMeetingBackend::new();
    let (tabs, tab_events) = RegisteredTabs::new(ScreenshotCommand::disabled());

    let daemon = Daemon::build(
        config(),
        None,
        tabs.clone(),
        Arc::new(audio.clone()),
        Arc::new(backend.clone()),
        Arc::new(RecordingIndicator::new()),
    )
    .unwrap();
    let mut events = daemon.events.subscribe();
    let shutdown = CancellationToken::new();
    daemon.start(tab_events, shutdown.clone());

    tabs.update(TabInfo {
        id: 3,
        url: "https://zoom.us/j/123".to_string(),
        title: None,
        capture_target: None,
    })
    .await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::Started(_))).await;

    tabs.update(TabInfo {
        id: 3,
        url: "https://zoom.us/feedback".to_string(),
        title: None,
        capture_target: None,
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(daemon.orchestrator.state(), SessionState::Recording);

    tabs.update(TabInfo {
        id: 3,
        url: "https://example.com/".to_string(),
        title: None,
        capture_target: None,
    })
    .await;
    let stopped = wait_for(&mut events, |e| matches!(e, SessionEvent::Stopped { .. })).await;
    assert!(matches!(
        stopped,
        SessionEvent::Stopped {
            tab: 3,
            reason: meetscribe::session::StopReason::NavigatedAway,
            ..
        }
    ));

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::UploadSubmitted { .. })
    })
    .await;
    let metadata = &backend.uploads()[0].metadata;
    assert!(metadata.title.starts_with("Zoom meeting "));

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_keeps_the_running_recording() {
    let audio = FakeAudioBackend::new();
    let backend = FakeMeetingBackend::new().with_upload_delay(Duration::from_millis(300));
    let (tabs, tab_events) = RegisteredTabs::new(ScreenshotCommand::disabled());

    let daemon = Daemon::build(
        config(),
        None,
        tabs.clone(),
        Arc::new(audio.clone()),
        Arc::new(backend.clone()),
        Arc::new(RecordingIndicator::new()),
    )
    .unwrap();
    let mut events = daemon.events.subscribe();
    let shutdown = CancellationToken::new();
    daemon.start(tab_events, shutdown.clone());

    tabs.update(TabInfo {
        id: 5,
        url: "https://meet.example.com/all-hands".to_string(),
        title: Some("All hands".to_string()),
        capture_target: None,
    })
    .await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::Started(_))).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    shutdown.cancel();
    daemon.shutdown().await;

    assert_eq!(daemon.orchestrator.state(), SessionState::Idle);
    let uploads = backend.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].metadata.title, "All hands");
    assert_eq!(daemon.uploads.pending_submits(), 0);
    assert_eq!(audio.counters().mic_released(), 1);
}
