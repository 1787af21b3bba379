//! Upload supervisor.
//!
//! Submits each finished recording exactly once, then polls the resulting
//! job on a fixed interval until it reaches a terminal status. There is at
//! most one poll timer per job id, and every timer removes itself when it
//! reports.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    JobOutcome, JobResult, JobStatus, MeetingBackend, UploadError, UploadMetadata, UploadReceipt,
};
use crate::capture::RecordingArtifact;
use crate::events::{EventBus, SessionEvent};

const RECENT_OUTCOMES: usize = 20;

#[derive(Clone)]
pub struct UploadSupervisor {
    backend: Arc<dyn MeetingBackend>,
    poll_interval: Duration,
    timers: Arc<Mutex<HashMap<String, CancellationToken>>>,
    outcomes: Arc<Mutex<VecDeque<JobOutcome>>>,
    submits: Arc<Mutex<Vec<JoinHandle<()>>>>,
    events: EventBus,
}

impl UploadSupervisor {
    pub fn new(backend: Arc<dyn MeetingBackend>, poll_interval: Duration, events: EventBus) -> Self {
        Self {
            backend,
            poll_interval,
            timers: Arc::new(Mutex::new(HashMap::new())),
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            submits: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    /// Submit once and, on success, start polling the job. Runs in the
    /// background; the caller never waits for the upload.
    pub fn hand_off(&self, artifact: RecordingArtifact, metadata: UploadMetadata) {
        let supervisor = self.clone();
        let handle = tokio::spawn(async move {
            if let Ok(receipt) = supervisor.submit(&artifact, &metadata).await {
                supervisor.poll(&receipt.job_id);
            }
        });

        let mut submits = lock(&self.submits);
        submits.retain(|handle| !handle.is_finished());
        submits.push(handle);
    }

    pub fn pending_submits(&self) -> usize {
        lock(&self.submits)
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Wait for in-flight submits to finish, up to `wait`. Returns false if
    /// some were still running when the wait ran out; those are aborted.
    pub async fn drain(&self, wait: Duration) -> bool {
        let mut handles = std::mem::take(&mut *lock(&self.submits));
        if handles.is_empty() {
            return true;
        }
        info!("Waiting for {} upload(s) to finish", handles.len());

        let joined = tokio::time::timeout(wait, async {
            for handle in handles.iter_mut() {
                if let Err(e) = handle.await {
                    error!("Upload task failed: {}", e);
                }
            }
        })
        .await;

        match joined {
            Ok(()) => true,
            Err(_) => {
                error!("Uploads still running after {:?}, abandoning them", wait);
                for handle in &handles {
                    handle.abort();
                }
                false
            }
        }
    }

    /// Send the recording. A failure is reported once and not retried.
    pub async fn submit(
        &self,
        artifact: &RecordingArtifact,
        metadata: &UploadMetadata,
    ) -> Result<UploadReceipt, UploadError> {
        match self.backend.upload(artifact, metadata).await {
            Ok(receipt) => {
                info!(
                    "Recording uploaded: job {} (meeting {})",
                    receipt.job_id, receipt.meeting_id
                );
                self.events.publish(SessionEvent::UploadSubmitted {
                    job_id: receipt.job_id.clone(),
                    meeting_id: receipt.meeting_id.clone(),
                });
                Ok(receipt)
            }
            Err(e) => {
                error!("Upload of \"{}\" failed: {}", metadata.title, e);
                self.events.publish(SessionEvent::UploadFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Arm the poll timer for `job_id`. Returns false if one is already armed.
    pub fn poll(&self, job_id: &str) -> bool {
        let token = CancellationToken::new();
        {
            let mut timers = lock(&self.timers);
            if timers.contains_key(job_id) {
                debug!("Job {} is already being polled", job_id);
                return false;
            }
            timers.insert(job_id.to_string(), token.clone());
        }

        let supervisor = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            supervisor.run_poll(job_id, token).await;
        });
        true
    }

    /// Disarm the timer for `job_id` without reporting.
    pub fn cancel(&self, job_id: &str) -> bool {
        match lock(&self.timers).remove(job_id) {
            Some(token) => {
                token.cancel();
                info!("Stopped polling job {}", job_id);
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        lock(&self.timers).contains_key(job_id)
    }

    pub fn active_polls(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Most recent outcomes, newest last.
    pub fn recent_outcomes(&self) -> Vec<JobOutcome> {
        lock(&self.outcomes).iter().cloned().collect()
    }

    async fn run_poll(&self, job_id: String, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_status = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let result = match self.backend.job_status(&job_id).await {
                Ok(response) => {
                    if last_status != Some(response.status) {
                        info!("Job {} status: {}", job_id, response.status.as_str());
                        last_status = Some(response.status);
                    }
                    if !response.status.is_terminal() {
                        continue;
                    }
                    if response.status == JobStatus::Completed {
                        JobResult::Completed
                    } else {
                        JobResult::Failed {
                            error: response.error,
                        }
                    }
                }
                Err(UploadError::Unauthorized) => {
                    warn!("Polling job {} refused: not authenticated", job_id);
                    JobResult::Unauthenticated
                }
                // A 4xx will not change on the next tick
                Err(UploadError::Rejected { status, body }) if (400..500).contains(&status) => {
                    warn!("Polling job {} rejected ({}), giving up", job_id, status);
                    JobResult::Failed {
                        error: Some(format!("status request rejected ({}): {}", status, body)),
                    }
                }
                Err(e) => {
                    debug!("Status request for job {} failed, retrying: {}", job_id, e);
                    continue;
                }
            };

            // Cancelled while the request was in flight
            if token.is_cancelled() {
                return;
            }
            lock(&self.timers).remove(&job_id);
            self.report(JobOutcome {
                job_id,
                result,
                finished_at: Utc::now(),
            });
            return;
        }
    }

    fn report(&self, outcome: JobOutcome) {
        match &outcome.result {
            JobResult::Completed => info!("Job {} completed", outcome.job_id),
            JobResult::Failed { error } => error!(
                "Job {} failed: {}",
                outcome.job_id,
                error.as_deref().unwrap_or("unknown error")
            ),
            JobResult::Unauthenticated => error!("Job {}: unauthenticated", outcome.job_id),
        }

        {
            let mut outcomes = lock(&self.outcomes);
            outcomes.push_back(outcome.clone());
            while outcomes.len() > RECENT_OUTCOMES {
                outcomes.pop_front();
            }
        }
        self.events.publish(SessionEvent::JobFinished(outcome));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
