//! Completion barrier over two stop acknowledgements.

use std::time::Duration;
use tokio::sync::oneshot;

use super::{CaptureError, Track};

/// How the wait on both encoders ended.
#[derive(Debug)]
pub enum BarrierOutcome<T> {
    BothOk { mic: T, tab: T },
    /// Both acknowledged, at least one with an error.
    Partial {
        mic: Result<T, CaptureError>,
        tab: Result<T, CaptureError>,
    },
    /// The bound expired before both acknowledged.
    TimedOut { mic_acked: bool, tab_acked: bool },
}

/// Wait for both acknowledgements, at most `bound`. A dropped sender counts
/// as a failed acknowledgement, never as a hang.
pub async fn join_both<T>(
    mut mic_rx: oneshot::Receiver<Result<T, CaptureError>>,
    mut tab_rx: oneshot::Receiver<Result<T, CaptureError>>,
    bound: Duration,
) -> BarrierOutcome<T> {
    let deadline = tokio::time::sleep(bound);
    tokio::pin!(deadline);

    let mut mic_ack: Option<Result<T, CaptureError>> = None;
    let mut tab_ack: Option<Result<T, CaptureError>> = None;

    loop {
        match (mic_ack.take(), tab_ack.take()) {
            (Some(Ok(mic)), Some(Ok(tab))) => return BarrierOutcome::BothOk { mic, tab },
            (Some(mic), Some(tab)) => return BarrierOutcome::Partial { mic, tab },
            (mic, tab) => {
                mic_ack = mic;
                tab_ack = tab;
            }
        }

        tokio::select! {
            ack = &mut mic_rx, if mic_ack.is_none() => mic_ack = Some(flatten(ack, Track::Mic)),
            ack = &mut tab_rx, if tab_ack.is_none() => tab_ack = Some(flatten(ack, Track::Tab)),
            _ = &mut deadline => {
                return BarrierOutcome::TimedOut {
                    mic_acked: mic_ack.is_some(),
                    tab_acked: tab_ack.is_some(),
                };
            }
        }
    }
}

fn flatten<T>(
    ack: Result<Result<T, CaptureError>, oneshot::error::RecvError>,
    track: Track,
) -> Result<T, CaptureError> {
    ack.unwrap_or_else(|_| {
        Err(CaptureError::EncoderFailed {
            track,
            reason: "encoder went away without acknowledging".to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_both_ok() {
        let (mic_tx, mic_rx) = oneshot::channel();
        let (tab_tx, tab_rx) = oneshot::channel();
        mic_tx.send(Ok(1)).unwrap();
        tab_tx.send(Ok(2)).unwrap();

        match join_both(mic_rx, tab_rx, Duration::from_secs(5)).await {
            BarrierOutcome::BothOk { mic, tab } => assert_eq!((mic, tab), (1, 2)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_sender_is_partial() {
        let (mic_tx, mic_rx) = oneshot::channel::<Result<u8, CaptureError>>();
        let (tab_tx, tab_rx) = oneshot::channel();
        mic_tx.send(Ok(1)).unwrap();
        drop(tab_tx);

        match join_both(mic_rx, tab_rx, Duration::from_secs(5)).await {
            BarrierOutcome::Partial { mic, tab } => {
                assert_eq!(mic, Ok(1));
                assert!(matches!(
                    tab,
                    Err(CaptureError::EncoderFailed { track: Track::Tab, .. })
                ));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ack_times_out() {
        let (mic_tx, mic_rx) = oneshot::channel::<Result<u8, CaptureError>>();
        let (_tab_tx, tab_rx) = oneshot::channel();
        mic_tx.send(Ok(1)).unwrap();

        let started = tokio::time::Instant::now();
        match join_both(mic_rx, tab_rx, Duration::from_secs(5)).await {
            BarrierOutcome::TimedOut {
                mic_acked,
                tab_acked,
            } => {
                assert!(mic_acked);
                assert!(!tab_acked);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
