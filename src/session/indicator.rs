//! User-facing status surface (badge, notifications).

use tracing::info;

use super::SessionSnapshot;

/// Visual feedback for the session lifecycle. Calls must not block.
pub trait Indicator: Send + Sync {
    /// A start or stop is in flight.
    fn pending(&self);

    fn recording(&self, snapshot: &SessionSnapshot);

    fn idle(&self);

    fn notify(&self, title: &str, body: &str);

    fn screenshot_count(&self, count: usize);
}

/// Indicator that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn pending(&self) {
        info!("[indicator] ...");
    }

    fn recording(&self, snapshot: &SessionSnapshot) {
        info!(
            "[indicator] REC {}",
            snapshot.platform.as_deref().unwrap_or("meeting")
        );
    }

    fn idle(&self) {
        info!("[indicator] idle");
    }

    fn notify(&self, title: &str, body: &str) {
        info!("[notification] {}: {}", title, body);
    }

    fn screenshot_count(&self, count: usize) {
        info!("[indicator] {} screenshot(s)", count);
    }
}
