//! Failure streak tracking for stream errors.
//!
//! Only the first error of a streak is logged; the streak resets when a
//! transport opens successfully.

use std::time::Duration;

use tracing::warn;

use crate::stream::transport::TransportError;

/// Counts consecutive stream failures since the last successful open.
#[derive(Clone, Debug, Default)]
pub struct FailureDebouncer {
    streak: u32,
}

impl FailureDebouncer {
    /// Creates a debouncer with no recorded failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of consecutive failures in the current streak.
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Records a successful open, re-arming the warning for the next streak.
    pub fn reset(&mut self) {
        self.streak = 0;
    }

    /// Records a failure that will be retried after `retry_delay`.
    ///
    /// Emits a warning only when this failure starts a new streak. Returns
    /// whether the warning was emitted.
    pub fn record_failure(&mut self, error: &TransportError, retry_delay: Duration) -> bool {
        self.streak = self.streak.saturating_add(1);
        if self.streak != 1 {
            return false;
        }

        let retry_delay_ms = retry_delay.as_millis() as u64;
        warn!(
            event = "stream_connection_error",
            error = %error,
            retry_delay_ms,
            "error on stream connection: {error}, will continue retrying after {retry_delay_ms} milliseconds"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::FailureDebouncer;
    use crate::stream::transport::TransportError;

    #[test]
    fn warns_only_on_first_failure_of_streak() {
        let mut debouncer = FailureDebouncer::new();
        let delay = Duration::from_millis(500);

        assert!(debouncer.record_failure(&TransportError::custom("first"), delay));
        assert!(!debouncer.record_failure(&TransportError::custom("second"), delay));
        assert!(!debouncer.record_failure(&TransportError::StreamEnded, delay));
        assert_eq!(debouncer.streak(), 3);
    }

    #[test]
    fn reset_rearms_warning() {
        let mut debouncer = FailureDebouncer::new();
        let delay = Duration::from_secs(1);

        assert!(debouncer.record_failure(&TransportError::custom("a"), delay));
        debouncer.reset();
        assert_eq!(debouncer.streak(), 0);
        assert!(debouncer.record_failure(&TransportError::custom("b"), delay));
        assert!(!debouncer.record_failure(&TransportError::custom("c"), delay));
    }

    #[test]
    fn reset_without_failures_is_harmless() {
        let mut debouncer = FailureDebouncer::new();
        debouncer.reset();
        debouncer.reset();
        assert_eq!(debouncer.streak(), 0);
    }
}
