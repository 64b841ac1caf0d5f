//! Decaying pause window.
//!
//! A window opens at deployment and closes at a fixed end time. The
//! remaining duration shrinks linearly with wall-clock time and stays at
//! zero once the end has passed; from then on pausing is permanently
//! disabled.

use chrono::{DateTime, Duration, Utc};
use poolvault_types::constants::MAX_PAUSE_WINDOW_DURATION_SECS;
use poolvault_types::{Result, VaultError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseWindow {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl PauseWindow {
    /// Open a window of `duration_secs` starting at `start_time`.
    ///
    /// # Errors
    /// Returns `Configuration` if the duration exceeds the four-year maximum.
    pub fn new(start_time: DateTime<Utc>, duration_secs: u64) -> Result<Self> {
        if duration_secs > MAX_PAUSE_WINDOW_DURATION_SECS {
            return Err(VaultError::Configuration(format!(
                "pause window duration {duration_secs}s exceeds maximum {MAX_PAUSE_WINDOW_DURATION_SECS}s"
            )));
        }
        let secs = i64::try_from(duration_secs)
            .map_err(|_| VaultError::Configuration("pause window duration overflow".into()))?;
        Ok(Self {
            start_time,
            end_time: start_time + Duration::seconds(secs),
        })
    }

    /// Window from `start_time` to a given `end_time`.
    ///
    /// # Errors
    /// Returns `Configuration` if `end_time` is before `start_time` or more
    /// than the four-year maximum after it.
    pub fn ending_at(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Result<Self> {
        let secs = (end_time - start_time).num_seconds();
        let secs = u64::try_from(secs).map_err(|_| {
            VaultError::Configuration(format!("pause window ends at {end_time}, before it starts at {start_time}"))
        })?;
        if secs > MAX_PAUSE_WINDOW_DURATION_SECS {
            return Err(VaultError::Configuration(format!(
                "pause window duration {secs}s exceeds maximum {MAX_PAUSE_WINDOW_DURATION_SECS}s"
            )));
        }
        Ok(Self { start_time, end_time })
    }

    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    #[must_use]
    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Time left before the window closes, or zero once it has.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        if now >= self.end_time {
            Duration::zero()
        } else {
            self.end_time - now
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// End time to hand to a pool created now, or `None` once the window has
    /// closed (such pools can never be paused).
    #[must_use]
    pub fn new_pool_pause_window_end_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (!self.is_expired(now)).then_some(self.end_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = 24 * 60 * 60;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn remaining_decreases_linearly() {
        let window = PauseWindow::new(t0(), 10 * DAY).unwrap();
        assert_eq!(window.remaining(t0()), Duration::days(10));
        assert_eq!(window.remaining(t0() + Duration::days(4)), Duration::days(6));
        assert_eq!(window.remaining(t0() + Duration::days(10)), Duration::zero());
        assert_eq!(window.remaining(t0() + Duration::days(400)), Duration::zero());
    }

    #[test]
    fn expiry_is_monotonic() {
        let window = PauseWindow::new(t0(), DAY).unwrap();
        let mut expired_seen = false;
        for hour in 0..72 {
            let expired = window.is_expired(t0() + Duration::hours(hour));
            if expired_seen {
                assert!(expired, "window re-opened at hour {hour}");
            }
            expired_seen |= expired;
        }
        assert!(expired_seen);
    }

    #[test]
    fn new_pool_end_time_only_while_open() {
        let window = PauseWindow::new(t0(), DAY).unwrap();
        assert_eq!(window.new_pool_pause_window_end_time(t0()), Some(window.end_time()));
        assert_eq!(
            window.new_pool_pause_window_end_time(t0() + Duration::days(2)),
            None
        );
    }

    #[test]
    fn rejects_overlong_window() {
        let err = PauseWindow::new(t0(), MAX_PAUSE_WINDOW_DURATION_SECS + 1).unwrap_err();
        assert!(matches!(err, VaultError::Configuration(_)));
        let closed = PauseWindow::new(t0(), 0).unwrap();
        assert_eq!(closed.end_time(), closed.start_time());
        assert!(closed.is_expired(t0()));
    }

    #[test]
    fn ending_at_bounds_the_end_time() {
        let end = t0() + Duration::days(90);
        let window = PauseWindow::ending_at(t0(), end).unwrap();
        assert_eq!(window.remaining(t0()), Duration::days(90));
        assert!(window.is_expired(end));

        let too_late = t0() + Duration::seconds(i64::try_from(MAX_PAUSE_WINDOW_DURATION_SECS).unwrap() + 1);
        assert!(matches!(
            PauseWindow::ending_at(t0(), too_late),
            Err(VaultError::Configuration(_))
        ));
        assert!(matches!(
            PauseWindow::ending_at(t0(), t0() - Duration::seconds(1)),
            Err(VaultError::Configuration(_))
        ));
    }
}
