use std::fmt;
use std::time;

use chrono::{DateTime, Duration, Utc};
use tokio::time::{interval, Interval};

use super::SessionError;
use crate::utils::{format_elapsed_time, get_elapsed_time};

#[derive(Debug)]
pub struct HoldTimer {
    pub hold_time: u16,
    pub interval: u16,
    timer: Interval,
    pub(crate) last_sent: DateTime<Utc>,
    pub(crate) last_received: DateTime<Utc>,
    last_keepalive: DateTime<Utc>,
}

impl HoldTimer {
    pub fn new(hold_time: u16) -> HoldTimer {
        HoldTimer {
            hold_time,
            interval: (hold_time / 3).max(1),
            timer: interval(time::Duration::from_millis(100)),
            last_received: Utc::now(),
            last_sent: Utc::now(),
            last_keepalive: Utc::now() - Duration::seconds(2),
        }
    }

    // Resolves on the next tick with whether a KEEPALIVE is due:
    //   nothing written for a keepalive interval, rate-limited to one per
    //   second. Errs when nothing was read for a full hold time.
    pub async fn should_send_keepalive(&mut self) -> Result<bool, SessionError> {
        self.timer.tick().await;
        if self.hold_time == 0 {
            // hold time 0 disables both timers
            return Ok(false);
        }
        if self.is_expired() {
            return Err(SessionError::HoldTimeExpired(self.hold_time));
        }
        let due = get_elapsed_time(self.last_sent).num_seconds() >= i64::from(self.interval);
        let rate_ok = get_elapsed_time(self.last_keepalive).num_seconds() >= 1;
        if due && rate_ok {
            self.last_keepalive = Utc::now();
            return Ok(true);
        }
        Ok(false)
    }

    /// Bump the last received to now
    pub fn received(&mut self) {
        self.last_received = Utc::now();
    }

    /// Bump the last sent to now
    pub fn sent(&mut self) {
        self.last_sent = Utc::now();
    }

    // Remaining hold time, counting down from hold_time to 0
    fn get_hold_time(&self) -> Duration {
        let hold_time = Duration::seconds(self.hold_time.into());
        if get_elapsed_time(self.last_received) > hold_time {
            Duration::seconds(0)
        } else {
            hold_time - get_elapsed_time(self.last_received)
        }
    }

    fn is_expired(&self) -> bool {
        self.hold_time != 0
            && get_elapsed_time(self.last_received) >= Duration::seconds(self.hold_time.into())
    }
}

impl fmt::Display for HoldTimer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", format_elapsed_time(self.get_hold_time()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keepalive_due() {
        let mut ht = HoldTimer::new(30);
        assert_eq!(ht.interval, 10);
        assert!(!ht.is_expired());
        // Nothing written recently enough to need a keepalive
        ht.last_sent = ht.last_sent - Duration::seconds(5);
        ht.timer = interval(time::Duration::from_millis(1));
        assert!(!ht.should_send_keepalive().await.unwrap());
        // After 1/3 of hold_time without a write, keepalive is due
        ht.last_sent = ht.last_sent - Duration::seconds(5);
        ht.timer = interval(time::Duration::from_millis(1));
        assert!(ht.should_send_keepalive().await.unwrap());

        // but never more than once per second
        ht.timer = interval(time::Duration::from_millis(1));
        assert!(!ht.should_send_keepalive().await.unwrap());

        ht.sent();
        ht.timer = interval(time::Duration::from_millis(1));
        ht.last_keepalive = Utc::now() - Duration::seconds(2);
        assert!(!ht.should_send_keepalive().await.unwrap());

        // and if hold_time passes without a read, the session is expired
        ht.last_received = ht.last_received - Duration::seconds(30);
        ht.timer = interval(time::Duration::from_millis(1));
        match ht.should_send_keepalive().await {
            Err(SessionError::HoldTimeExpired(30)) => (),
            other => panic!("expected expiry, got {:?}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn test_zero_hold_time_disables_timers() {
        let mut ht = HoldTimer::new(0);
        ht.last_received = ht.last_received - Duration::seconds(3600);
        ht.timer = interval(time::Duration::from_millis(1));
        assert!(!ht.should_send_keepalive().await.unwrap());
    }
}
