/*!
The two subscription records: `ServiceSubscription` (device-side, one per accepted SUBSCRIBE)
and `ClientSubscription` (control-point-side, one per outstanding subscribe call).
*/

use crate::concurrency::TimerHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// A device-side record of one accepted subscription. The event key is a
/// monotonic 32-bit counter that wraps from `u32::MAX` back to `1` — `0` is reserved for the
/// first event a fresh subscription receives.
///
#[derive(Clone, Debug)]
pub struct ServiceSubscription {
    pub sid: Uuid,
    pub event_urls: Vec<String>,
    pub event_key: u32,
    pub expiration: Instant,
    pub delivery_failures: u32,
    pub renew_timer: Option<TimerHandle>,
}

impl ServiceSubscription {
    pub fn new(event_urls: Vec<String>, timeout: Duration) -> Self {
        ServiceSubscription {
            sid: Uuid::new_v4(),
            event_urls,
            event_key: 0,
            expiration: Instant::now() + timeout,
            delivery_failures: 0,
            renew_timer: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expiration
    }

    pub fn renew(&mut self, timeout: Duration) {
        self.expiration = Instant::now() + timeout;
    }

    /// Advance the event key, wrapping `u32::MAX` back to `1`.
    pub fn next_event_key(&mut self) -> u32 {
        let current = self.event_key;
        self.event_key = if self.event_key == u32::MAX { 1 } else { self.event_key + 1 };
        current
    }
}

///
/// A control-point-side record of one subscription this process holds against a remote
/// publisher.
///
#[derive(Clone, Debug)]
pub struct ClientSubscription {
    pub local_sid: Uuid,
    pub remote_sid: String,
    pub publisher_url: String,
    pub renewal_timer: Option<TimerHandle>,
    pub next_event_key_expected: u32,
    pub timeout: Duration,
}

impl ClientSubscription {
    pub fn new(remote_sid: String, publisher_url: String, timeout: Duration) -> Self {
        ClientSubscription {
            local_sid: Uuid::new_v4(),
            remote_sid,
            publisher_url,
            renewal_timer: None,
            next_event_key_expected: 0,
            timeout,
        }
    }

    /// Seconds before expiry an automatic renewal should be scheduled; `AUTO_RENEW_TIME == 0` on
    /// the subscription's overall timeout means "do not renew" rather than "renew immediately"
    ///.
    pub fn renew_delay(&self, auto_renew_time: Duration) -> Option<Duration> {
        if self.timeout.is_zero() {
            return None;
        }
        Some(self.timeout.saturating_sub(auto_renew_time))
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_key_wraps_from_max_to_one() {
        let mut sub = ServiceSubscription::new(vec!["http://host/event".to_string()], Duration::from_secs(60));
        sub.event_key = u32::MAX;
        let issued = sub.next_event_key();
        assert_eq!(issued, u32::MAX);
        assert_eq!(sub.event_key, 1);
    }

    #[test]
    fn fresh_subscription_starts_at_zero() {
        let mut sub = ServiceSubscription::new(vec!["http://host/event".to_string()], Duration::from_secs(60));
        assert_eq!(sub.next_event_key(), 0);
        assert_eq!(sub.event_key, 1);
    }

    #[test]
    fn zero_timeout_means_no_renewal() {
        let sub = ClientSubscription::new("uuid:remote".to_string(), "http://host/event".to_string(), Duration::ZERO);
        assert_eq!(sub.renew_delay(Duration::from_secs(10)), None);
    }
}
