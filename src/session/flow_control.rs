//! Receive-maximum flow control for outbound QoS 1/2 publishes.

use crate::error::{MqttError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::timeout_at;

/// Bounds the number of outstanding QoS 1/2 packet ids.
///
/// Admission blocks cooperatively while the read loop keeps consuming
/// acknowledgements; every release wakes the waiters. The limit starts at
/// the client's own receive maximum and is overwritten with the broker's
/// CONNACK receive-maximum.
#[derive(Debug)]
pub struct FlowControl {
    state: Mutex<FlowState>,
    released: Notify,
}

#[derive(Debug)]
struct FlowState {
    limit: u16,
    in_flight: HashMap<u16, Instant>,
}

impl FlowControl {
    #[must_use]
    pub fn new(limit: u16) -> Self {
        Self {
            state: Mutex::new(FlowState {
                limit: limit.max(1),
                in_flight: HashMap::new(),
            }),
            released: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FlowState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Acquires a slot for `packet_id`, waiting until one frees up.
    ///
    /// # Errors
    ///
    /// Returns `FlowControlTimeout` when no slot opens within `wait`.
    pub async fn acquire(&self, packet_id: u16, wait: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // Arm the notification before re-checking so a release between
            // the check and the await is not lost.
            let mut notified = std::pin::pin!(self.released.notified());
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.in_flight.len() < usize::from(state.limit) {
                    state.in_flight.insert(packet_id, Instant::now());
                    return Ok(());
                }
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(MqttError::FlowControlTimeout);
            }
        }
    }

    /// Releases the slot held by `packet_id`. Returns `false` if it was not
    /// in flight.
    pub fn release(&self, packet_id: u16) -> bool {
        let removed = self.lock().in_flight.remove(&packet_id).is_some();
        if removed {
            self.released.notify_waiters();
        }
        removed
    }

    /// Overwrites the limit (broker CONNACK receive-maximum).
    pub fn set_limit(&self, limit: u16) {
        self.lock().limit = limit.max(1);
        self.released.notify_waiters();
    }

    #[must_use]
    pub fn limit(&self) -> u16 {
        self.lock().limit
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Whether `packet_id` currently holds a slot.
    #[must_use]
    pub fn holds(&self, packet_id: u16) -> bool {
        self.lock().in_flight.contains_key(&packet_id)
    }

    /// Drops every slot (connection teardown without session resumption).
    pub fn clear(&self) {
        self.lock().in_flight.clear();
        self.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn admits_up_to_limit() {
        let flow = FlowControl::new(3);
        for id in 1..=3 {
            flow.acquire(id, WAIT).await.unwrap();
        }
        assert_eq!(flow.in_flight(), 3);
        assert!(matches!(
            flow.acquire(4, WAIT).await,
            Err(MqttError::FlowControlTimeout)
        ));
    }

    #[tokio::test]
    async fn release_unblocks_waiter() {
        let flow = std::sync::Arc::new(FlowControl::new(1));
        flow.acquire(1, WAIT).await.unwrap();

        let waiter = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.acquire(2, Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(flow.release(1));

        waiter.await.unwrap().unwrap();
        assert_eq!(flow.in_flight(), 1);
        assert!(flow.holds(2));
    }

    #[tokio::test]
    async fn in_flight_returns_to_zero() {
        let flow = FlowControl::new(5);
        for id in [10, 11, 12] {
            flow.acquire(id, WAIT).await.unwrap();
        }
        for id in [10, 11, 12] {
            assert!(flow.release(id));
        }
        assert_eq!(flow.in_flight(), 0);
        assert!(!flow.release(10));
    }

    #[tokio::test]
    async fn raising_limit_admits_waiters() {
        let flow = std::sync::Arc::new(FlowControl::new(1));
        flow.acquire(1, WAIT).await.unwrap();

        let waiter = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.acquire(2, Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        flow.set_limit(8);

        waiter.await.unwrap().unwrap();
        assert_eq!(flow.in_flight(), 2);
    }

    #[test]
    fn limit_zero_is_clamped() {
        let flow = FlowControl::new(0);
        assert_eq!(flow.limit(), 1);
        flow.set_limit(0);
        assert_eq!(flow.limit(), 1);
    }
}
