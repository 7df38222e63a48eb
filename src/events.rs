//! Status change stream
//!
//! A process-wide, bounded fan-out channel. Ping workers publish one event
//! per reachability transition; subscribers (the realtime push layer) pull
//! at their own pace. A slow subscriber loses its oldest buffered frames
//! and a counter records the loss; publishing never blocks a worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain_types::{ChannelCapacity, DeviceId, DeviceStatus};

/// One reachability transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    /// Affected device
    pub device_id: DeviceId,
    /// Management address, for subscribers that key by IP
    pub device_ip: IpAddr,
    /// State before the transition
    pub old_status: DeviceStatus,
    /// State after the transition
    pub new_status: DeviceStatus,
    /// When the transition was observed
    pub ts: DateTime<Utc>,
    /// Outage duration for DOWN→UP transitions
    pub downtime_secs: Option<i64>,
}

/// Fan-out channel for status changes
pub struct ChangeStream {
    sender: broadcast::Sender<StatusChange>,
    published: AtomicU64,
    dropped: Arc<AtomicU64>,
}

impl ChangeStream {
    /// Creates the stream with a bounded per-subscriber buffer
    #[must_use]
    pub fn new(capacity: ChannelCapacity) -> Self {
        let (sender, _) = broadcast::channel(capacity.as_usize());
        Self {
            sender,
            published: AtomicU64::new(0),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publishes one event; never blocks and never fails
    ///
    /// A send with no live subscribers is not an error: the HTTP side may
    /// simply have no websocket clients connected.
    pub fn publish(&self, event: StatusChange) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(event).is_err() {
            debug!("status change published with no subscribers");
        }
    }

    /// Opens a subscription positioned at the current stream head
    #[must_use]
    pub fn subscribe(&self) -> ChangeSubscription {
        ChangeSubscription {
            receiver: self.sender.subscribe(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Events published since startup
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames lost to slow subscribers since startup
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// One subscriber's view of the stream
pub struct ChangeSubscription {
    receiver: broadcast::Receiver<StatusChange>,
    dropped: Arc<AtomicU64>,
}

impl ChangeSubscription {
    /// Receives the next event, skipping over any frames lost to lag
    ///
    /// Returns `None` when the stream is closed (engine shutdown).
    pub async fn recv(&mut self) -> Option<StatusChange> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(lost)) => {
                    self.dropped.fetch_add(lost, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn event(n: u8) -> StatusChange {
        StatusChange {
            device_id: DeviceId::generate(),
            device_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)),
            old_status: DeviceStatus::Up,
            new_status: DeviceStatus::Down,
            ts: Utc::now(),
            downtime_secs: None,
        }
    }

    #[tokio::test]
    async fn test_should_deliver_events_to_subscriber_in_order() {
        let stream = ChangeStream::new(ChannelCapacity::try_new(16).unwrap());
        let mut subscription = stream.subscribe();

        stream.publish(event(1));
        stream.publish(event(2));

        let first = subscription.recv().await.expect("first event");
        let second = subscription.recv().await.expect("second event");
        assert_eq!(first.device_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(second.device_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[tokio::test]
    async fn test_should_count_dropped_frames_when_subscriber_lags() {
        let stream = ChangeStream::new(ChannelCapacity::try_new(2).unwrap());
        let mut subscription = stream.subscribe();

        for n in 0..6 {
            stream.publish(event(n));
        }

        // The buffer holds 2; the subscriber must still get the newest
        // frames and the loss must be counted.
        let received = subscription.recv().await.expect("an event survives");
        assert!(received.device_ip >= IpAddr::V4(Ipv4Addr::new(10, 0, 0, 4)));
        assert!(stream.dropped_count() >= 4);
    }

    #[tokio::test]
    async fn test_should_not_fail_when_publishing_without_subscribers() {
        let stream = ChangeStream::new(ChannelCapacity::try_new(4).unwrap());
        stream.publish(event(1));
        assert_eq!(stream.published_count(), 1);
    }
}
