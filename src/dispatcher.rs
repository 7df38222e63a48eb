//! Batch dispatcher and priority queues
//!
//! The dispatcher sizes probe batches with the auto-scaling rule (aim for
//! ~10 batches per cycle, clamped to 50..=500 devices and rounded up to the
//! nearest 50) and publishes work items onto four strictly-prioritized
//! bounded queues: alerts > ping > snmp > maintenance. Workers take one
//! item at a time, always from the highest-priority queue with work, so a
//! running maintenance task can never starve alert evaluation for longer
//! than one task.
//!
//! Backpressure: when a queue is full the *newest* cycle is dropped and a
//! skip counter increments; the scheduler never blocks. Operators watch
//! the drop counters to raise worker count or batch size.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, warn};

use crate::domain_types::{ChannelCapacity, DeviceId};

/// Dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Queue {queue} is full; cycle dropped")]
    QueueFull {
        /// The queue that overflowed
        queue: &'static str,
    },

    #[error("Dispatcher is closed")]
    Closed,
}

/// Queue priorities, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Alert evaluation
    Alerts = 0,
    /// Reachability probing
    Ping = 1,
    /// SNMP collection
    Snmp = 2,
    /// Discovery, summaries, baselines, cleanup
    Maintenance = 3,
}

impl Priority {
    const ALL: [Self; 4] = [Self::Alerts, Self::Ping, Self::Snmp, Self::Maintenance];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Alerts => "alerts",
            Self::Ping => "ping",
            Self::Snmp => "snmp",
            Self::Maintenance => "maintenance",
        }
    }
}

/// One unit of work pulled by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// Run one alert evaluation cycle
    EvaluateAlerts,
    /// Ping a batch of devices
    PingBatch(Vec<DeviceId>),
    /// Poll SNMP counters for a batch of devices
    SnmpBatch(Vec<DeviceId>),
    /// Refresh interface oper/admin status for a batch of devices
    InterfaceStatusBatch(Vec<DeviceId>),
    /// Walk IF-MIB and reclassify interfaces for a batch of devices
    DiscoverInterfaces(Vec<DeviceId>),
    /// LLDP/CDP neighbor discovery for a batch of devices
    DiscoverTopology(Vec<DeviceId>),
    /// Recompute 24h interface summaries
    SummarizeInterfaces,
    /// Weekly baseline learning
    LearnBaselines,
    /// Online anomaly check
    CheckAnomalies,
    /// Retention cleanup
    Cleanup,
}

impl WorkItem {
    /// The queue this item belongs on
    #[must_use]
    pub fn priority(&self) -> Priority {
        match self {
            Self::EvaluateAlerts => Priority::Alerts,
            Self::PingBatch(_) => Priority::Ping,
            Self::SnmpBatch(_) | Self::InterfaceStatusBatch(_) => Priority::Snmp,
            Self::DiscoverInterfaces(_)
            | Self::DiscoverTopology(_)
            | Self::SummarizeInterfaces
            | Self::LearnBaselines
            | Self::CheckAnomalies
            | Self::Cleanup => Priority::Maintenance,
        }
    }
}

/// Auto-scaling batch size: `clamp(ceil(n / 10) rounded up to 50, 50, 500)`
#[must_use]
pub fn optimal_batch_size(device_count: usize) -> usize {
    if device_count == 0 {
        return 50;
    }
    let base = device_count.div_ceil(10);
    let rounded = base.div_ceil(50) * 50;
    rounded.clamp(50, 500)
}

/// Splits a device set into disjoint batches covering every device once
#[must_use]
pub fn plan_batches(device_ids: &[DeviceId]) -> Vec<Vec<DeviceId>> {
    let size = optimal_batch_size(device_ids.len());
    device_ids.chunks(size).map(<[DeviceId]>::to_vec).collect()
}

struct Queue {
    sender: mpsc::Sender<WorkItem>,
    receiver: Mutex<mpsc::Receiver<WorkItem>>,
    dropped: AtomicU64,
    dispatched: AtomicU64,
}

/// The priority-queue dispatcher
pub struct Dispatcher {
    queues: [Queue; 4],
    notify: Notify,
    closed: AtomicBool,
}

impl Dispatcher {
    /// Creates the dispatcher with bounded queues
    #[must_use]
    pub fn new(capacity: ChannelCapacity) -> Arc<Self> {
        let queue = || {
            let (sender, receiver) = mpsc::channel(capacity.as_usize());
            Queue {
                sender,
                receiver: Mutex::new(receiver),
                dropped: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
            }
        };
        Arc::new(Self {
            queues: [queue(), queue(), queue(), queue()],
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Enqueues one work item; a full queue drops the item and records the
    /// skip instead of blocking the scheduler
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::QueueFull`] on overflow and
    /// [`DispatchError::Closed`] after shutdown.
    pub fn enqueue(&self, item: WorkItem) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Closed);
        }
        let priority = item.priority();
        let queue = &self.queues[priority.index()];
        match queue.sender.try_send(item) {
            Ok(()) => {
                queue.dispatched.fetch_add(1, Ordering::Relaxed);
                self.notify.notify_waiters();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                queue.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue = priority.name(),
                    "work queue full; workers are too slow for the configured cadence"
                );
                Err(DispatchError::QueueFull {
                    queue: priority.name(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    /// Takes the next work item, preferring higher-priority queues
    ///
    /// Returns `None` after [`Dispatcher::close`] once the queues drain.
    pub async fn next(&self) -> Option<WorkItem> {
        loop {
            // Arm the wakeup before scanning so an enqueue racing the scan
            // cannot be missed.
            let notified = self.notify.notified();
            for priority in Priority::ALL {
                let mut receiver = self.queues[priority.index()].receiver.lock().await;
                if let Ok(item) = receiver.try_recv() {
                    debug!(queue = priority.name(), "work item taken");
                    return Some(item);
                }
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// Stops accepting work and wakes idle workers so they can exit
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Cycles dropped on a queue since startup
    #[must_use]
    pub fn dropped_count(&self, priority: Priority) -> u64 {
        self.queues[priority.index()].dropped.load(Ordering::Relaxed)
    }

    /// Items accepted on a queue since startup
    #[must_use]
    pub fn dispatched_count(&self, priority: Priority) -> u64 {
        self.queues[priority.index()]
            .dispatched
            .load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_clamp_batch_size_between_fifty_and_five_hundred() {
        assert_eq!(optimal_batch_size(0), 50);
        assert_eq!(optimal_batch_size(10), 50);
        assert_eq!(optimal_batch_size(875), 100);
        assert_eq!(optimal_batch_size(1500), 150);
        assert_eq!(optimal_batch_size(3000), 300);
        assert_eq!(optimal_batch_size(10_000), 500);
    }

    #[test]
    fn test_should_round_batch_size_up_to_nearest_fifty() {
        // 1010 devices -> ceil(1010/10)=101 -> rounded to 150
        assert_eq!(optimal_batch_size(1010), 150);
    }

    #[test]
    fn test_should_cover_every_device_exactly_once_when_planning_batches() {
        let ids: Vec<DeviceId> = (0..875).map(|_| DeviceId::generate()).collect();
        let batches = plan_batches(&ids);

        assert_eq!(batches.len(), 9, "875 devices at batch size 100");
        let mut seen = std::collections::HashSet::new();
        for batch in &batches {
            assert!(batch.len() <= 100);
            for id in batch {
                assert!(seen.insert(*id), "device dispatched twice in one cycle");
            }
        }
        assert_eq!(seen.len(), 875);
    }

    #[tokio::test]
    async fn test_should_serve_higher_priority_queue_first_when_both_have_work() {
        let dispatcher = Dispatcher::new(ChannelCapacity::try_new(8).unwrap());
        dispatcher
            .enqueue(WorkItem::Cleanup)
            .expect("maintenance enqueues");
        dispatcher
            .enqueue(WorkItem::EvaluateAlerts)
            .expect("alerts enqueue");

        let first = dispatcher.next().await.expect("item available");
        assert_eq!(first, WorkItem::EvaluateAlerts);
        let second = dispatcher.next().await.expect("item available");
        assert_eq!(second, WorkItem::Cleanup);
    }

    #[tokio::test]
    async fn test_should_drop_newest_cycle_when_queue_is_full() {
        let dispatcher = Dispatcher::new(ChannelCapacity::try_new(1).unwrap());
        dispatcher
            .enqueue(WorkItem::PingBatch(vec![DeviceId::generate()]))
            .expect("first cycle fits");
        let overflow = dispatcher.enqueue(WorkItem::PingBatch(vec![DeviceId::generate()]));

        assert!(matches!(overflow, Err(DispatchError::QueueFull { .. })));
        assert_eq!(dispatcher.dropped_count(Priority::Ping), 1);
        assert_eq!(dispatcher.dispatched_count(Priority::Ping), 1);
    }

    #[tokio::test]
    async fn test_should_unblock_waiting_worker_when_dispatcher_closes() {
        let dispatcher = Dispatcher::new(ChannelCapacity::try_new(1).unwrap());
        let waiter = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.next().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        dispatcher.close();
        let result = waiter.await.expect("worker task joins");
        assert!(result.is_none());
    }
}
