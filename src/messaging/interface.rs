//! Shared interface plumbing
//!
//! Every communication interface is a bounded queue plus one background worker
//! task. The pieces here are common to both directions: delivery strategy,
//! counters, and the control handle used to stop a worker, wait for it to go
//! idle and collect its statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, Span};

/// Default broker polling interval
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of messages fetched per poll
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Default capacity of an interface queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// How a subscribe-side worker learns about new messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStrategy {
    /// Ask the broker every `interval` for up to `max_entries` messages
    Poll {
        /// Wait between polls; the first poll also waits
        interval: Duration,
        /// Batch size per poll
        max_entries: usize,
    },
    /// Let the broker push messages as they arrive
    Push,
}

impl Default for DeliveryStrategy {
    fn default() -> Self {
        DeliveryStrategy::Poll { interval: DEFAULT_POLLING_INTERVAL, max_entries: DEFAULT_MAX_ENTRIES }
    }
}

/// Settings shared by all interfaces of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Capacity of each interface queue
    pub queue_capacity: usize,
    /// Inbound delivery strategy
    pub delivery: DeliveryStrategy,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self { queue_capacity: DEFAULT_QUEUE_CAPACITY, delivery: DeliveryStrategy::default() }
    }
}

/// Which side of the bridge an interface sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceKind {
    /// Device data out
    Publish,
    /// Commands out
    SendCommands,
    /// Data in
    Subscribe,
    /// Commands in
    ReceiveCommands,
}

impl InterfaceKind {
    /// Whether the worker calls `publish` on the broker
    pub fn is_outbound(self) -> bool {
        matches!(self, InterfaceKind::Publish | InterfaceKind::SendCommands)
    }
}

/// Counters updated by the owner and the worker
#[derive(Debug, Default)]
pub struct InterfaceCounters {
    pub(crate) sent: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) received: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) pending: AtomicUsize,
}

impl InterfaceCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of an interface's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStats {
    /// Owning entity
    pub owner: String,
    /// Interface kind
    pub kind: InterfaceKind,
    /// Successful broker publishes
    pub sent: u64,
    /// Failed broker calls
    pub failed: u64,
    /// Messages discarded because a queue was full or the worker stopped
    pub dropped: u64,
    /// Messages delivered to the owner's queue
    pub received: u64,
    /// Payloads that did not decode
    pub rejected: u64,
}

/// Cloneable handle to an interface's worker
#[derive(Debug, Clone)]
pub struct InterfaceControl {
    owner: Arc<str>,
    kind: InterfaceKind,
    stop_tx: Arc<watch::Sender<bool>>,
    counters: Arc<InterfaceCounters>,
    idle: Arc<Notify>,
    span: Span,
}

impl InterfaceControl {
    pub(crate) fn new(owner: &str, kind: InterfaceKind, span: Span) -> (Self, watch::Receiver<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let control = Self {
            owner: Arc::from(owner),
            kind,
            stop_tx: Arc::new(stop_tx),
            counters: Arc::new(InterfaceCounters::default()),
            idle: Arc::new(Notify::new()),
            span,
        };
        (control, stop_rx)
    }

    pub(crate) fn counters(&self) -> &InterfaceCounters {
        &self.counters
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// Owning entity
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Interface kind
    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    /// Ask the worker to stop; never blocks, safe to call repeatedly
    pub fn stop(&self) {
        let first = self.stop_tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if first {
            let _enter = self.span.enter();
            info!(owner = %self.owner, kind = ?self.kind, "Interface stopped");
        }
    }

    /// Whether [`stop`](Self::stop) has been called
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Messages queued or in flight on an outbound interface
    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn add_pending(&self) {
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn finish_pending(&self) {
        if self.counters.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Resolve once nothing is queued or in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Snapshot the counters
    pub fn stats(&self) -> InterfaceStats {
        let c = &self.counters;
        InterfaceStats {
            owner: self.owner.to_string(),
            kind: self.kind,
            sent: c.sent.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            received: c.received.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Worker task of one interface, kept for drain-and-join teardown
#[derive(Debug)]
pub struct WorkerHandle {
    /// Control handle of the interface the worker serves
    pub control: InterfaceControl,
    /// The spawned task
    pub task: JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_idempotent() {
        let (control, stop_rx) = InterfaceControl::new("dev0", InterfaceKind::Publish, Span::none());
        assert!(!control.is_stopped());
        control.stop();
        control.stop();
        assert!(control.is_stopped());
        assert!(*stop_rx.borrow());
    }

    #[test]
    fn test_clones_share_counters() {
        let (control, _rx) = InterfaceControl::new("app0", InterfaceKind::Subscribe, Span::none());
        let clone = control.clone();
        InterfaceCounters::bump(&control.counters().received);
        InterfaceCounters::bump(&control.counters().received);
        assert_eq!(clone.stats().received, 2);
        assert_eq!(clone.stats().owner, "app0");
    }

    #[tokio::test]
    async fn test_wait_idle_resolves_when_pending_drains() {
        let (control, _rx) = InterfaceControl::new("dev0", InterfaceKind::Publish, Span::none());
        control.wait_idle().await;

        control.add_pending();
        control.add_pending();
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_idle().await })
        };
        control.finish_pending();
        control.finish_pending();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[test]
    fn test_default_delivery_polls_every_second() {
        assert_eq!(
            DeliveryStrategy::default(),
            DeliveryStrategy::Poll { interval: Duration::from_secs(1), max_entries: 100 }
        );
        assert!(InterfaceKind::SendCommands.is_outbound());
        assert!(!InterfaceKind::ReceiveCommands.is_outbound());
    }
}
