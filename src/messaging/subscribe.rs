//! Inbound interfaces
//!
//! A worker fills a bounded queue from the broker, either by polling or by
//! consuming a push stream, and the owning behavior drains it without blocking.
//! Messages are decoded once on the way in; payloads that do not decode are
//! counted as rejected and never reach the owner.

use super::interface::{
    DeliveryStrategy, InterfaceConfig, InterfaceControl, InterfaceCounters, InterfaceKind, WorkerHandle,
};
use super::message::{Envelope, InboundMessage};
use crate::broker::{BrokerClient, BrokerConnector, BrokerResult, Credentials};
use crate::types::Stream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn, Instrument, Span};

/// Non-blocking reader of an entity's default queue
#[derive(Debug)]
pub struct SubscribeInterface {
    rx: mpsc::Receiver<InboundMessage>,
    control: InterfaceControl,
    task: Option<JoinHandle<()>>,
}

impl SubscribeInterface {
    /// Open a connection and start the worker on `runtime`
    pub fn spawn(
        runtime: &Handle,
        connector: &dyn BrokerConnector,
        creds: Credentials,
        config: &InterfaceConfig,
        span: Span,
    ) -> BrokerResult<Self> {
        Self::spawn_for(runtime, connector, creds, None, InterfaceKind::Subscribe, config, span)
    }

    fn spawn_for(
        runtime: &Handle,
        connector: &dyn BrokerConnector,
        creds: Credentials,
        stream: Option<Stream>,
        kind: InterfaceKind,
        config: &InterfaceConfig,
        span: Span,
    ) -> BrokerResult<Self> {
        let client = connector.connect()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (control, stop_rx) = InterfaceControl::new(creds.id.as_str(), kind, span);
        let inbound = Inbound { tx, control: control.clone(), stop_rx };
        let delivery = config.delivery;
        let worker = async move {
            match delivery {
                DeliveryStrategy::Poll { interval, max_entries } => {
                    poll_worker(client, creds, stream, interval, max_entries, inbound).await
                }
                DeliveryStrategy::Push => push_worker(client, creds, stream, inbound).await,
            }
        };
        let task = runtime.spawn(worker.instrument(control.span().clone()));
        Ok(Self { rx, control, task: Some(task) })
    }

    /// Everything queued right now, oldest first
    pub fn drain(&mut self) -> Vec<InboundMessage> {
        let mut drained = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            drained.push(message);
        }
        drained
    }

    /// Oldest queued message, if any
    pub fn try_next(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }

    /// Whether nothing is queued right now
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Control handle for stop and statistics
    pub fn control(&self) -> &InterfaceControl {
        &self.control
    }

    /// Hand the worker task to the caller for joining; yields it once
    pub fn take_worker(&mut self) -> Option<WorkerHandle> {
        self.task.take().map(|task| WorkerHandle { control: self.control.clone(), task })
    }

    /// Stop the worker; already queued messages stay drainable
    pub fn stop(&self) {
        self.control.stop();
    }
}

impl Drop for SubscribeInterface {
    fn drop(&mut self) {
        self.control.stop();
    }
}

/// Non-blocking reader of an entity's `configure` stream
#[derive(Debug)]
pub struct ReceiveCommandsInterface {
    inner: SubscribeInterface,
}

impl ReceiveCommandsInterface {
    /// Open a connection and start the worker on `runtime`
    pub fn spawn(
        runtime: &Handle,
        connector: &dyn BrokerConnector,
        creds: Credentials,
        config: &InterfaceConfig,
        span: Span,
    ) -> BrokerResult<Self> {
        let inner = SubscribeInterface::spawn_for(
            runtime,
            connector,
            creds,
            Some(Stream::Configure),
            InterfaceKind::ReceiveCommands,
            config,
            span,
        )?;
        Ok(Self { inner })
    }

    /// Everything queued right now, oldest first
    pub fn drain(&mut self) -> Vec<InboundMessage> {
        self.inner.drain()
    }

    /// Oldest queued message, if any
    pub fn try_next(&mut self) -> Option<InboundMessage> {
        self.inner.try_next()
    }

    /// Whether nothing is queued right now
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Control handle for stop and statistics
    pub fn control(&self) -> &InterfaceControl {
        self.inner.control()
    }

    /// Hand the worker task to the caller for joining; yields it once
    pub fn take_worker(&mut self) -> Option<WorkerHandle> {
        self.inner.take_worker()
    }

    /// Stop the worker; already queued messages stay drainable
    pub fn stop(&self) {
        self.inner.stop();
    }
}

/// Worker side of an inbound queue
struct Inbound {
    tx: mpsc::Sender<InboundMessage>,
    control: InterfaceControl,
    stop_rx: watch::Receiver<bool>,
}

enum Forwarded {
    Queued,
    Rejected,
    Closed,
}

impl Inbound {
    fn stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Decode and enqueue; waits for room unless stopped meanwhile
    async fn forward(&mut self, envelope: Envelope) -> Forwarded {
        let sender = envelope.sender.clone();
        let message = match InboundMessage::decode(envelope) {
            Ok(message) => message,
            Err(err) => {
                InterfaceCounters::bump(&self.control.counters().rejected);
                warn!(%sender, error = %err, "Rejected undecodable payload");
                return Forwarded::Rejected;
            }
        };
        let sent = tokio::select! {
            biased;
            res = self.tx.send(message) => res.is_ok(),
            _ = self.stop_rx.changed() => false,
        };
        let counters = self.control.counters();
        if sent {
            InterfaceCounters::bump(&counters.received);
            trace!(%sender, "Queued inbound message");
            Forwarded::Queued
        } else {
            InterfaceCounters::bump(&counters.dropped);
            Forwarded::Closed
        }
    }
}

async fn poll_worker(
    client: Box<dyn BrokerClient>,
    creds: Credentials,
    stream: Option<Stream>,
    interval: std::time::Duration,
    max_entries: usize,
    mut inbound: Inbound,
) {
    debug!(?interval, max_entries, "Polling worker started");
    'poll: loop {
        tokio::select! {
            _ = inbound.stop_rx.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if inbound.stopped() {
            break;
        }

        match client.subscribe(&creds, stream.as_ref(), max_entries).await {
            Ok(batch) => {
                for envelope in batch {
                    if let Forwarded::Closed = inbound.forward(envelope).await {
                        break 'poll;
                    }
                }
            }
            Err(err) => {
                InterfaceCounters::bump(&inbound.control.counters().failed);
                warn!(error = %err, "Subscribe failed");
            }
        }
    }
    debug!("Polling worker finished");
}

async fn push_worker(
    client: Box<dyn BrokerClient>,
    creds: Credentials,
    stream: Option<Stream>,
    mut inbound: Inbound,
) {
    let mut deliveries = match client.open_stream(&creds, stream.as_ref()).await {
        Ok(deliveries) => deliveries,
        Err(err) => {
            InterfaceCounters::bump(&inbound.control.counters().failed);
            error!(error = %err, "Could not open push stream");
            return;
        }
    };
    debug!("Push worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = inbound.stop_rx.changed() => break,
            next = deliveries.recv() => next,
        };
        match next {
            Some(envelope) => {
                if let Forwarded::Closed = inbound.forward(envelope).await {
                    break;
                }
            }
            None => {
                warn!("Push stream closed by broker");
                break;
            }
        }
    }
    debug!("Push worker finished");
}
