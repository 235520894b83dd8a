//! Outbound interfaces
//!
//! [`PublishInterface`] carries a device's data to its `protected` exchange and
//! [`SendCommandsInterface`] carries an app's commands to devices' `configure`
//! exchanges. Both enqueue without blocking and leave the broker call to a
//! worker task that owns its own connection.

use super::interface::{InterfaceConfig, InterfaceControl, InterfaceCounters, InterfaceKind, WorkerHandle};
use super::message::{Command, Message};
use crate::broker::{BrokerClient, BrokerConnector, BrokerResult, Credentials, Exchange};
use crate::types::EntityId;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument, Span};

#[derive(Debug)]
struct Outbound {
    exchange: Exchange,
    message: Message,
}

/// Bounded FIFO drained by a publishing worker
#[derive(Debug)]
struct OutboundQueue {
    owner: EntityId,
    tx: mpsc::Sender<Outbound>,
    control: InterfaceControl,
    task: Option<JoinHandle<()>>,
}

impl OutboundQueue {
    fn spawn(
        runtime: &Handle,
        connector: &dyn BrokerConnector,
        creds: Credentials,
        kind: InterfaceKind,
        config: &InterfaceConfig,
        span: Span,
    ) -> BrokerResult<Self> {
        let client = connector.connect()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (control, stop_rx) = InterfaceControl::new(creds.id.as_str(), kind, span);
        let owner = creds.id.clone();
        let worker = publish_worker(client, creds, rx, stop_rx, control.clone());
        let task = runtime.spawn(worker.instrument(control.span().clone()));
        Ok(Self { owner, tx, control, task: Some(task) })
    }

    fn enqueue(&self, exchange: Exchange, message: Message) -> bool {
        if self.control.is_stopped() {
            InterfaceCounters::bump(&self.control.counters().dropped);
            return false;
        }
        self.control.add_pending();
        match self.tx.try_send(Outbound { exchange, message }) {
            Ok(()) => true,
            Err(err) => {
                let reason = match err {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "worker gone",
                };
                self.control.finish_pending();
                InterfaceCounters::bump(&self.control.counters().dropped);
                let _enter = self.control.span().enter();
                warn!(owner = %self.owner, reason, "Dropped outbound message");
                false
            }
        }
    }

    fn take_worker(&mut self) -> Option<WorkerHandle> {
        self.task.take().map(|task| WorkerHandle { control: self.control.clone(), task })
    }
}

impl Drop for OutboundQueue {
    fn drop(&mut self) {
        self.control.stop();
    }
}

async fn publish_worker(
    client: Box<dyn BrokerClient>,
    creds: Credentials,
    mut rx: mpsc::Receiver<Outbound>,
    mut stop_rx: watch::Receiver<bool>,
    control: InterfaceControl,
) {
    debug!("Publish worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            next = rx.recv() => next,
        };
        let Some(Outbound { exchange, message }) = next else { break };
        if *stop_rx.borrow() {
            InterfaceCounters::bump(&control.counters().dropped);
            control.finish_pending();
            break;
        }

        let result = match message.to_payload() {
            Ok(payload) => client.publish(&creds, &exchange, &payload).await,
            Err(err) => {
                warn!(%exchange, error = %err, "Could not encode message");
                InterfaceCounters::bump(&control.counters().failed);
                control.finish_pending();
                continue;
            }
        };
        match result {
            Ok(()) => {
                InterfaceCounters::bump(&control.counters().sent);
                debug!(%exchange, kind = message.kind(), "Published");
            }
            Err(err) => {
                InterfaceCounters::bump(&control.counters().failed);
                warn!(%exchange, error = %err, "Publish failed");
            }
        }
        control.finish_pending();
    }

    // Whatever is still queued will never be sent
    rx.close();
    while rx.try_recv().is_ok() {
        InterfaceCounters::bump(&control.counters().dropped);
        control.finish_pending();
    }
    debug!("Publish worker finished");
}

/// Non-blocking publisher for an entity's `protected` stream
#[derive(Debug)]
pub struct PublishInterface {
    queue: OutboundQueue,
    exchange: Exchange,
}

impl PublishInterface {
    /// Open a connection and start the worker on `runtime`
    pub fn spawn(
        runtime: &Handle,
        connector: &dyn BrokerConnector,
        creds: Credentials,
        config: &InterfaceConfig,
        span: Span,
    ) -> BrokerResult<Self> {
        let exchange = Exchange::protected(&creds.id);
        let queue = OutboundQueue::spawn(runtime, connector, creds, InterfaceKind::Publish, config, span)?;
        Ok(Self { queue, exchange })
    }

    /// Queue a message; `false` if it was dropped
    pub fn publish(&self, message: Message) -> bool {
        self.queue.enqueue(self.exchange.clone(), message)
    }

    /// Control handle for stop, idle wait and statistics
    pub fn control(&self) -> &InterfaceControl {
        &self.queue.control
    }

    /// Hand the worker task to the caller for joining; yields it once
    pub fn take_worker(&mut self) -> Option<WorkerHandle> {
        self.queue.take_worker()
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.queue.control.stop();
    }
}

/// Non-blocking sender of commands to devices' `configure` streams
#[derive(Debug)]
pub struct SendCommandsInterface {
    queue: OutboundQueue,
}

impl SendCommandsInterface {
    /// Open a connection and start the worker on `runtime`
    pub fn spawn(
        runtime: &Handle,
        connector: &dyn BrokerConnector,
        creds: Credentials,
        config: &InterfaceConfig,
        span: Span,
    ) -> BrokerResult<Self> {
        let queue =
            OutboundQueue::spawn(runtime, connector, creds, InterfaceKind::SendCommands, config, span)?;
        Ok(Self { queue })
    }

    /// Queue a command for `device`; `false` if it was dropped
    pub fn send_command(&self, device: &EntityId, command: Command) -> bool {
        let message = Message::command(&self.queue.owner, command);
        self.queue.enqueue(Exchange::configure(device), message)
    }

    /// Control handle for stop, idle wait and statistics
    pub fn control(&self) -> &InterfaceControl {
        &self.queue.control
    }

    /// Hand the worker task to the caller for joining; yields it once
    pub fn take_worker(&mut self) -> Option<WorkerHandle> {
        self.queue.take_worker()
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.queue.control.stop();
    }
}
