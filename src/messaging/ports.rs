//! Behavior-facing ports
//!
//! Behavior code only needs to enqueue and drain. These traits are the seam
//! between the logical-time behaviors and the worker-backed interfaces, which
//! lets behaviors run against the in-process `Local*` ports without a broker.

use super::message::{Command, InboundMessage, Message};
use super::publish::{PublishInterface, SendCommandsInterface};
use super::subscribe::{ReceiveCommandsInterface, SubscribeInterface};
use crate::types::EntityId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outbound data, never blocks
pub trait Outbox: Debug {
    /// Queue a message; `false` if it was dropped
    fn publish(&self, message: Message) -> bool;
    /// Stop the underlying worker
    fn stop(&self);
}

/// Outbound commands, never blocks
pub trait CommandOutbox: Debug {
    /// Queue a command for `device`; `false` if it was dropped
    fn send_command(&self, device: &EntityId, command: Command) -> bool;
    /// Stop the underlying worker
    fn stop(&self);
}

/// Inbound messages, never blocks
pub trait Inbox: Debug {
    /// Everything queued right now, oldest first
    fn drain(&mut self) -> Vec<InboundMessage>;
    /// Stop the underlying worker
    fn stop(&self);
}

impl Outbox for PublishInterface {
    fn publish(&self, message: Message) -> bool {
        PublishInterface::publish(self, message)
    }

    fn stop(&self) {
        PublishInterface::stop(self)
    }
}

impl CommandOutbox for SendCommandsInterface {
    fn send_command(&self, device: &EntityId, command: Command) -> bool {
        SendCommandsInterface::send_command(self, device, command)
    }

    fn stop(&self) {
        SendCommandsInterface::stop(self)
    }
}

impl Inbox for SubscribeInterface {
    fn drain(&mut self) -> Vec<InboundMessage> {
        SubscribeInterface::drain(self)
    }

    fn stop(&self) {
        SubscribeInterface::stop(self)
    }
}

impl Inbox for ReceiveCommandsInterface {
    fn drain(&mut self) -> Vec<InboundMessage> {
        ReceiveCommandsInterface::drain(self)
    }

    fn stop(&self) {
        ReceiveCommandsInterface::stop(self)
    }
}

/// In-process outbox that keeps everything published; clones share state
#[derive(Debug, Clone, Default)]
pub struct LocalOutbox {
    sent: Arc<Mutex<Vec<Message>>>,
    stopped: Arc<AtomicBool>,
}

impl LocalOutbox {
    /// Empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far
    pub fn messages(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    /// Whether `stop` was called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Outbox for LocalOutbox {
    fn publish(&self, message: Message) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.sent.lock().push(message);
        true
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// In-process command outbox; clones share state
#[derive(Debug, Clone, Default)]
pub struct LocalCommandOutbox {
    sent: Arc<Mutex<Vec<(EntityId, Command)>>>,
    stopped: Arc<AtomicBool>,
}

impl LocalCommandOutbox {
    /// Empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(device, command)` sent so far
    pub fn commands(&self) -> Vec<(EntityId, Command)> {
        self.sent.lock().clone()
    }

    /// Whether `stop` was called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl CommandOutbox for LocalCommandOutbox {
    fn send_command(&self, device: &EntityId, command: Command) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.sent.lock().push((device.clone(), command));
        true
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// In-process inbox fed with [`LocalInbox::push`]; clones share state
#[derive(Debug, Clone, Default)]
pub struct LocalInbox {
    queue: Arc<Mutex<VecDeque<InboundMessage>>>,
    stopped: Arc<AtomicBool>,
}

impl LocalInbox {
    /// Empty inbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message as if a worker had received it
    pub fn push(&self, message: InboundMessage) {
        self.queue.lock().push_back(message);
    }

    /// Queue `message` attributed to its own sender
    pub fn deliver(&self, message: Message) {
        let from = message.sender().clone();
        self.push(InboundMessage { from, stream: None, message });
    }

    /// Messages not drained yet
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Whether `stop` was called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Inbox for LocalInbox {
    fn drain(&mut self) -> Vec<InboundMessage> {
        self.queue.lock().drain(..).collect()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_ports_share_state_between_clones() {
        let dev = EntityId::new("dev0").unwrap();
        let outbox = LocalOutbox::new();
        let handle = outbox.clone();
        assert!(outbox.publish(Message::sensor_reading(&dev, 1.0)));
        assert_eq!(handle.messages().len(), 1);

        Outbox::stop(&outbox);
        assert!(handle.is_stopped());
        assert!(!outbox.publish(Message::sensor_reading(&dev, 2.0)));

        let mut inbox = LocalInbox::new();
        let feeder = inbox.clone();
        feeder.deliver(Message::fault_status(&dev));
        assert_eq!(inbox.drain().len(), 1);
        assert!(feeder.is_empty());
    }
}
