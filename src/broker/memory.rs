//! In-memory middleware
//!
//! Reproduces the broker's permission and routing semantics in process so the
//! testbed can run, and be tested, without a middleware deployment. State sits
//! behind one `parking_lot` mutex that is never held across an await point.

use super::client::{
    BrokerClient, BrokerConnector, BrokerError, BrokerResult, Credentials, Exchange, FollowRequest,
    Operation,
};
use crate::messaging::Envelope;
use crate::types::{AccessRight, ApiKey, EntityId, EntityKind, FollowId, FollowStatus, PermissionMode, Stream};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// One call as seen by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Connection that issued the call
    pub connection: usize,
    /// Operation invoked
    pub operation: Operation,
    /// Entity acting or being acted on
    pub subject: EntityId,
}

#[derive(Debug, Clone)]
struct FailureRule {
    operation: Operation,
    subject: Option<EntityId>,
}

#[derive(Debug)]
struct Registration {
    kind: EntityKind,
    apikey: ApiKey,
}

type QueueKey = (EntityId, Option<Stream>);

#[derive(Debug, Default)]
struct Mailbox {
    backlog: VecDeque<Envelope>,
    push: Option<mpsc::UnboundedSender<Envelope>>,
}

impl Mailbox {
    fn deliver(&mut self, envelope: Envelope) {
        if let Some(push) = &self.push {
            match push.send(envelope) {
                Ok(()) => return,
                Err(mpsc::error::SendError(envelope)) => {
                    // Consumer went away; fall back to polling semantics
                    self.push = None;
                    self.backlog.push_back(envelope);
                    return;
                }
            }
        }
        self.backlog.push_back(envelope);
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    connections_opened: usize,
    entities: HashMap<EntityId, Registration>,
    follows: Vec<FollowRequest>,
    bindings: HashMap<Exchange, BTreeSet<EntityId>>,
    queues: HashMap<QueueKey, Mailbox>,
    calls: Vec<CallRecord>,
    failures: Vec<FailureRule>,
    latency: Option<Duration>,
}

impl BrokerState {
    fn authenticate(&self, operation: Operation, creds: &Credentials) -> BrokerResult<()> {
        match self.entities.get(&creds.id) {
            None => Err(BrokerError::status(operation, 404, format!("unknown entity {}", creds.id))),
            Some(reg) if reg.apikey != creds.apikey => {
                Err(BrokerError::status(operation, 401, format!("bad apikey for {}", creds.id)))
            }
            Some(_) => Ok(()),
        }
    }

    fn require_entity(&self, operation: Operation, id: &EntityId) -> BrokerResult<()> {
        if self.entities.contains_key(id) {
            Ok(())
        } else {
            Err(BrokerError::status(operation, 404, format!("unknown entity {}", id)))
        }
    }

    fn has_approved(&self, requester: &EntityId, target: &EntityId, right: AccessRight) -> bool {
        self.follows.iter().any(|f| {
            &f.requester == requester
                && &f.target == target
                && f.permission == right
                && f.status == FollowStatus::Approved
        })
    }

    fn mailbox(&mut self, operation: Operation, key: &QueueKey) -> BrokerResult<&mut Mailbox> {
        self.queues.get_mut(key).ok_or_else(|| {
            let name = match &key.1 {
                Some(stream) => format!("{}.{}", key.0, stream),
                None => key.0.to_string(),
            };
            BrokerError::status(operation, 404, format!("no queue {}", name))
        })
    }
}

/// In-process broker with call log, failure injection and latency injection
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every entity-scoped call by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = Some(latency);
        self
    }

    /// Make `operation` fail with 503, optionally only for one subject
    pub fn fail_operation(&self, operation: Operation, subject: Option<EntityId>) {
        self.state.lock().failures.push(FailureRule { operation, subject });
    }

    /// Remove every injected failure
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Every call received so far, in arrival order
    pub fn call_log(&self) -> Vec<CallRecord> {
        self.state.lock().calls.clone()
    }

    /// Number of calls received so far
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Number of calls of one kind
    pub fn calls_of(&self, operation: Operation) -> usize {
        self.state.lock().calls.iter().filter(|c| c.operation == operation).count()
    }

    /// Number of connections handed out
    pub fn connections_opened(&self) -> usize {
        self.state.lock().connections_opened
    }

    /// Currently registered entities, sorted
    pub fn registered(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.state.lock().entities.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Kind an entity was registered with
    pub fn kind_of(&self, id: &EntityId) -> Option<EntityKind> {
        self.state.lock().entities.get(id).map(|r| r.kind)
    }

    /// Entities whose default queue receives `exchange`
    pub fn subscribers(&self, exchange: &Exchange) -> Vec<EntityId> {
        self.state
            .lock()
            .bindings
            .get(exchange)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every follow request ever created, oldest first
    pub fn follow_records(&self) -> Vec<FollowRequest> {
        self.state.lock().follows.clone()
    }

    /// Messages waiting in a queue
    pub fn backlog(&self, id: &EntityId, stream: Option<&Stream>) -> usize {
        self.state
            .lock()
            .queues
            .get(&(id.clone(), stream.cloned()))
            .map(|m| m.backlog.len())
            .unwrap_or(0)
    }

    /// Record the call, then apply injected failures
    fn enter(&self, connection: usize, operation: Operation, subject: &EntityId) -> BrokerResult<()> {
        let mut state = self.state.lock();
        state.calls.push(CallRecord { connection, operation, subject: subject.clone() });
        let injected = state.failures.iter().any(|rule| {
            rule.operation == operation && rule.subject.as_ref().map_or(true, |s| s == subject)
        });
        if injected {
            debug!(%operation, %subject, "Injected broker failure");
            return Err(BrokerError::status(operation, 503, "injected failure"));
        }
        Ok(())
    }

    async fn delay(&self) {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl BrokerConnector for InMemoryBroker {
    fn connect(&self) -> BrokerResult<Box<dyn BrokerClient>> {
        let mut state = self.state.lock();
        state.connections_opened += 1;
        let id = state.connections_opened;
        trace!(connection = id, "Opened in-memory broker connection");
        Ok(Box::new(InMemoryConnection { broker: self.clone(), id }))
    }
}

/// One connection to an [`InMemoryBroker`]
#[derive(Debug)]
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    id: usize,
}

#[async_trait]
impl BrokerClient for InMemoryConnection {
    async fn register(&self, id: &EntityId, kind: EntityKind) -> BrokerResult<ApiKey> {
        self.broker.enter(self.id, Operation::Register, id)?;
        let mut state = self.broker.state.lock();
        if state.entities.contains_key(id) {
            return Err(BrokerError::status(Operation::Register, 409, format!("{} already registered", id)));
        }
        let apikey = ApiKey::generate();
        state.entities.insert(id.clone(), Registration { kind, apikey: apikey.clone() });
        state.queues.insert((id.clone(), None), Mailbox::default());
        state.queues.insert((id.clone(), Some(Stream::Configure)), Mailbox::default());
        debug!(entity = %id, %kind, "Registered entity");
        Ok(apikey)
    }

    async fn deregister(&self, id: &EntityId) -> BrokerResult<()> {
        self.broker.enter(self.id, Operation::Deregister, id)?;
        let mut state = self.broker.state.lock();
        if state.entities.remove(id).is_none() {
            return Err(BrokerError::status(Operation::Deregister, 404, format!("unknown entity {}", id)));
        }
        state.queues.retain(|(owner, _), _| owner != id);
        state.bindings.retain(|exchange, _| &exchange.owner != id);
        for subscribers in state.bindings.values_mut() {
            subscribers.remove(id);
        }
        state.follows.retain(|f| &f.requester != id && &f.target != id);
        debug!(entity = %id, "Deregistered entity");
        Ok(())
    }

    async fn follow(&self, creds: &Credentials, target: &EntityId, mode: PermissionMode) -> BrokerResult<()> {
        self.broker.delay().await;
        self.broker.enter(self.id, Operation::Follow, &creds.id)?;
        let mut state = self.broker.state.lock();
        state.authenticate(Operation::Follow, creds)?;
        state.require_entity(Operation::Follow, target)?;
        for &right in mode.rights() {
            state.follows.push(FollowRequest {
                follow_id: FollowId::new(),
                requester: creds.id.clone(),
                target: target.clone(),
                permission: right,
                status: FollowStatus::Pending,
            });
        }
        Ok(())
    }

    async fn follow_requests(&self, creds: &Credentials) -> BrokerResult<Vec<FollowRequest>> {
        self.broker.delay().await;
        self.broker.enter(self.id, Operation::FollowRequests, &creds.id)?;
        let state = self.broker.state.lock();
        state.authenticate(Operation::FollowRequests, creds)?;
        Ok(state
            .follows
            .iter()
            .filter(|f| f.target == creds.id && f.status == FollowStatus::Pending)
            .cloned()
            .collect())
    }

    async fn share(&self, creds: &Credentials, follow_id: FollowId) -> BrokerResult<()> {
        self.broker.delay().await;
        self.broker.enter(self.id, Operation::Share, &creds.id)?;
        let mut state = self.broker.state.lock();
        state.authenticate(Operation::Share, creds)?;
        let request = state
            .follows
            .iter_mut()
            .find(|f| f.follow_id == follow_id)
            .ok_or_else(|| BrokerError::status(Operation::Share, 404, format!("no follow request {}", follow_id)))?;
        if request.target != creds.id {
            return Err(BrokerError::status(
                Operation::Share,
                403,
                format!("{} is not addressed to {}", follow_id, creds.id),
            ));
        }
        if request.status == FollowStatus::Approved {
            return Err(BrokerError::status(Operation::Share, 409, format!("{} already shared", follow_id)));
        }
        request.status = FollowStatus::Approved;
        Ok(())
    }

    async fn follow_status(&self, creds: &Credentials) -> BrokerResult<Vec<FollowRequest>> {
        self.broker.delay().await;
        self.broker.enter(self.id, Operation::FollowStatus, &creds.id)?;
        let state = self.broker.state.lock();
        state.authenticate(Operation::FollowStatus, creds)?;
        Ok(state.follows.iter().filter(|f| f.requester == creds.id).cloned().collect())
    }

    async fn bind(&self, creds: &Credentials, exchange: &Exchange) -> BrokerResult<()> {
        self.broker.delay().await;
        self.broker.enter(self.id, Operation::Bind, &creds.id)?;
        let mut state = self.broker.state.lock();
        state.authenticate(Operation::Bind, creds)?;
        state.require_entity(Operation::Bind, &exchange.owner)?;
        let allowed = match exchange.stream {
            Stream::Public => true,
            Stream::Configure => false,
            _ => {
                exchange.owner == creds.id
                    || state.has_approved(&creds.id, &exchange.owner, AccessRight::Read)
            }
        };
        if !allowed {
            return Err(BrokerError::status(
                Operation::Bind,
                403,
                format!("{} may not bind to {}", creds.id, exchange),
            ));
        }
        state.bindings.entry(exchange.clone()).or_default().insert(creds.id.clone());
        Ok(())
    }

    async fn unbind(&self, creds: &Credentials, exchange: &Exchange) -> BrokerResult<()> {
        self.broker.delay().await;
        self.broker.enter(self.id, Operation::Unbind, &creds.id)?;
        let mut state = self.broker.state.lock();
        state.authenticate(Operation::Unbind, creds)?;
        let removed = state
            .bindings
            .get_mut(exchange)
            .map(|subscribers| subscribers.remove(&creds.id))
            .unwrap_or(false);
        if !removed {
            return Err(BrokerError::status(
                Operation::Unbind,
                404,
                format!("{} is not bound to {}", creds.id, exchange),
            ));
        }
        Ok(())
    }

    async fn publish(&self, creds: &Credentials, exchange: &Exchange, payload: &Value) -> BrokerResult<()> {
        self.broker.delay().await;
        self.broker.enter(self.id, Operation::Publish, &creds.id)?;
        let mut state = self.broker.state.lock();
        state.authenticate(Operation::Publish, creds)?;
        state.require_entity(Operation::Publish, &exchange.owner)?;

        let envelope = Envelope {
            sender: creds.id.clone(),
            stream: Some(exchange.stream.clone()),
            payload: payload.clone(),
        };

        if exchange.stream == Stream::Configure {
            if exchange.owner != creds.id
                && !state.has_approved(&creds.id, &exchange.owner, AccessRight::Write)
            {
                return Err(BrokerError::status(
                    Operation::Publish,
                    403,
                    format!("{} may not command {}", creds.id, exchange.owner),
                ));
            }
            let key = (exchange.owner.clone(), Some(Stream::Configure));
            state.mailbox(Operation::Publish, &key)?.deliver(envelope);
            return Ok(());
        }

        if exchange.owner != creds.id {
            return Err(BrokerError::status(
                Operation::Publish,
                403,
                format!("{} may not publish to {}", creds.id, exchange),
            ));
        }

        let subscribers: Vec<EntityId> = state
            .bindings
            .get(exchange)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for subscriber in subscribers {
            if let Some(mailbox) = state.queues.get_mut(&(subscriber, None)) {
                mailbox.deliver(envelope.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        creds: &Credentials,
        stream: Option<&Stream>,
        max_entries: usize,
    ) -> BrokerResult<Vec<Envelope>> {
        self.broker.delay().await;
        self.broker.enter(self.id, Operation::Subscribe, &creds.id)?;
        let mut state = self.broker.state.lock();
        state.authenticate(Operation::Subscribe, creds)?;
        let mailbox = state.mailbox(Operation::Subscribe, &(creds.id.clone(), stream.cloned()))?;
        let count = max_entries.min(mailbox.backlog.len());
        Ok(mailbox.backlog.drain(..count).collect())
    }

    async fn open_stream(
        &self,
        creds: &Credentials,
        stream: Option<&Stream>,
    ) -> BrokerResult<mpsc::UnboundedReceiver<Envelope>> {
        self.broker.delay().await;
        self.broker.enter(self.id, Operation::OpenStream, &creds.id)?;
        let mut state = self.broker.state.lock();
        state.authenticate(Operation::OpenStream, creds)?;
        let mailbox = state.mailbox(Operation::OpenStream, &(creds.id.clone(), stream.cloned()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        for envelope in mailbox.backlog.drain(..) {
            // Receiver is alive in this scope
            let _ = tx.send(envelope);
        }
        mailbox.push = Some(tx);
        Ok(rx)
    }
}
