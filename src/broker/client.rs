//! Broker client contract
//!
//! The testbed talks to the middleware only through [`BrokerClient`]. Every
//! interface and the setup protocol obtain their own connection from a
//! [`BrokerConnector`], so no two workers ever share a client.

use crate::messaging::Envelope;
use crate::types::{AccessRight, ApiKey, EntityId, EntityKind, FollowId, FollowStatus, PermissionMode, Stream};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Broker operations, named after the middleware's HTTP endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Create an entity
    Register,
    /// Delete an entity
    Deregister,
    /// Ask for access to another entity
    Follow,
    /// List requests addressed to the caller
    FollowRequests,
    /// Approve a follow request
    Share,
    /// List the caller's own requests
    FollowStatus,
    /// Attach the caller's queue to an exchange
    Bind,
    /// Detach the caller's queue from an exchange
    Unbind,
    /// Publish to an exchange
    Publish,
    /// Pop messages from a queue
    Subscribe,
    /// Attach a push consumer to a queue
    OpenStream,
}

/// HTTP surface of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// HTTP method
    pub method: &'static str,
    /// Path template
    pub path: &'static str,
    /// Status code the middleware returns on success
    pub success: u16,
}

impl Operation {
    /// Endpoint this operation maps to
    pub fn endpoint(self) -> Endpoint {
        let (method, path, success) = match self {
            Operation::Register => ("POST", "/register", 201),
            Operation::Deregister => ("DELETE", "/register", 200),
            Operation::Follow => ("POST", "/follow", 202),
            Operation::FollowRequests => ("GET", "/follow-requests", 200),
            Operation::Share => ("POST", "/share", 200),
            Operation::FollowStatus => ("GET", "/follow-status", 200),
            Operation::Bind => ("GET", "/bind", 200),
            Operation::Unbind => ("GET", "/unbind", 200),
            Operation::Publish => ("POST", "/publish/{exchange}", 202),
            Operation::Subscribe => ("GET", "/subscribe/{id}/{max_entries}", 200),
            Operation::OpenStream => ("GET", "/subscribe/{id}/stream", 200),
        };
        Endpoint { method, path, success }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoint = self.endpoint();
        write!(f, "{} {}", endpoint.method, endpoint.path)
    }
}

/// Errors returned by broker calls
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    /// The middleware answered with something other than the success code
    #[error("{operation} returned {status}: {detail}")]
    UnexpectedStatus {
        /// Failed operation
        operation: Operation,
        /// Returned status code
        status: u16,
        /// Response body or reason
        detail: String,
    },

    /// The call never got an answer
    #[error("{operation} transport failure: {detail}")]
    Transport {
        /// Failed operation
        operation: Operation,
        /// Underlying cause
        detail: String,
    },

    /// The answer could not be decoded
    #[error("{operation} response could not be decoded: {detail}")]
    Decode {
        /// Failed operation
        operation: Operation,
        /// Decoder message
        detail: String,
    },
}

impl BrokerError {
    /// Create an unexpected status error
    pub fn status(operation: Operation, status: u16, detail: impl Into<String>) -> Self {
        Self::UnexpectedStatus { operation, status, detail: detail.into() }
    }

    /// Create a transport error
    pub fn transport(operation: Operation, detail: impl Into<String>) -> Self {
        Self::Transport { operation, detail: detail.into() }
    }

    /// Operation that failed
    pub fn operation(&self) -> Operation {
        match self {
            BrokerError::UnexpectedStatus { operation, .. }
            | BrokerError::Transport { operation, .. }
            | BrokerError::Decode { operation, .. } => *operation,
        }
    }

    /// Returned status code, if the middleware answered
    pub fn status_code(&self) -> Option<u16> {
        match self {
            BrokerError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for broker calls
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Identity presented on every entity-scoped call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Entity name
    pub id: EntityId,
    /// Key issued at registration
    pub apikey: ApiKey,
}

impl Credentials {
    /// Pair an entity with its key
    pub fn new(id: EntityId, apikey: ApiKey) -> Self {
        Self { id, apikey }
    }
}

/// An entity's stream as a publish/bind target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Exchange {
    /// Entity owning the stream
    pub owner: EntityId,
    /// Stream name
    pub stream: Stream,
}

impl Exchange {
    /// Exchange for `owner.stream`
    pub fn new(owner: EntityId, stream: Stream) -> Self {
        Self { owner, stream }
    }

    /// `owner.protected`, where device data flows
    pub fn protected(owner: &EntityId) -> Self {
        Self::new(owner.clone(), Stream::Protected)
    }

    /// `owner.configure`, where commands flow
    pub fn configure(owner: &EntityId) -> Self {
        Self::new(owner.clone(), Stream::Configure)
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.stream)
    }
}

/// A single follow request as reported by the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FollowRequest {
    /// Broker-assigned id, used by `share`
    pub follow_id: FollowId,
    /// Entity asking for access
    #[serde(rename = "from")]
    pub requester: EntityId,
    /// Entity being followed
    #[serde(rename = "to")]
    pub target: EntityId,
    /// Direction of access requested
    pub permission: AccessRight,
    /// Current state
    pub status: FollowStatus,
}

/// Connection to the middleware
///
/// `register` and `deregister` are administrative; every other call acts on
/// behalf of the entity in `creds`. Implementations report any non-success
/// answer as [`BrokerError`] and never retry.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Register an entity and return its key
    async fn register(&self, id: &EntityId, kind: EntityKind) -> BrokerResult<ApiKey>;

    /// Remove an entity with its queues, bindings and follow records
    async fn deregister(&self, id: &EntityId) -> BrokerResult<()>;

    /// Ask `target` for access; read-write creates two requests
    async fn follow(&self, creds: &Credentials, target: &EntityId, mode: PermissionMode) -> BrokerResult<()>;

    /// Pending requests addressed to the caller, oldest first
    async fn follow_requests(&self, creds: &Credentials) -> BrokerResult<Vec<FollowRequest>>;

    /// Approve one request addressed to the caller
    async fn share(&self, creds: &Credentials, follow_id: FollowId) -> BrokerResult<()>;

    /// Requests the caller has made, oldest first
    async fn follow_status(&self, creds: &Credentials) -> BrokerResult<Vec<FollowRequest>>;

    /// Route `exchange` into the caller's default queue
    async fn bind(&self, creds: &Credentials, exchange: &Exchange) -> BrokerResult<()>;

    /// Undo a [`bind`](Self::bind)
    async fn unbind(&self, creds: &Credentials, exchange: &Exchange) -> BrokerResult<()>;

    /// Publish a payload to an exchange
    async fn publish(&self, creds: &Credentials, exchange: &Exchange, payload: &Value) -> BrokerResult<()>;

    /// Pop up to `max_entries` messages; `stream: None` reads the default queue
    async fn subscribe(
        &self,
        creds: &Credentials,
        stream: Option<&Stream>,
        max_entries: usize,
    ) -> BrokerResult<Vec<Envelope>>;

    /// Receive a queue's messages as they arrive instead of polling
    async fn open_stream(
        &self,
        creds: &Credentials,
        stream: Option<&Stream>,
    ) -> BrokerResult<mpsc::UnboundedReceiver<Envelope>>;
}

/// Opens independent broker connections
pub trait BrokerConnector: Send + Sync {
    /// Open a new connection
    fn connect(&self) -> BrokerResult<Box<dyn BrokerClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_match_middleware_surface() {
        assert_eq!(Operation::Register.endpoint().success, 201);
        assert_eq!(Operation::Follow.endpoint().success, 202);
        assert_eq!(Operation::Publish.endpoint().success, 202);
        assert_eq!(Operation::Share.endpoint().method, "POST");
        assert_eq!(Operation::Deregister.to_string(), "DELETE /register");
    }

    #[test]
    fn test_broker_error_accessors() {
        let err = BrokerError::status(Operation::Bind, 403, "no approved read");
        assert_eq!(err.operation(), Operation::Bind);
        assert_eq!(err.status_code(), Some(403));
        assert_eq!(err.to_string(), "GET /bind returned 403: no approved read");

        let err = BrokerError::transport(Operation::Publish, "connection reset");
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn test_follow_request_wire_names() {
        let request = FollowRequest {
            follow_id: FollowId::new(),
            requester: EntityId::new("app0").unwrap(),
            target: EntityId::new("dev0").unwrap(),
            permission: AccessRight::Write,
            status: FollowStatus::Approved,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["from"], "app0");
        assert_eq!(json["to"], "dev0");
        assert_eq!(json["permission"], "write");
        assert_eq!(json["status"], "approved");
        assert!(json["follow-id"].as_str().unwrap().starts_with("FOLLOW_"));
    }

    #[test]
    fn test_exchange_display() {
        let dev = EntityId::new("dev0").unwrap();
        assert_eq!(Exchange::protected(&dev).to_string(), "dev0.protected");
        assert_eq!(Exchange::configure(&dev).to_string(), "dev0.configure");
    }
}
