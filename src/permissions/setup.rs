//! Entity permission setup protocol
//!
//! Registers every entity, then for each permission runs
//! follow → share → follow-status check → bind. Any failure after validation
//! deregisters every entity registered by this call before the error is
//! returned, so a failed setup leaves nothing behind on the broker except
//! entities whose deregistration itself failed (reported as orphaned).

use super::description::{DescriptionError, Permission, SetupPlan, SystemDescription};
use crate::broker::{BrokerClient, BrokerError, Credentials, Exchange};
use crate::types::{ApiKey, EntityId, FollowStatus};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Keys issued to every registered entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisteredEntities {
    keys: BTreeMap<EntityId, ApiKey>,
}

impl RegisteredEntities {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key
    pub fn insert(&mut self, id: EntityId, apikey: ApiKey) {
        self.keys.insert(id, apikey);
    }

    /// Key of one entity
    pub fn get(&self, id: &EntityId) -> Option<&ApiKey> {
        self.keys.get(id)
    }

    /// Id and key of one entity
    pub fn credentials(&self, id: &EntityId) -> Option<Credentials> {
        self.keys.get(id).map(|key| Credentials::new(id.clone(), key.clone()))
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<EntityId> {
        self.keys.keys().cloned().collect()
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate over `(id, key)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &ApiKey)> {
        self.keys.iter()
    }
}

impl Serialize for RegisteredEntities {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.keys.iter().map(|(id, key)| (id.as_str(), key.expose())))
    }
}

/// Part of a permission's handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionAction {
    /// Requester asks for access
    Follow,
    /// Target lists its pending requests
    FollowRequests,
    /// Target approves a request
    Share,
    /// Requester checks approvals
    FollowStatus,
    /// Requester attaches to the target's protected stream
    Bind,
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionAction::Follow => "follow",
            PermissionAction::FollowRequests => "follow-requests",
            PermissionAction::Share => "share",
            PermissionAction::FollowStatus => "follow-status",
            PermissionAction::Bind => "bind",
        };
        f.write_str(name)
    }
}

/// Where a setup run stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStep {
    /// Registering one entity
    Register {
        /// Entity being registered
        entity: EntityId,
    },
    /// One action of one permission
    Permission {
        /// Position in the description
        index: usize,
        /// Requesting entity
        requester: EntityId,
        /// Target entity
        target: EntityId,
        /// Failed action
        action: PermissionAction,
    },
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStep::Register { entity } => write!(f, "register {}", entity),
            SetupStep::Permission { index, requester, target, action } => {
                write!(f, "permission #{} ({} -> {}) {}", index, requester, target, action)
            }
        }
    }
}

/// Outcome of deregistering a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeregistrationReport {
    /// Entities removed from the broker
    pub deregistered: Vec<EntityId>,
    /// Entities the broker refused to remove
    pub failed: Vec<(EntityId, BrokerError)>,
}

impl DeregistrationReport {
    /// Whether every entity was removed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Cleanup performed after a failed setup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rollback {
    /// Entities deregistered by the cleanup
    pub rolled_back: Vec<EntityId>,
    /// Entities still registered because their deregistration failed
    pub orphaned: Vec<EntityId>,
}

impl From<DeregistrationReport> for Rollback {
    fn from(report: DeregistrationReport) -> Self {
        Self {
            rolled_back: report.deregistered,
            orphaned: report.failed.into_iter().map(|(id, _)| id).collect(),
        }
    }
}

impl fmt::Display for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ids: &[EntityId]| ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ");
        write!(f, "rolled back [{}]", join(&self.rolled_back))?;
        if !self.orphaned.is_empty() {
            write!(f, ", orphaned [{}]", join(&self.orphaned))?;
        }
        Ok(())
    }
}

/// Errors returned by [`setup_entities`]
#[derive(Debug, Clone, Error)]
pub enum SetupError {
    /// The description was rejected; no broker call was made
    #[error("invalid system description: {0}")]
    InvalidDescription(#[from] DescriptionError),

    /// A broker call failed
    #[error("setup failed at {step}: {source}; {rollback}")]
    StepFailed {
        /// Failed step
        step: SetupStep,
        /// Broker error
        #[source]
        source: BrokerError,
        /// Cleanup performed
        rollback: Rollback,
    },

    /// The broker answered successfully but not as the protocol requires
    #[error("protocol violation at {step}: {detail}; {rollback}")]
    ProtocolViolation {
        /// Failed step
        step: SetupStep,
        /// What was wrong
        detail: String,
        /// Cleanup performed
        rollback: Rollback,
    },
}

impl SetupError {
    /// Step that failed, if any broker work was attempted
    pub fn step(&self) -> Option<&SetupStep> {
        match self {
            SetupError::InvalidDescription(_) => None,
            SetupError::StepFailed { step, .. } | SetupError::ProtocolViolation { step, .. } => Some(step),
        }
    }

    /// Cleanup performed, if any
    pub fn rollback(&self) -> Option<&Rollback> {
        match self {
            SetupError::InvalidDescription(_) => None,
            SetupError::StepFailed { rollback, .. } | SetupError::ProtocolViolation { rollback, .. } => {
                Some(rollback)
            }
        }
    }

    /// Protocol violations point at a broken broker, not a transient fault
    pub fn is_fatal(&self) -> bool {
        matches!(self, SetupError::ProtocolViolation { .. })
    }
}

/// Failure before cleanup has run
enum StepFailure {
    Broker(SetupStep, BrokerError),
    Protocol(SetupStep, String),
}

impl StepFailure {
    fn with_rollback(self, rollback: Rollback) -> SetupError {
        match self {
            StepFailure::Broker(step, source) => SetupError::StepFailed { step, source, rollback },
            StepFailure::Protocol(step, detail) => SetupError::ProtocolViolation { step, detail, rollback },
        }
    }
}

/// Validate `description`, register its entities and establish its permissions
pub async fn setup_entities(
    client: &dyn BrokerClient,
    description: &SystemDescription,
) -> Result<RegisteredEntities, SetupError> {
    let plan = description.validate()?;
    setup_plan(client, &plan).await
}

/// Register and wire an already validated plan
#[instrument(skip_all, fields(entities = plan.entities.len(), permissions = plan.permissions.len()))]
pub async fn setup_plan(client: &dyn BrokerClient, plan: &SetupPlan) -> Result<RegisteredEntities, SetupError> {
    let mut registered = RegisteredEntities::new();

    for entity in &plan.entities {
        match client.register(&entity.id, entity.kind).await {
            Ok(apikey) => {
                debug!(entity = %entity.id, kind = %entity.kind, "Registered");
                registered.insert(entity.id.clone(), apikey);
            }
            Err(err) => {
                let failure = StepFailure::Broker(SetupStep::Register { entity: entity.id.clone() }, err);
                return Err(abort(client, &registered, failure).await);
            }
        }
    }
    info!(count = registered.len(), "Registered all entities");

    for (index, permission) in plan.permissions.iter().enumerate() {
        if let Err(failure) = establish_permission(client, &registered, index, permission).await {
            return Err(abort(client, &registered, failure).await);
        }
        debug!(index, requester = %permission.requester, target = %permission.target, mode = %permission.mode, "Permission established");
    }
    info!(count = plan.permissions.len(), "Established all permissions");

    Ok(registered)
}

async fn abort(client: &dyn BrokerClient, registered: &RegisteredEntities, failure: StepFailure) -> SetupError {
    match &failure {
        StepFailure::Broker(step, err) => error!(%step, error = %err, "Setup failed, rolling back"),
        StepFailure::Protocol(step, detail) => error!(%step, detail, "Setup protocol violated, rolling back"),
    }
    let report = deregister_entities(client, &registered.ids()).await;
    failure.with_rollback(report.into())
}

async fn establish_permission(
    client: &dyn BrokerClient,
    registered: &RegisteredEntities,
    index: usize,
    permission: &Permission,
) -> Result<(), StepFailure> {
    let step = |action| SetupStep::Permission {
        index,
        requester: permission.requester.clone(),
        target: permission.target.clone(),
        action,
    };
    let (requester, target) = match (
        registered.credentials(&permission.requester),
        registered.credentials(&permission.target),
    ) {
        (Some(r), Some(t)) => (r, t),
        _ => {
            return Err(StepFailure::Protocol(
                step(PermissionAction::Follow),
                "endpoint was not registered".to_string(),
            ))
        }
    };

    client
        .follow(&requester, &target.id, permission.mode)
        .await
        .map_err(|e| StepFailure::Broker(step(PermissionAction::Follow), e))?;

    let pending = client
        .follow_requests(&target)
        .await
        .map_err(|e| StepFailure::Broker(step(PermissionAction::FollowRequests), e))?;

    // Oldest matching request per right
    let rights = permission.mode.rights();
    let mut to_share = Vec::with_capacity(rights.len());
    for &right in rights {
        let found = pending.iter().find(|r| {
            r.requester == requester.id && r.permission == right && !to_share.contains(&r.follow_id)
        });
        match found {
            Some(request) => to_share.push(request.follow_id),
            None => {
                return Err(StepFailure::Protocol(
                    step(PermissionAction::FollowRequests),
                    format!(
                        "expected {} pending request(s) from {}, no {} request among {} pending",
                        rights.len(),
                        requester.id,
                        right,
                        pending.len()
                    ),
                ))
            }
        }
    }

    for follow_id in to_share {
        client
            .share(&target, follow_id)
            .await
            .map_err(|e| StepFailure::Broker(step(PermissionAction::Share), e))?;
    }

    let status = client
        .follow_status(&requester)
        .await
        .map_err(|e| StepFailure::Broker(step(PermissionAction::FollowStatus), e))?;
    let towards_target: Vec<_> = status.iter().filter(|r| r.target == target.id).collect();
    let unapproved = towards_target.iter().filter(|r| r.status != FollowStatus::Approved).count();
    if towards_target.len() < rights.len() || unapproved > 0 {
        return Err(StepFailure::Protocol(
            step(PermissionAction::FollowStatus),
            format!(
                "{} of {} request(s) towards {} not approved",
                unapproved,
                towards_target.len(),
                target.id
            ),
        ));
    }

    if permission.mode.includes_read() {
        client
            .bind(&requester, &Exchange::protected(&target.id))
            .await
            .map_err(|e| StepFailure::Broker(step(PermissionAction::Bind), e))?;
    }

    Ok(())
}

/// Deregister every entity in `ids`, continuing past failures
pub async fn deregister_entities(client: &dyn BrokerClient, ids: &[EntityId]) -> DeregistrationReport {
    let mut report = DeregistrationReport::default();
    for id in ids {
        match client.deregister(id).await {
            Ok(()) => report.deregistered.push(id.clone()),
            Err(err) => {
                warn!(entity = %id, error = %err, "Deregistration failed");
                report.failed.push((id.clone(), err));
            }
        }
    }
    if !report.deregistered.is_empty() {
        info!(count = report.deregistered.len(), "Deregistered entities");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    #[test]
    fn test_step_display() {
        let step = SetupStep::Permission {
            index: 2,
            requester: id("app0"),
            target: id("dev1"),
            action: PermissionAction::Share,
        };
        assert_eq!(step.to_string(), "permission #2 (app0 -> dev1) share");
        assert_eq!(SetupStep::Register { entity: id("dev0") }.to_string(), "register dev0");
    }

    #[test]
    fn test_rollback_display_lists_orphans() {
        let rollback = Rollback { rolled_back: vec![id("dev0"), id("app0")], orphaned: vec![id("dev1")] };
        assert_eq!(rollback.to_string(), "rolled back [dev0, app0], orphaned [dev1]");
    }

    #[test]
    fn test_registered_entities_serialize_as_map() {
        let mut registered = RegisteredEntities::new();
        registered.insert(id("dev0"), ApiKey::new("k0"));
        let json = serde_json::to_value(&registered).unwrap();
        assert_eq!(json, serde_json::json!({"dev0": "k0"}));
    }

    #[test]
    fn test_invalid_description_is_not_fatal_and_has_no_rollback() {
        let err = SetupError::from(DescriptionError::InvalidEntityId("X".into()));
        assert!(!err.is_fatal());
        assert!(err.rollback().is_none());
        assert!(err.step().is_none());
    }
}
