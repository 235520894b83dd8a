//! Declarative system descriptions
//!
//! A [`SystemDescription`] is the raw input: entity names, permission triples
//! and optional kinds, all as plain strings. [`SystemDescription::validate`]
//! turns it into a typed [`SetupPlan`] or explains why it cannot.

use crate::types::{ConfigError, EntityId, EntityKind, PermissionMode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// `[requester, target, mode]` exactly as written in the description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecl(pub String, pub String, pub String);

/// Input shape of the setup protocol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemDescription {
    /// Entity names in registration order
    pub entities: Vec<String>,
    /// Permissions in setup order
    #[serde(default)]
    pub permissions: Vec<PermissionDecl>,
    /// Explicit kinds; entities not listed are inferred
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kinds: BTreeMap<String, EntityKind>,
}

/// Reasons a description is rejected before any broker call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptionError {
    /// Entity name is not `[a-z0-9]+`
    #[error("entity id {0:?} must be non-empty and contain only lowercase letters and digits")]
    InvalidEntityId(String),

    /// Entity declared twice
    #[error("entity {0} is declared more than once")]
    DuplicateEntity(String),

    /// Permission names an undeclared entity
    #[error("permission #{index} refers to undeclared entity {id:?}")]
    UnknownEndpoint {
        /// Position of the permission
        index: usize,
        /// Offending name
        id: String,
    },

    /// Permission mode is not `read`, `write` or `read-write`
    #[error("permission #{index} has invalid mode {mode:?}")]
    InvalidMode {
        /// Position of the permission
        index: usize,
        /// Offending mode
        mode: String,
    },

    /// Kind given for an undeclared entity
    #[error("kind given for undeclared entity {0:?}")]
    UnknownKindEntry(String),
}

/// A validated entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntity {
    /// Entity name
    pub id: EntityId,
    /// Declared or inferred kind
    pub kind: EntityKind,
}

/// A validated permission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    /// Entity asking for access, usually an app
    pub requester: EntityId,
    /// Entity granting access, usually a device
    pub target: EntityId,
    /// Access requested
    pub mode: PermissionMode,
}

/// Typed, validated form of a [`SystemDescription`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupPlan {
    /// Entities in registration order
    pub entities: Vec<PlannedEntity>,
    /// Permissions in setup order
    pub permissions: Vec<Permission>,
}

impl SystemDescription {
    /// Create an empty description
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an entity whose kind is inferred
    pub fn with_entity(mut self, id: impl Into<String>) -> Self {
        self.entities.push(id.into());
        self
    }

    /// Declare an entity with an explicit kind
    pub fn with_kind(mut self, id: impl Into<String>, kind: EntityKind) -> Self {
        let id = id.into();
        self.entities.push(id.clone());
        self.kinds.insert(id, kind);
        self
    }

    /// Add a permission
    pub fn with_permission(
        mut self,
        requester: impl Into<String>,
        target: impl Into<String>,
        mode: impl Into<String>,
    ) -> Self {
        self.permissions.push(PermissionDecl(requester.into(), target.into(), mode.into()));
        self
    }

    /// `devices` devices and `apps` apps where every app follows every device
    pub fn fully_connected(devices: usize, apps: usize, mode: PermissionMode) -> Self {
        let mut description = Self::new();
        for d in 0..devices {
            description = description.with_kind(format!("dev{}", d), EntityKind::Device);
        }
        for a in 0..apps {
            description = description.with_kind(format!("app{}", a), EntityKind::App);
        }
        for a in 0..apps {
            for d in 0..devices {
                description = description.with_permission(format!("app{}", a), format!("dev{}", d), mode.as_str());
            }
        }
        description
    }

    /// Load a description from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Check every name, mode and endpoint, then infer kinds
    ///
    /// An entity without an explicit kind is an app if it requests any
    /// permission and a device otherwise.
    pub fn validate(&self) -> Result<SetupPlan, DescriptionError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(self.entities.len());
        for raw in &self.entities {
            let id = EntityId::new(raw.as_str())
                .map_err(|_| DescriptionError::InvalidEntityId(raw.clone()))?;
            if !seen.insert(raw.as_str()) {
                return Err(DescriptionError::DuplicateEntity(raw.clone()));
            }
            ids.push(id);
        }

        if let Some(stray) = self.kinds.keys().find(|k| !seen.contains(k.as_str())) {
            return Err(DescriptionError::UnknownKindEntry(stray.clone()));
        }

        let mut permissions = Vec::with_capacity(self.permissions.len());
        for (index, PermissionDecl(requester, target, mode)) in self.permissions.iter().enumerate() {
            for endpoint in [requester, target] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(DescriptionError::UnknownEndpoint { index, id: endpoint.clone() });
                }
            }
            let mode: PermissionMode = mode
                .parse()
                .map_err(|_| DescriptionError::InvalidMode { index, mode: mode.clone() })?;
            permissions.push(Permission {
                requester: EntityId::new(requester.as_str())
                    .map_err(|_| DescriptionError::InvalidEntityId(requester.clone()))?,
                target: EntityId::new(target.as_str())
                    .map_err(|_| DescriptionError::InvalidEntityId(target.clone()))?,
                mode,
            });
        }

        let entities = ids
            .into_iter()
            .map(|id| {
                let kind = self.kinds.get(id.as_str()).copied().unwrap_or_else(|| {
                    if permissions.iter().any(|p| p.requester == id) {
                        EntityKind::App
                    } else {
                        EntityKind::Device
                    }
                });
                PlannedEntity { id, kind }
            })
            .collect();

        Ok(SetupPlan { entities, permissions })
    }
}

impl SetupPlan {
    /// Kind of a planned entity
    pub fn kind_of(&self, id: &EntityId) -> Option<EntityKind> {
        self.entities.iter().find(|e| &e.id == id).map(|e| e.kind)
    }

    /// Entities of one kind, in declaration order
    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &EntityId> + '_ {
        self.entities.iter().filter(move |e| e.kind == kind).map(|e| &e.id)
    }

    /// Targets `requester` may send commands to
    pub fn controlled_by(&self, requester: &EntityId) -> Vec<EntityId> {
        let mut targets: Vec<EntityId> = self
            .permissions
            .iter()
            .filter(|p| &p.requester == requester && p.mode.includes_write())
            .map(|p| p.target.clone())
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }

    /// Targets whose data `requester` receives
    pub fn readable_by(&self, requester: &EntityId) -> Vec<EntityId> {
        let mut targets: Vec<EntityId> = self
            .permissions
            .iter()
            .filter(|p| &p.requester == requester && p.mode.includes_read())
            .map(|p| p.target.clone())
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }
}
