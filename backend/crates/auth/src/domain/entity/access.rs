//! Access Control Entities
//!
//! Roles and permissions are flat catalogs joined by explicit grants. The
//! role `level` is informational: no role inherits another role's grants.

use chrono::{DateTime, Utc};
use kernel::id::{AuditEntryId, PermissionId, PrincipalId, RoleId};
use serde::{Deserialize, Serialize};

use crate::domain::value_object::permission_key::PermissionKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub level: i16,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub id: PermissionId,
    pub key: PermissionKey,
    pub description: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePermissionGrant {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub is_granted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Granted,
    Denied,
}

impl AuditResult {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }

    pub fn from_granted(granted: bool) -> Self {
        if granted { Self::Granted } else { Self::Denied }
    }
}

/// Caller-supplied context for a permission check
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Skip the audit entry for this check
    pub suppress_audit: bool,
}

impl AccessContext {
    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn unaudited() -> Self {
        Self {
            suppress_audit: true,
            ..Self::default()
        }
    }
}

/// Append-only audit row
#[derive(Debug, Clone)]
pub struct PermissionAuditEntry {
    pub id: AuditEntryId,
    pub principal_id: PrincipalId,
    pub permission_key: String,
    pub result: AuditResult,
    pub role_used: Option<String>,
    pub details: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PermissionAuditEntry {
    pub fn record(
        principal_id: PrincipalId,
        permission_key: &str,
        granted: bool,
        role_used: Option<String>,
        details: Option<String>,
        context: &AccessContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            principal_id,
            permission_key: permission_key.to_string(),
            result: AuditResult::from_granted(granted),
            role_used,
            details,
            resource_type: context.resource_type.clone(),
            resource_id: context.resource_id.clone(),
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            created_at: now,
        }
    }
}

/// Resource types guarded against deleting their last record.
/// Each maps to a fixed table; callers never supply identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastRecordResource {
    ServiceLocation,
    Client,
}

impl LastRecordResource {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ServiceLocation => "service_location",
            Self::Client => "client",
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::ServiceLocation => "service location",
            Self::Client => "client",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastRecordDecision {
    pub allowed: bool,
    pub count: u64,
    pub message: Option<String>,
}

impl LastRecordDecision {
    pub fn allow(count: u64) -> Self {
        Self {
            allowed: true,
            count,
            message: None,
        }
    }

    pub fn deny(count: u64, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            count,
            message: Some(message.into()),
        }
    }
}
