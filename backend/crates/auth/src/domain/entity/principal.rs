//! Principal Entity
//!
//! An authenticated actor: an employee (many roles) or a client (one role
//! string). Email is unique within a kind.

use chrono::{DateTime, Utc};
use kernel::id::{PrincipalId, RoleId};

use crate::domain::value_object::{
    email::Email, password::PasswordHash, principal_kind::PrincipalKind,
    principal_status::PrincipalStatus,
};

/// Role held by an employee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRef {
    pub id: RoleId,
    pub name: String,
}

/// Role membership, shaped by kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalRoles {
    Employee(Vec<RoleRef>),
    Client(String),
}

impl PrincipalRoles {
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::Employee(roles) => roles.iter().map(|r| r.name.clone()).collect(),
            Self::Client(role) => vec![role.clone()],
        }
    }

    pub fn holds(&self, name: &str) -> bool {
        match self {
            Self::Employee(roles) => roles.iter().any(|r| r.name == name),
            Self::Client(role) => role == name,
        }
    }
}

/// Why a principal may not sign in. Never rendered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligibility {
    Unverified,
    Suspended,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub id: PrincipalId,
    pub kind: PrincipalKind,
    pub email: Email,
    pub password_hash: PasswordHash,
    pub email_verified: bool,
    pub status: PrincipalStatus,
    pub roles: PrincipalRoles,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub password_changed_at: Option<DateTime<Utc>>,
    /// Explicit expiry; derived from the policy when absent
    pub password_expires_at: Option<DateTime<Utc>>,
    pub force_password_change: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    /// Self-service client, unverified until the email is confirmed
    pub fn new_client(
        email: Email,
        password_hash: PasswordHash,
        role: impl Into<String>,
        first_name: Option<String>,
        last_name: Option<String>,
        phone: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PrincipalId::new(),
            kind: PrincipalKind::Client,
            email,
            password_hash,
            email_verified: false,
            status: PrincipalStatus::Active,
            roles: PrincipalRoles::Client(role.into()),
            first_name,
            last_name,
            phone,
            password_changed_at: Some(now),
            password_expires_at: None,
            force_password_change: false,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Employee provisioned by an administrator
    pub fn new_employee(
        email: Email,
        password_hash: PasswordHash,
        roles: Vec<RoleRef>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PrincipalId::new(),
            kind: PrincipalKind::Employee,
            email,
            password_hash,
            email_verified: true,
            status: PrincipalStatus::Active,
            roles: PrincipalRoles::Employee(roles),
            first_name: None,
            last_name: None,
            phone: None,
            password_changed_at: Some(now),
            password_expires_at: None,
            force_password_change: false,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_names(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn login_eligibility(&self) -> Result<(), Ineligibility> {
        match self.status {
            PrincipalStatus::Terminated => Err(Ineligibility::Terminated),
            PrincipalStatus::Suspended => Err(Ineligibility::Suspended),
            PrincipalStatus::Active if !self.email_verified => Err(Ineligibility::Unverified),
            PrincipalStatus::Active => Ok(()),
        }
    }
}
