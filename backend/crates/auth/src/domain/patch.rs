//! Principal Partial Updates
//!
//! A patch is a list of `(field, value)` pairs. Fields come from a closed
//! allow-list and each setter fixes the value type, so storage adapters can
//! render a patch with bound parameters only.

use chrono::{DateTime, Utc};

use crate::domain::entity::principal::Principal;
use crate::domain::value_object::{password::PasswordHash, principal_status::PrincipalStatus};

/// Updatable principal columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalField {
    PasswordHash,
    PasswordChangedAt,
    PasswordExpiresAt,
    ForcePasswordChange,
    EmailVerified,
    Status,
    LastLoginAt,
}

impl PrincipalField {
    pub const fn column(&self) -> &'static str {
        match self {
            Self::PasswordHash => "password_hash",
            Self::PasswordChangedAt => "password_changed_at",
            Self::PasswordExpiresAt => "password_expires_at",
            Self::ForcePasswordChange => "force_password_change",
            Self::EmailVerified => "email_verified",
            Self::Status => "status",
            Self::LastLoginAt => "last_login_at",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    Text(String),
    Bool(bool),
    Timestamp(Option<DateTime<Utc>>),
    SmallInt(i16),
}

#[derive(Debug, Clone, Default)]
pub struct PrincipalPatch {
    entries: Vec<(PrincipalField, PatchValue)>,
}

impl PrincipalPatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(mut self, field: PrincipalField, value: PatchValue) -> Self {
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
        self
    }

    pub fn password_hash(self, hash: &PasswordHash) -> Self {
        self.set(
            PrincipalField::PasswordHash,
            PatchValue::Text(hash.as_phc_string().to_string()),
        )
    }

    pub fn password_changed_at(self, at: DateTime<Utc>) -> Self {
        self.set(PrincipalField::PasswordChangedAt, PatchValue::Timestamp(Some(at)))
    }

    pub fn password_expires_at(self, at: Option<DateTime<Utc>>) -> Self {
        self.set(PrincipalField::PasswordExpiresAt, PatchValue::Timestamp(at))
    }

    pub fn force_password_change(self, force: bool) -> Self {
        self.set(PrincipalField::ForcePasswordChange, PatchValue::Bool(force))
    }

    pub fn email_verified(self, verified: bool) -> Self {
        self.set(PrincipalField::EmailVerified, PatchValue::Bool(verified))
    }

    pub fn status(self, status: PrincipalStatus) -> Self {
        self.set(PrincipalField::Status, PatchValue::SmallInt(status.id()))
    }

    pub fn last_login_at(self, at: DateTime<Utc>) -> Self {
        self.set(PrincipalField::LastLoginAt, PatchValue::Timestamp(Some(at)))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(PrincipalField, PatchValue)] {
        &self.entries
    }

    /// Apply to an in-memory principal. Values were produced by the typed
    /// setters, so a mismatched pair is skipped rather than coerced.
    pub fn apply_to(&self, principal: &mut Principal, now: DateTime<Utc>) {
        for (field, value) in &self.entries {
            match (field, value) {
                (PrincipalField::PasswordHash, PatchValue::Text(phc)) => {
                    if let Ok(hash) = PasswordHash::from_phc_string(phc.clone()) {
                        principal.password_hash = hash;
                    }
                }
                (PrincipalField::PasswordChangedAt, PatchValue::Timestamp(at)) => {
                    principal.password_changed_at = *at;
                }
                (PrincipalField::PasswordExpiresAt, PatchValue::Timestamp(at)) => {
                    principal.password_expires_at = *at;
                }
                (PrincipalField::ForcePasswordChange, PatchValue::Bool(b)) => {
                    principal.force_password_change = *b;
                }
                (PrincipalField::EmailVerified, PatchValue::Bool(b)) => {
                    principal.email_verified = *b;
                }
                (PrincipalField::Status, PatchValue::SmallInt(id)) => {
                    if let Some(status) = PrincipalStatus::from_id(*id) {
                        principal.status = status;
                    }
                }
                (PrincipalField::LastLoginAt, PatchValue::Timestamp(at)) => {
                    principal.last_login_at = *at;
                }
                _ => {}
            }
        }
        principal.updated_at = now;
    }
}
