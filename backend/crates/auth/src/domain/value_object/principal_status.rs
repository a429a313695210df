//! Principal Status
//!
//! - **Active**: can sign in
//! - **Suspended**: temporarily blocked by an administrator
//! - **Terminated**: permanently closed, never signs in again

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum PrincipalStatus {
    #[default]
    Active = 0,
    Suspended = 1,
    Terminated = 2,
}

impl PrincipalStatus {
    /// Get numeric ID for database storage
    #[inline]
    pub const fn id(&self) -> i16 {
        *self as i16
    }

    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Terminated => "terminated",
        }
    }

    #[inline]
    pub const fn can_login(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Terminated is terminal
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(Self::Active),
            1 => Some(Self::Suspended),
            2 => Some(Self::Terminated),
            _ => None,
        }
    }
}

impl fmt::Display for PrincipalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
