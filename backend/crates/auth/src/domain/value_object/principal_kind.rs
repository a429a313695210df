//! Principal Kind
//!
//! Employees are internal staff; clients are external business accounts.
//! Every identity, policy and rate limit is scoped by kind.

use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    #[display("employee")]
    Employee,
    #[display("client")]
    Client,
}

impl PrincipalKind {
    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Client => "client",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "employee" => Some(Self::Employee),
            "client" => Some(Self::Client),
            _ => None,
        }
    }
}
