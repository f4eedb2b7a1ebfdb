//! # Role Vocabulary
//!
//! Ordered role hierarchy `USER < READWRITE < ADMIN` and the operation classes
//! mapped onto it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller role within a tenant. Ordering follows privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    #[serde(rename = "READWRITE")]
    ReadWrite,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::ReadWrite => "READWRITE",
            Self::Admin => "ADMIN",
        }
    }

    /// True when this role is at least `minimum`.
    pub fn satisfies(&self, minimum: Role) -> bool {
        *self >= minimum
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(Self::User),
            "READWRITE" | "READ_WRITE" => Ok(Self::ReadWrite),
            "ADMIN" => Ok(Self::Admin),
            other => Err(format!("Invalid role: {other}")),
        }
    }
}

/// Classes of operations, each with a documented minimum role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Reads
    Read,
    /// State-changing single-resource operations
    Mutation,
    /// Destructive or administrative operations
    Destructive,
}

impl OperationClass {
    pub fn minimum_role(&self) -> Role {
        match self {
            Self::Read => Role::User,
            Self::Mutation => Role::ReadWrite,
            Self::Destructive => Role::Admin,
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Read)
    }
}
