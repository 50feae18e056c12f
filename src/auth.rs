//! Capability checks consulted by every privileged bridge operation

use crate::{Address, BridgeError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Validator,
    Relayer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Validator => write!(f, "validator"),
            Role::Relayer => write!(f, "relayer"),
        }
    }
}

/// External authorization registry answering "can X administer / validate / relay?"
pub trait Capabilities: Send + Sync {
    fn can_administer(&self, who: &Address) -> bool;
    fn can_validate(&self, who: &Address) -> bool;
    fn can_relay(&self, who: &Address) -> bool;

    fn require(&self, who: &Address, role: Role) -> Result<()> {
        let allowed = match role {
            Role::Admin => self.can_administer(who),
            Role::Validator => self.can_validate(who),
            Role::Relayer => self.can_relay(who),
        };

        if !allowed {
            return Err(BridgeError::Unauthorized(format!(
                "{} lacks {} role",
                who, role
            )));
        }
        Ok(())
    }
}

/// In-memory role table
#[derive(Debug, Default)]
pub struct RoleRegistry {
    roles: DashMap<Address, HashSet<Role>>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, who: Address, role: Role) {
        self.roles.entry(who).or_default().insert(role);
    }

    pub fn revoke(&self, who: &Address, role: Role) -> bool {
        self.roles
            .get_mut(who)
            .map(|mut roles| roles.remove(&role))
            .unwrap_or(false)
    }

    pub fn has_role(&self, who: &Address, role: Role) -> bool {
        self.roles
            .get(who)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }
}

impl Capabilities for RoleRegistry {
    fn can_administer(&self, who: &Address) -> bool {
        self.has_role(who, Role::Admin)
    }

    fn can_validate(&self, who: &Address) -> bool {
        self.has_role(who, Role::Validator)
    }

    fn can_relay(&self, who: &Address) -> bool {
        self.has_role(who, Role::Relayer)
    }
}
