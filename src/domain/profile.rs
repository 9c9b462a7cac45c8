use serde::{Deserialize, Serialize};
use std::fmt;

use super::Coins;

/// Identifies one profile: an entity (a user) inside a scope (a guild).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileKey {
    pub entity_id: String,
    pub scope_id: String,
}

impl ProfileKey {
    pub fn new(entity_id: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            scope_id: scope_id.into(),
        }
    }

    /// The key the profile is stored under: `<entity>_<scope>`.
    pub fn storage_key(&self) -> String {
        format!("{}_{}", self.entity_id, self.scope_id)
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

/// The persisted economy record for one entity within one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    /// Owning entity. Never changes after creation.
    pub id: String,
    /// Liquid balance, spendable on transfers and wagers
    pub wallet: Coins,
    /// Saved balance
    pub bank: Coins,
    /// Cooldown marker. Nothing reads it yet; kept verbatim across updates.
    #[serde(default)]
    pub timer: Option<serde_json::Value>,
}

impl PlayerProfile {
    pub fn new(id: impl Into<String>, wallet: Coins, bank: Coins) -> Self {
        Self {
            id: id.into(),
            wallet,
            bank,
            timer: None,
        }
    }

    pub fn balances(&self) -> Balances {
        Balances {
            wallet: self.wallet,
            bank: self.bank,
        }
    }

    pub fn net_worth(&self) -> Coins {
        self.wallet + self.bank
    }

    pub fn is_solvent(&self) -> bool {
        self.wallet >= 0 && self.bank >= 0
    }
}

/// Snapshot of a profile's two balances after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub wallet: Coins,
    pub bank: Coins,
}

impl Balances {
    pub fn total(&self) -> Coins {
        self.wallet + self.bank
    }
}
