//! Entity definitions for the game world.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for all entities in the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Create a new random entity ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an entity ID from a specific UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an NPC currently feels about the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Friendly,
    #[default]
    Neutral,
    Hostile,
}

impl Disposition {
    /// Parse a disposition label, accepting the lowercase variant names.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "friendly" => Some(Disposition::Friendly),
            "neutral" => Some(Disposition::Neutral),
            "hostile" => Some(Disposition::Hostile),
            _ => None,
        }
    }
}

/// A non-player character currently present in the session's world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Npc {
    pub id: EntityId,
    pub name: String,
    pub disposition: Disposition,
    /// Turn on which the NPC entered the scene.
    pub spawned_turn: u32,
}

impl Npc {
    /// Create a neutral NPC that appeared on the given turn.
    pub fn new(name: impl Into<String>, spawned_turn: u32) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            disposition: Disposition::Neutral,
            spawned_turn,
        }
    }

    /// Set the disposition.
    pub fn with_disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = disposition;
        self
    }

    pub fn is_hostile(&self) -> bool {
        self.disposition == Disposition::Hostile
    }
}
