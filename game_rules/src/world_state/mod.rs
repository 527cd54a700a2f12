//! World state management - the per-session record of world parameters.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::entities::{EntityId, Npc};

/// World time tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorldTime {
    pub day: u32,
    pub hour: u8,
    pub minute: u8,
    pub season: Season,
}

/// Seasons of the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Season {
    #[default]
    Spring,
    Summer,
    Autumn,
    Winter,
}

/// Weather conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Weather {
    #[default]
    Clear,
    Cloudy,
    Rainy,
    Stormy,
    Snowy,
    Foggy,
}

/// Flag value types for global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl FlagValue {
    /// Convert a JSON scalar into a flag. Arrays, objects and null have no flag form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(FlagValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(FlagValue::Int)
                .or_else(|| n.as_f64().map(FlagValue::Float)),
            serde_json::Value::String(s) => Some(FlagValue::String(s.clone())),
            _ => None,
        }
    }
}

/// The state of the game world for one session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorldState {
    /// Global time tracking.
    pub time: WorldTime,

    pub weather: Weather,

    /// How unstable the world is, from 0.0 (calm) to 1.0 (unravelling).
    pub chaos_level: f32,

    /// Name of the player's current location.
    pub current_location: String,

    /// Every location the player has been to.
    pub visited_locations: HashSet<String>,

    /// NPCs currently present in the scene.
    pub active_npcs: HashMap<EntityId, Npc>,

    /// Global flags and variables.
    pub global_flags: HashMap<String, FlagValue>,
}

impl WorldState {
    /// Create a new empty world state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if it's currently night.
    pub fn is_night(&self) -> bool {
        self.time.hour < 6 || self.time.hour >= 20
    }

    /// Set the chaos level, clamped to `0.0..=1.0`. Returns the previous level.
    pub fn set_chaos_level(&mut self, level: f32) -> f32 {
        let previous = self.chaos_level;
        self.chaos_level = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            previous
        };
        previous
    }

    /// Shift the chaos level by `delta`. Returns the previous level.
    pub fn shift_chaos(&mut self, delta: f32) -> f32 {
        self.set_chaos_level(self.chaos_level + delta)
    }

    /// Move the player to a location and remember it as visited.
    pub fn enter_location(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.visited_locations.insert(name.clone());
        self.current_location = name;
    }

    pub fn has_visited(&self, name: &str) -> bool {
        self.visited_locations.contains(name)
    }

    /// Add an NPC to the scene.
    pub fn spawn_npc(&mut self, npc: Npc) -> EntityId {
        let id = npc.id;
        self.active_npcs.insert(id, npc);
        id
    }

    /// Remove the first NPC with the given name (case-insensitive).
    pub fn remove_npc_by_name(&mut self, name: &str) -> Option<Npc> {
        let id = self
            .active_npcs
            .values()
            .find(|npc| npc.name.eq_ignore_ascii_case(name))
            .map(|npc| npc.id)?;
        self.active_npcs.remove(&id)
    }

    /// Names of the active NPCs, sorted for stable output.
    pub fn active_npc_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.active_npcs.values().map(|n| n.name.clone()).collect();
        names.sort();
        names
    }
}
