//! Game events - the typed record of things that happened during a turn.
//!
//! Events are produced by the coordination layer from worker output and fed
//! back into the session state. This crate only defines their shape.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of game events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventType {
    StateChange,
    WorldEvent,
    NpcSpawn,
    NpcDeath,
    Anomaly,
    QuestUpdate,
}

impl GameEventType {
    /// Default priority for events of this type. Higher is more significant.
    pub fn default_priority(&self) -> i32 {
        match self {
            GameEventType::StateChange => 1,
            GameEventType::NpcSpawn | GameEventType::QuestUpdate => 2,
            GameEventType::WorldEvent | GameEventType::NpcDeath => 3,
            GameEventType::Anomaly => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameEventType::StateChange => "state_change",
            GameEventType::WorldEvent => "world_event",
            GameEventType::NpcSpawn => "npc_spawn",
            GameEventType::NpcDeath => "npc_death",
            GameEventType::Anomaly => "anomaly",
            GameEventType::QuestUpdate => "quest_update",
        }
    }
}

impl std::fmt::Display for GameEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub id: EventId,
    pub event_type: GameEventType,
    pub priority: i32,
    pub payload: serde_json::Value,
    /// Name of the worker whose output produced this event, if any.
    pub source: Option<String>,
    /// Turn on which the event happened.
    pub turn: u32,
}

impl GameEvent {
    /// Create an event with its type's default priority and an empty payload.
    pub fn new(event_type: GameEventType) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            priority: event_type.default_priority(),
            payload: serde_json::Value::Null,
            source: None,
            turn: 0,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_turn(mut self, turn: u32) -> Self {
        self.turn = turn;
        self
    }

    /// Whether this event belongs to the anomaly family.
    ///
    /// Explicit anomalies count, as do world events whose `kind` payload
    /// field starts with `anomaly`.
    pub fn is_anomaly_family(&self) -> bool {
        match self.event_type {
            GameEventType::Anomaly => true,
            GameEventType::WorldEvent => self
                .payload
                .get("kind")
                .and_then(|k| k.as_str())
                .is_some_and(|k| k.starts_with("anomaly")),
            _ => false,
        }
    }

    /// Read a string field from the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}
