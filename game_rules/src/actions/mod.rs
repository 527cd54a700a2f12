//! Player actions and their classification.

mod classifier;

pub use classifier::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for player actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of thing the player is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Movement,
    Combat,
    Dialogue,
    Exploration,
    ItemUse,
    SkillUse,
    Quest,
    SystemCommand,
    Unknown,
}

impl ActionKind {
    /// Every kind, in declaration order.
    pub const ALL: [ActionKind; 9] = [
        ActionKind::Movement,
        ActionKind::Combat,
        ActionKind::Dialogue,
        ActionKind::Exploration,
        ActionKind::ItemUse,
        ActionKind::SkillUse,
        ActionKind::Quest,
        ActionKind::SystemCommand,
        ActionKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Movement => "movement",
            ActionKind::Combat => "combat",
            ActionKind::Dialogue => "dialogue",
            ActionKind::Exploration => "exploration",
            ActionKind::ItemUse => "item_use",
            ActionKind::SkillUse => "skill_use",
            ActionKind::Quest => "quest",
            ActionKind::SystemCommand => "system_command",
            ActionKind::Unknown => "unknown",
        }
    }

    /// Parse a kind label. Accepts snake_case, kebab-case and camelCase
    /// spellings (`item_use`, `item-use`, `itemUse`).
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "movement" | "move" => Some(ActionKind::Movement),
            "combat" => Some(ActionKind::Combat),
            "dialogue" | "dialog" => Some(ActionKind::Dialogue),
            "exploration" | "explore" => Some(ActionKind::Exploration),
            "itemuse" | "item" => Some(ActionKind::ItemUse),
            "skilluse" | "skill" => Some(ActionKind::SkillUse),
            "quest" => Some(ActionKind::Quest),
            "systemcommand" | "system" => Some(ActionKind::SystemCommand),
            "unknown" => Some(ActionKind::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw action submitted by the player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerAction {
    pub id: ActionId,

    /// Explicit kind chosen by the client (e.g. a button press), if any.
    pub kind: Option<ActionKind>,

    /// Free-form text typed by the player.
    pub text: String,

    /// Client-supplied extras such as `destination` or `action_type`.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PlayerAction {
    /// Create an action from free-form text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: ActionId::new(),
            kind: None,
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    /// Set an explicit kind.
    pub fn with_kind(mut self, kind: ActionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read a string metadata field.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_round_trip() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_label(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_kind_label_spellings() {
        assert_eq!(ActionKind::from_label("item-use"), Some(ActionKind::ItemUse));
        assert_eq!(ActionKind::from_label("skillUse"), Some(ActionKind::SkillUse));
        assert_eq!(ActionKind::from_label(" SYSTEM_COMMAND "), Some(ActionKind::SystemCommand));
        assert_eq!(ActionKind::from_label("dance"), None);
        assert_eq!(ActionKind::from_label(""), None);
    }

    #[test]
    fn test_player_action_builder() {
        let action = PlayerAction::new("walk to the mill")
            .with_kind(ActionKind::Movement)
            .with_metadata("destination", serde_json::json!("Mill"));

        assert_eq!(action.kind, Some(ActionKind::Movement));
        assert_eq!(action.metadata_str("destination"), Some("Mill"));
        assert_eq!(action.metadata_str("missing"), None);
    }
}
