//! Per-session shared state read and updated across a coordination run.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::actions::PlayerAction;
use crate::events::GameEvent;
use crate::world_state::WorldState;

/// Unique identifier for play sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable session data handed in by the caller at the start of each action.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionSnapshot {
    pub turn_number: u32,
    pub world: WorldState,
}

/// Mutable session record owned by exactly one coordinator.
///
/// Recent actions and events are bounded; the oldest entries are dropped
/// first once a limit is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedSessionState {
    pub session_id: SessionId,
    pub turn_number: u32,
    pub recent_player_actions: VecDeque<PlayerAction>,
    pub recent_events: VecDeque<GameEvent>,
    pub world: WorldState,
    action_limit: usize,
    event_limit: usize,
}

impl SharedSessionState {
    /// Create a fresh session state.
    pub fn new(session_id: SessionId, turn_number: u32) -> Self {
        Self {
            session_id,
            turn_number,
            recent_player_actions: VecDeque::new(),
            recent_events: VecDeque::new(),
            world: WorldState::new(),
            action_limit: 10,
            event_limit: 20,
        }
    }

    /// Set how many recent actions and events are retained (minimum 1 each).
    pub fn with_limits(mut self, action_limit: usize, event_limit: usize) -> Self {
        self.action_limit = action_limit.max(1);
        self.event_limit = event_limit.max(1);
        self
    }

    /// Overwrite the durable fields with the caller's snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &SessionSnapshot) {
        self.turn_number = snapshot.turn_number;
        self.world = snapshot.world.clone();
    }

    pub fn record_action(&mut self, action: PlayerAction) {
        self.recent_player_actions.push_back(action);
        while self.recent_player_actions.len() > self.action_limit {
            self.recent_player_actions.pop_front();
        }
    }

    pub fn record_event(&mut self, event: GameEvent) {
        self.recent_events.push_back(event);
        while self.recent_events.len() > self.event_limit {
            self.recent_events.pop_front();
        }
    }

    /// Whether any retained event belongs to the anomaly family.
    pub fn has_recent_anomaly(&self) -> bool {
        self.recent_events.iter().any(GameEvent::is_anomaly_family)
    }

    /// The last `n` events, oldest first.
    pub fn last_events(&self, n: usize) -> impl Iterator<Item = &GameEvent> {
        self.recent_events
            .iter()
            .skip(self.recent_events.len().saturating_sub(n))
    }

    /// The last `n` player actions, oldest first.
    pub fn last_actions(&self, n: usize) -> impl Iterator<Item = &PlayerAction> {
        self.recent_player_actions
            .iter()
            .skip(self.recent_player_actions.len().saturating_sub(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GameEventType;

    #[test]
    fn test_recent_actions_are_bounded() {
        let mut state = SharedSessionState::new(SessionId::new(), 1).with_limits(2, 5);

        state.record_action(PlayerAction::new("one"));
        state.record_action(PlayerAction::new("two"));
        state.record_action(PlayerAction::new("three"));

        let texts: Vec<_> = state.recent_player_actions.iter().map(|a| a.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[test]
    fn test_recent_events_are_bounded() {
        let mut state = SharedSessionState::new(SessionId::new(), 1).with_limits(5, 3);
        for turn in 0..5 {
            state.record_event(GameEvent::new(GameEventType::StateChange).with_turn(turn));
        }

        let turns: Vec<_> = state.recent_events.iter().map(|e| e.turn).collect();
        assert_eq!(turns, vec![2, 3, 4]);
        let last_two: Vec<_> = state.last_events(2).map(|e| e.turn).collect();
        assert_eq!(last_two, vec![3, 4]);
    }

    #[test]
    fn test_has_recent_anomaly() {
        let mut state = SharedSessionState::new(SessionId::new(), 1);
        assert!(!state.has_recent_anomaly());

        state.record_event(GameEvent::new(GameEventType::NpcSpawn));
        assert!(!state.has_recent_anomaly());

        state.record_event(GameEvent::new(GameEventType::Anomaly));
        assert!(state.has_recent_anomaly());
    }

    #[test]
    fn test_apply_snapshot_keeps_recent_history() {
        let mut state = SharedSessionState::new(SessionId::new(), 1);
        state.record_action(PlayerAction::new("look"));

        let mut snapshot = SessionSnapshot {
            turn_number: 10,
            ..Default::default()
        };
        snapshot.world.chaos_level = 0.6;
        state.apply_snapshot(&snapshot);

        assert_eq!(state.turn_number, 10);
        assert!((state.world.chaos_level - 0.6).abs() < f32::EPSILON);
        assert_eq!(state.recent_player_actions.len(), 1);
    }
}
