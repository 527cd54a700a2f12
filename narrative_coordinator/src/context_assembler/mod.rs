//! Context Assembler - builds the input each worker receives.
//!
//! Assembly works in two steps:
//! 1. **View**: Snapshot the shared session state into a read-only
//!    [`SharedContextView`] (bounded recent history, world parameters)
//! 2. **Context**: Combine the view with the action, the task being run, and
//!    the responses recorded so far into a [`WorkerContext`]
//!
//! Workers never see the live session state; the view is taken between task
//! executions, when nothing else is writing.

mod fingerprint;

pub use fingerprint::*;

use game_rules::{
    ActionKind, GameEvent, GameEventType, PlayerAction, Season, SessionId, SharedSessionState,
    Weather, WorldState,
};
use serde::{Deserialize, Serialize};

use crate::workers::WorkerResponse;

/// How much recent history goes into a view.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub max_recent_actions: usize,
    pub max_recent_events: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_recent_actions: 5,
            max_recent_events: 5,
        }
    }
}

/// Builds worker contexts from session state.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ContextConfig::default())
    }

    /// Take a read-only view of the session.
    pub fn shared_view(&self, state: &SharedSessionState) -> SharedContextView {
        SharedContextView {
            session_id: state.session_id,
            turn_number: state.turn_number,
            current_location: state.world.current_location.clone(),
            chaos_level: state.world.chaos_level,
            active_npcs: state.world.active_npc_names(),
            recent_actions: state
                .last_actions(self.config.max_recent_actions)
                .map(|a| a.text.clone())
                .collect(),
            recent_events: state
                .last_events(self.config.max_recent_events)
                .map(|e| self.describe_event(e, &state.world))
                .collect(),
            world: extract_world_context(&state.world),
        }
    }

    /// Assemble the full context for one worker call.
    pub fn assemble(
        &self,
        task_name: &str,
        action: &PlayerAction,
        action_kind: ActionKind,
        shared: &SharedContextView,
        prior_responses: Vec<WorkerResponse>,
    ) -> WorkerContext {
        WorkerContext {
            task_name: task_name.to_string(),
            action: action.clone(),
            action_kind,
            shared: shared.clone(),
            prior_responses,
        }
    }

    /// Describe an event in human-readable form.
    fn describe_event(&self, event: &GameEvent, world: &WorldState) -> String {
        match event.event_type {
            GameEventType::NpcSpawn => {
                let name = event.payload_str("name").unwrap_or("Someone");
                let place = if world.current_location.is_empty() {
                    "the scene"
                } else {
                    world.current_location.as_str()
                };
                format!("{} appeared at {}", name, place)
            }
            GameEventType::NpcDeath => {
                let name = event.payload_str("name").unwrap_or("Someone");
                match event.payload_str("killer") {
                    Some(killer) => format!("{} was killed by {}", name, killer),
                    None => format!("{} has died", name),
                }
            }
            GameEventType::WorldEvent | GameEventType::Anomaly => {
                let kind = event.payload_str("kind").unwrap_or(event.event_type.as_str());
                match event.payload_str("description") {
                    Some(description) => format!("{}: {}", kind, description),
                    None => kind.to_string(),
                }
            }
            GameEventType::StateChange => match event.payload.as_object() {
                Some(changes) => {
                    let mut keys: Vec<_> = changes.keys().map(String::as_str).collect();
                    keys.sort_unstable();
                    format!("state changed: {}", keys.join(", "))
                }
                None => "state changed".to_string(),
            },
            GameEventType::QuestUpdate => {
                let quest = event.payload_str("quest").unwrap_or("a quest");
                format!("{} was updated", quest)
            }
        }
    }
}

/// Extract world context information.
fn extract_world_context(world: &WorldState) -> WorldContext {
    WorldContext {
        time_of_day: format!("{:02}:{:02}", world.time.hour, world.time.minute),
        day: world.time.day,
        season: world.time.season,
        weather: world.weather,
        is_night: world.is_night(),
    }
}

/// Read-only snapshot of the session shared with every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedContextView {
    pub session_id: SessionId,
    pub turn_number: u32,
    pub current_location: String,
    pub chaos_level: f32,
    /// Names of NPCs in the scene, sorted.
    pub active_npcs: Vec<String>,
    /// Recent player action texts, oldest first.
    pub recent_actions: Vec<String>,
    /// Recent event descriptions, oldest first.
    pub recent_events: Vec<String>,
    pub world: WorldContext,
}

/// World context for worker prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldContext {
    pub time_of_day: String,
    pub day: u32,
    pub season: Season,
    pub weather: Weather,
    pub is_night: bool,
}

/// Everything a worker receives for one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerContext {
    /// Name of the task the call belongs to.
    pub task_name: String,
    pub action: PlayerAction,
    pub action_kind: ActionKind,
    pub shared: SharedContextView,
    /// Responses recorded earlier in this run, in completion order.
    pub prior_responses: Vec<WorkerResponse>,
}

impl WorkerContext {
    /// Content fingerprint used as the cache key.
    pub fn fingerprint(&self) -> ContextFingerprint {
        ContextFingerprint::of(self)
    }

    /// Format the context as a prompt string.
    pub fn to_prompt_string(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Player Action\n");
        prompt.push_str(&format!("[{}] {}\n\n", self.action_kind, self.action.text));

        prompt.push_str("## World State\n");
        prompt.push_str(&format!(
            "Turn {} | Time: {} (Day {}), {} {:?} | Chaos: {:.2}\n",
            self.shared.turn_number,
            self.shared.world.time_of_day,
            self.shared.world.day,
            if self.shared.world.is_night { "Night" } else { "Day" },
            self.shared.world.weather,
            self.shared.chaos_level,
        ));
        if !self.shared.current_location.is_empty() {
            prompt.push_str(&format!("Location: {}\n", self.shared.current_location));
        }
        prompt.push('\n');

        if !self.shared.active_npcs.is_empty() {
            prompt.push_str("## Present Characters\n");
            for npc in &self.shared.active_npcs {
                prompt.push_str(&format!("- {}\n", npc));
            }
            prompt.push('\n');
        }

        if !self.shared.recent_events.is_empty() {
            prompt.push_str("## Recent Events\n");
            for event in &self.shared.recent_events {
                prompt.push_str(&format!("- {}\n", event));
            }
            prompt.push('\n');
        }

        let prior: Vec<_> = self
            .prior_responses
            .iter()
            .filter_map(|r| r.narrative_text().map(|text| (r.worker_id, text)))
            .collect();
        if !prior.is_empty() {
            prompt.push_str("## Earlier Contributions\n");
            for (worker, text) in prior {
                prompt.push_str(&format!("- {}: {}\n", worker, text));
            }
            prompt.push('\n');
        }

        prompt
    }
}

#[cfg(test)]
pub(crate) fn test_context(text: &str) -> WorkerContext {
    let state = SharedSessionState::new(SessionId::new(), 1);
    let assembler = ContextAssembler::with_defaults();
    let view = assembler.shared_view(&state);
    assembler.assemble(
        "test_task",
        &PlayerAction::new(text),
        ActionKind::Unknown,
        &view,
        Vec::new(),
    )
}
