//! Reasoning workers - opaque capabilities that turn a context into a partial response.

pub mod mock;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use game_rules::{ActionKind, GameEvent};
use serde::{Deserialize, Serialize};

use crate::context_assembler::WorkerContext;
use crate::error::WorkerError;

/// The kinds of workers the coordinator knows how to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerId {
    NarrativeWriter,
    RulesAdjudicator,
    WorldSimulator,
    NpcManager,
    Historian,
    AnomalyGenerator,
}

impl WorkerId {
    pub const ALL: [WorkerId; 6] = [
        WorkerId::NarrativeWriter,
        WorkerId::RulesAdjudicator,
        WorkerId::WorldSimulator,
        WorkerId::NpcManager,
        WorkerId::Historian,
        WorkerId::AnomalyGenerator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerId::NarrativeWriter => "narrative_writer",
            WorkerId::RulesAdjudicator => "rules_adjudicator",
            WorkerId::WorldSimulator => "world_simulator",
            WorkerId::NpcManager => "npc_manager",
            WorkerId::Historian => "historian",
            WorkerId::AnomalyGenerator => "anomaly_generator",
        }
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A choice offered to the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub text: String,
    pub description: Option<String>,
    /// Kind of action picking this choice would submit.
    pub action_kind: Option<ActionKind>,
}

impl Choice {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            description: None,
            action_kind: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_action_kind(mut self, kind: ActionKind) -> Self {
        self.action_kind = Some(kind);
        self
    }
}

/// What a worker produced for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub worker_id: WorkerId,
    pub narrative: Option<String>,
    pub choices: Option<Vec<Choice>>,
    #[serde(default)]
    pub state_changes: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub events: Vec<GameEvent>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub processing_seconds: f64,
}

impl WorkerResponse {
    /// An empty successful response.
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            narrative: None,
            choices: None,
            state_changes: HashMap::new(),
            events: Vec::new(),
            metadata: HashMap::new(),
            success: true,
            error_message: None,
            processing_seconds: 0.0,
        }
    }

    /// A failed response standing in for a worker that errored.
    pub fn failed(worker_id: WorkerId, error: &WorkerError) -> Self {
        Self {
            success: false,
            error_message: Some(error.to_string()),
            ..Self::new(worker_id)
        }
    }

    pub fn with_narrative(mut self, narrative: impl Into<String>) -> Self {
        self.narrative = Some(narrative.into());
        self
    }

    pub fn with_choices(mut self, choices: Vec<Choice>) -> Self {
        self.choices = Some(choices);
        self
    }

    pub fn with_state_change(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.state_changes.insert(key.into(), value);
        self
    }

    pub fn with_event(mut self, event: GameEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Non-blank narrative text, if any.
    pub fn narrative_text(&self) -> Option<&str> {
        self.narrative
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    pub fn choice_list(&self) -> &[Choice] {
        self.choices.as_deref().unwrap_or_default()
    }

    /// Whether a metadata flag is set. Booleans count as themselves, strings
    /// and objects count as set when non-empty.
    pub fn has_flag(&self, key: &str) -> bool {
        match self.metadata.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(serde_json::Value::Number(_)) => true,
            _ => false,
        }
    }

    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}

/// A reasoning capability. Implementations may be slow, may fail, and may be
/// non-deterministic, but must be safe to cache by context fingerprint.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> WorkerId;

    async fn process(&self, context: &WorkerContext) -> Result<WorkerResponse, WorkerError>;
}

/// The set of workers available to the scheduler.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under its own id, replacing any previous one.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.id(), worker);
    }

    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.register(worker);
        self
    }

    pub fn get(&self, id: WorkerId) -> Option<Arc<dyn Worker>> {
        self.workers.get(&id).cloned()
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.workers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.workers.keys().collect();
        ids.sort();
        f.debug_struct("WorkerRegistry").field("workers", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_narrative_text_skips_blank() {
        let response = WorkerResponse::new(WorkerId::NarrativeWriter).with_narrative("   ");
        assert_eq!(response.narrative_text(), None);

        let response =
            WorkerResponse::new(WorkerId::NarrativeWriter).with_narrative(" The gate creaks. ");
        assert_eq!(response.narrative_text(), Some("The gate creaks."));
    }

    #[test]
    fn test_failed_response_carries_error() {
        let error = WorkerError::Failed("boom".into());
        let response = WorkerResponse::failed(WorkerId::Historian, &error);
        assert!(!response.success);
        assert_eq!(response.error_message.as_deref(), Some("worker failed: boom"));
        assert!(response.choice_list().is_empty());
    }

    #[test]
    fn test_has_flag() {
        let response = WorkerResponse::new(WorkerId::NpcManager)
            .with_metadata("npc_spawned", json!({"name": "Mira"}))
            .with_metadata("npc_died", json!(false))
            .with_metadata("world_event", json!(""));

        assert!(response.has_flag("npc_spawned"));
        assert!(!response.has_flag("npc_died"));
        assert!(!response.has_flag("world_event"));
        assert!(!response.has_flag("missing"));
    }

    #[test]
    fn test_registry_replaces_by_id() {
        let registry = WorkerRegistry::new()
            .with_worker(Arc::new(mock::ScriptedWorker::narrating(WorkerId::NarrativeWriter, "a")))
            .with_worker(Arc::new(mock::ScriptedWorker::narrating(WorkerId::NarrativeWriter, "b")));

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(WorkerId::NarrativeWriter));
        assert!(registry.get(WorkerId::Historian).is_none());
    }
}
