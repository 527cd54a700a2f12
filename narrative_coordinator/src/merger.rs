//! Response merging - folds every task's worker output into one final response.
//!
//! Responses are merged in completion order. State changes use last-write-wins:
//! a later response's key silently replaces an earlier one with the same name.

use std::collections::{HashMap, HashSet};

use game_rules::{contains_any_keyword, ActionKind, GameEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cascade::reported_events;
use crate::config::MergerConfig;
use crate::planning::TaskResult;
use crate::workers::{Choice, WorkerResponse};

const SETTLEMENT_KEYWORDS: &[&str] = &["町", "村", "街", "town", "village", "city", "settlement"];
const WILDERNESS_KEYWORDS: &[&str] = &["森", "山", "川", "forest", "mountain", "river", "wilderness"];

/// The single response returned for a player action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub narrative: String,
    pub choices: Vec<Choice>,
    pub state_changes: HashMap<String, Value>,
    pub events: Vec<GameEvent>,
    pub metadata: HashMap<String, Value>,
}

/// Run facts recorded in the response metadata.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext {
    pub action_kind: ActionKind,
    pub turn_number: u32,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseMerger {
    config: MergerConfig,
}

impl ResponseMerger {
    pub fn new(config: MergerConfig) -> Self {
        Self { config }
    }

    pub fn merge(
        &self,
        results: &[TaskResult],
        cascade_events: Vec<GameEvent>,
        context: &MergeContext,
    ) -> FinalResponse {
        let responses: Vec<WorkerResponse> = results
            .iter()
            .flat_map(|r| r.worker_responses.iter().cloned())
            .collect();

        let narrative = merge_narratives(&responses)
            .unwrap_or_else(|| self.config.placeholder_narrative.clone());

        let mut choices: Vec<Choice> = responses
            .iter()
            .filter(|r| r.success)
            .flat_map(|r| r.choice_list().iter().cloned())
            .collect();
        choices.extend(contextual_choices(&narrative));
        let choices = dedupe_choices(choices, self.config.max_choices.max(1));

        let mut state_changes = HashMap::new();
        for response in responses.iter().filter(|r| r.success) {
            state_changes.extend(
                response
                    .state_changes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }

        let mut events = reported_events(&responses, context.turn_number);
        events.extend(cascade_events);

        let failed: Vec<&str> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.task.name.as_str())
            .collect();
        let metadata = HashMap::from([
            ("action_kind".to_string(), json!(context.action_kind.as_str())),
            ("turn_number".to_string(), json!(context.turn_number)),
            ("tasks_total".to_string(), json!(results.len())),
            ("tasks_failed".to_string(), json!(failed.len())),
            ("failed_tasks".to_string(), json!(failed)),
            ("cache_hit_rate".to_string(), json!(context.cache_hit_rate)),
        ]);

        FinalResponse {
            narrative,
            choices,
            state_changes,
            events,
            metadata,
        }
    }
}

/// Successful narratives joined by blank lines, or `None` if there are none.
pub fn merge_narratives(responses: &[WorkerResponse]) -> Option<String> {
    let parts: Vec<&str> = responses
        .iter()
        .filter(|r| r.success)
        .filter_map(WorkerResponse::narrative_text)
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

/// Choices suggested by what the narrative mentions. Never empty.
pub fn contextual_choices(narrative: &str) -> Vec<Choice> {
    let mut choices = Vec::new();
    if contains_any_keyword(narrative, SETTLEMENT_KEYWORDS) {
        choices.push(
            Choice::new("Explore the settlement").with_action_kind(ActionKind::Exploration),
        );
    }
    if contains_any_keyword(narrative, WILDERNESS_KEYWORDS) {
        choices.push(
            Choice::new("Search the surroundings").with_action_kind(ActionKind::Exploration),
        );
    }
    if choices.is_empty() {
        choices.push(Choice::new("Look around").with_action_kind(ActionKind::Exploration));
    }
    choices
}

/// Drop repeated texts, keeping the first, then cap the list.
pub fn dedupe_choices(choices: Vec<Choice>, cap: usize) -> Vec<Choice> {
    let mut seen = HashSet::new();
    choices
        .into_iter()
        .filter(|c| seen.insert(c.text.clone()))
        .take(cap)
        .collect()
}
