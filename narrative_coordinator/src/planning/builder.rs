//! Task graph construction: per-kind templates, the extra anomaly task, and
//! dependency-first ordering.

use std::collections::{HashMap, HashSet};

use game_rules::{
    contains_any_keyword, ActionClassifier, ActionKind, PlayerAction, SharedSessionState,
    WorldState, NOVELTY_KEYWORDS, QUEST_COMPLETION_KEYWORDS,
};
use rand::Rng;
use serde_json::json;
use tracing::{debug, warn};

use super::task::{CoordinationTask, ExecutionMode, TaskId};
use crate::config::{ExtraTaskMode, PlannerConfig};
use crate::workers::WorkerId;

/// Name of the extra task the planner may inject.
pub const ANOMALY_TASK: &str = "anomaly_injection";

const CHECK_PRIORITY: i32 = 4;
const REACTION_PRIORITY: i32 = 3;
const NARRATIVE_PRIORITY: i32 = 1;
const ANOMALY_PRIORITY: i32 = 5;

/// An ordered task list for one action.
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub action_kind: ActionKind,
    /// Linearized: every task appears after its dependencies.
    pub tasks: Vec<CoordinationTask>,
    pub estimated_seconds: f64,
}

impl TaskPlan {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Builds the task graph for a player action.
#[derive(Debug, Clone)]
pub struct TaskGraphBuilder {
    config: PlannerConfig,
    classifier: ActionClassifier,
}

impl TaskGraphBuilder {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config,
            classifier: ActionClassifier::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: ActionClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classifier(&self) -> &ActionClassifier {
        &self.classifier
    }

    /// Classify the action and build its ordered plan.
    pub fn build(&self, action: &PlayerAction, state: &SharedSessionState) -> TaskPlan {
        self.build_with_rng(action, state, &mut rand::thread_rng())
    }

    /// Like [`build`](Self::build), drawing samples from `rng` in sampled mode.
    pub fn build_with_rng<R: Rng + ?Sized>(
        &self,
        action: &PlayerAction,
        state: &SharedSessionState,
        rng: &mut R,
    ) -> TaskPlan {
        let action_kind = self.classifier.classify(action);
        let mut tasks = template(action_kind, action, &state.world);

        if let Some(extra) = self.extra_task(state, rng) {
            tasks.push(extra);
        }

        let tasks = resolve_order(tasks);
        let estimated_seconds = estimate_total_time(&tasks);

        debug!(
            kind = %action_kind,
            tasks = tasks.len(),
            estimated_seconds,
            "task plan built"
        );

        TaskPlan {
            action_kind,
            tasks,
            estimated_seconds,
        }
    }

    /// Chance that the anomaly task is injected for this state.
    pub fn extra_task_chance(&self, state: &SharedSessionState) -> f32 {
        let mut chance =
            self.config.base_chance + state.world.chaos_level * self.config.chaos_weight;
        let interval = self.config.milestone_interval;
        if interval > 0 && state.turn_number % interval == 0 {
            chance += self.config.milestone_bonus;
        }
        chance
    }

    fn extra_task<R: Rng + ?Sized>(
        &self,
        state: &SharedSessionState,
        rng: &mut R,
    ) -> Option<CoordinationTask> {
        if state.has_recent_anomaly() {
            debug!("recent anomaly present, skipping anomaly task");
            return None;
        }

        let chance = self.extra_task_chance(state);
        let inject = match self.config.extra_task_mode {
            ExtraTaskMode::Threshold => chance > self.config.threshold,
            ExtraTaskMode::Sampled => rng.gen::<f32>() < chance,
        };
        if !inject {
            return None;
        }

        debug!(chance, mode = ?self.config.extra_task_mode, "injecting anomaly task");
        Some(
            CoordinationTask::new(ANOMALY_TASK, ExecutionMode::Reactive)
                .with_worker(WorkerId::AnomalyGenerator)
                .with_priority(ANOMALY_PRIORITY)
                .with_estimate(3.0)
                .with_weight(0.5)
                .with_metadata("chance", json!(chance)),
        )
    }
}

impl Default for TaskGraphBuilder {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

fn check(name: &str, workers: &[WorkerId], priority: i32) -> CoordinationTask {
    let mode = if workers.len() > 1 {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Sequential
    };
    CoordinationTask::new(name, mode)
        .with_workers(workers)
        .with_priority(priority)
        .with_estimate(3.0)
        .with_weight(1.0)
}

fn narrative(name: &str) -> CoordinationTask {
    CoordinationTask::new(name, ExecutionMode::Sequential)
        .with_worker(WorkerId::NarrativeWriter)
        .with_priority(NARRATIVE_PRIORITY)
        .with_estimate(4.0)
        .with_weight(2.0)
}

/// The fixed task template for an action kind.
pub fn template(
    kind: ActionKind,
    action: &PlayerAction,
    world: &WorldState,
) -> Vec<CoordinationTask> {
    use WorkerId::*;

    match kind {
        ActionKind::Movement => {
            let destination = action.metadata_str("destination");
            let is_new = match destination {
                Some(place) => !world.has_visited(place),
                None => contains_any_keyword(&action.text, NOVELTY_KEYWORDS),
            };

            let mut tasks = Vec::new();
            let mut story = narrative("movement_narrative");
            if is_new {
                let mut env = check("environment_check", &[WorldSimulator], CHECK_PRIORITY);
                if let Some(place) = destination {
                    env = env.with_metadata("destination", json!(place));
                }
                tasks.push(env);
                story = story.depends_on("environment_check");
            }
            tasks.push(story);
            tasks
        }
        ActionKind::Combat => {
            let mut tasks = vec![check("combat_resolution", &[RulesAdjudicator], CHECK_PRIORITY)];
            let mut story = narrative("combat_narrative").depends_on("combat_resolution");
            if !world.active_npcs.is_empty() {
                tasks.push(
                    check("npc_reaction", &[NpcManager], REACTION_PRIORITY)
                        .depends_on("combat_resolution"),
                );
                story = story.depends_on("npc_reaction");
            }
            tasks.push(story);
            tasks
        }
        ActionKind::Dialogue => vec![
            check("npc_dialogue", &[NpcManager], REACTION_PRIORITY),
            narrative("dialogue_narrative").depends_on("npc_dialogue"),
        ],
        ActionKind::Exploration => vec![
            check("exploration_check", &[WorldSimulator, RulesAdjudicator], CHECK_PRIORITY),
            narrative("exploration_narrative").depends_on("exploration_check"),
        ],
        ActionKind::ItemUse => vec![
            check("item_resolution", &[RulesAdjudicator], CHECK_PRIORITY),
            narrative("item_narrative").depends_on("item_resolution"),
        ],
        ActionKind::SkillUse => vec![
            check("skill_resolution", &[RulesAdjudicator, WorldSimulator], CHECK_PRIORITY),
            narrative("skill_narrative").depends_on("skill_resolution"),
        ],
        ActionKind::Quest => {
            let mut tasks = vec![check(
                "quest_progress",
                &[RulesAdjudicator, NpcManager],
                CHECK_PRIORITY,
            )];
            let mut story = narrative("quest_narrative").depends_on("quest_progress");
            if contains_any_keyword(&action.text, QUEST_COMPLETION_KEYWORDS) {
                tasks.push(
                    check("world_impact", &[WorldSimulator], 3).depends_on("quest_progress"),
                );
                tasks.push(
                    check("historical_record", &[Historian], 2).depends_on("quest_progress"),
                );
                story = story.depends_on("world_impact").depends_on("historical_record");
            }
            tasks.push(story);
            tasks
        }
        ActionKind::SystemCommand => vec![narrative("system_response")],
        ActionKind::Unknown => vec![
            check("generic_resolution", &[RulesAdjudicator], REACTION_PRIORITY),
            narrative("generic_narrative").depends_on("generic_resolution"),
        ],
    }
}

/// Linearize tasks: stable sort by priority (highest first), then emit each
/// task only after its dependencies. Dependencies naming no task in the list
/// are dropped with a warning.
pub fn resolve_order(mut tasks: Vec<CoordinationTask>) -> Vec<CoordinationTask> {
    let known: HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
    for CoordinationTask { id, depends_on, .. } in &mut tasks {
        depends_on.retain(|dep| {
            let found = known.contains(dep);
            if !found {
                warn!(task = %id, dependency = %dep, "unresolved dependency dropped");
            }
            found
        });
    }

    tasks.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut index = HashMap::with_capacity(tasks.len());
    for (i, task) in tasks.iter().enumerate() {
        index.entry(task.id.clone()).or_insert(i);
    }

    let mut visited = vec![false; tasks.len()];
    let mut order = Vec::with_capacity(tasks.len());
    for i in 0..tasks.len() {
        visit(i, &tasks, &index, &mut visited, &mut order);
    }

    let mut slots: Vec<Option<CoordinationTask>> = tasks.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

fn visit(
    i: usize,
    tasks: &[CoordinationTask],
    index: &HashMap<TaskId, usize>,
    visited: &mut [bool],
    order: &mut Vec<usize>,
) {
    if visited[i] {
        return;
    }
    visited[i] = true;
    for dep in &tasks[i].depends_on {
        if let Some(&j) = index.get(dep) {
            visit(j, tasks, index, visited, order);
        }
    }
    order.push(i);
}

/// Sum of the non-concurrent task times plus the longest concurrent one.
pub fn estimate_total_time(tasks: &[CoordinationTask]) -> f64 {
    let sequential: f64 = tasks
        .iter()
        .filter(|t| !t.mode.is_concurrent())
        .map(|t| t.estimated_seconds)
        .sum();
    let parallel = tasks
        .iter()
        .filter(|t| t.mode.is_concurrent())
        .map(|t| t.estimated_seconds)
        .fold(0.0, f64::max);
    sequential + parallel
}
