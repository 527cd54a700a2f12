//! Coordinator - the inbound API and owner of every session's state.
//!
//! Each session's [`SharedSessionState`] sits behind its own async mutex, so
//! two actions for the same session never run at once: the second waits for
//! the first. Different sessions run independently and share the response
//! cache and worker statistics.

use std::path::Path;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use game_rules::{PlayerAction, SessionId, SessionSnapshot, SharedSessionState};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::cache::{CacheStats, ResponseCache};
use crate::cascade::{EventCascade, EventProcessor};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::merger::{FinalResponse, MergeContext, ResponseMerger};
use crate::planning::TaskGraphBuilder;
use crate::progress::{
    NotificationKind, ProgressNotification, ProgressReporter, ProgressSink, TracingSink,
    SCHEDULING_FLOOR,
};
use crate::scheduler::{Scheduler, WorkerStat};
use crate::workers::WorkerRegistry;

type SessionHandle = Arc<Mutex<SharedSessionState>>;

/// Entry point for hosts: one per process.
pub struct Coordinator {
    config: CoordinatorConfig,
    planner: TaskGraphBuilder,
    scheduler: Scheduler,
    cascade: EventCascade,
    merger: ResponseMerger,
    sink: Arc<dyn ProgressSink>,
    sessions: DashMap<SessionId, SessionHandle>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, registry: WorkerRegistry) -> Self {
        let cache = Arc::new(ResponseCache::from_config(&config.cache));
        Self::with_cache(config, registry, cache)
    }

    /// Build from layered configuration: `CORTEX_CONFIG` file, then
    /// `CORTEX_*` overrides.
    pub fn from_env(registry: WorkerRegistry) -> Result<Self> {
        let config = CoordinatorConfig::load()?;
        Ok(Self::new(config, registry))
    }

    /// Build from a TOML file plus `CORTEX_*` overrides. A missing file means
    /// defaults.
    pub fn from_config_file(path: &Path, registry: WorkerRegistry) -> Result<Self> {
        let config = CoordinatorConfig::load_from_path(path)?;
        Ok(Self::new(config, registry))
    }

    /// Build a coordinator around an existing (possibly shared) cache.
    pub fn with_cache(
        config: CoordinatorConfig,
        registry: WorkerRegistry,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            planner: TaskGraphBuilder::new(config.planner.clone()),
            scheduler: Scheduler::new(registry, cache, config.scheduler.clone()),
            cascade: EventCascade::new(config.cascade.clone()),
            merger: ResponseMerger::new(config.merger.clone()),
            sink: Arc::new(TracingSink),
            sessions: DashMap::new(),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_event_processor(mut self, processor: Arc<dyn EventProcessor>) -> Self {
        self.cascade = self.cascade.with_processor(processor);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Start tracking a session.
    pub fn initialize_session(&self, session_id: SessionId, turn_number: u32) -> Result<()> {
        let limits = &self.config.session;
        match self.sessions.entry(session_id) {
            Entry::Occupied(_) => Err(CoordinatorError::SessionExists(session_id)),
            Entry::Vacant(slot) => {
                let state = SharedSessionState::new(session_id, turn_number)
                    .with_limits(limits.recent_actions_limit, limits.recent_events_limit);
                slot.insert(Arc::new(Mutex::new(state)));
                info!(session = %session_id, turn = turn_number, "session initialized");
                Ok(())
            }
        }
    }

    /// Stop tracking a session. Returns whether it existed. A run already in
    /// progress finishes on its own copy of the handle.
    pub fn end_session(&self, session_id: SessionId) -> bool {
        let removed = self.sessions.remove(&session_id).is_some();
        if removed {
            info!(session = %session_id, "session ended");
        }
        removed
    }

    pub fn has_session(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// A copy of the session state, taken once no action is running.
    pub async fn session_state(&self, session_id: SessionId) -> Result<SharedSessionState> {
        let handle = self.handle(session_id)?;
        let state = handle.lock().await;
        Ok(state.clone())
    }

    /// Answer one player action.
    ///
    /// The snapshot is authoritative for the turn number and world; the
    /// coordinator never advances the turn itself. Cancelling `cancel` (or
    /// calling [`shutdown`](Self::shutdown)) aborts the run.
    #[instrument(skip_all, fields(session = %session_id, action = %action.text))]
    pub async fn process_action(
        &self,
        session_id: SessionId,
        action: PlayerAction,
        snapshot: &SessionSnapshot,
        cancel: &CancellationToken,
    ) -> Result<FinalResponse> {
        let handle = self.handle(session_id)?;
        let run_cancel = self.shutdown.child_token();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoordinatorError::Cancelled),
            result = self.run(session_id, &handle, action, snapshot, &run_cancel) => result,
        };

        if matches!(result, Err(CoordinatorError::Cancelled)) {
            info!("coordination run cancelled");
            ProgressReporter::new(session_id, Arc::clone(&self.sink)).error("Cancelled", None);
        }
        result
    }

    async fn run(
        &self,
        session_id: SessionId,
        handle: &SessionHandle,
        action: PlayerAction,
        snapshot: &SessionSnapshot,
        cancel: &CancellationToken,
    ) -> Result<FinalResponse> {
        let mut state = handle.lock().await;
        state.apply_snapshot(snapshot);

        let progress = ProgressReporter::new(session_id, Arc::clone(&self.sink));
        let plan = self.planner.build(&action, &state);
        info!(
            kind = %plan.action_kind,
            tasks = plan.len(),
            estimated_seconds = plan.estimated_seconds,
            "coordination started"
        );
        progress.emit(
            ProgressNotification::new(
                NotificationKind::Progress,
                session_id,
                format!("Planned {} tasks", plan.len()),
            )
            .with_percent(SCHEDULING_FLOOR)
            .with_eta(plan.estimated_seconds)
            .with_details(serde_json::json!({ "tasks": plan.task_names() })),
        );

        let outcome = self
            .scheduler
            .run(&plan, &action, &mut state, &self.cascade, &progress, cancel)
            .await?;

        let context = MergeContext {
            action_kind: plan.action_kind,
            turn_number: state.turn_number,
            cache_hit_rate: self.scheduler.cache().hit_rate(),
        };
        let response = self.merger.merge(&outcome.results, outcome.cascade.events, &context);
        state.record_action(action);

        let failed = outcome.results.iter().filter(|r| !r.success).count();
        info!(
            tasks = outcome.results.len(),
            failed,
            events = response.events.len(),
            cascade_dropped = outcome.cascade.dropped,
            cascade_failures = outcome.cascade.failures,
            "coordination finished"
        );
        progress.completed(format!("Finished {} tasks", outcome.results.len()));

        Ok(response)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.scheduler.cache().stats()
    }

    pub fn worker_stats(&self) -> Vec<WorkerStat> {
        self.scheduler.worker_stats()
    }

    /// Cancel every run in progress and every future run.
    pub fn shutdown(&self) {
        info!(sessions = self.sessions.len(), "coordinator shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn handle(&self, session_id: SessionId) -> Result<SessionHandle> {
        self.sessions
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(CoordinatorError::UnknownSession(session_id))
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("sessions", &self.sessions.len())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::ANOMALY_TASK;
    use crate::progress::RecordingSink;
    use crate::workers::mock::{ScriptedReply, ScriptedWorker};
    use crate::workers::{Worker, WorkerId, WorkerResponse};
    use game_rules::{GameEventType, WorldState};
    use serde_json::json;
    use std::time::Duration;

    struct Workers {
        all: Vec<Arc<ScriptedWorker>>,
    }

    impl Workers {
        fn standard() -> Self {
            let all = vec![
                Arc::new(ScriptedWorker::narrating(
                    WorkerId::NarrativeWriter,
                    "Mist curls between the trees.",
                )),
                Arc::new(ScriptedWorker::narrating(
                    WorkerId::RulesAdjudicator,
                    "Perception check: success.",
                )),
                Arc::new(ScriptedWorker::narrating(WorkerId::WorldSimulator, "The forest is old.")),
                Arc::new(ScriptedWorker::narrating(WorkerId::NpcManager, "No one answers.")),
                Arc::new(ScriptedWorker::narrating(WorkerId::Historian, "Remembered.")),
                Arc::new(ScriptedWorker::responding(
                    WorkerId::AnomalyGenerator,
                    WorkerResponse::new(WorkerId::AnomalyGenerator)
                        .with_narrative("A second moon flickers.")
                        .with_metadata("anomaly", json!({"kind": "anomaly_moon"})),
                )),
            ];
            Self { all }
        }

        fn replace(mut self, worker: ScriptedWorker) -> Self {
            self.all.retain(|w| w.id() != worker.id());
            self.all.push(Arc::new(worker));
            self
        }

        fn get(&self, id: WorkerId) -> &Arc<ScriptedWorker> {
            self.all.iter().find(|w| w.id() == id).unwrap()
        }

        fn registry(&self) -> WorkerRegistry {
            self.all
                .iter()
                .fold(WorkerRegistry::new(), |registry, w| registry.with_worker(w.clone()))
        }
    }

    fn snapshot(turn: u32, chaos: f32) -> SessionSnapshot {
        let mut world = WorldState::new();
        world.set_chaos_level(chaos);
        SessionSnapshot { turn_number: turn, world }
    }

    #[tokio::test]
    async fn test_exploration_scenario_runs_anomaly_first() {
        let workers = Workers::standard();
        let sink = Arc::new(RecordingSink::default());
        let coordinator = Coordinator::new(CoordinatorConfig::default(), workers.registry())
            .with_progress_sink(sink.clone());
        let session = SessionId::new();
        coordinator.initialize_session(session, 10).unwrap();

        let response = coordinator
            .process_action(
                session,
                PlayerAction::new("森を探索する"),
                &snapshot(10, 0.6),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let anomaly_calls = workers.get(WorkerId::AnomalyGenerator).seen_contexts();
        assert_eq!(anomaly_calls.len(), 1);
        assert_eq!(anomaly_calls[0].task_name, ANOMALY_TASK);
        assert!(anomaly_calls[0].prior_responses.is_empty());

        let check_calls = workers.get(WorkerId::WorldSimulator).seen_contexts();
        assert_eq!(check_calls[0].task_name, "exploration_check");
        assert_eq!(check_calls[0].prior_responses[0].worker_id, WorkerId::AnomalyGenerator);

        assert!(response.narrative.starts_with("A second moon flickers.\n\n"));
        assert!(response.narrative.ends_with("Mist curls between the trees."));
        assert!(response.choices.iter().any(|c| c.text == "Search the surroundings"));
        assert_eq!(response.metadata["action_kind"], json!("exploration"));
        assert_eq!(response.metadata["tasks_total"], json!(3));
        assert!(response.events.iter().any(|e| e.event_type == GameEventType::Anomaly));

        let kinds = sink.kinds();
        assert_eq!(kinds.first(), Some(&NotificationKind::Progress));
        assert_eq!(kinds.last(), Some(&NotificationKind::Completed));

        let state = coordinator.session_state(session).await.unwrap();
        assert_eq!(state.turn_number, 10);
        assert_eq!(state.recent_player_actions.len(), 1);
        assert!(state.has_recent_anomaly());
    }

    #[tokio::test]
    async fn test_recent_anomaly_blocks_next_injection() {
        let workers = Workers::standard();
        let coordinator = Coordinator::new(CoordinatorConfig::default(), workers.registry());
        let session = SessionId::new();
        coordinator.initialize_session(session, 10).unwrap();
        let cancel = CancellationToken::new();

        coordinator
            .process_action(session, PlayerAction::new("森を探索する"), &snapshot(10, 0.6), &cancel)
            .await
            .unwrap();
        coordinator
            .process_action(
                session,
                PlayerAction::new("search the ruins"),
                &snapshot(15, 0.6),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(workers.get(WorkerId::AnomalyGenerator).call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_session_runs_are_serialized() {
        let slow_writer = ScriptedWorker::new(
            WorkerId::NarrativeWriter,
            vec![ScriptedReply::delayed(
                Duration::from_secs(5),
                ScriptedReply::Respond(
                    WorkerResponse::new(WorkerId::NarrativeWriter).with_narrative("Slowly."),
                ),
            )],
        );
        let workers = Workers::standard().replace(slow_writer);
        let coordinator = Coordinator::new(CoordinatorConfig::default(), workers.registry());
        let session = SessionId::new();
        coordinator.initialize_session(session, 1).unwrap();
        let cancel = CancellationToken::new();
        let snap = snapshot(1, 0.0);
        let started = tokio::time::Instant::now();

        let (a, b) = tokio::join!(
            coordinator.process_action(session, PlayerAction::new("look around"), &snap, &cancel),
            coordinator.process_action(
                session,
                PlayerAction::new("search the cellar"),
                &snap,
                &cancel,
            ),
        );

        assert!(a.is_ok() && b.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(10));
        let state = coordinator.session_state(session).await.unwrap();
        assert_eq!(state.recent_player_actions.len(), 2);
    }

    #[tokio::test]
    async fn test_cache_is_shared_across_sessions() {
        let workers = Workers::standard();
        let coordinator = Coordinator::new(CoordinatorConfig::default(), workers.registry());
        let (first, second) = (SessionId::new(), SessionId::new());
        coordinator.initialize_session(first, 3).unwrap();
        coordinator.initialize_session(second, 3).unwrap();
        let cancel = CancellationToken::new();

        for session in [first, second] {
            coordinator
                .process_action(
                    session,
                    PlayerAction::new("explore the ruins"),
                    &snapshot(3, 0.0),
                    &cancel,
                )
                .await
                .unwrap();
        }

        assert_eq!(workers.get(WorkerId::WorldSimulator).call_count(), 1);
        assert_eq!(workers.get(WorkerId::NarrativeWriter).call_count(), 1);
        let stats = coordinator.cache_stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 3);
        assert!(!coordinator.worker_stats().is_empty());
    }

    #[tokio::test]
    async fn test_session_lifecycle_errors() {
        let coordinator = Coordinator::new(CoordinatorConfig::default(), WorkerRegistry::new());
        let session = SessionId::new();

        let err = coordinator
            .process_action(
                session,
                PlayerAction::new("hello"),
                &snapshot(1, 0.0),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownSession(id) if id == session));

        coordinator.initialize_session(session, 1).unwrap();
        assert!(matches!(
            coordinator.initialize_session(session, 1),
            Err(CoordinatorError::SessionExists(_))
        ));

        assert!(coordinator.end_session(session));
        assert!(!coordinator.end_session(session));
        assert!(coordinator.session_state(session).await.is_err());
    }

    #[test]
    fn test_from_config_file() {
        let dir = std::env::temp_dir();
        let valid = dir.join(format!("cortex-coordinator-{}-valid.toml", std::process::id()));
        let invalid = dir.join(format!("cortex-coordinator-{}-invalid.toml", std::process::id()));
        std::fs::write(&valid, "[merger]\nmax_choices = 2\n").unwrap();
        std::fs::write(&invalid, "[cascade]\nmax_chain_depth = 0\n").unwrap();

        let coordinator = Coordinator::from_config_file(&valid, WorkerRegistry::new()).unwrap();
        let rejected = Coordinator::from_config_file(&invalid, WorkerRegistry::new());
        std::fs::remove_file(&valid).ok();
        std::fs::remove_file(&invalid).ok();

        assert_eq!(coordinator.config().merger.max_choices, 2);
        assert!(matches!(
            rejected,
            Err(CoordinatorError::Config(crate::error::ConfigError::InvalidValue(_)))
        ));
    }

    #[tokio::test]
    async fn test_without_workers_still_answers() {
        let coordinator = Coordinator::new(CoordinatorConfig::default(), WorkerRegistry::new());
        let session = SessionId::new();
        coordinator.initialize_session(session, 1).unwrap();

        let response = coordinator
            .process_action(
                session,
                PlayerAction::new("talk to the guard"),
                &snapshot(1, 0.0),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.narrative, coordinator.config().merger.placeholder_narrative);
        assert!(!response.choices.is_empty());
        assert_eq!(response.metadata["tasks_failed"], json!(2));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_runs() {
        let workers = Workers::standard();
        let coordinator = Coordinator::new(CoordinatorConfig::default(), workers.registry());
        let session = SessionId::new();
        coordinator.initialize_session(session, 1).unwrap();

        coordinator.shutdown();
        let err = coordinator
            .process_action(
                session,
                PlayerAction::new("explore"),
                &snapshot(1, 0.0),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinatorError::Cancelled));
        assert!(coordinator.is_shut_down());
        assert_eq!(workers.get(WorkerId::NarrativeWriter).call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_releases_session() {
        let slow_writer = ScriptedWorker::new(
            WorkerId::NarrativeWriter,
            vec![ScriptedReply::delayed(
                Duration::from_secs(60),
                ScriptedReply::Respond(WorkerResponse::new(WorkerId::NarrativeWriter)),
            )],
        );
        let workers = Workers::standard().replace(slow_writer);
        let coordinator = Coordinator::new(CoordinatorConfig::default(), workers.registry());
        let session = SessionId::new();
        coordinator.initialize_session(session, 1).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let snap = snapshot(1, 0.0);

        let (result, ()) = tokio::join!(
            coordinator.process_action(session, PlayerAction::new("explore"), &snap, &cancel),
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                trigger.cancel();
            },
        );

        assert!(matches!(result, Err(CoordinatorError::Cancelled)));
        // The session lock was released with the dropped run.
        let state = coordinator.session_state(session).await.unwrap();
        assert!(state.recent_player_actions.is_empty());
    }
}
