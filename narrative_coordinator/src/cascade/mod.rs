//! Event cascade - feeds worker output back into the session state.
//!
//! After each task:
//! 1. Derive events from the task's responses (see [`derive_events`]) and take
//!    the events workers reported themselves
//! 2. Record each event in the session's recent history
//! 3. Drain the queue round by round through an [`EventProcessor`]; follow-up
//!    events join the next round
//!
//! Draining stops after `max_chain_depth` rounds no matter what is still
//! queued. A processor error affects only its own event.

mod integration;

pub use integration::*;

use std::sync::Arc;

use game_rules::{Disposition, FlagValue, GameEvent, GameEventType, Npc, SharedSessionState};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::CascadeConfig;
use crate::error::CascadeError;
use crate::workers::WorkerResponse;

/// Applies one event to the session and returns any follow-up events.
pub trait EventProcessor: Send + Sync {
    fn process(
        &self,
        event: &GameEvent,
        state: &mut SharedSessionState,
    ) -> Result<Vec<GameEvent>, CascadeError>;
}

/// Chaos added to the world when an NPC dies.
const NPC_DEATH_CHAOS: f64 = 0.05;

/// The default processor: keeps the world state in step with events.
#[derive(Debug, Clone)]
pub struct WorldEventProcessor {
    surge_threshold: f32,
}

impl WorldEventProcessor {
    pub fn new(surge_threshold: f32) -> Self {
        Self { surge_threshold }
    }

    /// An anomaly when chaos rose across the surge threshold.
    fn surge(&self, previous: f32, state: &SharedSessionState) -> Option<GameEvent> {
        let current = state.world.chaos_level;
        (previous < self.surge_threshold && current >= self.surge_threshold).then(|| {
            GameEvent::new(GameEventType::Anomaly)
                .with_payload(json!({ "kind": "chaos_surge", "chaos_level": current }))
                .with_source("cascade")
                .with_turn(state.turn_number)
        })
    }

    fn apply_state_change(
        &self,
        event: &GameEvent,
        state: &mut SharedSessionState,
    ) -> Result<Vec<GameEvent>, CascadeError> {
        let changes = event
            .payload
            .as_object()
            .ok_or_else(|| malformed(event, "expected an object"))?;
        let mut followups = Vec::new();

        for (key, value) in changes {
            match key.as_str() {
                "chaos_level" => {
                    let level = value
                        .as_f64()
                        .ok_or_else(|| malformed(event, "chaos_level must be a number"))?;
                    let previous = state.world.set_chaos_level(level as f32);
                    followups.extend(self.surge(previous, state));
                }
                "location" | "current_location" => {
                    let place = value
                        .as_str()
                        .ok_or_else(|| malformed(event, "location must be a string"))?;
                    state.world.enter_location(place);
                }
                _ => match FlagValue::from_json(value) {
                    Some(flag) => {
                        state.world.global_flags.insert(key.clone(), flag);
                    }
                    None => debug!(key = %key, "state change has no flag form, skipped"),
                },
            }
        }

        Ok(followups)
    }

    fn spawn(
        &self,
        event: &GameEvent,
        state: &mut SharedSessionState,
    ) -> Result<Vec<GameEvent>, CascadeError> {
        let name = event.payload_str("name").ok_or_else(|| malformed(event, "missing name"))?;
        let disposition = event
            .payload_str("disposition")
            .and_then(Disposition::from_label)
            .unwrap_or_default();
        state
            .world
            .spawn_npc(Npc::new(name, state.turn_number).with_disposition(disposition));
        Ok(Vec::new())
    }

    fn death(
        &self,
        event: &GameEvent,
        state: &mut SharedSessionState,
    ) -> Result<Vec<GameEvent>, CascadeError> {
        let name = event.payload_str("name").ok_or_else(|| malformed(event, "missing name"))?;
        if state.world.remove_npc_by_name(name).is_none() {
            debug!(npc = name, "death of an NPC not in the scene");
            return Ok(Vec::new());
        }

        Ok(vec![GameEvent::new(GameEventType::WorldEvent)
            .with_payload(json!({
                "kind": "npc_fallen",
                "name": name,
                "chaos_delta": NPC_DEATH_CHAOS,
            }))
            .with_source("cascade")
            .with_turn(state.turn_number)])
    }

    fn world_event(
        &self,
        event: &GameEvent,
        state: &mut SharedSessionState,
    ) -> Result<Vec<GameEvent>, CascadeError> {
        let mut followups = Vec::new();
        if let Some(place) = event.payload_str("location") {
            state.world.enter_location(place);
        }
        match event.payload.get("chaos_delta") {
            Some(Value::Number(n)) => {
                let delta = n.as_f64().unwrap_or_default() as f32;
                let previous = state.world.shift_chaos(delta);
                followups.extend(self.surge(previous, state));
            }
            Some(_) => return Err(malformed(event, "chaos_delta must be a number")),
            None => {}
        }
        Ok(followups)
    }
}

impl Default for WorldEventProcessor {
    fn default() -> Self {
        Self::new(CascadeConfig::default().chaos_surge_threshold)
    }
}

impl EventProcessor for WorldEventProcessor {
    fn process(
        &self,
        event: &GameEvent,
        state: &mut SharedSessionState,
    ) -> Result<Vec<GameEvent>, CascadeError> {
        match event.event_type {
            GameEventType::StateChange => self.apply_state_change(event, state),
            GameEventType::NpcSpawn => self.spawn(event, state),
            GameEventType::NpcDeath => self.death(event, state),
            GameEventType::WorldEvent => self.world_event(event, state),
            GameEventType::Anomaly => {
                state
                    .world
                    .global_flags
                    .insert("last_anomaly_turn".into(), FlagValue::Int(state.turn_number.into()));
                Ok(Vec::new())
            }
            GameEventType::QuestUpdate => {
                let quest = event.payload_str("quest");
                if let (Some(quest), Some(status)) = (quest, event.payload_str("status")) {
                    state
                        .world
                        .global_flags
                        .insert(format!("quest:{}", quest), FlagValue::String(status.to_string()));
                }
                Ok(Vec::new())
            }
        }
    }
}

fn malformed(event: &GameEvent, reason: &str) -> CascadeError {
    CascadeError::MalformedPayload {
        event_type: event.event_type.to_string(),
        reason: reason.to_string(),
    }
}

/// What one cascade pass did.
#[derive(Debug, Clone, Default)]
pub struct CascadeReport {
    /// Events the cascade produced: derived from flags and state changes, plus
    /// follow-ups. Worker-reported events are not repeated here.
    pub events: Vec<GameEvent>,
    pub processed: usize,
    pub rounds: usize,
    /// Events still queued when the depth limit was hit.
    pub dropped: usize,
    pub failures: usize,
}

impl CascadeReport {
    pub fn absorb(&mut self, other: CascadeReport) {
        self.events.extend(other.events);
        self.processed += other.processed;
        self.rounds = self.rounds.max(other.rounds);
        self.dropped += other.dropped;
        self.failures += other.failures;
    }
}

/// Bounded-depth event propagation for one session.
#[derive(Clone)]
pub struct EventCascade {
    config: CascadeConfig,
    processor: Arc<dyn EventProcessor>,
}

impl EventCascade {
    pub fn new(config: CascadeConfig) -> Self {
        let processor = Arc::new(WorldEventProcessor::new(config.chaos_surge_threshold));
        Self { config, processor }
    }

    pub fn with_processor(mut self, processor: Arc<dyn EventProcessor>) -> Self {
        self.processor = processor;
        self
    }

    /// Integrate one task's responses into the session.
    pub fn integrate(
        &self,
        responses: &[WorkerResponse],
        state: &mut SharedSessionState,
    ) -> CascadeReport {
        let turn = state.turn_number;
        let derived = derive_events(responses, turn);
        let reported = reported_events(responses, turn);

        for event in derived.iter().chain(&reported) {
            self.note(event, state);
        }

        let mut queue = derived.clone();
        queue.extend(reported);

        let mut report = self.drain(queue, state);
        let mut events = derived;
        events.append(&mut report.events);
        report.events = events;
        report
    }

    /// Process `queue` for at most `max_chain_depth` rounds.
    pub fn drain(
        &self,
        mut queue: Vec<GameEvent>,
        state: &mut SharedSessionState,
    ) -> CascadeReport {
        let mut report = CascadeReport::default();

        while !queue.is_empty() {
            if report.rounds >= self.config.max_chain_depth {
                report.dropped = queue.len();
                warn!(
                    dropped = report.dropped,
                    depth = self.config.max_chain_depth,
                    "event cascade depth limit reached"
                );
                break;
            }
            report.rounds += 1;

            let mut next = Vec::new();
            for event in queue.drain(..) {
                report.processed += 1;
                match self.processor.process(&event, state) {
                    Ok(followups) => {
                        for followup in followups {
                            self.note(&followup, state);
                            report.events.push(followup.clone());
                            next.push(followup);
                        }
                    }
                    Err(err) => {
                        report.failures += 1;
                        warn!(event = %event.event_type, error = %err, "event processing failed");
                    }
                }
            }
            queue = next;
        }

        report
    }

    fn note(&self, event: &GameEvent, state: &mut SharedSessionState) {
        if event.priority >= self.config.significant_priority {
            info!(
                event = %event.event_type,
                priority = event.priority,
                source = event.source.as_deref().unwrap_or("-"),
                turn = event.turn,
                "significant event"
            );
        }
        state.record_event(event.clone());
    }
}

impl Default for EventCascade {
    fn default() -> Self {
        Self::new(CascadeConfig::default())
    }
}

impl std::fmt::Debug for EventCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCascade")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::WorkerId;
    use game_rules::SessionId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state() -> SharedSessionState {
        SharedSessionState::new(SessionId::new(), 4)
    }

    /// Always answers with another event.
    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    impl EventProcessor for Echo {
        fn process(
            &self,
            event: &GameEvent,
            _state: &mut SharedSessionState,
        ) -> Result<Vec<GameEvent>, CascadeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![GameEvent::new(event.event_type)])
        }
    }

    struct Broken;

    impl EventProcessor for Broken {
        fn process(
            &self,
            _event: &GameEvent,
            _state: &mut SharedSessionState,
        ) -> Result<Vec<GameEvent>, CascadeError> {
            Err(CascadeError::Processing("broken".into()))
        }
    }

    #[test]
    fn test_depth_is_bounded() {
        let echo = Arc::new(Echo::default());
        let cascade = EventCascade::default().with_processor(echo.clone());
        let mut state = state();

        let report = cascade.drain(vec![GameEvent::new(GameEventType::WorldEvent)], &mut state);

        assert_eq!(report.rounds, 3);
        assert_eq!(report.processed, 3);
        assert_eq!(report.dropped, 1);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.events.len(), 3);
    }

    #[test]
    fn test_processor_errors_are_contained() {
        let cascade = EventCascade::default().with_processor(Arc::new(Broken));
        let mut state = state();
        let responses = vec![WorkerResponse::new(WorkerId::WorldSimulator)
            .with_state_change("gate", json!("open"))
            .with_metadata("world_event", json!("quake"))];

        let report = cascade.integrate(&responses, &mut state);

        assert_eq!(report.failures, 2);
        assert_eq!(report.events.len(), 2);
        assert_eq!(state.recent_events.len(), 2);
    }

    #[test]
    fn test_state_changes_apply_to_world() {
        let cascade = EventCascade::default();
        let mut state = state();
        let responses = vec![WorkerResponse::new(WorkerId::RulesAdjudicator)
            .with_state_change("chaos_level", json!(0.5))
            .with_state_change("location", json!("Old Mill"))
            .with_state_change("bridge_down", json!(true))];

        let report = cascade.integrate(&responses, &mut state);

        assert_eq!(report.failures, 0);
        assert_eq!(state.world.chaos_level, 0.5);
        assert_eq!(state.world.current_location, "Old Mill");
        assert!(state.world.has_visited("Old Mill"));
        assert_eq!(state.world.global_flags.get("bridge_down"), Some(&FlagValue::Bool(true)));
    }

    #[test]
    fn test_npc_lifecycle_and_chaos_surge() {
        let cascade = EventCascade::default();
        let mut state = state();
        state.world.set_chaos_level(0.78);

        let spawned = vec![WorkerResponse::new(WorkerId::NpcManager)
            .with_metadata("npc_spawned", json!({"name": "Oren", "disposition": "hostile"}))];
        cascade.integrate(&spawned, &mut state);
        assert_eq!(state.world.active_npc_names(), vec!["Oren"]);
        assert!(state.world.active_npcs.values().all(Npc::is_hostile));

        let died = vec![
            WorkerResponse::new(WorkerId::NpcManager).with_metadata("npc_died", json!("oren")),
        ];
        let report = cascade.integrate(&died, &mut state);

        assert!(state.world.active_npcs.is_empty());
        // death -> npc_fallen (chaos +0.05) -> surge anomaly
        let types: Vec<_> = report.events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![GameEventType::NpcDeath, GameEventType::WorldEvent, GameEventType::Anomaly]
        );
        assert_eq!(report.rounds, 3);
        assert!(state.has_recent_anomaly());
        assert_eq!(state.world.global_flags.get("last_anomaly_turn"), Some(&FlagValue::Int(4)));
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let processor = WorldEventProcessor::default();
        let mut state = state();

        let err = processor
            .process(&GameEvent::new(GameEventType::NpcSpawn), &mut state)
            .unwrap_err();

        assert!(matches!(err, CascadeError::MalformedPayload { .. }));
    }

    #[test]
    fn test_reported_events_are_processed_not_repeated() {
        let cascade = EventCascade::default();
        let mut state = state();
        let responses = vec![WorkerResponse::new(WorkerId::AnomalyGenerator).with_event(
            GameEvent::new(GameEventType::QuestUpdate)
                .with_payload(json!({"quest": "lost_bell", "status": "started"})),
        )];

        let report = cascade.integrate(&responses, &mut state);

        assert!(report.events.is_empty());
        assert_eq!(report.processed, 1);
        assert_eq!(
            state.world.global_flags.get("quest:lost_bell"),
            Some(&FlagValue::String("started".into()))
        );
        assert_eq!(state.recent_events.len(), 1);
    }
}
