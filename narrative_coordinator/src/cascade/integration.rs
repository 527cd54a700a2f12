//! Deriving game events from a task's worker responses.

use game_rules::{GameEvent, GameEventType};
use serde_json::{json, Value};

use crate::workers::{WorkerId, WorkerResponse};

/// Which worker flag produces which event.
const FLAG_EVENTS: [(WorkerId, &str, GameEventType); 4] = [
    (WorkerId::WorldSimulator, "world_event", GameEventType::WorldEvent),
    (WorkerId::NpcManager, "npc_spawned", GameEventType::NpcSpawn),
    (WorkerId::NpcManager, "npc_died", GameEventType::NpcDeath),
    (WorkerId::AnomalyGenerator, "anomaly", GameEventType::Anomaly),
];

/// Events implied by successful responses: one `StateChange` per non-empty
/// change set, plus one event per recognised worker flag.
pub fn derive_events(responses: &[WorkerResponse], turn: u32) -> Vec<GameEvent> {
    let mut events = Vec::new();

    for response in responses.iter().filter(|r| r.success) {
        let source = response.worker_id.as_str();

        if !response.state_changes.is_empty() {
            let payload: serde_json::Map<String, Value> = response
                .state_changes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            events.push(
                GameEvent::new(GameEventType::StateChange)
                    .with_payload(Value::Object(payload))
                    .with_source(source)
                    .with_turn(turn),
            );
        }

        for (worker, flag, event_type) in FLAG_EVENTS {
            if response.worker_id != worker || !response.has_flag(flag) {
                continue;
            }
            let payload = response
                .metadata_value(flag)
                .map(|value| flag_payload(event_type, value))
                .unwrap_or_else(|| json!({}));
            events.push(
                GameEvent::new(event_type)
                    .with_payload(payload)
                    .with_source(source)
                    .with_turn(turn),
            );
        }
    }

    events
}

/// Events workers reported themselves, stamped with source and turn.
pub fn reported_events(responses: &[WorkerResponse], turn: u32) -> Vec<GameEvent> {
    responses
        .iter()
        .filter(|r| r.success)
        .flat_map(|response| {
            response.events.iter().cloned().map(move |mut event| {
                if event.source.is_none() {
                    event.source = Some(response.worker_id.as_str().to_string());
                }
                if event.turn == 0 {
                    event.turn = turn;
                }
                event
            })
        })
        .collect()
}

/// Objects pass through; a bare string becomes the name or kind field.
fn flag_payload(event_type: GameEventType, value: &Value) -> Value {
    match value {
        Value::Object(_) => value.clone(),
        Value::String(s) => match event_type {
            GameEventType::NpcSpawn | GameEventType::NpcDeath => json!({ "name": s }),
            _ => json!({ "kind": s }),
        },
        _ => json!({}),
    }
}
