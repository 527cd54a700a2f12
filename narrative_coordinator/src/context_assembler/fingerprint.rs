//! Content fingerprints for worker contexts.
//!
//! Two contexts that would produce the same worker input share a fingerprint.
//! Prior responses and wall-clock data are left out, so identical actions in
//! identical world situations hit the cache even when earlier tasks differed.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::WorkerContext;

/// Action metadata keys that vary between otherwise identical requests.
const VOLATILE_METADATA_KEYS: [&str; 3] = ["timestamp", "request_id", "client_time"];

/// Hex-encoded SHA-256 of a context's cache-relevant content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextFingerprint(String);

impl ContextFingerprint {
    pub fn of(context: &WorkerContext) -> Self {
        let mut npcs = context.shared.active_npcs.clone();
        npcs.sort();

        let metadata: serde_json::Map<String, serde_json::Value> = context
            .action
            .metadata
            .iter()
            .filter(|(key, _)| !VOLATILE_METADATA_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        // serde_json maps are ordered by key, so this is a canonical encoding.
        let canonical = json!({
            "task": context.task_name,
            "kind": context.action_kind.as_str(),
            "action": context.action.text,
            "metadata": metadata,
            "turn": context.shared.turn_number,
            "location": context.shared.current_location,
            "chaos": chaos_bucket(context.shared.chaos_level),
            "npcs": npcs,
        });

        let digest = Sha256::digest(canonical.to_string().as_bytes());
        Self(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to tell keys apart in logs.
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

/// Chaos rounded to two decimals so float noise does not split cache keys.
fn chaos_bucket(chaos: f32) -> i64 {
    (chaos * 100.0).round() as i64
}
