//! Scripted workers for deterministic testing without model calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Worker, WorkerId, WorkerResponse};
use crate::context_assembler::WorkerContext;
use crate::error::WorkerError;

/// Pre-programmed replies, consumed in order. The last one repeats.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Respond(WorkerResponse),
    Fail(WorkerError),
    /// Panic inside `process` with the given message.
    Panic(String),
    /// Wait a duration, then yield the inner reply.
    Delay(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn delayed(delay: Duration, inner: ScriptedReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Worker that replays a script and counts its calls.
pub struct ScriptedWorker {
    id: WorkerId,
    replies: Vec<ScriptedReply>,
    call_count: AtomicUsize,
    seen: Mutex<Vec<WorkerContext>>,
}

impl ScriptedWorker {
    pub fn new(id: WorkerId, replies: Vec<ScriptedReply>) -> Self {
        Self {
            id,
            replies,
            call_count: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// A worker that always answers with the given narrative.
    pub fn narrating(id: WorkerId, narrative: &str) -> Self {
        Self::responding(id, WorkerResponse::new(id).with_narrative(narrative))
    }

    /// A worker that always answers with the given response.
    pub fn responding(id: WorkerId, response: WorkerResponse) -> Self {
        Self::new(id, vec![ScriptedReply::Respond(response)])
    }

    /// A worker that always fails.
    pub fn failing(id: WorkerId, message: &str) -> Self {
        Self::new(id, vec![ScriptedReply::Fail(WorkerError::Failed(message.to_string()))])
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Contexts received so far, in call order.
    pub fn seen_contexts(&self) -> Vec<WorkerContext> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    async fn process(&self, context: &WorkerContext) -> Result<WorkerResponse, WorkerError> {
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(context.clone());

        let mut reply = match self.replies.get(index).or_else(|| self.replies.last()) {
            Some(reply) => reply.clone(),
            None => return Err(WorkerError::Unavailable("empty script".into())),
        };

        loop {
            match reply {
                ScriptedReply::Respond(response) => return Ok(response),
                ScriptedReply::Fail(error) => return Err(error),
                ScriptedReply::Panic(message) => panic!("{message}"),
                ScriptedReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}
