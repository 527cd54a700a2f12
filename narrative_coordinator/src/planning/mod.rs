//! Planning - turns a classified action into an ordered list of coordination tasks.
//!
//! Each action kind maps to a fixed template of tasks. An extra anomaly task
//! may be injected depending on the world's chaos and the turn number. The
//! list is then linearized so that every task follows its dependencies.

mod builder;
mod task;

pub use builder::*;
pub use task::*;
