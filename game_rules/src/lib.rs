//! # Game Rules
//!
//! The "World Bible" crate - contains the rule-level data of a play session:
//! player actions and their classification, the world state, game events, and
//! the shared session record. This crate is the single source of truth for
//! game state and does not contain any AI logic.

pub mod actions;
pub mod entities;
pub mod events;
pub mod session;
pub mod world_state;

pub use actions::*;
pub use entities::*;
pub use events::*;
pub use session::*;
pub use world_state::*;
