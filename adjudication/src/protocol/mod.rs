//! Debate protocol: request/turn/transcript types, prompt
//! construction, and the engine that runs the turn loop.

pub mod engine;
pub mod prompts;
pub mod types;

pub use engine::{DebateEngine, DebateFailure};
pub use types::{DebateRecord, DebateRequest, Side, Transcript, Turn, MAX_ROUNDS};
