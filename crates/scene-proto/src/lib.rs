//! Shared protocol definitions for scene-relay callers.
//! Keeping the wire contract in a dedicated crate lets clients (test
//! harnesses, agents, the debug CLI) depend on it without pulling in the
//! engine runtime.

pub mod command;
pub mod message;
pub mod outcome;
pub mod params;

pub use command::{Action, ActionKind, Command, CommandDecodeError};
pub use message::{ErrorBody, ErrorCode, InitAck, InitBody, Message, MessageKind};
pub use outcome::Outcome;
pub use params::{ActionParams, Direction, FocusParams, HighlightParams, Invocation, RotateParams, ZoomParams};

/// Generate a fresh command or message id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
