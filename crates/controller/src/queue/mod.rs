pub mod action_queue;
pub mod types;

pub use action_queue::ActionQueue;
pub use types::{Action, ActionEnvelope, ActionKind, ActionStatus, AgentInfo};
