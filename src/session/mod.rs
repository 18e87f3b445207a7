//! Brokering session lifecycle: data model, store and state machine

pub mod machine;
pub mod store;
pub mod types;

pub use machine::SessionStateMachine;
pub use store::SessionStore;
pub use types::{Selection, Session, SessionMetrics, SessionStatus, TimelineEvent};
