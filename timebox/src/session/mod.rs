// Session management: timer state machine and its event stream

pub mod engine;

pub use engine::{SessionEngine, SessionEvent, SessionPhase};
