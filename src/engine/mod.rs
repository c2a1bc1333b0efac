//! Execution Engine
//!
//! Schedules every running agent's cycles at its interval, ordered by
//! priority class and gated by the shared resource pool.

pub mod executor;
pub mod queue;

pub use executor::{EngineConfig, EngineState, EngineStats, ExecutionEngine};
pub use queue::{QueueStats, TaskQueue};
