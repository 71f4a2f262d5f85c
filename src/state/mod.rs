//! State module for tracking ingestion progress
//!
//! # Components
//!
//! - `UnitState`: Tracks one fetch unit through its retry state machine
//! - `TaskStatus`: Tracks the lifecycle of one search term's task

mod task_state;
mod unit_state;

// Re-export main types
pub use task_state::TaskStatus;
pub use unit_state::UnitState;
