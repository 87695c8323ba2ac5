//! The agent loop and planner for TaskForge.
//!
//! `Planner` turns a goal into an ordered plan, judges progress after each
//! step, and synthesizes the final response. `AgentRunner` drives the
//! bounded Initialize → Planning → Acting → Evaluating → Finishing state
//! machine and is the single writer of session state.

pub mod planner;
pub mod runner;

pub use planner::{Decision, Planner, RecoveryPolicy};
pub use runner::AgentRunner;
