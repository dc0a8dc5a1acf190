//! Execution agent injected into each page.
//!
//! Provides:
//! - `AgentController` - START/STOP/PAUSE/RESUME lifecycle over one wave engine
//! - `AgentRuntime` - Router-bound task with debounced observer restarts
//! - `AgentConfig` - Debounce windows and engine tuning

pub mod config;
pub mod controller;
pub mod error;
pub mod runtime;

pub use config::AgentConfig;
pub use controller::AgentController;
pub use error::AgentError;
pub use runtime::{AgentExit, AgentHandle, AgentRuntime};
