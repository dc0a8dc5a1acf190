//! Wave animation engine.
//!
//! Provides:
//! - `WaveEngine` - Timer-driven recompute loop bound to one document
//! - `WaveCore` - Pure planning step: threshold, geometry, change filtering
//! - CSS fragment rendering and parsing

pub mod config;
pub mod css;
pub mod engine;
pub mod geometry;
pub mod planner;
pub mod stats;

pub use config::EngineConfig;
pub use engine::{PointerHandle, WaveEngine};
pub use geometry::{WaveParams, compute_params};
pub use planner::{Plan, PlannedWrite, SkipReason, WaveCore};
pub use stats::EngineStats;
