//! Coordinator for the wave reader.
//!
//! Provides:
//! - `Coordinator` - Sessions, settings and selectors behind a state machine
//! - `CoordinatorHandle` - The coordinator running as a routed actor
//! - Storage and tab host implementations (memory)

pub mod actor;
pub mod config;
pub mod coordinator;
pub mod error;
#[cfg(feature = "memory")]
pub mod host;
pub mod registry;
pub mod sessions;
pub mod state;
pub mod storage;

pub use actor::CoordinatorHandle;
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, Dispatch, Outbound, Outcome, Step, TabEvent, execute};
pub use error::CoordinatorError;
#[cfg(feature = "memory")]
pub use host::MemoryTabs;
pub use registry::SelectorRegistry;
pub use sessions::SessionTable;
pub use state::{CoordinatorState, FsmEvent, transition};
#[cfg(feature = "memory")]
pub use storage::MemoryStore;
