//! Core abstractions shared by the wave reader contexts.
//!
//! This crate provides the fundamental building blocks:
//! - `Message` / `Reply` - Closed message model exchanged between contexts
//! - `Settings` - Shared animation settings and partial updates
//! - `ErrorLog` - Bounded ring buffer with live subscription
//! - `retry` - Bounded retry combinator with pluggable backoff
//! - Host traits for the page, the tab lookup and key-value storage

pub mod dom;
pub mod error_log;
pub mod message;
pub mod retry;
pub mod selector;
pub mod settings;
pub mod traits;

#[cfg(feature = "memory")]
pub use dom::{MemoryDocument, MemoryElement};
pub use dom::{Document, DomError, DomMutation, ElementId, Point, Rect, Viewport};
pub use error_log::{ErrorEntry, ErrorLog};
pub use message::{Endpoint, ErrorCode, Message, Notice, Reply};
pub use retry::{RetryError, linear_backoff, retry};
pub use selector::{SelectorError, validate_selector};
pub use settings::{Settings, SettingsPatch};
pub use traits::{
    AnimationState, KeyValueStore, Session, SessionId, StorageError, TabHost, TabId, now_millis,
};
