//! In-memory tab host.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use wave_reader_core::{TabHost, TabId};

/// Tab host whose active tab is set by hand.
#[derive(Debug, Default)]
pub struct MemoryTabs {
    active: RwLock<Option<TabId>>,
}

impl MemoryTabs {
    #[must_use]
    pub const fn new(active: Option<TabId>) -> Self {
        Self {
            active: RwLock::new(active),
        }
    }

    pub fn set_active(&self, tab: Option<TabId>) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = tab;
    }
}

#[async_trait]
impl TabHost for MemoryTabs {
    async fn active_tab(&self) -> Option<TabId> {
        *self.active.read().unwrap_or_else(PoisonError::into_inner)
    }
}
