//! Optional hooks observing every tracked allocation and deallocation.
//!
//! No collector is installed by default, in which case the hooks cost one uncontended read lock.

use parking_lot::RwLock;
use std::sync::Arc;

/// Receives an event for every [allocate_tracked][crate::AllocationRecord::allocate_tracked] and every
/// record that reaches a use count of zero
pub trait ProfilingCollector: Send + Sync {
    fn allocate_data(&self, space: &str, label: &str, ptr: *const u8, size: usize);
    fn deallocate_data(&self, space: &str, label: &str, ptr: *const u8, size: usize);
}

lazy_static! {
    static ref COLLECTOR: RwLock<Option<Arc<dyn ProfilingCollector>>> = RwLock::new(None);
}

/// Install `collector`, returning the previously installed one
pub fn set_collector(collector: Arc<dyn ProfilingCollector>) -> Option<Arc<dyn ProfilingCollector>> {
    COLLECTOR.write().replace(collector)
}

/// Remove the installed collector
pub fn clear_collector() -> Option<Arc<dyn ProfilingCollector>> {
    COLLECTOR.write().take()
}

pub(crate) fn allocate_data(space: &str, label: &str, ptr: *const u8, size: usize) {
    if let Some(collector) = COLLECTOR.read().as_ref() {
        collector.allocate_data(space, label, ptr, size);
    }
}

pub(crate) fn deallocate_data(space: &str, label: &str, ptr: *const u8, size: usize) {
    if let Some(collector) = COLLECTOR.read().as_ref() {
        collector.deallocate_data(space, label, ptr, size);
    }
}
