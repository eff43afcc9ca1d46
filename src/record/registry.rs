use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::header::HEADER_SIZE;
use super::RecordHandle;

/// Bookkeeping for one tracked block, owned by the registry of its space
#[derive(Debug)]
pub(crate) struct RecordInner {
    pub(crate) handle: RecordHandle,
    pub(crate) label: String,
    /// start of the block, the header lives here
    pub(crate) block: usize,
    /// bytes requested from the space for header plus payload
    pub(crate) alloc_size: usize,
    /// payload bytes
    pub(crate) size: usize,
    pub(crate) count: AtomicUsize,
}

impl RecordInner {
    pub(crate) fn payload(&self) -> usize {
        self.block + HEADER_SIZE
    }

    pub(crate) fn use_count(&self) -> usize {
        match self.count.load(Ordering::SeqCst) {
            FREED => 0,
            n => n,
        }
    }

    pub(crate) fn is_freed(&self) -> bool {
        self.count.load(Ordering::SeqCst) == FREED
    }

    /// add one use, None once the record has been freed
    pub(crate) fn retain(&self) -> Option<usize> {
        let mut cur = self.count.load(Ordering::SeqCst);
        loop {
            if cur == FREED {
                return None;
            }
            match self
                .count
                .compare_exchange(cur, cur + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Some(cur + 1),
                Err(actual) => cur = actual,
            }
        }
    }
}

/// use count of a record whose last use has been released, it never leaves this state
pub(crate) const FREED: usize = usize::MAX;

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    record: Option<Arc<RecordInner>>,
}

#[derive(Debug, Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    // payload address -> handle, in allocation order
    by_payload: IndexMap<usize, RecordHandle>,
}

/// The live records of one space: a generation checked slot table plus a payload address index
#[derive(Debug, Default)]
pub(crate) struct Registry {
    slots: Mutex<Slots>,
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry::default()
    }

    /// register a new record, `f` builds it once its handle is known
    pub(crate) fn insert(&self, f: impl FnOnce(RecordHandle) -> RecordInner) -> Arc<RecordInner> {
        let mut slots = self.slots.lock();
        let index = match slots.free.pop() {
            Some(index) => index,
            None => {
                slots.slots.push(Slot::default());
                (slots.slots.len() - 1) as u32
            }
        };
        let handle = RecordHandle {
            index,
            generation: slots.slots[index as usize].generation,
        };
        let record = Arc::new(f(handle));
        if let Some(old) = slots.by_payload.insert(record.payload(), handle) {
            tracing::error!(
                "payload {:#x} of record {} is still registered to record {}",
                record.payload(),
                handle,
                old
            );
            debug_assert!(false, "payload {:#x} registered twice", record.payload());
        }
        slots.slots[index as usize].record = Some(record.clone());
        record
    }

    pub(crate) fn get(&self, handle: RecordHandle) -> Option<Arc<RecordInner>> {
        let slots = self.slots.lock();
        let slot = slots.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.record.clone()
    }

    /// unlink a record, its handle will never resolve again
    pub(crate) fn remove(&self, handle: RecordHandle) -> Option<Arc<RecordInner>> {
        let mut slots = self.slots.lock();
        let slot = slots.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        slots.free.push(handle.index);
        slots.by_payload.shift_remove(&record.payload());
        Some(record)
    }

    pub(crate) fn lookup(&self, payload: usize) -> Option<RecordHandle> {
        self.slots.lock().by_payload.get(&payload).copied()
    }

    pub(crate) fn count(&self) -> usize {
        self.slots.lock().by_payload.len()
    }

    /// live records in allocation order
    pub(crate) fn records(&self) -> Vec<Arc<RecordInner>> {
        let slots = self.slots.lock();
        slots
            .by_payload
            .values()
            .filter_map(|handle| slots.slots[handle.index as usize].record.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(block: usize) -> impl FnOnce(RecordHandle) -> RecordInner {
        move |handle| RecordInner {
            handle,
            label: format!("block_{:x}", block),
            block,
            alloc_size: HEADER_SIZE + 64,
            size: 64,
            count: AtomicUsize::new(0),
        }
    }

    #[test]
    fn stale_handles_do_not_resolve() {
        let registry = Registry::new();
        let first = registry.insert(record(0x1000)).handle;
        assert!(registry.remove(first).is_some());
        let second = registry.insert(record(0x2000)).handle;
        // the slot is reused under a new generation
        assert_eq!(first.index, second.index);
        assert_ne!(first.generation, second.generation);
        assert!(registry.get(first).is_none());
        assert!(registry.remove(first).is_none());
        assert_eq!(registry.get(second).unwrap().block, 0x2000);
    }

    #[test]
    fn freed_records_stay_freed() {
        let registry = Registry::new();
        let inner = registry.insert(record(0x1000));
        assert_eq!(inner.retain(), Some(1));
        inner.count.store(FREED, Ordering::SeqCst);
        assert!(inner.is_freed());
        assert_eq!(inner.retain(), None);
        assert_eq!(inner.use_count(), 0);
    }

    #[test]
    fn records_keep_allocation_order() {
        let registry = Registry::new();
        let handles: Vec<_> = [0x3000, 0x1000, 0x2000]
            .iter()
            .map(|block| registry.insert(record(*block)).handle)
            .collect();
        registry.remove(handles[1]);
        let blocks: Vec<_> = registry.records().iter().map(|r| r.block).collect();
        assert_eq!(blocks, vec![0x3000, 0x2000]);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.lookup(0x2000 + HEADER_SIZE), Some(handles[2]));
        assert_eq!(registry.lookup(0x1000 + HEADER_SIZE), None);
    }
}
