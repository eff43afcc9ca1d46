use std::mem::ManuallyDrop;

use super::{release, AllocationRecord};
use crate::error::RecordError;
use crate::space::RemoteSpace;

/// An owning handle to a tracked allocation.
///
/// Cloning retains the record, dropping releases it, the last drop frees the block. Since freeing is
/// collective, every pe must drop its handles in the same order.
///
/// # Examples
///```
/// use remote_spaces::{Backend, RemoteSpaceBuilder, TrackedAlloc};
///
/// let space = RemoteSpaceBuilder::new().with_backend(Backend::Local).build();
/// let a = TrackedAlloc::new(&space, "a", 4096);
/// let b = a.clone();
/// assert_eq!(a.use_count(), 2);
/// drop(a);
/// assert_eq!(b.use_count(), 1);
///```
pub struct TrackedAlloc {
    record: AllocationRecord,
    space: RemoteSpace,
}

impl TrackedAlloc {
    /// Collectively allocate `size` payload bytes.
    ///
    /// Unlike [allocate_tracked][AllocationRecord::allocate_tracked] a zero size still allocates a header.
    pub fn new(space: &RemoteSpace, label: &str, size: usize) -> TrackedAlloc {
        let record = AllocationRecord::allocate(space, label, size);
        record.increment();
        TrackedAlloc {
            record,
            space: space.clone(),
        }
    }

    /// Take over one use of a payload returned by [allocate_tracked][AllocationRecord::allocate_tracked]
    /// or [into_raw][TrackedAlloc::into_raw]
    pub fn from_raw(space: &RemoteSpace, ptr: *mut u8) -> Result<TrackedAlloc, RecordError> {
        let record = AllocationRecord::resolve(space, ptr, "from_raw")?;
        Ok(TrackedAlloc {
            record,
            space: space.clone(),
        })
    }

    /// Give up the handle without releasing its use, pair with
    /// [deallocate_tracked][AllocationRecord::deallocate_tracked] or [from_raw][TrackedAlloc::from_raw]
    pub fn into_raw(self) -> *mut u8 {
        let this = ManuallyDrop::new(self);
        let ptr = this.record.data();
        // drop the fields without running our Drop
        let (record, space) = unsafe { (std::ptr::read(&this.record), std::ptr::read(&this.space)) };
        drop(record);
        drop(space);
        ptr
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.record.data()
    }

    /// payload bytes
    pub fn len(&self) -> usize {
        self.record.size()
    }

    pub fn is_empty(&self) -> bool {
        self.record.size() == 0
    }

    pub fn use_count(&self) -> usize {
        self.record.use_count()
    }

    pub fn record(&self) -> &AllocationRecord {
        &self.record
    }

    pub fn space(&self) -> &RemoteSpace {
        &self.space
    }
}

impl Clone for TrackedAlloc {
    fn clone(&self) -> Self {
        self.record.increment();
        TrackedAlloc {
            record: self.record.clone(),
            space: self.space.clone(),
        }
    }
}

impl Drop for TrackedAlloc {
    fn drop(&mut self) {
        release(&self.record.inner, &self.space);
    }
}

impl std::fmt::Debug for TrackedAlloc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedAlloc")
            .field("space", &self.space.name())
            .field("record", &self.record)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backend, RemoteSpaceBuilder};

    #[test]
    fn raw_round_trip_keeps_the_use() {
        let space = RemoteSpaceBuilder::new().with_backend(Backend::Local).build();
        let tracked = TrackedAlloc::new(&space, "raw", 32);
        let ptr = tracked.into_raw();
        assert_eq!(
            AllocationRecord::get_record(&space, ptr).unwrap().use_count(),
            1
        );
        let tracked = TrackedAlloc::from_raw(&space, ptr).unwrap();
        assert_eq!(tracked.as_ptr(), ptr);
        drop(tracked);
        assert_eq!(space.record_count(), 0);
    }

    #[test]
    fn zero_sized_handles_own_a_header() {
        let space = RemoteSpaceBuilder::new().with_backend(Backend::Local).build();
        let tracked = TrackedAlloc::new(&space, "empty", 0);
        assert!(tracked.is_empty());
        assert!(!tracked.as_ptr().is_null());
        assert_eq!(space.record_count(), 1);
        drop(tracked);
        assert_eq!(space.record_count(), 0);
    }
}
