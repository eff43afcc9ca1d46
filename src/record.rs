//! Reference counted tracking of symmetric allocations.
//!
//! Every tracked block starts with a fixed size [header][HEADER_SIZE] naming its record, the pointer handed
//! to the caller addresses the payload that follows it. Records are owned by the registry of the space
//! that allocated them, so a payload pointer can always be resolved back to its record and every live
//! record can be listed for leak reports.
//!
//! The use count follows the usual retain/release discipline: [allocate_tracked][AllocationRecord::allocate_tracked]
//! returns a payload with a count of one, every [increment][AllocationRecord::increment] must be paired with a
//! release, and the block is returned to the space when the count reaches zero. Reaching zero deallocates
//! collectively, so every pe must release its records in the same order.

pub(crate) mod header;
pub(crate) mod registry;
mod tracked;

pub use header::{HEADER_SIZE, MAXIMUM_LABEL_LENGTH};
pub use tracked::TrackedAlloc;

use header::{AllocationHeader, HANDLE_BYTES};
use registry::{RecordInner, FREED};

use crate::backend::CommRdma;
use crate::deep_copy;
use crate::error::RecordError;
use crate::profiling;
use crate::space::{AllocationMode, RemoteSpace, SpaceInner};

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Identifies a record within the registry of its space, stale handles never resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl RecordHandle {
    pub fn index(&self) -> u32 {
        self.index
    }
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

/// A view of one tracked allocation.
///
/// Cloning a record does not change its use count, use [TrackedAlloc] for an owning handle.
#[derive(Clone)]
pub struct AllocationRecord {
    inner: Arc<RecordInner>,
    space: Weak<SpaceInner>,
    mode: AllocationMode,
    extent: Option<usize>,
}

impl std::fmt::Debug for AllocationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationRecord")
            .field("handle", &self.inner.handle)
            .field("label", &self.inner.label)
            .field("data", &(self.inner.payload() as *const u8))
            .field("size", &self.inner.size)
            .field("use_count", &self.inner.use_count())
            .finish()
    }
}

impl AllocationRecord {
    fn from_inner(space: &RemoteSpace, inner: Arc<RecordInner>) -> AllocationRecord {
        AllocationRecord {
            inner,
            space: Arc::downgrade(&space.inner),
            mode: space.allocation_mode(),
            extent: space.extent(),
        }
    }

    /// Collectively allocate a block of `size` payload bytes behind a header, the new record has a use count of zero.
    ///
    /// # Panics
    /// see [RemoteSpace::allocate]
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn allocate(space: &RemoteSpace, label: &str, size: usize) -> AllocationRecord {
        let alloc_size = HEADER_SIZE + size;
        let block = space.allocate(alloc_size) as usize;
        let inner = space.inner.registry.insert(|handle| RecordInner {
            handle,
            label: label.to_owned(),
            block,
            alloc_size,
            size,
            count: AtomicUsize::new(0),
        });
        let header = AllocationHeader::new(inner.handle, label);
        if let Err(e) = space.comm().put(space.my_pe(), &header.to_bytes(), block) {
            panic!(
                "[REMOTE SPACE ERROR] {}: unable to write the header of '{}' at {:#x}: {}",
                space.name(),
                label,
                block,
                e
            );
        }
        tracing::trace!(
            "{} allocated record {} '{}' [ {:#x} + {} ]",
            space.name(),
            inner.handle,
            label,
            inner.payload(),
            size
        );
        profiling::allocate_data(space.name(), label, inner.payload() as *const u8, size);
        AllocationRecord::from_inner(space, inner)
    }

    /// Collectively allocate `size` bytes and return the payload with a use count of one.
    ///
    /// A zero size returns null without allocating.
    pub fn allocate_tracked(space: &RemoteSpace, label: &str, size: usize) -> *mut u8 {
        if size == 0 {
            return std::ptr::null_mut();
        }
        let record = AllocationRecord::allocate(space, label, size);
        record.increment();
        record.data()
    }

    /// Release one use of the payload at `ptr`, freeing the block (collectively) when the count reaches zero.
    ///
    /// Null is a no-op.
    ///
    /// # Panics
    /// if the use count is already zero
    pub fn deallocate_tracked(space: &RemoteSpace, ptr: *mut u8) -> Result<(), RecordError> {
        if ptr.is_null() {
            return Ok(());
        }
        let record = AllocationRecord::resolve(space, ptr, "deallocate_tracked")?;
        release(&record.inner, space);
        Ok(())
    }

    /// Move the payload at `ptr` into a new block of `new_size` bytes with the same label.
    ///
    /// The first `min(old, new)` bytes are copied, the returned payload has a use count of one and one use
    /// of the old payload is released.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn reallocate_tracked(
        space: &RemoteSpace,
        ptr: *mut u8,
        new_size: usize,
    ) -> Result<*mut u8, RecordError> {
        let old = AllocationRecord::resolve(space, ptr, "reallocate_tracked")?;
        let new = AllocationRecord::allocate(space, old.label(), new_size);
        new.increment();
        let n = old.size().min(new_size);
        if let Err(e) = deep_copy::remote_to_remote(space, new.data(), old.data(), n) {
            release(&new.inner, space);
            return Err(e.into());
        }
        release(&old.inner, space);
        Ok(new.data())
    }

    /// Resolve a payload pointer to its record, checking the header in front of it
    pub fn get_record(space: &RemoteSpace, ptr: *const u8) -> Result<AllocationRecord, RecordError> {
        AllocationRecord::resolve(space, ptr, "get_record")
    }

    fn resolve(
        space: &RemoteSpace,
        ptr: *const u8,
        op: &'static str,
    ) -> Result<AllocationRecord, RecordError> {
        if ptr.is_null() {
            return Err(RecordError::NullPointer(op));
        }
        let addr = ptr as usize;
        let registry = &space.inner.registry;
        let expected = registry
            .lookup(addr)
            .ok_or(RecordError::UnknownPointer(op, addr))?;
        let mut buf = [0u8; HANDLE_BYTES];
        let found = space
            .comm()
            .get(space.my_pe(), addr - HEADER_SIZE, &mut buf)
            .ok()
            .and_then(|_| AllocationHeader::read_handle(&buf));
        if found != Some(expected) {
            tracing::error!(
                "{}: header of {:#x} reads {:?}, expected {}",
                op,
                addr,
                found,
                expected
            );
            return Err(RecordError::HeaderMismatch {
                op,
                addr,
                expected,
                found,
            });
        }
        let inner = registry
            .get(expected)
            .ok_or(RecordError::UnknownPointer(op, addr))?;
        Ok(AllocationRecord::from_inner(space, inner))
    }

    /// every live record of `space` in allocation order
    pub fn records(space: &RemoteSpace) -> Vec<AllocationRecord> {
        space
            .inner
            .registry
            .records()
            .into_iter()
            .map(|inner| AllocationRecord::from_inner(space, inner))
            .collect()
    }

    /// Write one line per live record of `space`.
    ///
    /// brief: `{name} [ 0x{payload} + {size} ] {label}`
    ///
    /// detail: `{name} handle( {index}:{generation} ) block[ 0x{begin} , 0x{end} ) {size} count({n}) {label}`
    pub fn print_records<W: Write>(
        w: &mut W,
        space: &RemoteSpace,
        detail: bool,
    ) -> std::io::Result<()> {
        for record in space.inner.registry.records() {
            if detail {
                writeln!(
                    w,
                    "{} handle( {} ) block[ 0x{:x} , 0x{:x} ) {} count({}) {}",
                    space.name(),
                    record.handle,
                    record.block,
                    record.block + record.alloc_size,
                    record.size,
                    record.use_count(),
                    record.label
                )?;
            } else {
                writeln!(
                    w,
                    "{} [ 0x{:x} + {} ] {}",
                    space.name(),
                    record.payload(),
                    record.size,
                    record.label
                )?;
            }
        }
        Ok(())
    }

    /// Retain, returns the new use count.
    ///
    /// A record whose block has been freed is never revived, the call logs an error and returns 0.
    pub fn increment(&self) -> usize {
        match self.inner.retain() {
            Some(count) => count,
            None => {
                tracing::error!(
                    "increment of record {} '{}' after it was freed",
                    self.inner.handle,
                    self.inner.label
                );
                0
            }
        }
    }

    /// Release, returns the remaining use count. Reaching zero frees the block collectively.
    ///
    /// # Panics
    /// if the use count is already zero or the record has been freed
    pub fn decrement(&self) -> usize {
        match self.space() {
            Some(space) => release(&self.inner, &space),
            None => {
                // the space and its backend are gone, the block went with them
                tracing::error!(
                    "decrement of record {} '{}' after its space was dropped",
                    self.inner.handle,
                    self.inner.label
                );
                0
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// payload bytes
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// bytes of the whole block, header included
    pub fn alloc_size(&self) -> usize {
        self.inner.alloc_size
    }

    /// the payload pointer
    pub fn data(&self) -> *mut u8 {
        self.inner.payload() as *mut u8
    }

    pub fn use_count(&self) -> usize {
        self.inner.use_count()
    }

    /// whether the last use has been released and the block returned to the space
    pub fn is_freed(&self) -> bool {
        self.inner.is_freed()
    }

    pub fn handle(&self) -> RecordHandle {
        self.inner.handle
    }

    /// the allocating space, None once every handle to it has been dropped
    pub fn space(&self) -> Option<RemoteSpace> {
        self.space
            .upgrade()
            .map(|inner| RemoteSpace::from_parts(inner, self.mode, self.extent))
    }
}

// drop one use, the last one unlinks the record and returns the block to the space
fn release(inner: &Arc<RecordInner>, space: &RemoteSpace) -> usize {
    let mut cur = inner.count.load(Ordering::SeqCst);
    loop {
        if cur == FREED {
            tracing::error!("record {} '{}' released after it was freed", inner.handle, inner.label);
            panic!(
                "[REMOTE SPACE ERROR] {}: '{}' has already been freed",
                space.name(),
                inner.label
            );
        }
        if cur == 0 {
            tracing::error!("record {} '{}' released with a use count of zero", inner.handle, inner.label);
            panic!(
                "[REMOTE SPACE ERROR] {}: use count of '{}' would become negative",
                space.name(),
                inner.label
            );
        }
        // the last use moves straight to FREED so no stale view can retain it again
        let next = if cur == 1 { FREED } else { cur - 1 };
        match inner
            .count
            .compare_exchange(cur, next, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => break,
            Err(actual) => cur = actual,
        }
    }
    let remaining = cur - 1;
    if remaining == 0 {
        destroy(inner, space);
    }
    remaining
}

fn destroy(inner: &Arc<RecordInner>, space: &RemoteSpace) {
    // only the registered record owns its block, a stale one must not free a successor
    if space.inner.registry.remove(inner.handle).is_none() {
        tracing::error!(
            "record {} '{}' is no longer registered, its block is not freed again",
            inner.handle,
            inner.label
        );
        return;
    }
    // a stale payload pointer must not resolve through the old header
    if let Err(e) = space
        .comm()
        .put(space.my_pe(), &[0u8; HANDLE_BYTES], inner.block)
    {
        tracing::warn!("unable to clear the header of record {}: {}", inner.handle, e);
    }
    tracing::trace!(
        "{} freeing record {} '{}' [ {:#x} + {} ]",
        space.name(),
        inner.handle,
        inner.label,
        inner.payload(),
        inner.size
    );
    profiling::deallocate_data(
        space.name(),
        &inner.label,
        inner.payload() as *const u8,
        inner.size,
    );
    space.deallocate(inner.block as *mut u8, inner.alloc_size);
}
