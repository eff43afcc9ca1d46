use crate::backend::{
    create_comm, create_team_comms, Backend, Comm, CommAlloc, CommCollective, CommInfo, CommMem,
    CommProgress, PeInfo,
};
use crate::config;
use crate::heap_alloc::{align_up, MEMORY_ALIGNMENT};
use crate::record::registry::Registry;
use crate::warnings::RuntimeWarning;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How a space places its allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationMode {
    /// the same size at the same offset on every pe, the only supported mode
    Symmetric,
    /// pe local allocations that are not globally addressable
    Private,
}

impl Default for AllocationMode {
    fn default() -> Self {
        AllocationMode::Symmetric
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
enum CollectiveOp {
    Allocate = 1,
    Deallocate = 2,
}

pub(crate) struct SpaceInner {
    pub(crate) comm: Arc<Comm>,
    pub(crate) registry: Registry,
    collective_check: bool,
    seq: AtomicU64,
}

impl SpaceInner {
    pub(crate) fn name(&self) -> &'static str {
        space_name(self.comm.backend())
    }
}

impl std::fmt::Debug for SpaceInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceInner")
            .field("comm", &self.comm)
            .field("records", &self.registry.count())
            .field("collective_check", &self.collective_check)
            .finish()
    }
}

impl Drop for SpaceInner {
    fn drop(&mut self) {
        let orphans = self.registry.records();
        RuntimeWarning::OrphanedRecords(self.name(), orphans.len()).print();
        for record in orphans {
            tracing::warn!(
                "[REMOTE SPACE WARNING] {} orphaned record {} [ {:#x} + {} ] count({}) {}",
                self.name(),
                record.handle,
                record.payload(),
                record.size,
                record.use_count(),
                record.label
            );
        }
    }
}

fn space_name(backend: Backend) -> &'static str {
    match backend {
        Backend::Local => "LocalSpace",
        Backend::Shmem => "ShmemSpace",
        Backend::Mailbox => "MailboxSpace",
    }
}

/// A handle to the symmetric memory of one pe.
///
/// Clones share the backend and the record registry, the allocation mode and extent are per clone
/// policy settings. [allocate][RemoteSpace::allocate], [deallocate][RemoteSpace::deallocate] and
/// [fence][RemoteSpace::fence] are collective: every pe of the job must make the same calls in the same order.
///
/// # Examples
///```
/// use remote_spaces::{Backend, RemoteSpaceBuilder};
///
/// let space = RemoteSpaceBuilder::new().with_backend(Backend::Local).build();
/// let ptr = space.allocate(1024);
/// space.fence();
/// space.deallocate(ptr, 1024);
///```
#[derive(Clone, Debug)]
pub struct RemoteSpace {
    pub(crate) inner: Arc<SpaceInner>,
    mode: AllocationMode,
    extent: Option<usize>,
}

impl RemoteSpace {
    fn new(comm: Arc<Comm>, builder: &RemoteSpaceBuilder) -> RemoteSpace {
        tracing::debug!(
            "pe {} of {} constructed a {} space",
            comm.my_pe(),
            comm.num_pes(),
            comm.backend()
        );
        RemoteSpace {
            inner: Arc::new(SpaceInner {
                comm,
                registry: Registry::new(),
                collective_check: builder.collective_check,
                seq: AtomicU64::new(0),
            }),
            mode: builder.mode,
            extent: builder.extent,
        }
    }

    pub(crate) fn from_parts(inner: Arc<SpaceInner>, mode: AllocationMode, extent: Option<usize>) -> RemoteSpace {
        RemoteSpace {
            inner,
            mode,
            extent,
        }
    }

    pub(crate) fn comm(&self) -> &Comm {
        &self.inner.comm
    }

    /// name of the backend this space allocates from
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn backend(&self) -> Backend {
        self.inner.comm.backend()
    }

    pub fn my_pe(&self) -> usize {
        self.inner.comm.my_pe()
    }

    pub fn num_pes(&self) -> usize {
        self.inner.comm.num_pes()
    }

    pub fn allocation_mode(&self) -> AllocationMode {
        self.mode
    }

    pub fn set_allocation_mode(&mut self, mode: AllocationMode) {
        self.mode = mode;
    }

    /// the per pe heap size requested from backends with a pre-declared heap
    pub fn extent(&self) -> Option<usize> {
        self.extent
    }

    /// only consulted by the first allocation of the job, the heap is not resized afterwards
    pub fn set_extent(&mut self, extent: usize) {
        self.extent = Some(extent);
    }

    /// bytes of symmetric memory currently allocated on this pe
    pub fn mem_occupied(&self) -> usize {
        self.inner.comm.mem_occupied()
    }

    /// number of live allocation records
    pub fn record_count(&self) -> usize {
        self.inner.registry.count()
    }

    /// whether this and `other` share a backend and registry
    pub fn same_space(&self, other: &RemoteSpace) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Collectively allocate `size` bytes, returning an address in this pe's symmetric heap.
    ///
    /// The block lives at the same offset on every pe. A zero size returns null without
    /// contacting the backend.
    ///
    /// # Panics
    /// if the space is not in [AllocationMode::Symmetric] or the backend cannot satisfy the request
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn allocate(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return std::ptr::null_mut();
        }
        if self.mode != AllocationMode::Symmetric {
            tracing::error!("{} received a {:?} allocation request", self.name(), self.mode);
            panic!(
                "[REMOTE SPACE ERROR] {}::allocate: remote spaces only support the symmetric allocation policy",
                self.name()
            );
        }
        let size = align_up(size, MEMORY_ALIGNMENT);
        self.check_collective(CollectiveOp::Allocate, size);
        match self.inner.comm.alloc(size, self.extent) {
            Ok(alloc) => {
                tracing::trace!("{} allocated {} bytes at {:#x}", self.name(), size, alloc.addr);
                alloc.as_mut_ptr()
            }
            Err(e) => {
                tracing::error!("{} failed to allocate {} bytes: {}", self.name(), size, e);
                panic!(
                    "[REMOTE SPACE ERROR] {}::allocate: unable to allocate {} bytes: {}",
                    self.name(),
                    size,
                    e
                );
            }
        }
    }

    /// Collectively release a block returned by [allocate][RemoteSpace::allocate], null is a no-op.
    ///
    /// # Panics
    /// if `ptr` was not handed out by this space
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn deallocate(&self, ptr: *mut u8, size: usize) {
        if ptr.is_null() {
            return;
        }
        let size = align_up(size, MEMORY_ALIGNMENT);
        self.check_collective(CollectiveOp::Deallocate, size);
        let alloc = CommAlloc {
            addr: ptr as usize,
            size,
        };
        if let Err(e) = self.inner.comm.free(alloc) {
            tracing::error!("{} failed to free {:#x}: {}", self.name(), alloc.addr, e);
            panic!(
                "[REMOTE SPACE ERROR] {}::deallocate: {}, the symmetric heap is corrupted",
                self.name(),
                e
            );
        }
    }

    /// Block until every outstanding transfer of this pe has completed and every pe has arrived.
    ///
    /// Writes issued before the fence are visible to every pe after it.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn fence(&self) {
        self.inner.comm.wait();
        self.inner.comm.barrier();
    }

    fn check_collective(&self, op: CollectiveOp, size: usize) {
        if !self.inner.collective_check {
            return;
        }
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst);
        let mine = [seq, op as u64, size as u64];
        let all = self.inner.comm.exchange(mine);
        if let Some((pe, theirs)) = all.iter().enumerate().find(|(_, v)| **v != mine) {
            tracing::error!(
                "collective mismatch on pe {}: local (seq, op, size) {:?}, pe {} {:?}",
                self.my_pe(),
                mine,
                pe,
                theirs
            );
            panic!(
                "[REMOTE SPACE ERROR] {}: collective call {} diverged, pe {} issued {:?} of {} bytes while pe {} issued {} of {} bytes",
                self.name(),
                seq,
                self.my_pe(),
                op,
                size,
                pe,
                op_name(theirs[1]),
                theirs[2]
            );
        }
    }
}

fn op_name(op: u64) -> &'static str {
    match op {
        1 => "Allocate",
        2 => "Deallocate",
        _ => "Unknown",
    }
}

/// Construct a [RemoteSpace]
///
/// # Examples
///```
/// use remote_spaces::{Backend, RemoteSpaceBuilder};
///
/// let spaces = RemoteSpaceBuilder::new()
///     .with_backend(Backend::Mailbox)
///     .with_extent(1 << 20)
///     .build_team(4);
/// assert_eq!(spaces.len(), 4);
///```
#[derive(Debug, Clone)]
pub struct RemoteSpaceBuilder {
    backend: Backend,
    extent: Option<usize>,
    mode: AllocationMode,
    pe: Option<(usize, usize)>,
    job_id: Option<usize>,
    collective_check: bool,
}

impl Default for RemoteSpaceBuilder {
    fn default() -> Self {
        RemoteSpaceBuilder::new()
    }
}

impl RemoteSpaceBuilder {
    /// backend and pe identity default to the `RSPACE_` environment
    pub fn new() -> RemoteSpaceBuilder {
        RemoteSpaceBuilder {
            backend: Backend::default(),
            extent: None,
            mode: AllocationMode::default(),
            pe: None,
            job_id: None,
            collective_check: config().collective_check,
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> RemoteSpaceBuilder {
        self.backend = backend;
        self
    }

    pub fn with_extent(mut self, extent: usize) -> RemoteSpaceBuilder {
        self.extent = Some(extent);
        self
    }

    pub fn with_allocation_mode(mut self, mode: AllocationMode) -> RemoteSpaceBuilder {
        self.mode = mode;
        self
    }

    /// override `RSPACE_PE_ID` and `RSPACE_NUM_PES`
    pub fn with_pe(mut self, my_pe: usize, num_pes: usize) -> RemoteSpaceBuilder {
        self.pe = Some((my_pe, num_pes));
        self
    }

    /// override `RSPACE_JOB_ID`
    pub fn with_job_id(mut self, job_id: usize) -> RemoteSpaceBuilder {
        self.job_id = Some(job_id);
        self
    }

    /// exchange (sequence, op, size) on every collective allocate/deallocate and abort on mismatch
    pub fn with_collective_check(mut self, check: bool) -> RemoteSpaceBuilder {
        self.collective_check = check;
        self
    }

    fn pe_info(&self) -> PeInfo {
        let mut pe_info = PeInfo::default();
        if let Some((my_pe, num_pes)) = self.pe {
            pe_info.my_pe = my_pe;
            pe_info.num_pes = num_pes;
        }
        if let Some(job_id) = self.job_id {
            pe_info.job_id = job_id;
        }
        pe_info
    }

    /// validate the configuration and construct the space of this pe
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn try_build(self) -> anyhow::Result<RemoteSpace> {
        let pe_info = self.pe_info();
        if pe_info.num_pes == 0 {
            anyhow::bail!("a job needs at least one pe");
        }
        if pe_info.my_pe >= pe_info.num_pes {
            anyhow::bail!(
                "pe id {} is not valid for a job of {} pes",
                pe_info.my_pe,
                pe_info.num_pes
            );
        }
        match self.backend {
            Backend::Local | Backend::Mailbox if pe_info.num_pes != 1 => anyhow::bail!(
                "the {} backend can only be joined by a single pe per process, use build_team for {} pes",
                self.backend,
                pe_info.num_pes
            ),
            _ => {}
        }
        let comm = create_comm(self.backend, pe_info);
        Ok(RemoteSpace::new(comm, &self))
    }

    /// # Panics
    /// if the configuration is invalid, see [try_build][RemoteSpaceBuilder::try_build]
    pub fn build(self) -> RemoteSpace {
        match self.try_build() {
            Ok(space) => space,
            Err(e) => panic!("[REMOTE SPACE ERROR] {:?}", e),
        }
    }

    /// Construct the spaces of every pe of an in-process job, index i is pe i.
    ///
    /// Each space is meant to be moved to its own thread, collective calls block until all `num_pes` threads arrive.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn build_team(self, num_pes: usize) -> Vec<RemoteSpace> {
        let job_id = self.pe_info().job_id;
        create_team_comms(self.backend, num_pes, job_id)
            .into_iter()
            .map(|comm| RemoteSpace::new(comm, &self))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> RemoteSpace {
        RemoteSpaceBuilder::new().with_backend(Backend::Local).build()
    }

    #[test]
    fn zero_size_is_null() {
        let space = local();
        assert!(space.allocate(0).is_null());
        assert_eq!(space.mem_occupied(), 0);
        space.deallocate(std::ptr::null_mut(), 0);
    }

    #[test]
    fn sizes_round_to_alignment() {
        let space = local();
        let ptr = space.allocate(10);
        assert_eq!(ptr as usize % MEMORY_ALIGNMENT, 0);
        assert_eq!(space.mem_occupied(), MEMORY_ALIGNMENT);
        space.deallocate(ptr, 10);
        assert_eq!(space.mem_occupied(), 0);
    }

    #[test]
    fn names() {
        assert_eq!(local().name(), "LocalSpace");
        assert_eq!(space_name(Backend::Shmem), "ShmemSpace");
        assert_eq!(space_name(Backend::Mailbox), "MailboxSpace");
    }

    #[test]
    fn settings_are_per_clone() {
        let space = local();
        let mut other = space.clone();
        other.set_extent(4096);
        other.set_allocation_mode(AllocationMode::Private);
        assert_eq!(space.extent(), None);
        assert_eq!(space.allocation_mode(), AllocationMode::Symmetric);
        assert_eq!(other.extent(), Some(4096));
        assert!(space.same_space(&other));
        assert!(!space.same_space(&local()));
    }

    #[test]
    #[should_panic(expected = "only support the symmetric allocation policy")]
    fn private_allocation_aborts() {
        let space = RemoteSpaceBuilder::new()
            .with_backend(Backend::Local)
            .with_allocation_mode(AllocationMode::Private)
            .build();
        space.allocate(64);
    }

    #[test]
    fn private_zero_size_is_still_null() {
        let mut space = local();
        space.set_allocation_mode(AllocationMode::Private);
        assert!(space.allocate(0).is_null());
    }

    #[test]
    #[should_panic(expected = "the symmetric heap is corrupted")]
    fn foreign_deallocate_aborts() {
        let space = local();
        let mut host = [0u8; 64];
        space.deallocate(host.as_mut_ptr(), 64);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        assert!(RemoteSpaceBuilder::new()
            .with_backend(Backend::Local)
            .with_pe(0, 2)
            .try_build()
            .is_err());
        assert!(RemoteSpaceBuilder::new()
            .with_backend(Backend::Shmem)
            .with_pe(3, 2)
            .try_build()
            .is_err());
    }
}
