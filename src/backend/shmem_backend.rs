pub(crate) mod fabric;
pub(crate) mod mem;
pub(crate) mod rdma;

use super::{Backend, CommCollective, CommInfo, CommProgress, PeInfo};
use crate::heap_alloc::{align_up, BTreeAlloc, HeapAlloc};
use fabric::{attach_to_shmem, ControlBlock, ShmemHandle};

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

const CONTROL_MARKER: usize = 0x5253_5041_4345;
const HEAP_MARKER: usize = 0x5253_4845_4150;

/// The symmetric heap of a job: one segment holding `num_pes` heaps of `per_pe` bytes each
#[derive(Debug)]
pub(crate) struct SymmetricHeap {
    shmem: ShmemHandle,
    pub(crate) per_pe: usize,
    pub(crate) alloc: BTreeAlloc,
}

impl SymmetricHeap {
    pub(crate) fn pe_base(&self, pe: usize) -> usize {
        self.shmem.base_ptr() as usize + pe * self.per_pe
    }
}

#[derive(Debug)]
pub(crate) struct ShmemComm {
    pub(crate) my_pe: usize,
    pub(crate) num_pes: usize,
    job_id: usize,
    pub(crate) control: ControlBlock,
    pub(crate) heap: RwLock<Option<SymmetricHeap>>,
    pub(crate) put_amt: AtomicUsize,
    pub(crate) get_amt: AtomicUsize,
}

impl ShmemComm {
    #[tracing::instrument(skip_all, level = "debug")]
    pub(crate) fn new(pe_info: PeInfo) -> ShmemComm {
        let PeInfo {
            my_pe,
            num_pes,
            job_id,
        } = pe_info;
        assert!(
            my_pe < num_pes,
            "[REMOTE SPACE ERROR] pe id {} is not valid for a job of {} pes, check RSPACE_PE_ID and RSPACE_NUM_PES",
            my_pe,
            num_pes
        );
        let control = match attach_to_shmem(
            job_id,
            ControlBlock::size(num_pes),
            "control",
            CONTROL_MARKER,
            my_pe == 0,
        ) {
            Ok(shmem) => shmem,
            Err(e) => panic!(
                "[REMOTE SPACE ERROR] unable to attach to the control segment of job {}: {:?}",
                job_id, e
            ),
        };
        ShmemComm {
            my_pe,
            num_pes,
            job_id,
            control: ControlBlock::new(control, my_pe, num_pes),
            heap: RwLock::new(None),
            put_amt: AtomicUsize::new(0),
            get_amt: AtomicUsize::new(0),
        }
    }

    /// collectively attach the symmetric heap on first use, pe 0 decides the per pe size
    pub(crate) fn init_heap(&self, extent: Option<usize>) -> Result<(), String> {
        if self.heap.read().is_some() {
            return Ok(());
        }
        let mut heap = self.heap.write();
        if heap.is_some() {
            return Ok(());
        }
        let requested = align_up(extent.unwrap_or(crate::config().heap_size).max(4096), 4096);
        if self.my_pe == 0 {
            self.control
                .header()
                .heap_len
                .store(requested, Ordering::SeqCst);
        }
        self.control.barrier("ShmemSpace");
        let per_pe = self.control.header().heap_len.load(Ordering::SeqCst);
        if per_pe != requested {
            tracing::warn!(
                "pe {} requested a {} byte symmetric heap but pe 0 declared {} bytes, using {}",
                self.my_pe,
                requested,
                per_pe,
                per_pe
            );
        }
        let shmem = attach_to_shmem(
            self.job_id,
            per_pe * self.num_pes,
            "heap",
            HEAP_MARKER,
            self.my_pe == 0,
        )
        .map_err(|e| format!("{:?}", e))?;
        let mut alloc = BTreeAlloc::new(format!("shmem_heap_{}", self.my_pe));
        let my_base = shmem.base_ptr() as usize + self.my_pe * per_pe;
        alloc.init(my_base, per_pe);
        tracing::debug!(
            "pe {} attached symmetric heap of {} bytes per pe at {:#x}",
            self.my_pe,
            per_pe,
            my_base
        );
        *heap = Some(SymmetricHeap {
            shmem,
            per_pe,
            alloc,
        });
        // every pe must be attached before anyone touches a remote heap
        self.control.barrier("ShmemSpace");
        Ok(())
    }
}

impl CommProgress for ShmemComm {
    fn wait(&self) {}
    fn barrier(&self) {
        self.control.barrier("ShmemSpace");
    }
}

impl CommCollective for ShmemComm {
    fn exchange(&self, value: [u64; 3]) -> Vec<[u64; 3]> {
        self.control.exchange(value, "ShmemSpace")
    }
}

impl CommInfo for ShmemComm {
    fn my_pe(&self) -> usize {
        self.my_pe
    }
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn backend(&self) -> Backend {
        Backend::Shmem
    }
}

impl Drop for ShmemComm {
    fn drop(&mut self) {
        if let Some(heap) = self.heap.get_mut() {
            let occupied = heap.alloc.occupied();
            if occupied > 0 {
                tracing::debug!("dropping shmem -- memory in use {:?}", occupied);
            }
        }
        tracing::trace!(
            "shmem pe {} sent {} bytes and received {} bytes",
            self.my_pe,
            self.put_amt.load(Ordering::Relaxed),
            self.get_amt.load(Ordering::Relaxed)
        );
    }
}
