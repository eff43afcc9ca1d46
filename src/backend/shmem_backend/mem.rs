use crate::backend::comm::{AllocError, AllocResult, CommAlloc, CommMem};
use crate::heap_alloc::HeapAlloc;

use super::ShmemComm;

impl CommMem for ShmemComm {
    // like shmem_malloc this is collective and returns only after every pe has made the matching call
    #[tracing::instrument(skip_all, level = "debug")]
    fn alloc(&self, size: usize, extent: Option<usize>) -> AllocResult<CommAlloc> {
        self.init_heap(extent)
            .map_err(AllocError::FabricAllocationError)?;
        let ret = {
            let heap = self.heap.read();
            match heap.as_ref() {
                Some(heap) => heap
                    .alloc
                    .try_malloc(size)
                    .map(|addr| CommAlloc { addr, size })
                    .ok_or(AllocError::OutOfMemoryError(size)),
                None => Err(AllocError::FabricAllocationError(
                    "symmetric heap is not attached".to_owned(),
                )),
            }
        };
        self.control.barrier("ShmemSpace");
        ret
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn free(&self, alloc: CommAlloc) -> AllocResult<()> {
        let ret = {
            let heap = self.heap.read();
            match heap.as_ref() {
                Some(heap) => heap
                    .alloc
                    .free(alloc.addr)
                    .map(|_| ())
                    .map_err(AllocError::LocalNotFound),
                None => Err(AllocError::LocalNotFound(alloc.addr)),
            }
        };
        self.control.barrier("ShmemSpace");
        ret
    }

    fn heap_contains(&self, addr: usize, len: usize) -> bool {
        let heap = self.heap.read();
        heap.as_ref()
            .and_then(|heap| heap.alloc.find(addr))
            .zip(addr.checked_add(len))
            .map_or(false, |((start, size), end)| end <= start + size)
    }

    fn mem_occupied(&self) -> usize {
        let heap = self.heap.read();
        heap.as_ref().map_or(0, |heap| heap.alloc.occupied())
    }
}
