use crate::backend::comm::{AllocError, AllocResult, CommAlloc, CommMem, CommProgress};
use crate::heap_alloc::{align_up, HeapAlloc};

use super::progress::MailboxHeap;
use super::MailboxComm;

impl MailboxComm {
    // the heap is sized on first allocation, later extents are ignored
    fn init_heap(&self, extent: Option<usize>) -> AllocResult<()> {
        let mut heap = self.state.heap.write();
        if heap.is_none() {
            let size = align_up(extent.unwrap_or(crate::config().heap_size).max(4096), 4096);
            let new_heap =
                MailboxHeap::new(self.my_pe, size).map_err(AllocError::FabricAllocationError)?;
            tracing::debug!(
                "pe {} created mailbox heap of {} bytes at {:#x}",
                self.my_pe,
                size,
                new_heap.base_addr()
            );
            *heap = Some(new_heap);
        }
        Ok(())
    }
}

impl CommMem for MailboxComm {
    #[tracing::instrument(skip_all, level = "debug")]
    fn alloc(&self, size: usize, extent: Option<usize>) -> AllocResult<CommAlloc> {
        let ret = self.init_heap(extent).and_then(|_| {
            let heap = self.state.heap.read();
            heap.as_ref()
                .and_then(|heap| heap.alloc.try_malloc(size))
                .map(|addr| CommAlloc { addr, size })
                .ok_or(AllocError::OutOfMemoryError(size))
        });
        // no pe may address the block remotely before every pe has reserved it
        self.barrier();
        ret
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn free(&self, alloc: CommAlloc) -> AllocResult<()> {
        let ret = {
            let heap = self.state.heap.read();
            match heap.as_ref() {
                Some(heap) => heap
                    .alloc
                    .free(alloc.addr)
                    .map(|_| ())
                    .map_err(AllocError::LocalNotFound),
                None => Err(AllocError::LocalNotFound(alloc.addr)),
            }
        };
        self.barrier();
        ret
    }

    fn heap_contains(&self, addr: usize, len: usize) -> bool {
        let heap = self.state.heap.read();
        heap.as_ref()
            .and_then(|heap| heap.alloc.find(addr))
            .zip(addr.checked_add(len))
            .map_or(false, |((start, size), end)| end <= start + size)
    }

    fn mem_occupied(&self) -> usize {
        let heap = self.state.heap.read();
        heap.as_ref().map_or(0, |heap| heap.alloc.occupied())
    }
}
