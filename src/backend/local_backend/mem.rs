use crate::backend::comm::{AllocError, AllocResult, CommAlloc, CommMem};
use crate::heap_alloc::MEMORY_ALIGNMENT;

use super::{LocalComm, MyPtr};

impl CommMem for LocalComm {
    // a single pe has no pre-declared heap, the extent is ignored
    fn alloc(&self, size: usize, _extent: Option<usize>) -> AllocResult<CommAlloc> {
        let layout = std::alloc::Layout::from_size_align(size, MEMORY_ALIGNMENT)
            .map_err(|e| AllocError::FabricAllocationError(e.to_string()))?;
        let data_ptr = unsafe { std::alloc::alloc(layout) };
        if data_ptr.is_null() {
            return Err(AllocError::OutOfMemoryError(size));
        }
        let data_addr = data_ptr as usize;
        let mut allocs = self.allocs.lock();
        allocs.insert(
            data_addr,
            MyPtr {
                ptr: data_ptr,
                layout,
            },
        );
        Ok(CommAlloc {
            addr: data_addr,
            size,
        })
    }

    fn free(&self, alloc: CommAlloc) -> AllocResult<()> {
        let mut allocs = self.allocs.lock();
        match allocs.remove(&alloc.addr) {
            Some(data_ptr) => {
                debug_assert!(alloc.size <= data_ptr.layout.size());
                unsafe {
                    std::alloc::dealloc(data_ptr.ptr, data_ptr.layout);
                };
                Ok(())
            }
            None => Err(AllocError::LocalNotFound(alloc.addr)),
        }
    }

    fn heap_contains(&self, addr: usize, len: usize) -> bool {
        let end = match addr.checked_add(len) {
            Some(end) => end,
            None => return false,
        };
        let allocs = self.allocs.lock();
        allocs
            .range(..=addr)
            .next_back()
            .map(|(start, data_ptr)| (*start, data_ptr.layout.size()))
            .filter(|(start, size)| addr < start + size)
            .map_or(false, |(start, size)| end <= start + size)
    }

    fn mem_occupied(&self) -> usize {
        let allocs = self.allocs.lock();
        allocs.values().map(|alloc| alloc.layout.size()).sum()
    }
}
