use std::sync::atomic::Ordering;

use crate::backend::comm::{CommRdma, RdmaError, RdmaResult};

use super::ShmemComm;

impl ShmemComm {
    /// translate an address in my heap to the same offset in the heap of `pe`
    fn real_addr(&self, pe: usize, addr: usize, len: usize) -> RdmaResult<usize> {
        if pe >= self.num_pes {
            return Err(RdmaError::InvalidPe(pe));
        }
        let heap = self.heap.read();
        match heap.as_ref() {
            Some(heap) => {
                let my_base = heap.pe_base(self.my_pe);
                let in_bounds = addr
                    .checked_add(len)
                    .map_or(false, |end| my_base <= addr && end <= my_base + heap.per_pe);
                if in_bounds {
                    Ok(heap.pe_base(pe) + (addr - my_base))
                } else {
                    Err(RdmaError::OutOfBounds(addr, len))
                }
            }
            None => Err(RdmaError::OutOfBounds(addr, len)),
        }
    }
}

impl CommRdma for ShmemComm {
    fn put(&self, pe: usize, src: &[u8], dst: usize) -> RdmaResult {
        let real_dst = self.real_addr(pe, dst, src.len())?;
        self.put_amt.fetch_add(src.len(), Ordering::Relaxed);
        unsafe { std::ptr::copy(src.as_ptr(), real_dst as *mut u8, src.len()) };
        Ok(())
    }
    fn get(&self, pe: usize, src: usize, dst: &mut [u8]) -> RdmaResult {
        let real_src = self.real_addr(pe, src, dst.len())?;
        self.get_amt.fetch_add(dst.len(), Ordering::Relaxed);
        unsafe { std::ptr::copy(real_src as *const u8, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }
    fn local_copy(&self, dst: usize, src: usize, len: usize) -> RdmaResult {
        let real_src = self.real_addr(self.my_pe, src, len)?;
        let real_dst = self.real_addr(self.my_pe, dst, len)?;
        unsafe { std::ptr::copy(real_src as *const u8, real_dst as *mut u8, len) };
        Ok(())
    }
    fn host_addressable(&self) -> bool {
        true
    }
}
