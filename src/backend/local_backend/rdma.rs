use crate::backend::comm::{CommMem, CommRdma, RdmaError, RdmaResult};

use super::LocalComm;

impl LocalComm {
    fn check(&self, pe: usize, addr: usize, len: usize) -> RdmaResult {
        if pe != 0 {
            return Err(RdmaError::InvalidPe(pe));
        }
        if !self.heap_contains(addr, len) {
            return Err(RdmaError::OutOfBounds(addr, len));
        }
        Ok(())
    }
}

impl CommRdma for LocalComm {
    fn put(&self, pe: usize, src: &[u8], dst: usize) -> RdmaResult {
        self.check(pe, dst, src.len())?;
        unsafe { std::ptr::copy(src.as_ptr(), dst as *mut u8, src.len()) };
        Ok(())
    }
    fn get(&self, pe: usize, src: usize, dst: &mut [u8]) -> RdmaResult {
        self.check(pe, src, dst.len())?;
        unsafe { std::ptr::copy(src as *const u8, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }
    fn local_copy(&self, dst: usize, src: usize, len: usize) -> RdmaResult {
        self.check(0, src, len)?;
        self.check(0, dst, len)?;
        unsafe { std::ptr::copy(src as *const u8, dst as *mut u8, len) };
        Ok(())
    }
    fn host_addressable(&self) -> bool {
        true
    }
}
