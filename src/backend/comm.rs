pub(crate) mod error;

pub(crate) use error::*;

use super::Backend;

use crate::backend::{
    local_backend::LocalComm, mailbox_backend::MailboxComm, shmem_backend::ShmemComm,
};
use enum_dispatch::enum_dispatch;

#[enum_dispatch(CommMem, CommProgress, CommRdma, CommCollective, CommInfo)]
#[derive(Debug)]
pub(crate) enum Comm {
    Shmem(ShmemComm),
    Mailbox(MailboxComm),
    Local(LocalComm),
}

/// A block returned by a collective allocation, addressed in the calling pe's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CommAlloc {
    pub(crate) addr: usize,
    pub(crate) size: usize,
}

impl CommAlloc {
    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.addr as *mut u8
    }
}

#[enum_dispatch]
pub(crate) trait CommMem {
    /// collective, every pe must request the same size in the same order
    fn alloc(&self, size: usize, extent: Option<usize>) -> AllocResult<CommAlloc>;
    /// collective
    fn free(&self, alloc: CommAlloc) -> AllocResult<()>;
    /// whether `addr..addr+len` lies inside memory this backend handed out
    fn heap_contains(&self, addr: usize, len: usize) -> bool;
    fn mem_occupied(&self) -> usize;
}

#[enum_dispatch]
pub(crate) trait CommProgress {
    /// wait for completion of all rdma operations issued by this pe
    fn wait(&self);
    /// global barrier across all pes of the job
    fn barrier(&self);
}

#[enum_dispatch]
pub(crate) trait CommRdma {
    /// write `src` into `dst` (an address in my symmetric heap) on `pe`
    fn put(&self, pe: usize, src: &[u8], dst: usize) -> RdmaResult;
    /// read from `src` (an address in my symmetric heap) on `pe` into `dst`
    fn get(&self, pe: usize, src: usize, dst: &mut [u8]) -> RdmaResult;
    /// copy within my own symmetric heap
    fn local_copy(&self, dst: usize, src: usize, len: usize) -> RdmaResult;
    /// true when symmetric heap addresses can be dereferenced directly by host code
    fn host_addressable(&self) -> bool;
}

#[enum_dispatch]
pub(crate) trait CommCollective {
    /// all gather of a fixed size record, result is indexed by pe
    fn exchange(&self, value: [u64; 3]) -> Vec<[u64; 3]>;
}

#[enum_dispatch]
pub(crate) trait CommInfo {
    fn my_pe(&self) -> usize;
    fn num_pes(&self) -> usize;
    fn backend(&self) -> Backend;
}
