pub(crate) mod mem;
pub(crate) mod rdma;

use super::{Backend, CommCollective, CommInfo, CommProgress};

use parking_lot::Mutex;
use std::collections::BTreeMap;

pub(crate) struct MyPtr {
    pub(crate) ptr: *mut u8,
    pub(crate) layout: std::alloc::Layout,
}
unsafe impl Send for MyPtr {}

impl std::fmt::Debug for MyPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({} bytes)", self.ptr, self.layout.size())
    }
}

#[derive(Debug)]
pub(crate) struct LocalComm {
    num_pes: usize,
    my_pe: usize,
    pub(crate) allocs: Mutex<BTreeMap<usize, MyPtr>>,
}

impl LocalComm {
    pub(crate) fn new() -> LocalComm {
        LocalComm {
            num_pes: 1,
            my_pe: 0,
            allocs: Mutex::new(BTreeMap::new()),
        }
    }
}

impl CommProgress for LocalComm {
    fn wait(&self) {}
    fn barrier(&self) {}
}

impl CommCollective for LocalComm {
    fn exchange(&self, value: [u64; 3]) -> Vec<[u64; 3]> {
        vec![value]
    }
}

impl CommInfo for LocalComm {
    fn my_pe(&self) -> usize {
        self.my_pe
    }
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn backend(&self) -> Backend {
        Backend::Local
    }
}

impl Drop for LocalComm {
    fn drop(&mut self) {
        let allocs = std::mem::take(&mut *self.allocs.lock());
        if !allocs.is_empty() {
            tracing::debug!(
                "dropping local comm -- {} blocks still allocated",
                allocs.len()
            );
        }
        for (_, data_ptr) in allocs {
            unsafe { std::alloc::dealloc(data_ptr.ptr, data_ptr.layout) };
        }
    }
}
