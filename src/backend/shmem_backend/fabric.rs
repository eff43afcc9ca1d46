use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use shared_memory::*;
use tracing::trace;

use crate::warnings::RuntimeWarning;

pub(crate) struct ShmemHandle {
    base_addr: *mut u8,
    num_bytes: usize,
    _shmem: Shmem,
}

unsafe impl Sync for ShmemHandle {}
unsafe impl Send for ShmemHandle {}

impl ShmemHandle {
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.base_addr
    }
    pub(crate) fn num_bytes(&self) -> usize {
        self.num_bytes
    }
}

impl std::fmt::Debug for ShmemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmemHandle")
            .field("base_addr", &self.base_addr)
            .field("num_bytes", &self.num_bytes)
            .finish()
    }
}

/// Attach to (creating if needed) the segment `rspace_{job_id}_{id}`.
///
/// The first word of the segment is a readiness marker, the pe passing `create == true` zeroes the
/// data and then writes `header` into it, every other pe spins until it observes `header`.
#[tracing::instrument(skip_all, level = "debug")]
pub(crate) fn attach_to_shmem(
    job_id: usize,
    size: usize,
    id: &str,
    header: usize,
    create: bool,
) -> Result<ShmemHandle, ShmemError> {
    let offset = crate::heap_alloc::MEMORY_ALIGNMENT;
    let shmem_size = offset + size;

    let shmem_id = "rspace_".to_owned() + &(job_id.to_string()) + "_" + id;
    let mut retry = 0;
    let mut m = loop {
        match ShmemConf::new()
            .size(shmem_size)
            .os_id(shmem_id.clone())
            .create()
        {
            Ok(m) => break m,
            Err(ShmemError::LinkExists)
            | Err(ShmemError::MappingIdExists)
            | Err(ShmemError::MapOpenFailed(_)) => {
                match ShmemConf::new().os_id(shmem_id.clone()).open() {
                    Ok(m) => break m,
                    Err(ShmemError::MapOpenFailed(_)) | Err(ShmemError::MapSizeZero)
                        if retry < 50 =>
                    {
                        retry += 1;
                        std::thread::sleep(std::time::Duration::from_millis(20));
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    };
    // only the creating pe removes the segment name once it is dropped
    m.set_owner(create);

    let marker = unsafe { &*(m.as_ptr() as *const AtomicUsize) };
    if create {
        unsafe {
            std::ptr::write_bytes(m.as_ptr().add(offset), 0, size);
        }
        marker.store(header, Ordering::SeqCst);
    }
    while marker.load(Ordering::SeqCst) != header {
        std::thread::yield_now()
    }
    trace!("shmem inited {:?} {:?}", shmem_id, marker.load(Ordering::SeqCst));

    Ok(ShmemHandle {
        base_addr: unsafe { m.as_ptr().add(offset) },
        num_bytes: size,
        _shmem: m,
    })
}

#[repr(C)]
pub(crate) struct ControlHeader {
    arrived: AtomicUsize,
    generation: AtomicUsize,
    pub(crate) heap_len: AtomicUsize,
}

/// The control segment of a job: barrier words, the agreed heap size, and one exchange slot per pe
pub(crate) struct ControlBlock {
    shmem: ShmemHandle,
    my_pe: usize,
    num_pes: usize,
}

impl std::fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlBlock")
            .field("my_pe", &self.my_pe)
            .field("num_pes", &self.num_pes)
            .field("shmem", &self.shmem)
            .finish()
    }
}

const SLOT_WORDS: usize = 3;

impl ControlBlock {
    pub(crate) fn size(num_pes: usize) -> usize {
        std::mem::size_of::<ControlHeader>()
            + std::mem::size_of::<AtomicU64>() * SLOT_WORDS * num_pes
    }

    pub(crate) fn new(shmem: ShmemHandle, my_pe: usize, num_pes: usize) -> ControlBlock {
        debug_assert!(shmem.num_bytes() >= ControlBlock::size(num_pes));
        ControlBlock {
            shmem,
            my_pe,
            num_pes,
        }
    }

    pub(crate) fn header(&self) -> &ControlHeader {
        unsafe { &*(self.shmem.base_ptr() as *const ControlHeader) }
    }

    fn slots(&self) -> &[AtomicU64] {
        unsafe {
            std::slice::from_raw_parts(
                self.shmem
                    .base_ptr()
                    .add(std::mem::size_of::<ControlHeader>()) as *const AtomicU64,
                SLOT_WORDS * self.num_pes,
            )
        }
    }

    // centralized counter barrier, the last pe to arrive resets the counter and opens the next generation
    pub(crate) fn barrier(&self, space: &str) {
        let header = self.header();
        let generation = header.generation.load(Ordering::Acquire);
        if header.arrived.fetch_add(1, Ordering::AcqRel) + 1 == self.num_pes {
            header.arrived.store(0, Ordering::Relaxed);
            header.generation.fetch_add(1, Ordering::Release);
            return;
        }
        let s = Instant::now();
        let mut warned = false;
        while header.generation.load(Ordering::Acquire) == generation {
            std::thread::yield_now();
            if !warned && s.elapsed().as_secs_f64() > crate::config().deadlock_timeout {
                RuntimeWarning::BarrierTimeout(s.elapsed().as_secs_f64(), space).print();
                warned = true;
            }
        }
    }

    pub(crate) fn exchange(&self, value: [u64; 3], space: &str) -> Vec<[u64; 3]> {
        let slots = self.slots();
        for (i, v) in value.iter().enumerate() {
            slots[self.my_pe * SLOT_WORDS + i].store(*v, Ordering::Relaxed);
        }
        self.barrier(space);
        let values = (0..self.num_pes)
            .map(|pe| {
                let mut v = [0u64; 3];
                for (i, elem) in v.iter_mut().enumerate() {
                    *elem = slots[pe * SLOT_WORDS + i].load(Ordering::Relaxed);
                }
                v
            })
            .collect();
        // nobody may overwrite their slot before every pe has read it
        self.barrier(space);
        values
    }
}
