//! Directional byte movement between host memory and symmetric memory.
//!
//! Each routine picks the transfer the backend supports: a plain copy for heaps the host can address,
//! request/response transfers through the progress engine otherwise. Completion is local, other pes are
//! only guaranteed to observe the bytes after a [fence][crate::RemoteSpace::fence].

use crate::backend::{CommMem, CommRdma};
use crate::error::CopyError;
use crate::space::RemoteSpace;

fn check_remote(space: &RemoteSpace, pe: usize, addr: *const u8, len: usize) -> Result<(), CopyError> {
    if addr.is_null() {
        return Err(CopyError::NullPointer);
    }
    if pe >= space.num_pes() {
        return Err(CopyError::InvalidPe(pe));
    }
    if !space.comm().heap_contains(addr as usize, len) {
        return Err(CopyError::OutOfBounds {
            addr: addr as usize,
            len,
        });
    }
    Ok(())
}

// my own block of a heap the host can address needs no transfer
fn direct(space: &RemoteSpace, pe: usize) -> bool {
    pe == space.my_pe() && space.comm().host_addressable()
}

/// Copy `src` into the symmetric block at `dst` on `pe`, `dst` is an address in my heap
#[tracing::instrument(skip_all, level = "trace")]
pub fn host_to_remote(space: &RemoteSpace, pe: usize, dst: *mut u8, src: &[u8]) -> Result<(), CopyError> {
    if src.is_empty() {
        return Ok(());
    }
    check_remote(space, pe, dst, src.len())?;
    if direct(space, pe) {
        unsafe { std::ptr::copy(src.as_ptr(), dst, src.len()) };
        return Ok(());
    }
    space
        .comm()
        .put(pe, src, dst as usize)
        .map_err(CopyError::from_rdma)
}

/// Copy `dst.len()` bytes from the symmetric block at `src` on `pe` into `dst`
#[tracing::instrument(skip_all, level = "trace")]
pub fn remote_to_host(space: &RemoteSpace, pe: usize, dst: &mut [u8], src: *const u8) -> Result<(), CopyError> {
    if dst.is_empty() {
        return Ok(());
    }
    check_remote(space, pe, src, dst.len())?;
    if direct(space, pe) {
        unsafe { std::ptr::copy(src, dst.as_mut_ptr(), dst.len()) };
        return Ok(());
    }
    space
        .comm()
        .get(pe, src as usize, dst)
        .map_err(CopyError::from_rdma)
}

/// Copy `n` bytes between two blocks of my heap, the ranges may overlap
#[tracing::instrument(skip_all, level = "trace")]
pub fn remote_to_remote(space: &RemoteSpace, dst: *mut u8, src: *const u8, n: usize) -> Result<(), CopyError> {
    if n == 0 {
        return Ok(());
    }
    let my_pe = space.my_pe();
    check_remote(space, my_pe, src, n)?;
    check_remote(space, my_pe, dst, n)?;
    space
        .comm()
        .local_copy(dst as usize, src as usize, n)
        .map_err(CopyError::from_rdma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllocationRecord, Backend, RemoteSpaceBuilder};

    #[test]
    fn bounds_are_checked() {
        let space = RemoteSpaceBuilder::new().with_backend(Backend::Local).build();
        let ptr = AllocationRecord::allocate_tracked(&space, "bounds", 64);
        assert_eq!(
            host_to_remote(&space, 0, ptr, &[0u8; 65]),
            Err(CopyError::OutOfBounds {
                addr: ptr as usize,
                len: 65
            })
        );
        assert_eq!(
            host_to_remote(&space, 1, ptr, &[0u8; 8]),
            Err(CopyError::InvalidPe(1))
        );
        let mut host = [0u8; 8];
        assert_eq!(
            remote_to_host(&space, 0, &mut host, std::ptr::null()),
            Err(CopyError::NullPointer)
        );
        let stack = [1u8; 8];
        assert_eq!(
            remote_to_host(&space, 0, &mut host, stack.as_ptr()),
            Err(CopyError::OutOfBounds {
                addr: stack.as_ptr() as usize,
                len: 8
            })
        );
        assert_eq!(remote_to_remote(&space, ptr, std::ptr::null(), 0), Ok(()));
        AllocationRecord::deallocate_tracked(&space, ptr).unwrap();
    }

    #[test]
    fn wild_pointers_are_out_of_bounds() {
        let space = RemoteSpaceBuilder::new().with_backend(Backend::Local).build();
        let ptr = AllocationRecord::allocate_tracked(&space, "wild", 64);
        let wild = usize::MAX - 2;
        let mut host = [0u8; 8];
        assert_eq!(
            remote_to_host(&space, 0, &mut host, wild as *const u8),
            Err(CopyError::OutOfBounds { addr: wild, len: 8 })
        );
        assert_eq!(
            host_to_remote(&space, 0, wild as *mut u8, &host),
            Err(CopyError::OutOfBounds { addr: wild, len: 8 })
        );
        // one past the end of a live block
        let past = unsafe { ptr.add(64) };
        assert_eq!(
            remote_to_host(&space, 0, &mut host[..1], past),
            Err(CopyError::OutOfBounds {
                addr: past as usize,
                len: 1
            })
        );
        AllocationRecord::deallocate_tracked(&space, ptr).unwrap();
    }

    #[test]
    fn direct_and_staged_copies_agree() {
        let direct_space = RemoteSpaceBuilder::new().with_backend(Backend::Local).build();
        let staged_space = RemoteSpaceBuilder::new()
            .with_backend(Backend::Mailbox)
            .with_extent(1 << 16)
            .build();
        assert!(direct(&direct_space, 0));
        assert!(!direct(&staged_space, 0));
        assert!(!direct(&direct_space, 1));

        let src: Vec<u8> = (0..200).map(|i| i as u8).collect();
        for space in [&direct_space, &staged_space] {
            let ptr = AllocationRecord::allocate_tracked(space, "agree", 200);
            host_to_remote(space, 0, ptr, &src).unwrap();
            let mut out = vec![0u8; 200];
            remote_to_host(space, 0, &mut out, ptr).unwrap();
            assert_eq!(out, src, "{}", space.name());
            AllocationRecord::deallocate_tracked(space, ptr).unwrap();
        }
        // a host addressable payload is plain memory
        let ptr = AllocationRecord::allocate_tracked(&direct_space, "plain", 4);
        host_to_remote(&direct_space, 0, ptr, &[9, 8, 7, 6]).unwrap();
        assert_eq!(unsafe { std::slice::from_raw_parts(ptr, 4) }, &[9, 8, 7, 6]);
        AllocationRecord::deallocate_tracked(&direct_space, ptr).unwrap();
    }

    #[test]
    fn overlapping_copy() {
        let space = RemoteSpaceBuilder::new().with_backend(Backend::Local).build();
        let ptr = AllocationRecord::allocate_tracked(&space, "overlap", 16);
        let src: Vec<u8> = (0..16).collect();
        host_to_remote(&space, 0, ptr, &src).unwrap();
        remote_to_remote(&space, unsafe { ptr.add(4) }, ptr, 8).unwrap();
        let mut out = [0u8; 16];
        remote_to_host(&space, 0, &mut out, ptr).unwrap();
        assert_eq!(out, [0, 1, 2, 3, 0, 1, 2, 3, 4, 5, 6, 7, 12, 13, 14, 15]);
        AllocationRecord::deallocate_tracked(&space, ptr).unwrap();
    }
}
