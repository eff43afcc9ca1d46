#[macro_use]
mod common;

use common::*;
use rand::{Rng, SeedableRng};
use remote_spaces::{deep_copy, AllocationRecord, Backend, CopyError, TrackedAlloc};

const LEN: usize = 10_000;

fn pattern(pe: usize) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xdead_beef + pe as u64);
    (0..LEN).map(|_| rng.gen()).collect()
}

// every pe writes its pattern into the block of its right neighbour, after a fence each pe reads
// its own block and finds the pattern of its left neighbour
fn ring_put(backend: Backend, num_pes: usize) {
    run_team(backend, num_pes, move |space| {
        let my_pe = space.my_pe();
        let block = TrackedAlloc::new(&space, "ring", LEN);
        space.fence();
        deep_copy::host_to_remote(&space, (my_pe + 1) % num_pes, block.as_ptr(), &pattern(my_pe)).unwrap();
        space.fence();
        let mut local = vec![0u8; LEN];
        deep_copy::remote_to_host(&space, my_pe, &mut local, block.as_ptr()).unwrap();
        assert_eq!(local, pattern((my_pe + num_pes - 1) % num_pes));
        space.fence();
    });
}
backend_tests!(ring_put);

// every pe fills its own block then reads every other pe's block
fn all_get(backend: Backend, num_pes: usize) {
    run_team(backend, num_pes, move |space| {
        let my_pe = space.my_pe();
        let block = TrackedAlloc::new(&space, "gather", LEN);
        deep_copy::host_to_remote(&space, my_pe, block.as_ptr(), &pattern(my_pe)).unwrap();
        space.fence();
        for pe in 0..num_pes {
            let mut remote = vec![0u8; LEN];
            deep_copy::remote_to_host(&space, pe, &mut remote, block.as_ptr()).unwrap();
            assert_eq!(remote, pattern(pe), "pe {} read a bad block from pe {}", my_pe, pe);
        }
        space.fence();
    });
}
backend_tests!(all_get);

fn remote_to_remote_copy(backend: Backend, num_pes: usize) {
    run_team(backend, num_pes, |space| {
        let my_pe = space.my_pe();
        let src = AllocationRecord::allocate_tracked(&space, "src", LEN);
        let dst = AllocationRecord::allocate_tracked(&space, "dst", LEN);
        deep_copy::host_to_remote(&space, my_pe, src, &pattern(my_pe)).unwrap();
        deep_copy::remote_to_remote(&space, dst, src, LEN).unwrap();
        let mut out = vec![0u8; LEN];
        deep_copy::remote_to_host(&space, my_pe, &mut out, dst).unwrap();
        assert_eq!(out, pattern(my_pe));
        AllocationRecord::deallocate_tracked(&space, dst).unwrap();
        AllocationRecord::deallocate_tracked(&space, src).unwrap();
    });
}
backend_tests!(remote_to_remote_copy);

fn copy_errors(backend: Backend, num_pes: usize) {
    run_team(backend, num_pes, move |space| {
        let block = TrackedAlloc::new(&space, "small", 64);
        assert_eq!(
            deep_copy::host_to_remote(&space, num_pes, block.as_ptr(), &[1, 2, 3]),
            Err(CopyError::InvalidPe(num_pes))
        );
        let too_long = vec![0u8; 64 * 1024];
        assert!(matches!(
            deep_copy::host_to_remote(&space, 0, block.as_ptr(), &too_long),
            Err(CopyError::OutOfBounds { .. })
        ));
        assert_eq!(
            deep_copy::remote_to_remote(&space, std::ptr::null_mut(), block.as_ptr(), 8),
            Err(CopyError::NullPointer)
        );
        let wild = usize::MAX - 2;
        assert_eq!(
            deep_copy::remote_to_host(&space, 0, &mut [0u8; 8], wild as *const u8),
            Err(CopyError::OutOfBounds { addr: wild, len: 8 })
        );
        assert_eq!(
            deep_copy::host_to_remote(&space, 0, wild as *mut u8, &[0u8; 8]),
            Err(CopyError::OutOfBounds { addr: wild, len: 8 })
        );
        // empty copies never touch either side
        assert_eq!(
            deep_copy::host_to_remote(&space, num_pes, std::ptr::null_mut(), &[]),
            Ok(())
        );
        space.fence();
    });
}
backend_tests!(copy_errors);
