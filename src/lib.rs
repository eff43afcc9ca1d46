//! Remote Spaces provides symmetric memory for PGAS container libraries, developed in Rust.
//!
//! A [RemoteSpace] hands out blocks that exist at the same offset on every processing element (PE) of a
//! job, so any PE can address the copy held by another PE with one-sided put/get operations. Allocation is
//! collective: every PE requests the same sizes in the same order.
//!
//! On top of the raw space, [AllocationRecord] tracks each block with a use count and a label. The record
//! header lives in front of the payload inside symmetric memory, and every live record is registered with
//! its space so payload pointers can be resolved, leaks reported and live allocations printed.
//!
//! The [deep_copy] routines move bytes between ordinary host memory and symmetric memory using whatever
//! transfer the active backend supports.
//!
//! Remote Spaces relies on backends to provide the symmetric heap and the transfers:
//! - "local": a single PE, blocks come from the process allocator
//! - "shmem": several PEs on one node sharing an OS shared memory symmetric heap
//! - "mailbox": a two-sided emulation where each PE's heap is private and reached through messages
//!
//! The backend is chosen with [RemoteSpaceBuilder::with_backend] or the `RSPACE_BACKEND` environment variable.
//!
//! EXAMPLES
//! --------
//!
//! # Constructing a space and tracking an allocation
//! ```
//! use remote_spaces::{deep_copy, AllocationRecord, Backend, RemoteSpaceBuilder};
//!
//! fn main() {
//!     let space = RemoteSpaceBuilder::new()
//!         .with_backend(Backend::Local)
//!         .build();
//!     let ptr = AllocationRecord::allocate_tracked(&space, "weights", 1024);
//!     deep_copy::host_to_remote(&space, space.my_pe(), ptr, &[1u8; 1024]).unwrap();
//!     space.fence();
//!     AllocationRecord::print_records(&mut std::io::stdout(), &space, true).unwrap();
//!     AllocationRecord::deallocate_tracked(&space, ptr).unwrap();
//! }
//! ```
//!
//! # A job of four PEs within one process
//! ```
//! use remote_spaces::{Backend, RemoteSpaceBuilder, TrackedAlloc};
//!
//! fn main() {
//!     let spaces = RemoteSpaceBuilder::new()
//!         .with_backend(Backend::Mailbox)
//!         .build_team(4);
//!     let threads: Vec<_> = spaces
//!         .into_iter()
//!         .map(|space| {
//!             std::thread::spawn(move || {
//!                 let block = TrackedAlloc::new(&space, "halo", 4096);
//!                 space.fence();
//!                 drop(block);
//!             })
//!         })
//!         .collect();
//!     for t in threads {
//!         t.join().unwrap();
//!     }
//! }
//! ```

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate memoffset;

mod backend;
pub mod deep_copy;
mod env_var;
mod error;
mod heap_alloc;
pub mod profiling;
mod record;
mod space;
mod warnings;

pub use crate::backend::Backend;
pub use crate::env_var::{config, Config};
pub use crate::error::{CopyError, RecordError};
pub use crate::heap_alloc::MEMORY_ALIGNMENT;
pub use crate::record::{
    AllocationRecord, RecordHandle, TrackedAlloc, HEADER_SIZE, MAXIMUM_LABEL_LENGTH,
};
pub use crate::space::{AllocationMode, RemoteSpace, RemoteSpaceBuilder};
