use indexmap::IndexSet;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Alignment (in bytes) of every block handed out by a symmetric heap
pub const MEMORY_ALIGNMENT: usize = 64;

pub(crate) fn align_up(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (size + align - 1) & !(align - 1)
}

pub(crate) trait HeapAlloc {
    fn new(id: String) -> Self;
    fn init(&mut self, start_addr: usize, size: usize);
    fn try_malloc(&self, size: usize) -> Option<usize>;
    fn free(&self, addr: usize) -> Result<usize, usize>;
    fn find(&self, addr: usize) -> Option<(usize, usize)>;
    fn occupied(&self) -> usize;
}

#[derive(Clone, Debug)]
struct FreeEntries {
    sizes: BTreeMap<usize, IndexSet<usize>>, //<size,<Vec<addr>>
    addrs: BTreeMap<usize, usize>,           //<addr,size>
}
impl FreeEntries {
    fn new() -> FreeEntries {
        FreeEntries {
            sizes: BTreeMap::new(),
            addrs: BTreeMap::new(),
        }
    }
}

/// Best fit allocator over a contiguous address range.
///
/// Every decision depends only on the sequence of `try_malloc`/`free` calls, so pes that issue the
/// same sequence over equally sized heaps receive the same offsets from their respective start addresses.
#[derive(Debug)]
pub(crate) struct BTreeAlloc {
    free_entries: Mutex<FreeEntries>,
    allocated_addrs: Mutex<BTreeMap<usize, usize>>, //<addr,size>
    id: String,
}

impl HeapAlloc for BTreeAlloc {
    fn new(id: String) -> BTreeAlloc {
        BTreeAlloc {
            free_entries: Mutex::new(FreeEntries::new()),
            allocated_addrs: Mutex::new(BTreeMap::new()),
            id: id,
        }
    }
    fn init(&mut self, start_addr: usize, size: usize) {
        let mut free_entries = self.free_entries.lock();
        let mut temp = IndexSet::new();
        temp.insert(start_addr);
        free_entries.sizes.insert(size, temp);
        free_entries.addrs.insert(start_addr, size);
    }

    fn try_malloc(&self, size: usize) -> Option<usize> {
        let size = align_up(size.max(1), MEMORY_ALIGNMENT);
        let mut free_entries = self.free_entries.lock();
        let mut addr: Option<usize> = None;
        let mut remove_size: Option<usize> = None;
        //find smallest memory segment greater than or equal to size
        if let Some((free_size, addrs)) = free_entries.sizes.range_mut(size..).next() {
            addr = addrs.pop();
            if addrs.is_empty() {
                remove_size = Some(*free_size);
            }
        }
        if let Some(rsize) = remove_size {
            free_entries.sizes.remove(&rsize);
        }
        if let Some(a) = addr {
            match free_entries.addrs.remove(&a) {
                Some(fsize) => {
                    if fsize != size {
                        let remaining = fsize - size;
                        let new_addr = a + size;
                        free_entries
                            .sizes
                            .entry(remaining)
                            .or_insert(IndexSet::new())
                            .insert(new_addr);
                        free_entries.addrs.insert(new_addr, remaining);
                    }
                }
                None => panic!("{:?} addr {:?} not found in free_entries", self.id, a),
            }
            drop(free_entries);
            self.allocated_addrs.lock().insert(a, size);
        }
        addr
    }

    /// returns the (aligned) size of the freed block, or the address if it was not allocated
    fn free(&self, addr: usize) -> Result<usize, usize> {
        let mut allocated_addrs = self.allocated_addrs.lock();
        let size = allocated_addrs.remove(&addr).ok_or(addr)?;
        drop(allocated_addrs);
        let mut temp_addr = addr;
        let mut temp_size = size;
        let mut remove: Vec<(usize, usize)> = vec![];
        let mut free_entries = self.free_entries.lock();
        if let Some((faddr, fsize)) = free_entries.addrs.range(..addr).next_back() {
            //look at address before addr
            if faddr + fsize == addr {
                temp_addr = *faddr;
                temp_size = fsize + size;
                remove.push((*faddr, *fsize));
            }
        }
        if let Some((faddr, fsize)) = free_entries.addrs.range(addr..).next() {
            //look at address after addr
            if temp_addr + temp_size == *faddr {
                temp_size += fsize;
                remove.push((*faddr, *fsize));
            }
        }
        for (raddr, rsize) in remove {
            free_entries.addrs.remove(&raddr);
            let mut remove_size = false;
            if let Some(addrs) = free_entries.sizes.get_mut(&rsize) {
                addrs.shift_remove(&raddr);
                remove_size = addrs.is_empty();
            }
            if remove_size {
                free_entries.sizes.remove(&rsize);
            }
        }
        free_entries.addrs.insert(temp_addr, temp_size);
        free_entries
            .sizes
            .entry(temp_size)
            .or_insert(IndexSet::new())
            .insert(temp_addr);
        Ok(size)
    }

    /// the allocated block (start, size) containing addr
    fn find(&self, addr: usize) -> Option<(usize, usize)> {
        let allocated_addrs = self.allocated_addrs.lock();
        allocated_addrs
            .range(..=addr)
            .next_back()
            .filter(|(start, size)| addr < *start + *size)
            .map(|(start, size)| (*start, *size))
    }

    fn occupied(&self) -> usize {
        self.allocated_addrs.lock().values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_btreealloc_malloc() {
        let mut alloc = BTreeAlloc::new("test_btree_malloc".to_string());
        alloc.init(0, 64 * 16);
        for i in 0..16 {
            assert_eq!(alloc.try_malloc(64), Some(i * 64));
        }
        assert_eq!(alloc.try_malloc(1), None);
        assert_eq!(alloc.occupied(), 64 * 16);
    }

    #[test]
    fn test_btreealloc_free() {
        let mut alloc = BTreeAlloc::new("test_malloc_free".to_string());
        alloc.init(0, 1024);
        assert_eq!(alloc.try_malloc(50), Some(0));
        assert_eq!(alloc.try_malloc(10), Some(64));
        assert_eq!(alloc.try_malloc(600), Some(128));
        assert_eq!(alloc.try_malloc(10), Some(768));
        assert_eq!(alloc.free(0), Ok(64));
        assert_eq!(alloc.try_malloc(30), Some(0));
        assert_eq!(alloc.free(64), Ok(64));
        assert_eq!(alloc.try_malloc(10), Some(64));
        assert_eq!(alloc.free(768), Ok(64));
        assert_eq!(alloc.free(128), Ok(640));
        assert_eq!(alloc.try_malloc(700), Some(128));
        assert_eq!(alloc.free(12345), Err(12345));
    }

    #[test]
    fn test_btreealloc_coalesce() {
        let mut alloc = BTreeAlloc::new("test_coalesce".to_string());
        alloc.init(4096, 256);
        let a = alloc.try_malloc(64).unwrap();
        let b = alloc.try_malloc(64).unwrap();
        let c = alloc.try_malloc(128).unwrap();
        assert_eq!(alloc.try_malloc(1), None);
        alloc.free(b).unwrap();
        alloc.free(a).unwrap();
        alloc.free(c).unwrap();
        assert_eq!(alloc.occupied(), 0);
        assert_eq!(alloc.try_malloc(256), Some(4096));
    }

    #[test]
    fn test_btreealloc_same_sequence_same_offsets() {
        let mut alloc_a = BTreeAlloc::new("pe0".to_string());
        let mut alloc_b = BTreeAlloc::new("pe1".to_string());
        alloc_a.init(0x10000, 8192);
        alloc_b.init(0x90000, 8192);
        let sizes = [100, 300, 64, 1000, 17];
        let mut offsets_a = vec![];
        let mut offsets_b = vec![];
        for s in sizes {
            offsets_a.push(alloc_a.try_malloc(s).unwrap() - 0x10000);
            offsets_b.push(alloc_b.try_malloc(s).unwrap() - 0x90000);
        }
        alloc_a.free(0x10000 + offsets_a[1]).unwrap();
        alloc_b.free(0x90000 + offsets_b[1]).unwrap();
        offsets_a.push(alloc_a.try_malloc(200).unwrap() - 0x10000);
        offsets_b.push(alloc_b.try_malloc(200).unwrap() - 0x90000);
        assert_eq!(offsets_a, offsets_b);
    }

    #[test]
    fn test_btreealloc_find() {
        let mut alloc = BTreeAlloc::new("test_find".to_string());
        alloc.init(0, 1024);
        let a = alloc.try_malloc(100).unwrap();
        assert_eq!(alloc.find(a + 50), Some((a, 128)));
        assert_eq!(alloc.find(a + 128), None);
    }
}
