use super::RecordHandle;

/// Size in bytes of the header placed in front of every tracked payload
pub const HEADER_SIZE: usize = std::mem::size_of::<AllocationHeader>();

/// Longest label (in bytes) kept in a header, longer labels are truncated
pub const MAXIMUM_LABEL_LENGTH: usize = LABEL_BYTES - 1;

const LABEL_BYTES: usize = 112;
const HEADER_MAGIC: u32 = 0x5253_5243;

/// Fixed layout metadata at the front of a tracked block.
///
/// The header names its record by registry handle, never by address, and is written and read
/// through the backend so it works on heaps the host cannot dereference.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct AllocationHeader {
    magic: u32,
    index: u32,
    generation: u32,
    label_len: u32,
    label: [u8; LABEL_BYTES],
}

const _: () = assert!(std::mem::size_of::<AllocationHeader>() == 128);

/// number of leading header bytes needed to resolve a record
pub(crate) const HANDLE_BYTES: usize = 16;

fn truncate_label(label: &str) -> &str {
    if label.len() <= MAXIMUM_LABEL_LENGTH {
        return label;
    }
    let mut end = MAXIMUM_LABEL_LENGTH;
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    &label[..end]
}

impl AllocationHeader {
    pub(crate) fn new(handle: RecordHandle, label: &str) -> AllocationHeader {
        let label = truncate_label(label);
        let mut bytes = [0u8; LABEL_BYTES];
        bytes[..label.len()].copy_from_slice(label.as_bytes());
        AllocationHeader {
            magic: HEADER_MAGIC,
            index: handle.index,
            generation: handle.generation,
            label_len: label.len() as u32,
            label: bytes,
        }
    }

    pub(crate) fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[offset_of!(AllocationHeader, magic)..][..4].copy_from_slice(&self.magic.to_ne_bytes());
        buf[offset_of!(AllocationHeader, index)..][..4].copy_from_slice(&self.index.to_ne_bytes());
        buf[offset_of!(AllocationHeader, generation)..][..4]
            .copy_from_slice(&self.generation.to_ne_bytes());
        buf[offset_of!(AllocationHeader, label_len)..][..4]
            .copy_from_slice(&self.label_len.to_ne_bytes());
        buf[offset_of!(AllocationHeader, label)..].copy_from_slice(&self.label);
        buf
    }

    /// the handle recorded in the leading `HANDLE_BYTES` of a header, None if the magic is missing
    pub(crate) fn read_handle(buf: &[u8]) -> Option<RecordHandle> {
        let word = |offset: usize| -> Option<u32> {
            let bytes = buf.get(offset..offset + 4)?;
            Some(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        };
        if word(offset_of!(AllocationHeader, magic))? != HEADER_MAGIC {
            return None;
        }
        Some(RecordHandle {
            index: word(offset_of!(AllocationHeader, index))?,
            generation: word(offset_of!(AllocationHeader, generation))?,
        })
    }

    #[cfg(test)]
    fn label(&self) -> &str {
        let len = (self.label_len as usize).min(MAXIMUM_LABEL_LENGTH);
        std::str::from_utf8(&self.label[..len]).unwrap_or("")
    }
}
