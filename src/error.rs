use crate::backend::RdmaError;
use crate::record::RecordHandle;

/// Errors raised while resolving a payload pointer back to its [AllocationRecord][crate::AllocationRecord]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// the operation was handed a null pointer
    NullPointer(&'static str),
    /// the pointer is not the payload of any live record of the space
    UnknownPointer(&'static str, usize),
    /// the header in front of the payload does not name the record registered for it
    HeaderMismatch {
        op: &'static str,
        addr: usize,
        expected: RecordHandle,
        found: Option<RecordHandle>,
    },
    /// the payload could not be moved into its new allocation
    Copy(CopyError),
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RecordError::NullPointer(op) => {
                write!(f, "{}: null pointer", op)
            }
            RecordError::UnknownPointer(op, addr) => {
                write!(
                    f,
                    "{}: {:#x} is not the payload of a live allocation record",
                    op, addr
                )
            }
            RecordError::HeaderMismatch {
                op,
                addr,
                expected,
                found,
            } => match found {
                Some(found) => write!(
                    f,
                    "{}: header of {:#x} names record {} but record {} is registered for it",
                    op, addr, found, expected
                ),
                None => write!(
                    f,
                    "{}: header of {:#x} is corrupted, expected record {}",
                    op, addr, expected
                ),
            },
            RecordError::Copy(e) => {
                write!(f, "reallocation copy failed: {}", e)
            }
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordError::Copy(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CopyError> for RecordError {
    fn from(e: CopyError) -> Self {
        RecordError::Copy(e)
    }
}

/// Errors raised by the [deep_copy][crate::deep_copy] routines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyError {
    /// a remote pointer was null
    NullPointer,
    /// the target pe is not part of the job
    InvalidPe(usize),
    /// `addr..addr+len` is not inside the symmetric heap of the space
    OutOfBounds { addr: usize, len: usize },
    /// the backend failed to move the bytes
    Transfer(String),
}

impl std::fmt::Display for CopyError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CopyError::NullPointer => write!(f, "deep copy with a null remote pointer"),
            CopyError::InvalidPe(pe) => write!(f, "pe {} is not part of the job", pe),
            CopyError::OutOfBounds { addr, len } => write!(
                f,
                "range {:#x}..{:#x} is not inside the symmetric heap",
                addr,
                addr.wrapping_add(*len)
            ),
            CopyError::Transfer(msg) => write!(f, "transfer failed: {}", msg),
        }
    }
}

impl std::error::Error for CopyError {}

impl CopyError {
    pub(crate) fn from_rdma(e: RdmaError) -> Self {
        match e {
            RdmaError::InvalidPe(pe) => CopyError::InvalidPe(pe),
            RdmaError::OutOfBounds(addr, len) => CopyError::OutOfBounds { addr, len },
            other => CopyError::Transfer(other.to_string()),
        }
    }
}
