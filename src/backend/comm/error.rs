#[derive(Debug, Clone)]
pub(crate) enum AllocError {
    OutOfMemoryError(usize),
    LocalNotFound(usize),
    FabricAllocationError(String),
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AllocError::OutOfMemoryError(size) => {
                write!(f, "not enough memory for to allocate {} bytes", size)
            }
            AllocError::LocalNotFound(addr) => {
                write!(
                    f,
                    "Allocation not found locally for given address {:x}",
                    addr
                )
            }
            AllocError::FabricAllocationError(msg) => {
                write!(f, "Fabric allocation error: {}", msg)
            }
        }
    }
}

impl std::error::Error for AllocError {}

pub(crate) type AllocResult<T> = Result<T, AllocError>;

#[derive(Debug, Clone)]
pub(crate) enum RdmaError {
    InvalidPe(usize),
    OutOfBounds(usize, usize),
    Disconnected(usize),
    Protocol(String),
}

pub(crate) type RdmaResult<T = ()> = Result<T, RdmaError>;

impl std::fmt::Display for RdmaError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RdmaError::InvalidPe(pe) => {
                write!(f, "pe {} is not part of the job", pe)
            }
            RdmaError::OutOfBounds(addr, len) => {
                write!(
                    f,
                    "range {:#x}..{:#x} is not inside the symmetric heap",
                    addr,
                    addr.wrapping_add(*len)
                )
            }
            RdmaError::Disconnected(pe) => {
                write!(f, "pe {} is no longer accepting messages", pe)
            }
            RdmaError::Protocol(msg) => {
                write!(f, "message protocol error: {}", msg)
            }
        }
    }
}

impl std::error::Error for RdmaError {}
