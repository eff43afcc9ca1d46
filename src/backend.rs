use crate::config;
use std::sync::Arc;

pub(crate) mod comm;
pub(crate) use comm::*;

pub(crate) mod local_backend;
use local_backend::LocalComm;

pub(crate) mod shmem_backend;
use shmem_backend::ShmemComm;

pub(crate) mod mailbox_backend;
use mailbox_backend::MailboxComm;

/// The list of available backends, used to specify how symmetric memory is allocated and how data is transfered between PEs
#[derive(
    serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy,
)]
pub enum Backend {
    /// The Local backend -- intended for single process environments, blocks come from the process allocator
    Local,
    /// The Shmem backend -- a symmetric heap shared by every PE of a single node job, directly addressable by all PEs
    Shmem,
    /// The Mailbox backend -- each PE's heap is private and only reachable through request/response messages
    Mailbox,
}

impl Default for Backend {
    fn default() -> Self {
        match config().backend.as_str() {
            "shmem" => Backend::Shmem,
            "mailbox" => Backend::Mailbox,
            _ => Backend::Local,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Backend::Local => write!(f, "local"),
            Backend::Shmem => write!(f, "shmem"),
            Backend::Mailbox => write!(f, "mailbox"),
        }
    }
}

/// Identity of the calling pe within a job, normally read from the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PeInfo {
    pub(crate) my_pe: usize,
    pub(crate) num_pes: usize,
    pub(crate) job_id: usize,
}

impl Default for PeInfo {
    fn default() -> Self {
        PeInfo {
            my_pe: config().pe_id,
            num_pes: config().num_pes,
            job_id: config().job_id,
        }
    }
}

pub(crate) fn create_comm(backend: Backend, pe_info: PeInfo) -> Arc<Comm> {
    match backend {
        Backend::Shmem => Arc::new(ShmemComm::new(pe_info).into()),
        Backend::Mailbox => Arc::new(MailboxComm::single().into()),
        Backend::Local => Arc::new(LocalComm::new().into()),
    }
}

/// create the comms for every pe of an in-process job, one per participating thread
pub(crate) fn create_team_comms(backend: Backend, num_pes: usize, job_id: usize) -> Vec<Arc<Comm>> {
    match backend {
        Backend::Shmem => (0..num_pes)
            .map(|my_pe| {
                create_comm(
                    Backend::Shmem,
                    PeInfo {
                        my_pe,
                        num_pes,
                        job_id,
                    },
                )
            })
            .collect(),
        Backend::Mailbox => MailboxComm::team(num_pes)
            .into_iter()
            .map(|comm| Arc::new(comm.into()))
            .collect(),
        Backend::Local => {
            assert_eq!(
                num_pes, 1,
                "[REMOTE SPACE ERROR] the local backend only supports a single pe"
            );
            vec![create_comm(Backend::Local, PeInfo::default())]
        }
    }
}
