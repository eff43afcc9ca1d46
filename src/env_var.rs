use std::sync::OnceLock;

use serde::Deserialize;

fn default_deadlock_timeout() -> f64 {
    600.0
}

fn default_backend() -> String {
    "local".to_owned()
}

fn default_heap_size() -> usize {
    256 * 1024 * 1024
}

fn default_num_pes() -> usize {
    1
}

#[derive(Deserialize, Debug)]
pub struct Config {
    /// A general timeout in seconds for collective operations which may indicate a deadlock, default: 600.0 seconds
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// flag used to print warnings when a fence has been waiting longer than `deadlock_timeout`. Default: true
    pub barrier_warning: Option<bool>,

    /// The backend used to construct remote spaces
    /// local -- single pe execution (default)
    /// shmem -- multi pe single node execution over a shared symmetric heap
    /// mailbox -- message passing emulation of the symmetric heap
    #[serde(default = "default_backend")]
    pub backend: String, //local,shmem,mailbox

    /// Size in bytes of the per pe symmetric heap when no extent has been set on the space, default: 256 MB
    #[serde(default = "default_heap_size")]
    pub heap_size: usize,

    /// number of pes participating in the job (shmem backend)
    #[serde(default = "default_num_pes")]
    pub num_pes: usize,
    /// id of this pe within the job (shmem backend)
    #[serde(default)]
    pub pe_id: usize,
    /// id used to name the shared memory segments of the job (shmem backend)
    #[serde(default)]
    pub job_id: usize,

    /// exchange a sequence number and size on every collective allocate/deallocate and abort on mismatch, default: false
    #[serde(default)]
    pub collective_check: bool,
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("RSPACE_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}
