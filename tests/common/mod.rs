#![allow(dead_code)]

use remote_spaces::{Backend, RemoteSpace, RemoteSpaceBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const EXTENT: usize = 4 * 1024 * 1024;

static JOB: AtomicUsize = AtomicUsize::new(0);

// shared memory segment names must not collide between tests or concurrently running test binaries
pub fn job_id() -> usize {
    std::process::id() as usize * 1000 + JOB.fetch_add(1, Ordering::SeqCst)
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

#[derive(Clone, Default)]
pub struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// run `f` with the warnings it logs on the current thread collected into a string
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buf = LogBuffer::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let ret = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buf.0.lock()).into_owned();
    (ret, logs)
}

pub fn team(backend: Backend, num_pes: usize) -> Vec<RemoteSpace> {
    init_logging();
    RemoteSpaceBuilder::new()
        .with_backend(backend)
        .with_extent(EXTENT)
        .with_job_id(job_id())
        .build_team(num_pes)
}

/// run `f` once per pe, each on its own thread, and return what every pe returned (index i is pe i)
pub fn run_pes<T, F>(spaces: Vec<RemoteSpace>, f: F) -> Vec<std::thread::Result<T>>
where
    T: Send + 'static,
    F: Fn(RemoteSpace) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let threads: Vec<_> = spaces
        .into_iter()
        .map(|space| {
            let f = f.clone();
            std::thread::spawn(move || f(space))
        })
        .collect();
    threads.into_iter().map(|t| t.join()).collect()
}

/// like [run_pes] but every pe must succeed
pub fn run_team<T, F>(backend: Backend, num_pes: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(RemoteSpace) -> T + Send + Sync + 'static,
{
    run_pes(team(backend, num_pes), f)
        .into_iter()
        .map(|r| match r {
            Ok(v) => v,
            Err(e) => std::panic::resume_unwind(e),
        })
        .collect()
}

/// stamp one #[test] per (backend, num_pes) pair calling `$test(backend, num_pes)`
macro_rules! backend_tests {
    ( $test:ident, ($( ($backend:ident, $num_pes:literal) ),*) ) => {
        paste::paste! {
            $(
                #[test]
                #[serial_test::serial]
                #[allow(non_snake_case)]
                fn [<$test _ $backend:lower _ $num_pes>]() {
                    $test(remote_spaces::Backend::$backend, $num_pes);
                }
            )*
        }
    };
    ( $test:ident ) => {
        backend_tests!($test, ((Local, 1), (Shmem, 1), (Shmem, 2), (Shmem, 4), (Mailbox, 1), (Mailbox, 2), (Mailbox, 4)));
    };
}
