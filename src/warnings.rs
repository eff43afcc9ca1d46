use std::sync::atomic::{AtomicBool, Ordering};

use crate::config;

static ENABLED: AtomicBool = AtomicBool::new(true);

pub(crate) enum RuntimeWarning<'a> {
    BarrierTimeout(f64, &'a str),
    OrphanedRecords(&'a str, usize),
}

impl<'a> RuntimeWarning<'a> {
    #[allow(dead_code)]
    pub(crate) fn enable_warnings() {
        ENABLED.store(true, Ordering::Relaxed);
    }
    #[allow(dead_code)]
    pub(crate) fn disable_warnings() {
        ENABLED.store(false, Ordering::Relaxed);
    }
    fn print_warning(&self) -> bool {
        if ENABLED.load(Ordering::Relaxed) {
            match self {
                RuntimeWarning::BarrierTimeout(elapsed, _) => {
                    config().barrier_warning.unwrap_or(true)
                        && config().deadlock_timeout > 0.0
                        && *elapsed > config().deadlock_timeout
                }
                RuntimeWarning::OrphanedRecords(_, cnt) => *cnt > 0,
            }
        } else {
            false
        }
    }

    pub(crate) fn print(self) {
        if self.print_warning() {
            match self {
                RuntimeWarning::BarrierTimeout(elapsed, space) => {
                    tracing::warn!(
                        "[REMOTE SPACE WARNING][{:?}] {space} fence has waited {elapsed:.1} seconds. Potential deadlock detected.
                    Fence is a collective operation requiring every PE of the job to enter the call, as are allocate and deallocate.
                    A PE that skips a collective call stalls all other PEs indefinitely.
                    The deadlock timeout can be set via the RSPACE_DEADLOCK_TIMEOUT environment variable, the current timeout is {} seconds, setting this to 0 will disable this warning.",
                        std::thread::current().id(),
                        config().deadlock_timeout
                    );
                }
                RuntimeWarning::OrphanedRecords(space, cnt) => {
                    tracing::warn!(
                        "[REMOTE SPACE WARNING] {space} is being dropped with {cnt} live allocation record(s).
                    These allocations were never released and their symmetric memory will not be returned to the backend."
                    );
                }
            }
        }
    }
}
