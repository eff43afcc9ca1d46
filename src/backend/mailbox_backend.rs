pub(crate) mod mem;
pub(crate) mod msg;
pub(crate) mod progress;
pub(crate) mod rdma;

use super::{Backend, CommCollective, CommInfo, CommProgress, RdmaError, RdmaResult};
use msg::Msg;
use progress::{progress_loop, ProgressState};

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A two sided emulation of a symmetric heap.
///
/// Every pe owns a private heap and a progress thread, remote (and local) reads and writes are
/// request/response messages served by the progress thread of the target pe.
#[derive(Debug)]
pub(crate) struct MailboxComm {
    pub(crate) my_pe: usize,
    pub(crate) num_pes: usize,
    // frames are tagged with the sending pe so even an undecodable request can be answered
    requests: Arc<Vec<Sender<(usize, Vec<u8>)>>>,
    // held for the duration of a request so replies pair with the request that caused them
    pub(crate) reply_rx: Mutex<Receiver<Vec<u8>>>,
    pub(crate) state: Arc<ProgressState>,
    epoch: AtomicU64,
    progress: Mutex<Option<std::thread::JoinHandle<()>>>,
    pub(crate) put_amt: AtomicUsize,
    pub(crate) get_amt: AtomicUsize,
}

impl MailboxComm {
    /// a job of a single pe
    pub(crate) fn single() -> MailboxComm {
        let mut team = MailboxComm::team(1);
        team.remove(0)
    }

    /// the comms of an in-process job of `num_pes` pes, index i is pe i
    #[tracing::instrument(skip_all, level = "debug")]
    pub(crate) fn team(num_pes: usize) -> Vec<MailboxComm> {
        assert!(
            num_pes > 0,
            "[REMOTE SPACE ERROR] a mailbox job needs at least one pe"
        );
        let (request_txs, request_rxs): (Vec<_>, Vec<_>) = (0..num_pes)
            .map(|_| crossbeam::channel::unbounded::<(usize, Vec<u8>)>())
            .unzip();
        let (reply_txs, reply_rxs): (Vec<_>, Vec<_>) = (0..num_pes)
            .map(|_| crossbeam::channel::unbounded::<Vec<u8>>())
            .unzip();
        let requests = Arc::new(request_txs);
        let replies = Arc::new(reply_txs);

        request_rxs
            .into_iter()
            .zip(reply_rxs)
            .enumerate()
            .map(|(my_pe, (request_rx, reply_rx))| {
                let state = Arc::new(ProgressState::new(my_pe, num_pes));
                let thread_state = state.clone();
                let thread_replies = replies.clone();
                let progress = match std::thread::Builder::new()
                    .name(format!("mailbox_progress_{}", my_pe))
                    .spawn(move || progress_loop(thread_state, request_rx, thread_replies))
                {
                    Ok(handle) => handle,
                    Err(e) => panic!(
                        "[REMOTE SPACE ERROR] unable to spawn progress thread for pe {}: {}",
                        my_pe, e
                    ),
                };
                MailboxComm {
                    my_pe,
                    num_pes,
                    requests: requests.clone(),
                    reply_rx: Mutex::new(reply_rx),
                    state,
                    epoch: AtomicU64::new(0),
                    progress: Mutex::new(Some(progress)),
                    put_amt: AtomicUsize::new(0),
                    get_amt: AtomicUsize::new(0),
                }
            })
            .collect()
    }

    pub(crate) fn send(&self, pe: usize, msg: &Msg) -> RdmaResult {
        let tx = self.requests.get(pe).ok_or(RdmaError::InvalidPe(pe))?;
        let buf = msg.encode().map_err(RdmaError::Protocol)?;
        tx.send((self.my_pe, buf))
            .map_err(|_| RdmaError::Disconnected(pe))
    }
}

impl CommProgress for MailboxComm {
    // every put and get waits for its acknowledgement
    fn wait(&self) {}
    fn barrier(&self) {
        self.exchange([0; 3]);
    }
}

impl CommCollective for MailboxComm {
    fn exchange(&self, value: [u64; 3]) -> Vec<[u64; 3]> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst);
        for pe in 0..self.num_pes {
            let msg = Msg::Exchange {
                src: self.my_pe,
                epoch,
                value,
            };
            if let Err(e) = self.send(pe, &msg) {
                tracing::error!(
                    "pe {} could not reach pe {} for collective {}: {}",
                    self.my_pe,
                    pe,
                    epoch,
                    e
                );
            }
        }
        self.state.wait_epoch(epoch, "MailboxSpace")
    }
}

impl CommInfo for MailboxComm {
    fn my_pe(&self) -> usize {
        self.my_pe
    }
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn backend(&self) -> Backend {
        Backend::Mailbox
    }
}

impl Drop for MailboxComm {
    fn drop(&mut self) {
        if let Err(e) = self.send(self.my_pe, &Msg::Shutdown) {
            tracing::error!("unable to stop the progress thread of pe {}: {}", self.my_pe, e);
        }
        if let Some(progress) = self.progress.lock().take() {
            if progress.join().is_err() {
                tracing::error!("mailbox progress thread for pe {} panicked", self.my_pe);
            }
        }
        tracing::trace!(
            "mailbox pe {} sent {} bytes and received {} bytes",
            self.my_pe,
            self.put_amt.load(Ordering::Relaxed),
            self.get_amt.load(Ordering::Relaxed)
        );
    }
}
