use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};

use super::msg::Msg;
use crate::heap_alloc::{BTreeAlloc, HeapAlloc, MEMORY_ALIGNMENT};
use crate::warnings::RuntimeWarning;

/// The private heap of one pe, only its own progress thread reads or writes the bytes
pub(crate) struct MailboxHeap {
    base: *mut u8,
    layout: std::alloc::Layout,
    pub(crate) alloc: BTreeAlloc,
}

unsafe impl Send for MailboxHeap {}
unsafe impl Sync for MailboxHeap {}

impl MailboxHeap {
    pub(crate) fn new(my_pe: usize, size: usize) -> Result<MailboxHeap, String> {
        let layout = std::alloc::Layout::from_size_align(size, MEMORY_ALIGNMENT)
            .map_err(|e| e.to_string())?;
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        if base.is_null() {
            return Err(format!("unable to reserve a {} byte heap", size));
        }
        let mut alloc = BTreeAlloc::new(format!("mailbox_heap_{}", my_pe));
        alloc.init(base as usize, size);
        Ok(MailboxHeap {
            base,
            layout,
            alloc,
        })
    }

    pub(crate) fn base_addr(&self) -> usize {
        self.base as usize
    }

    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }

    fn in_bounds(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .map_or(false, |end| end <= self.layout.size())
    }

    fn write(&self, offset: usize, data: &[u8]) -> bool {
        if !self.in_bounds(offset, data.len()) {
            return false;
        }
        unsafe { std::ptr::copy(data.as_ptr(), self.base.add(offset), data.len()) };
        true
    }

    fn read(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        if !self.in_bounds(offset, len) {
            return None;
        }
        let mut data = vec![0u8; len];
        unsafe { std::ptr::copy(self.base.add(offset), data.as_mut_ptr(), len) };
        Some(data)
    }
}

impl std::fmt::Debug for MailboxHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxHeap")
            .field("base", &self.base)
            .field("len", &self.layout.size())
            .finish()
    }
}

impl Drop for MailboxHeap {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.base, self.layout) };
    }
}

/// State shared between a pe and its progress thread
#[derive(Debug)]
pub(crate) struct ProgressState {
    pub(crate) my_pe: usize,
    pub(crate) num_pes: usize,
    pub(crate) heap: RwLock<Option<MailboxHeap>>,
    collectives: Mutex<HashMap<u64, Vec<Option<[u64; 3]>>>>,
    arrivals: Condvar,
}

impl ProgressState {
    pub(crate) fn new(my_pe: usize, num_pes: usize) -> ProgressState {
        ProgressState {
            my_pe,
            num_pes,
            heap: RwLock::new(None),
            collectives: Mutex::new(HashMap::new()),
            arrivals: Condvar::new(),
        }
    }

    fn arrive(&self, src: usize, epoch: u64, value: [u64; 3]) {
        let mut collectives = self.collectives.lock();
        let entry = collectives
            .entry(epoch)
            .or_insert_with(|| vec![None; self.num_pes]);
        if src < entry.len() {
            entry[src] = Some(value);
        }
        self.arrivals.notify_all();
    }

    /// block until every pe has contributed to `epoch`, then take the contributions
    pub(crate) fn wait_epoch(&self, epoch: u64, space: &str) -> Vec<[u64; 3]> {
        let s = Instant::now();
        let mut warned = false;
        let mut collectives = self.collectives.lock();
        loop {
            let complete = collectives
                .get(&epoch)
                .map_or(false, |entry| entry.iter().all(|v| v.is_some()));
            if complete {
                return collectives
                    .remove(&epoch)
                    .unwrap_or_default()
                    .into_iter()
                    .flatten()
                    .collect();
            }
            self.arrivals
                .wait_for(&mut collectives, Duration::from_millis(100));
            if !warned && s.elapsed().as_secs_f64() > crate::config().deadlock_timeout {
                RuntimeWarning::BarrierTimeout(s.elapsed().as_secs_f64(), space).print();
                warned = true;
            }
        }
    }
}

/// The message loop of one pe, serves put/get requests against the local heap and records collective arrivals
pub(crate) fn progress_loop(
    state: Arc<ProgressState>,
    requests: Receiver<(usize, Vec<u8>)>,
    replies: Arc<Vec<Sender<Vec<u8>>>>,
) {
    tracing::trace!("mailbox progress thread for pe {} started", state.my_pe);
    while let Ok((sender, buf)) = requests.recv() {
        let msg = match Msg::decode(&buf) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(
                    "pe {} rejecting malformed message from pe {}: {}",
                    state.my_pe,
                    sender,
                    e
                );
                reply_to(
                    &replies,
                    sender,
                    Msg::Reject {
                        reason: format!("malformed request: {}", e),
                    },
                );
                continue;
            }
        };
        match msg {
            Msg::Put { src, offset, data } => {
                let len = data.len();
                let written = state
                    .heap
                    .read()
                    .as_ref()
                    .map_or(false, |heap| heap.write(offset, &data));
                let reply = if written {
                    Msg::Ack
                } else {
                    Msg::Nack { offset, len }
                };
                reply_to(&replies, src, reply);
            }
            Msg::Get { src, offset, len } => {
                let data = state
                    .heap
                    .read()
                    .as_ref()
                    .and_then(|heap| heap.read(offset, len));
                let reply = match data {
                    Some(data) => Msg::Data { data },
                    None => Msg::Nack { offset, len },
                };
                reply_to(&replies, src, reply);
            }
            Msg::Exchange { src, epoch, value } => state.arrive(src, epoch, value),
            Msg::Shutdown => break,
            Msg::Ack | Msg::Data { .. } | Msg::Nack { .. } | Msg::Reject { .. } => {
                tracing::error!("pe {} received a reply on its request queue", state.my_pe);
            }
        }
    }
    tracing::trace!("mailbox progress thread for pe {} exiting", state.my_pe);
}

fn reply_to(replies: &[Sender<Vec<u8>>], pe: usize, msg: Msg) {
    let reply = match replies.get(pe) {
        Some(reply) => reply,
        None => {
            tracing::error!("request from unknown pe {}", pe);
            return;
        }
    };
    // the requester is blocked on this reply, an unencodable one becomes a rejection
    let buf = msg.encode().or_else(|e| {
        tracing::error!("unable to encode reply to pe {}: {}", pe, e);
        Msg::Reject { reason: e }.encode()
    });
    match buf {
        Ok(buf) => {
            // the requester may already be gone during teardown
            let _ = reply.send(buf);
        }
        Err(e) => tracing::error!("unable to encode rejection for pe {}: {}", pe, e),
    }
}
