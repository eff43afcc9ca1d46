use std::sync::atomic::Ordering;

use crate::backend::comm::{CommRdma, RdmaError, RdmaResult};

use super::msg::Msg;
use super::MailboxComm;

impl MailboxComm {
    /// offset of `addr..addr+len` from the base of my heap
    fn offset(&self, pe: usize, addr: usize, len: usize) -> RdmaResult<usize> {
        if pe >= self.num_pes {
            return Err(RdmaError::InvalidPe(pe));
        }
        let heap = self.state.heap.read();
        let end = addr.checked_add(len);
        match (heap.as_ref(), end) {
            (Some(heap), Some(end))
                if heap.base_addr() <= addr && end <= heap.base_addr() + heap.len() =>
            {
                Ok(addr - heap.base_addr())
            }
            _ => Err(RdmaError::OutOfBounds(addr, len)),
        }
    }

    fn request(&self, pe: usize, msg: Msg) -> RdmaResult<Msg> {
        let reply_rx = self.reply_rx.lock();
        self.send(pe, &msg)?;
        let buf = reply_rx.recv().map_err(|_| RdmaError::Disconnected(pe))?;
        Msg::decode(&buf).map_err(RdmaError::Protocol)
    }
}

impl CommRdma for MailboxComm {
    #[tracing::instrument(skip_all, level = "trace")]
    fn put(&self, pe: usize, src: &[u8], dst: usize) -> RdmaResult {
        if src.is_empty() {
            return Ok(());
        }
        let offset = self.offset(pe, dst, src.len())?;
        let msg = Msg::Put {
            src: self.my_pe,
            offset,
            data: src.to_vec(),
        };
        match self.request(pe, msg)? {
            Msg::Ack => {
                self.put_amt.fetch_add(src.len(), Ordering::Relaxed);
                Ok(())
            }
            Msg::Nack { .. } => Err(RdmaError::OutOfBounds(dst, src.len())),
            Msg::Reject { reason } => Err(RdmaError::Protocol(reason)),
            other => Err(RdmaError::Protocol(format!(
                "unexpected reply to put: {:?}",
                other
            ))),
        }
    }

    #[tracing::instrument(skip_all, level = "trace")]
    fn get(&self, pe: usize, src: usize, dst: &mut [u8]) -> RdmaResult {
        if dst.is_empty() {
            return Ok(());
        }
        let offset = self.offset(pe, src, dst.len())?;
        let msg = Msg::Get {
            src: self.my_pe,
            offset,
            len: dst.len(),
        };
        match self.request(pe, msg)? {
            Msg::Data { data } if data.len() == dst.len() => {
                dst.copy_from_slice(&data);
                self.get_amt.fetch_add(dst.len(), Ordering::Relaxed);
                Ok(())
            }
            Msg::Nack { .. } => Err(RdmaError::OutOfBounds(src, dst.len())),
            Msg::Reject { reason } => Err(RdmaError::Protocol(reason)),
            other => Err(RdmaError::Protocol(format!(
                "unexpected reply to get: {:?}",
                other
            ))),
        }
    }

    // staged through my own progress thread like any other access
    fn local_copy(&self, dst: usize, src: usize, len: usize) -> RdmaResult {
        let mut buf = vec![0u8; len];
        self.get(self.my_pe, src, &mut buf)?;
        self.put(self.my_pe, &buf, dst)
    }

    fn host_addressable(&self) -> bool {
        false
    }
}
