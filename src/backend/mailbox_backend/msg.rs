use serde::{Deserialize, Serialize};

/// Wire format of the mailbox backend, offsets are relative to the base of the receiving pe's heap
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Msg {
    Put {
        src: usize,
        offset: usize,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    Get {
        src: usize,
        offset: usize,
        len: usize,
    },
    Ack,
    Data {
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    Nack {
        offset: usize,
        len: usize,
    },
    /// the request could not be served at all
    Reject {
        reason: String,
    },
    Exchange {
        src: usize,
        epoch: u64,
        value: [u64; 3],
    },
    Shutdown,
}

impl Msg {
    pub(crate) fn encode(&self) -> Result<Vec<u8>, String> {
        bincode::serialize(self).map_err(|e| e.to_string())
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Msg, String> {
        bincode::deserialize(buf).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_payload_is_carried_as_bytes() {
        let msg = Msg::Put {
            src: 1,
            offset: 128,
            data: vec![7u8; 300],
        };
        let buf = msg.encode().unwrap();
        // bytes are not expanded into a per element sequence
        assert!(buf.len() < 300 + 64);
        assert_eq!(Msg::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Msg::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
