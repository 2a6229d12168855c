//! Data Channel Establishment Protocol messages and payload identifiers.

use anyhow::{Result, bail};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// UTF-8 string payload.
pub const PPID_TEXT: u32 = 50;
/// Binary payload.
pub const PPID_BINARY: u32 = 51;
/// DCEP control message.
pub const PPID_CONTROL: u32 = 53;

pub const DCEP_OPEN: u8 = 0x03;
pub const DCEP_ACK: u8 = 0x02;

/// DCEP OPEN message (RFC 8832 layout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcepOpen {
    pub channel_type: u8,
    pub priority: u16,
    pub reliability: u32,
    pub label: String,
    pub protocol: String,
}

impl DcepOpen {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(data);
        if buf.remaining() < 12 {
            bail!("dcep open too short");
        }
        if buf.get_u8() != DCEP_OPEN {
            bail!("not a dcep open");
        }
        let channel_type = buf.get_u8();
        let priority = buf.get_u16();
        let reliability = buf.get_u32();
        let label_len = buf.get_u16() as usize;
        let protocol_len = buf.get_u16() as usize;
        if buf.remaining() < label_len + protocol_len {
            bail!("dcep open truncated");
        }
        let label = String::from_utf8(buf.split_to(label_len).to_vec())?;
        let protocol = String::from_utf8(buf.split_to(protocol_len).to_vec())?;
        Ok(Self {
            channel_type,
            priority,
            reliability,
            label,
            protocol,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.label.len() + self.protocol.len());
        buf.put_u8(DCEP_OPEN);
        buf.put_u8(self.channel_type);
        buf.put_u16(self.priority);
        buf.put_u32(self.reliability);
        buf.put_u16(self.label.len() as u16);
        buf.put_u16(self.protocol.len() as u16);
        buf.put_slice(self.label.as_bytes());
        buf.put_slice(self.protocol.as_bytes());
        buf.freeze()
    }
}

/// The one-byte DCEP ACK payload.
pub const ACK_MESSAGE: [u8; 1] = [DCEP_ACK];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let open = DcepOpen {
            channel_type: 0x80,
            priority: 0,
            reliability: 0,
            label: "chat".to_string(),
            protocol: String::new(),
        };
        let decoded = DcepOpen::decode(&open.encode()).unwrap();
        assert_eq!(decoded, open);
    }

    #[test]
    fn rejects_wrong_message_type() {
        let mut raw = DcepOpen {
            channel_type: 0,
            priority: 0,
            reliability: 0,
            label: String::new(),
            protocol: String::new(),
        }
        .encode()
        .to_vec();
        raw[0] = DCEP_ACK;
        assert!(DcepOpen::decode(&raw).is_err());
    }

    #[test]
    fn rejects_truncated_label() {
        let mut raw = DcepOpen {
            channel_type: 0,
            priority: 0,
            reliability: 0,
            label: "chat".to_string(),
            protocol: String::new(),
        }
        .encode()
        .to_vec();
        raw.truncate(raw.len() - 2);
        assert!(DcepOpen::decode(&raw).is_err());
    }
}
