//! DTLS 1.2 record layer codec.

use anyhow::{Result, bail};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const RECORD_HEADER_LEN: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl TryFrom<u8> for ContentType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            20 => Ok(ContentType::ChangeCipherSpec),
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            other => bail!("unknown content type {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const DTLS_1_0: ProtocolVersion = ProtocolVersion {
        major: 254,
        minor: 255,
    };
    pub const DTLS_1_2: ProtocolVersion = ProtocolVersion {
        major: 254,
        minor: 253,
    };
}

/// One DTLS record. `sequence_number` is the 48-bit wire value; the epoch is
/// carried separately.
#[derive(Debug, Clone)]
pub struct DtlsRecord {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub epoch: u16,
    pub sequence_number: u64,
    pub payload: Bytes,
}

impl DtlsRecord {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.content_type as u8);
        buf.put_u8(self.version.major);
        buf.put_u8(self.version.minor);
        buf.put_u16(self.epoch);
        buf.put_uint(self.sequence_number, 6);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }

    /// Decode one record from the front of `buf`. `Ok(None)` means the
    /// remaining bytes do not hold a complete record.
    pub fn decode(buf: &mut Bytes) -> Result<Option<Self>> {
        if buf.remaining() < RECORD_HEADER_LEN {
            return Ok(None);
        }
        let content_type = ContentType::try_from(buf[0])?;
        let length = u16::from_be_bytes([buf[11], buf[12]]) as usize;
        if buf.remaining() < RECORD_HEADER_LEN + length {
            return Ok(None);
        }
        buf.advance(1);
        let version = ProtocolVersion {
            major: buf.get_u8(),
            minor: buf.get_u8(),
        };
        let epoch = buf.get_u16();
        let sequence_number = buf.get_uint(6);
        buf.advance(2); // length, already read
        let payload = buf.split_to(length);
        Ok(Some(Self {
            content_type,
            version,
            epoch,
            sequence_number,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip() {
        let record = DtlsRecord {
            content_type: ContentType::ApplicationData,
            version: ProtocolVersion::DTLS_1_2,
            epoch: 1,
            sequence_number: 0x0000_1234_5678,
            payload: Bytes::from_static(b"payload"),
        };
        let mut buf = BytesMut::new();
        record.encode(&mut buf);

        let mut wire = buf.freeze();
        let decoded = DtlsRecord::decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded.content_type, record.content_type);
        assert_eq!(decoded.version, record.version);
        assert_eq!(decoded.epoch, record.epoch);
        assert_eq!(decoded.sequence_number, record.sequence_number);
        assert_eq!(decoded.payload, record.payload);
        assert!(wire.is_empty());
    }

    #[test]
    fn two_records_in_one_datagram() {
        let mut buf = BytesMut::new();
        for seq in 0..2u64 {
            DtlsRecord {
                content_type: ContentType::Handshake,
                version: ProtocolVersion::DTLS_1_2,
                epoch: 0,
                sequence_number: seq,
                payload: Bytes::from_static(&[0u8; 4]),
            }
            .encode(&mut buf);
        }
        let mut wire = buf.freeze();
        assert!(DtlsRecord::decode(&mut wire).unwrap().is_some());
        assert!(DtlsRecord::decode(&mut wire).unwrap().is_some());
        assert!(DtlsRecord::decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn truncated_record_yields_none() {
        let record = DtlsRecord {
            content_type: ContentType::Handshake,
            version: ProtocolVersion::DTLS_1_2,
            epoch: 0,
            sequence_number: 0,
            payload: Bytes::from_static(b"abcdef"),
        };
        let mut buf = BytesMut::new();
        record.encode(&mut buf);
        let mut wire = buf.freeze().slice(..RECORD_HEADER_LEN + 3);
        assert!(DtlsRecord::decode(&mut wire).unwrap().is_none());
    }
}
