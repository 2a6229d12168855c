//! DTLS 1.2 handshake message codecs, limited to what a passive server
//! exchanges: ClientHello / ClientKeyExchange / Finished are decoded,
//! ServerHello / Certificate / ServerKeyExchange / ServerHelloDone /
//! Finished are encoded.

use anyhow::{Result, bail};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::record::ProtocolVersion;

pub const HANDSHAKE_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeType {
    HelloRequest,
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
}

impl HandshakeType {
    fn wire(self) -> u8 {
        match self {
            HandshakeType::HelloRequest => 0,
            HandshakeType::ClientHello => 1,
            HandshakeType::ServerHello => 2,
            HandshakeType::HelloVerifyRequest => 3,
            HandshakeType::Certificate => 11,
            HandshakeType::ServerKeyExchange => 12,
            HandshakeType::CertificateRequest => 13,
            HandshakeType::ServerHelloDone => 14,
            HandshakeType::CertificateVerify => 15,
            HandshakeType::ClientKeyExchange => 16,
            HandshakeType::Finished => 20,
        }
    }
}

impl TryFrom<u8> for HandshakeType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(HandshakeType::HelloRequest),
            1 => Ok(HandshakeType::ClientHello),
            2 => Ok(HandshakeType::ServerHello),
            3 => Ok(HandshakeType::HelloVerifyRequest),
            11 => Ok(HandshakeType::Certificate),
            12 => Ok(HandshakeType::ServerKeyExchange),
            13 => Ok(HandshakeType::CertificateRequest),
            14 => Ok(HandshakeType::ServerHelloDone),
            15 => Ok(HandshakeType::CertificateVerify),
            16 => Ok(HandshakeType::ClientKeyExchange),
            20 => Ok(HandshakeType::Finished),
            other => bail!("unknown handshake type {}", other),
        }
    }
}

/// A handshake message with its fragmentation header. For unfragmented
/// messages `fragment_length == total_length` and `fragment_offset == 0`.
#[derive(Debug, Clone)]
pub struct HandshakeMessage {
    pub msg_type: HandshakeType,
    pub total_length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
    pub body: Bytes,
}

impl HandshakeMessage {
    /// Build an unfragmented message.
    pub fn unfragmented(msg_type: HandshakeType, message_seq: u16, body: Bytes) -> Self {
        let len = body.len() as u32;
        Self {
            msg_type,
            total_length: len,
            message_seq,
            fragment_offset: 0,
            fragment_length: len,
            body,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.msg_type.wire());
        buf.put_uint(self.total_length as u64, 3);
        buf.put_u16(self.message_seq);
        buf.put_uint(self.fragment_offset as u64, 3);
        buf.put_uint(self.fragment_length as u64, 3);
        buf.put_slice(&self.body);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Option<Self>> {
        if buf.remaining() < HANDSHAKE_HEADER_LEN {
            return Ok(None);
        }
        let msg_type = HandshakeType::try_from(buf[0])?;
        let total_length = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]);
        let message_seq = u16::from_be_bytes([buf[4], buf[5]]);
        let fragment_offset = u32::from_be_bytes([0, buf[6], buf[7], buf[8]]);
        let fragment_length = u32::from_be_bytes([0, buf[9], buf[10], buf[11]]);
        if buf.remaining() < HANDSHAKE_HEADER_LEN + fragment_length as usize {
            return Ok(None);
        }
        buf.advance(HANDSHAKE_HEADER_LEN);
        let body = buf.split_to(fragment_length as usize);
        Ok(Some(Self {
            msg_type,
            total_length,
            message_seq,
            fragment_offset,
            fragment_length,
            body,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct ClientHello {
    pub version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cookie: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub extensions: Bytes,
}

impl ClientHello {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 34 {
            bail!("client hello too short");
        }
        let version = ProtocolVersion {
            major: buf.get_u8(),
            minor: buf.get_u8(),
        };
        let mut random = [0u8; 32];
        buf.copy_to_slice(&mut random);

        let session_id = take_vec8(buf, "session id")?;
        let cookie = take_vec8(buf, "cookie")?;

        if buf.remaining() < 2 {
            bail!("client hello missing cipher suites");
        }
        let suites_len = buf.get_u16() as usize;
        if buf.remaining() < suites_len {
            bail!("client hello cipher suites truncated");
        }
        let mut suites_buf = buf.split_to(suites_len);
        let mut cipher_suites = Vec::with_capacity(suites_len / 2);
        while suites_buf.remaining() >= 2 {
            cipher_suites.push(suites_buf.get_u16());
        }

        let _compression = take_vec8(buf, "compression methods")?;

        let extensions = if buf.remaining() >= 2 {
            let ext_len = buf.get_u16() as usize;
            if buf.remaining() < ext_len {
                bail!("client hello extensions truncated");
            }
            buf.split_to(ext_len)
        } else {
            Bytes::new()
        };

        Ok(Self {
            version,
            random,
            session_id,
            cookie,
            cipher_suites,
            extensions,
        })
    }

    /// Walk the extension list and report whether extended-master-secret
    /// (type 23) was offered.
    pub fn offers_extended_master_secret(&self) -> bool {
        let mut buf = self.extensions.clone();
        while buf.remaining() >= 4 {
            let typ = buf.get_u16();
            let len = buf.get_u16() as usize;
            if buf.remaining() < len {
                return false;
            }
            if typ == 23 {
                return true;
            }
            buf.advance(len);
        }
        false
    }
}

fn take_vec8(buf: &mut Bytes, what: &str) -> Result<Vec<u8>> {
    if buf.remaining() < 1 {
        bail!("client hello missing {}", what);
    }
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        bail!("client hello {} truncated", what);
    }
    Ok(buf.split_to(len).to_vec())
}

#[derive(Debug, Clone)]
pub struct ServerHello {
    pub version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub extensions: Vec<u8>,
}

impl ServerHello {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version.major);
        buf.put_u8(self.version.minor);
        buf.put_slice(&self.random);
        buf.put_u8(self.session_id.len() as u8);
        buf.put_slice(&self.session_id);
        buf.put_u16(self.cipher_suite);
        buf.put_u8(0); // null compression
        if !self.extensions.is_empty() {
            buf.put_u16(self.extensions.len() as u16);
            buf.put_slice(&self.extensions);
        }
    }
}

#[derive(Debug, Clone)]
pub struct CertificateMessage {
    pub certificates: Vec<Vec<u8>>,
}

impl CertificateMessage {
    pub fn encode(&self, buf: &mut BytesMut) {
        let total: usize = self.certificates.iter().map(|c| 3 + c.len()).sum();
        buf.put_uint(total as u64, 3);
        for cert in &self.certificates {
            buf.put_uint(cert.len() as u64, 3);
            buf.put_slice(cert);
        }
    }
}

/// ECDHE parameters signed with the certificate key. Hardwired to the named
/// curve secp256r1 and SHA-256/ECDSA, the only suite this server offers.
#[derive(Debug, Clone)]
pub struct ServerKeyExchange {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl ServerKeyExchange {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(3); // curve_type: named_curve
        buf.put_u16(23); // secp256r1
        buf.put_u8(self.public_key.len() as u8);
        buf.put_slice(&self.public_key);
        buf.put_u8(4); // hash: sha256
        buf.put_u8(3); // signature: ecdsa
        buf.put_u16(self.signature.len() as u16);
        buf.put_slice(&self.signature);
    }

    /// The portion covered by the signature, without the signature itself.
    pub fn signed_params(client_random: &[u8], server_random: &[u8], public_key: &[u8]) -> Vec<u8> {
        let mut params = Vec::with_capacity(64 + 4 + public_key.len());
        params.extend_from_slice(client_random);
        params.extend_from_slice(server_random);
        params.push(3);
        params.extend_from_slice(&23u16.to_be_bytes());
        params.push(public_key.len() as u8);
        params.extend_from_slice(public_key);
        params
    }
}

#[derive(Debug, Clone)]
pub struct ClientKeyExchange {
    pub public_key: Vec<u8>,
}

impl ClientKeyExchange {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 1 {
            bail!("client key exchange too short");
        }
        let len = buf.get_u8() as usize;
        if buf.remaining() < len {
            bail!("client key exchange truncated");
        }
        Ok(Self {
            public_key: buf.split_to(len).to_vec(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.verify_data);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let verify_data = buf.split_to(buf.remaining()).to_vec();
        Ok(Self { verify_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_message_round_trip() {
        let msg = HandshakeMessage::unfragmented(
            HandshakeType::Finished,
            7,
            Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
        );
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);

        let mut wire = buf.freeze();
        let decoded = HandshakeMessage::decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded.msg_type, msg.msg_type);
        assert_eq!(decoded.message_seq, 7);
        assert_eq!(decoded.total_length, 12);
        assert_eq!(decoded.fragment_length, 12);
        assert_eq!(decoded.body, msg.body);
    }

    #[test]
    fn client_hello_decode() {
        // Version + random + empty session/cookie + one suite + null
        // compression + empty extensions.
        let mut raw = BytesMut::new();
        raw.put_u8(254);
        raw.put_u8(253);
        raw.put_slice(&[0xAA; 32]);
        raw.put_u8(0); // session id
        raw.put_u8(0); // cookie
        raw.put_u16(2);
        raw.put_u16(0xC02B);
        raw.put_u8(1);
        raw.put_u8(0);
        raw.put_u16(4);
        raw.put_u16(23); // extended master secret
        raw.put_u16(0);

        let mut wire = raw.freeze();
        let hello = ClientHello::decode(&mut wire).unwrap();
        assert_eq!(hello.version, ProtocolVersion::DTLS_1_2);
        assert_eq!(hello.random, [0xAA; 32]);
        assert_eq!(hello.cipher_suites, vec![0xC02B]);
        assert!(hello.offers_extended_master_secret());
    }

    #[test]
    fn server_hello_encoded_length() {
        let hello = ServerHello {
            version: ProtocolVersion::DTLS_1_2,
            random: [0u8; 32],
            session_id: vec![1, 2, 3, 4],
            cipher_suite: 0xC02B,
            extensions: Vec::new(),
        };
        let mut buf = BytesMut::new();
        hello.encode(&mut buf);
        // version 2 + random 32 + sid len 1 + sid 4 + suite 2 + compression 1
        assert_eq!(buf.len(), 42);
    }

    #[test]
    fn signed_params_layout() {
        let params = ServerKeyExchange::signed_params(&[1u8; 32], &[2u8; 32], &[4u8; 65]);
        assert_eq!(params.len(), 32 + 32 + 4 + 65);
        assert_eq!(params[64], 3);
        assert_eq!(&params[65..67], &23u16.to_be_bytes());
        assert_eq!(params[67], 65);
    }
}
