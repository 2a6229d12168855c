//! STUN binding codec for ICE connectivity checks (RFC 5389 subset).
//!
//! The server only ever answers binding requests, so the codec understands
//! exactly two shapes: an inbound binding request carrying a USERNAME (and
//! usually MESSAGE-INTEGRITY + FINGERPRINT), and the binding success it
//! produces, carrying XOR-MAPPED-ADDRESS + MESSAGE-INTEGRITY + FINGERPRINT.

use anyhow::{Result, bail};
use crc32fast::Hasher;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::net::SocketAddrV4;

pub const MAGIC_COOKIE: u32 = 0x2112_A442;
const FINGERPRINT_XOR: u32 = 0x5354_554E;
const HEADER_LEN: usize = 20;

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;

const ATTR_USERNAME: u16 = 0x0006;
const ATTR_MESSAGE_INTEGRITY: u16 = 0x0008;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const ATTR_FINGERPRINT: u16 = 0x8028;

type HmacSha1 = Hmac<Sha1>;

/// Decoded binding request. The USERNAME is split on the first colon into
/// `<server-ufrag>:<remote-ufrag>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRequest {
    pub transaction_id: [u8; 12],
    pub server_ufrag: String,
    pub remote_ufrag: String,
    pub has_integrity: bool,
}

/// Decoded binding success, for symmetry with the serializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSuccess {
    pub transaction_id: [u8; 12],
    pub mapped_address: SocketAddrV4,
}

pub fn parse_binding_request(data: &[u8]) -> Result<BindingRequest> {
    let (msg_type, transaction_id) = parse_header(data)?;
    if msg_type != BINDING_REQUEST {
        bail!("not a binding request");
    }

    let mut username = None;
    let mut has_integrity = false;
    for (typ, value) in attributes(data) {
        match typ {
            ATTR_USERNAME => {
                let text = std::str::from_utf8(value)?;
                let (server, remote) = text
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("username without colon"))?;
                username = Some((server.to_string(), remote.to_string()));
            }
            ATTR_MESSAGE_INTEGRITY => has_integrity = true,
            ATTR_FINGERPRINT => {
                if value.len() != 4 {
                    bail!("bad fingerprint attribute");
                }
                // FINGERPRINT covers the message up to and including itself.
            }
            _ => {}
        }
    }

    let (server_ufrag, remote_ufrag) =
        username.ok_or_else(|| anyhow::anyhow!("binding request without username"))?;

    Ok(BindingRequest {
        transaction_id,
        server_ufrag,
        remote_ufrag,
        has_integrity,
    })
}

pub fn parse_binding_success(data: &[u8]) -> Result<BindingSuccess> {
    let (msg_type, transaction_id) = parse_header(data)?;
    if msg_type != BINDING_SUCCESS {
        bail!("not a binding success");
    }

    for (typ, value) in attributes(data) {
        if typ == ATTR_XOR_MAPPED_ADDRESS {
            let mapped_address = parse_xor_address(value)?;
            return Ok(BindingSuccess {
                transaction_id,
                mapped_address,
            });
        }
    }
    bail!("binding success without xor-mapped-address");
}

/// Serialize a binding success mirroring `transaction_id`, reporting
/// `mapped` as the reflexive address and signing with `password`.
pub fn serialize_binding_success(
    transaction_id: [u8; 12],
    mapped: SocketAddrV4,
    password: &[u8],
) -> Vec<u8> {
    let mut buffer = header(BINDING_SUCCESS, transaction_id);
    append_xor_address(&mut buffer, mapped);
    append_integrity_and_fingerprint(&mut buffer, password);
    buffer
}

/// Serialize a binding request; used by connectivity-check tooling and
/// round-trip tests.
pub fn serialize_binding_request(
    transaction_id: [u8; 12],
    server_ufrag: &str,
    remote_ufrag: &str,
    password: &[u8],
) -> Vec<u8> {
    let mut buffer = header(BINDING_REQUEST, transaction_id);
    let username = format!("{}:{}", server_ufrag, remote_ufrag);
    append_attribute(&mut buffer, ATTR_USERNAME, username.as_bytes());
    append_integrity_and_fingerprint(&mut buffer, password);
    buffer
}

/// Recompute MESSAGE-INTEGRITY over `data` and compare. Per RFC 5389 the
/// length field is adjusted to cover the message up to and including the
/// integrity attribute before hashing.
pub fn verify_integrity(data: &[u8], key: &[u8]) -> bool {
    if parse_header(data).is_err() {
        return false;
    }
    let mut offset = HEADER_LEN;
    while offset + 4 <= data.len() {
        let typ = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        if offset + 4 + len > data.len() {
            return false;
        }
        if typ == ATTR_MESSAGE_INTEGRITY {
            if len != 20 {
                return false;
            }
            let mut message = data[..offset].to_vec();
            let covered = offset - HEADER_LEN + 24;
            message[2..4].copy_from_slice(&(covered as u16).to_be_bytes());
            let expected = hmac_sha1(key, &message);
            return expected[..] == data[offset + 4..offset + 4 + 20];
        }
        offset += 4 + len;
        offset += (4 - (len % 4)) % 4;
    }
    false
}

fn header(msg_type: u16, transaction_id: [u8; 12]) -> Vec<u8> {
    let mut buffer = vec![0u8; HEADER_LEN];
    buffer[0..2].copy_from_slice(&msg_type.to_be_bytes());
    buffer[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    buffer[8..20].copy_from_slice(&transaction_id);
    buffer
}

fn parse_header(data: &[u8]) -> Result<(u16, [u8; 12])> {
    if data.len() < HEADER_LEN {
        bail!("stun message too short");
    }
    let msg_type = u16::from_be_bytes([data[0], data[1]]);
    let length = u16::from_be_bytes([data[2], data[3]]) as usize;
    if length + HEADER_LEN != data.len() {
        bail!("stun length mismatch");
    }
    let cookie = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if cookie != MAGIC_COOKIE {
        bail!("missing magic cookie");
    }
    let mut transaction_id = [0u8; 12];
    transaction_id.copy_from_slice(&data[8..20]);
    Ok((msg_type, transaction_id))
}

fn attributes(data: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    let mut offset = HEADER_LEN;
    std::iter::from_fn(move || {
        while offset + 4 <= data.len() {
            let typ = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            if offset + 4 + len > data.len() {
                return None;
            }
            let value = &data[offset + 4..offset + 4 + len];
            offset += 4 + len;
            offset += (4 - (len % 4)) % 4;
            return Some((typ, value));
        }
        None
    })
}

fn append_attribute(buffer: &mut Vec<u8>, typ: u16, value: &[u8]) {
    buffer.extend_from_slice(&typ.to_be_bytes());
    buffer.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buffer.extend_from_slice(value);
    let pad = (4 - (buffer.len() % 4)) % 4;
    buffer.extend(std::iter::repeat_n(0, pad));
    let len = buffer.len() - HEADER_LEN;
    update_length(buffer, len);
}

fn append_xor_address(buffer: &mut Vec<u8>, addr: SocketAddrV4) {
    let mut value = [0u8; 8];
    value[1] = 0x01; // IPv4
    let port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
    value[2..4].copy_from_slice(&port.to_be_bytes());
    let host = u32::from(*addr.ip()) ^ MAGIC_COOKIE;
    value[4..8].copy_from_slice(&host.to_be_bytes());
    append_attribute(buffer, ATTR_XOR_MAPPED_ADDRESS, &value);
}

fn parse_xor_address(value: &[u8]) -> Result<SocketAddrV4> {
    if value.len() < 8 || value[1] != 0x01 {
        bail!("unsupported address family");
    }
    let port = u16::from_be_bytes([value[2], value[3]]) ^ (MAGIC_COOKIE >> 16) as u16;
    let host = u32::from_be_bytes([value[4], value[5], value[6], value[7]]) ^ MAGIC_COOKIE;
    Ok(SocketAddrV4::new(host.into(), port))
}

fn append_integrity_and_fingerprint(buffer: &mut Vec<u8>, password: &[u8]) {
    // The length field provisionally includes the 24-byte integrity
    // attribute while hashing, but not the fingerprint that follows.
    let len = buffer.len() - HEADER_LEN + 24;
    update_length(buffer, len);
    let mac = hmac_sha1(password, buffer);
    append_attribute(buffer, ATTR_MESSAGE_INTEGRITY, &mac);

    let len = buffer.len() - HEADER_LEN + 8;
    update_length(buffer, len);
    let crc = crc32(buffer) ^ FINGERPRINT_XOR;
    append_attribute(buffer, ATTR_FINGERPRINT, &crc.to_be_bytes());
}

fn update_length(buffer: &mut [u8], length: usize) {
    buffer[2..4].copy_from_slice(&(length as u16).to_be_bytes());
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn hmac_sha1_check_value() {
        let expected = [
            0xde, 0x7c, 0x9b, 0x85, 0xb8, 0xb7, 0x8a, 0xa6, 0xbc, 0x8a, 0x7a, 0x36, 0xf7, 0x0a,
            0x90, 0x70, 0x1c, 0x9d, 0xb4, 0xd9,
        ];
        assert_eq!(
            hmac_sha1(b"key", b"The quick brown fox jumps over the lazy dog"),
            expected
        );
    }

    #[test]
    fn binding_request_round_trip() {
        let txid = [7u8; 12];
        let raw = serialize_binding_request(txid, "srv1", "abcd", b"secretsecretsecret");
        let parsed = parse_binding_request(&raw).unwrap();
        assert_eq!(parsed.transaction_id, txid);
        assert_eq!(parsed.server_ufrag, "srv1");
        assert_eq!(parsed.remote_ufrag, "abcd");
        assert!(parsed.has_integrity);
        assert!(verify_integrity(&raw, b"secretsecretsecret"));
        assert!(!verify_integrity(&raw, b"wrong password"));
    }

    #[test]
    fn binding_success_round_trip() {
        let txid = [3u8; 12];
        let mapped = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 50), 51234);
        let raw = serialize_binding_success(txid, mapped, b"0123456789abcdefghijklmn");
        let parsed = parse_binding_success(&raw).unwrap();
        assert_eq!(parsed.transaction_id, txid);
        assert_eq!(parsed.mapped_address, mapped);
        assert!(verify_integrity(&raw, b"0123456789abcdefghijklmn"));
    }

    #[test]
    fn rejects_length_mismatch() {
        let raw = serialize_binding_request([0u8; 12], "a", "b", b"pw");
        assert!(parse_binding_request(&raw[..raw.len() - 1]).is_err());
    }

    #[test]
    fn rejects_missing_cookie() {
        let mut raw = serialize_binding_request([0u8; 12], "a", "b", b"pw");
        raw[4] ^= 0xFF;
        assert!(parse_binding_request(&raw).is_err());
    }
}
