//! SCTP packet and chunk codec (RFC 4960 subset carried over DTLS).
//!
//! Only the chunk types a data-channel server exchanges are modeled. Each
//! chunk is a tagged variant so the dispatch in the engine is a single
//! exhaustive match.

use anyhow::{Result, bail};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const COMMON_HEADER_LEN: usize = 12;
pub const CHUNK_HEADER_LEN: usize = 4;
/// Upper bound on chunks handled out of one packet.
pub const MAX_CHUNKS_PER_PACKET: usize = 8;
/// Advertised receiver window on INIT-ACK and every SACK.
pub const DEFAULT_WINDOW: u32 = 128 * 1024;

/// DATA chunk flags: single-fragment, unordered message on an unreliable
/// stream (BEGIN | END | UNORDERED).
pub const COMPLETE_UNRELIABLE: u8 = 0x07;

const CT_DATA: u8 = 0;
const CT_INIT: u8 = 1;
const CT_INIT_ACK: u8 = 2;
const CT_SACK: u8 = 3;
const CT_HEARTBEAT: u8 = 4;
const CT_HEARTBEAT_ACK: u8 = 5;
const CT_ABORT: u8 = 6;
const CT_SHUTDOWN: u8 = 7;
const CT_SHUTDOWN_ACK: u8 = 8;
const CT_COOKIE_ECHO: u8 = 10;
const CT_COOKIE_ACK: u8 = 11;
const CT_FORWARD_TSN: u8 = 192;

const PARAM_HEARTBEAT_INFO: u16 = 1;
const PARAM_STATE_COOKIE: u16 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SctpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub verification_tag: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub flags: u8,
    pub tsn: u32,
    pub stream_id: u16,
    pub stream_seq: u16,
    pub ppid: u32,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitChunk {
    pub initiate_tag: u32,
    pub window: u32,
    pub outbound_streams: u16,
    pub inbound_streams: u16,
    pub initial_tsn: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SackChunk {
    pub cumulative_tsn_ack: u32,
    pub window: u32,
    /// Gap-ack blocks as (start, end) offsets from the cumulative TSN.
    pub gap_blocks: Vec<(u16, u16)>,
    pub duplicate_tsns: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SctpChunk {
    Data(DataChunk),
    Init(InitChunk),
    InitAck { init: InitChunk, cookie: Bytes },
    Sack(SackChunk),
    /// Value is the raw heartbeat-info TLV, echoed verbatim by the ack.
    Heartbeat { info: Bytes },
    HeartbeatAck { info: Bytes },
    Abort,
    Shutdown { cumulative_tsn_ack: u32 },
    ShutdownAck,
    CookieEcho { cookie: Bytes },
    CookieAck,
    ForwardTsn { new_cumulative_tsn: u32 },
}

/// Wrap opaque bytes in a heartbeat-info TLV for an outbound HEARTBEAT.
pub fn heartbeat_info(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.put_u16(PARAM_HEARTBEAT_INFO);
    buf.put_u16(4 + data.len() as u16);
    buf.put_slice(data);
    buf.freeze()
}

/// Parse one SCTP packet. Refuses length mismatches and bad CRC32c with no
/// side effect. At most [`MAX_CHUNKS_PER_PACKET`] chunks are returned;
/// chunks of unknown type are skipped.
pub fn parse_packet(data: &[u8]) -> Result<(SctpHeader, Vec<SctpChunk>)> {
    if data.len() < COMMON_HEADER_LEN {
        bail!("sctp packet too short");
    }

    let mut zeroed = data.to_vec();
    zeroed[8..12].fill(0);
    let expected = crc32c::crc32c(&zeroed);
    let embedded = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    if expected != embedded {
        bail!("sctp checksum mismatch");
    }

    let mut buf = Bytes::copy_from_slice(data);
    let header = SctpHeader {
        source_port: buf.get_u16(),
        destination_port: buf.get_u16(),
        verification_tag: buf.get_u32(),
    };
    buf.advance(4); // checksum, already validated

    let mut chunks = Vec::new();
    while buf.remaining() >= CHUNK_HEADER_LEN && chunks.len() < MAX_CHUNKS_PER_PACKET {
        let chunk_type = buf.get_u8();
        let flags = buf.get_u8();
        let length = buf.get_u16() as usize;
        if length < CHUNK_HEADER_LEN || buf.remaining() < length - CHUNK_HEADER_LEN {
            bail!("sctp chunk length mismatch");
        }
        let mut value = buf.split_to(length - CHUNK_HEADER_LEN);
        let padding = (4 - (length % 4)) % 4;
        if buf.remaining() >= padding {
            buf.advance(padding);
        }

        if let Some(chunk) = parse_chunk(chunk_type, flags, &mut value)? {
            chunks.push(chunk);
        }
    }

    Ok((header, chunks))
}

fn parse_chunk(chunk_type: u8, flags: u8, value: &mut Bytes) -> Result<Option<SctpChunk>> {
    let chunk = match chunk_type {
        CT_DATA => {
            if value.remaining() < 12 {
                bail!("data chunk too short");
            }
            SctpChunk::Data(DataChunk {
                flags,
                tsn: value.get_u32(),
                stream_id: value.get_u16(),
                stream_seq: value.get_u16(),
                ppid: value.get_u32(),
                payload: value.split_to(value.remaining()),
            })
        }
        CT_INIT => SctpChunk::Init(parse_init_fields(value)?),
        CT_INIT_ACK => {
            let init = parse_init_fields(value)?;
            let cookie = find_parameter(value, PARAM_STATE_COOKIE).unwrap_or_default();
            SctpChunk::InitAck { init, cookie }
        }
        CT_SACK => {
            if value.remaining() < 12 {
                bail!("sack chunk too short");
            }
            let cumulative_tsn_ack = value.get_u32();
            let window = value.get_u32();
            let num_gaps = value.get_u16() as usize;
            let num_dups = value.get_u16() as usize;
            if value.remaining() < num_gaps * 4 + num_dups * 4 {
                bail!("sack chunk truncated");
            }
            let mut gap_blocks = Vec::with_capacity(num_gaps);
            for _ in 0..num_gaps {
                gap_blocks.push((value.get_u16(), value.get_u16()));
            }
            let mut duplicate_tsns = Vec::with_capacity(num_dups);
            for _ in 0..num_dups {
                duplicate_tsns.push(value.get_u32());
            }
            SctpChunk::Sack(SackChunk {
                cumulative_tsn_ack,
                window,
                gap_blocks,
                duplicate_tsns,
            })
        }
        CT_HEARTBEAT => SctpChunk::Heartbeat {
            info: value.split_to(value.remaining()),
        },
        CT_HEARTBEAT_ACK => SctpChunk::HeartbeatAck {
            info: value.split_to(value.remaining()),
        },
        CT_ABORT => SctpChunk::Abort,
        CT_SHUTDOWN => {
            if value.remaining() < 4 {
                bail!("shutdown chunk too short");
            }
            SctpChunk::Shutdown {
                cumulative_tsn_ack: value.get_u32(),
            }
        }
        CT_SHUTDOWN_ACK => SctpChunk::ShutdownAck,
        CT_COOKIE_ECHO => SctpChunk::CookieEcho {
            cookie: value.split_to(value.remaining()),
        },
        CT_COOKIE_ACK => SctpChunk::CookieAck,
        CT_FORWARD_TSN => {
            if value.remaining() < 4 {
                bail!("forward-tsn chunk too short");
            }
            SctpChunk::ForwardTsn {
                new_cumulative_tsn: value.get_u32(),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(chunk))
}

fn parse_init_fields(value: &mut Bytes) -> Result<InitChunk> {
    if value.remaining() < 16 {
        bail!("init chunk too short");
    }
    Ok(InitChunk {
        initiate_tag: value.get_u32(),
        window: value.get_u32(),
        outbound_streams: value.get_u16(),
        inbound_streams: value.get_u16(),
        initial_tsn: value.get_u32(),
    })
}

fn find_parameter(value: &mut Bytes, wanted: u16) -> Option<Bytes> {
    while value.remaining() >= 4 {
        let typ = value.get_u16();
        let len = value.get_u16() as usize;
        if len < 4 || value.remaining() < len - 4 {
            return None;
        }
        let body = value.split_to(len - 4);
        let padding = (4 - (len % 4)) % 4;
        if value.remaining() >= padding {
            value.advance(padding);
        }
        if typ == wanted {
            return Some(body);
        }
    }
    None
}

/// Serialize a packet: common header, chunks with 4-byte padding that is not
/// counted in the chunk length, CRC32c little-endian in the wire slot.
pub fn serialize_packet(header: &SctpHeader, chunks: &[SctpChunk]) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_u16(header.source_port);
    buf.put_u16(header.destination_port);
    buf.put_u32(header.verification_tag);
    buf.put_u32(0); // checksum slot

    for chunk in chunks {
        serialize_chunk(&mut buf, chunk);
    }

    let checksum = crc32c::crc32c(&buf);
    buf[8..12].copy_from_slice(&checksum.to_le_bytes());
    buf.freeze()
}

fn serialize_chunk(buf: &mut BytesMut, chunk: &SctpChunk) {
    let (chunk_type, flags) = match chunk {
        SctpChunk::Data(data) => (CT_DATA, data.flags),
        SctpChunk::Init(_) => (CT_INIT, 0),
        SctpChunk::InitAck { .. } => (CT_INIT_ACK, 0),
        SctpChunk::Sack(_) => (CT_SACK, 0),
        SctpChunk::Heartbeat { .. } => (CT_HEARTBEAT, 0),
        SctpChunk::HeartbeatAck { .. } => (CT_HEARTBEAT_ACK, 0),
        SctpChunk::Abort => (CT_ABORT, 0),
        SctpChunk::Shutdown { .. } => (CT_SHUTDOWN, 0),
        SctpChunk::ShutdownAck => (CT_SHUTDOWN_ACK, 0),
        SctpChunk::CookieEcho { .. } => (CT_COOKIE_ECHO, 0),
        SctpChunk::CookieAck => (CT_COOKIE_ACK, 0),
        SctpChunk::ForwardTsn { .. } => (CT_FORWARD_TSN, 0),
    };

    let mut value = BytesMut::new();
    match chunk {
        SctpChunk::Data(data) => {
            value.put_u32(data.tsn);
            value.put_u16(data.stream_id);
            value.put_u16(data.stream_seq);
            value.put_u32(data.ppid);
            value.put_slice(&data.payload);
        }
        SctpChunk::Init(init) => put_init_fields(&mut value, init),
        SctpChunk::InitAck { init, cookie } => {
            put_init_fields(&mut value, init);
            value.put_u16(PARAM_STATE_COOKIE);
            value.put_u16(4 + cookie.len() as u16);
            value.put_slice(cookie);
            let pad = (4 - (cookie.len() % 4)) % 4;
            value.put_bytes(0, pad);
        }
        SctpChunk::Sack(sack) => {
            value.put_u32(sack.cumulative_tsn_ack);
            value.put_u32(sack.window);
            value.put_u16(sack.gap_blocks.len() as u16);
            value.put_u16(sack.duplicate_tsns.len() as u16);
            for (start, end) in &sack.gap_blocks {
                value.put_u16(*start);
                value.put_u16(*end);
            }
            for tsn in &sack.duplicate_tsns {
                value.put_u32(*tsn);
            }
        }
        SctpChunk::Heartbeat { info } | SctpChunk::HeartbeatAck { info } => {
            value.put_slice(info);
        }
        SctpChunk::Shutdown { cumulative_tsn_ack } => value.put_u32(*cumulative_tsn_ack),
        SctpChunk::CookieEcho { cookie } => value.put_slice(cookie),
        SctpChunk::ForwardTsn { new_cumulative_tsn } => value.put_u32(*new_cumulative_tsn),
        SctpChunk::Abort | SctpChunk::ShutdownAck | SctpChunk::CookieAck => {}
    }

    let length = CHUNK_HEADER_LEN + value.len();
    buf.put_u8(chunk_type);
    buf.put_u8(flags);
    buf.put_u16(length as u16);
    buf.put_slice(&value);
    let pad = (4 - (length % 4)) % 4;
    buf.put_bytes(0, pad);
}

fn put_init_fields(value: &mut BytesMut, init: &InitChunk) {
    value.put_u32(init.initiate_tag);
    value.put_u32(init.window);
    value.put_u16(init.outbound_streams);
    value.put_u16(init.inbound_streams);
    value.put_u32(init.initial_tsn);
}
