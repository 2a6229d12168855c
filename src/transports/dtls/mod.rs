//! DTLS 1.2 server terminator, sans-IO.
//!
//! One [`DtlsContext`] per server carries the self-signed certificate, its
//! P-256 key and the SHA-256 fingerprint advertised in SDP answers. One
//! [`DtlsSession`] per peer runs the passive handshake as a feed/drain state
//! machine: the dispatcher pushes raw datagrams in with [`DtlsSession::feed`],
//! drains ciphertext for the socket with [`DtlsSession::take_outgoing`] and,
//! once the handshake is done, moves SCTP bytes through
//! [`DtlsSession::read_plaintext`] / [`DtlsSession::write_app`].
//!
//! The only suite offered is TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256. Every
//! session gets a fresh ephemeral ECDH key and a fresh session id (no
//! resumption). No client certificate is requested; trust comes from the
//! SDP fingerprint exchange.

pub mod handshake;
pub mod record;

use aes_gcm::{
    Aes128Gcm, Nonce, Tag,
    aead::{AeadInPlace, KeyInit},
};
use anyhow::{Context, Result, anyhow, bail};
use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use p256::ecdsa::{SigningKey, signature::RandomizedSigner};
use p256::pkcs8::DecodePrivateKey;
use p256::{PublicKey, ecdh::EphemeralSecret, elliptic_curve::sec1::ToEncodedPoint};
use rand_core::{OsRng, RngCore};
use rcgen::generate_simple_self_signed;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use self::handshake::{
    CertificateMessage, ClientHello, ClientKeyExchange, Finished, HandshakeMessage, HandshakeType,
    ServerHello, ServerKeyExchange,
};
use self::record::{ContentType, DtlsRecord, ProtocolVersion};

const CIPHER_SUITE_ECDHE_ECDSA_AES128_GCM_SHA256: u16 = 0xC02B;

const AEAD_EXPLICIT_NONCE_LEN: usize = 8;
const AEAD_TAG_LEN: usize = 16;

/// Process-wide certificate material shared by every peer session.
pub struct DtlsContext {
    certificate_der: Vec<u8>,
    signing_key: Arc<SigningKey>,
    fingerprint: String,
}

impl DtlsContext {
    pub fn new() -> Result<Self> {
        let cert = generate_simple_self_signed(vec!["datachan".to_string()])?;
        let key_pem = cert.signing_key.serialize_pem();
        let signing_key = SigningKey::from_pkcs8_pem(&key_pem)
            .map_err(|e| anyhow!("certificate key unusable for ecdsa: {}", e))?;
        let certificate_der = cert.cert.der().to_vec();
        let fingerprint = fingerprint(&certificate_der);

        Ok(Self {
            certificate_der,
            signing_key: Arc::new(signing_key),
            fingerprint,
        })
    }

    /// Colon-separated uppercase SHA-256 digest of the certificate, as it
    /// appears in `a=fingerprint:sha-256`.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn fingerprint(certificate_der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(certificate_der);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<String>>()
        .join(":")
}

#[derive(Clone, PartialEq, Eq)]
pub(crate) struct SessionKeys {
    pub client_write_key: Vec<u8>,
    pub server_write_key: Vec<u8>,
    pub client_write_iv: Vec<u8>,
    pub server_write_iv: Vec<u8>,
    pub master_secret: Vec<u8>,
}

impl SessionKeys {
    /// Carve the write keys and IVs off the front of a key-expansion block,
    /// client material before server material.
    fn from_key_block(master_secret: &[u8], block: Vec<u8>) -> Self {
        let mut block = Bytes::from(block);
        let mut take = move |n: usize| block.split_to(n).to_vec();
        Self {
            client_write_key: take(16),
            server_write_key: take(16),
            client_write_iv: take(4),
            server_write_iv: take(4),
            master_secret: master_secret.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Handshaking,
    Established,
    Failed,
    Closed,
}

pub struct DtlsSession {
    ctx: Arc<DtlsContext>,
    state: SessionState,
    out: VecDeque<Bytes>,
    plaintext: VecDeque<Bytes>,

    // Record bookkeeping. `record_seq` restarts at the epoch bump.
    epoch: u16,
    record_seq: u64,

    // Handshake context, dropped piecewise as the handshake completes.
    message_seq: u16,
    recv_message_seq: u16,
    local_secret: Option<EphemeralSecret>,
    local_public: Vec<u8>,
    client_random: Option<[u8; 32]>,
    server_random: Option<[u8; 32]>,
    transcript: Vec<u8>,
    ems: bool,
    keys: Option<SessionKeys>,
    last_flight: Option<Bytes>,
    reassembly: BytesMut,
    reassembly_seq: u16,
}

impl DtlsSession {
    pub fn new(ctx: Arc<DtlsContext>) -> Self {
        let local_secret = EphemeralSecret::random(&mut OsRng);
        let local_public = local_secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();

        Self {
            ctx,
            state: SessionState::Handshaking,
            out: VecDeque::new(),
            plaintext: VecDeque::new(),
            epoch: 0,
            record_seq: 0,
            message_seq: 0,
            recv_message_seq: 0,
            local_secret: Some(local_secret),
            local_public,
            client_random: None,
            server_random: None,
            transcript: Vec::new(),
            ems: false,
            keys: None,
            last_flight: None,
            reassembly: BytesMut::new(),
            reassembly_seq: 0,
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Ingest one UDP datagram worth of ciphertext. Protocol faults are
    /// logged and swallowed; a malformed datagram never kills the session.
    pub fn feed(&mut self, datagram: &[u8]) {
        if matches!(self.state, SessionState::Failed | SessionState::Closed) {
            return;
        }
        let mut data = Bytes::copy_from_slice(datagram);
        while !data.is_empty() {
            match DtlsRecord::decode(&mut data) {
                Ok(Some(rec)) => {
                    if let Err(e) = self.handle_record(rec) {
                        warn!("dtls record dropped: {}", e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    trace!("undecodable dtls record: {}", e);
                    break;
                }
            }
        }
    }

    /// Next ciphertext datagram bound for the UDP socket, if any.
    pub fn take_outgoing(&mut self) -> Option<Bytes> {
        self.out.pop_front()
    }

    /// Next decrypted application record, once established.
    pub fn read_plaintext(&mut self) -> Option<Bytes> {
        self.plaintext.pop_front()
    }

    /// Encrypt one application record.
    pub fn write_app(&mut self, data: &[u8]) -> Result<()> {
        if self.state != SessionState::Established {
            bail!("dtls session not established");
        }
        let keys = self.keys.as_ref().context("session keys missing")?;
        let record = DtlsRecord {
            content_type: ContentType::ApplicationData,
            version: ProtocolVersion::DTLS_1_2,
            epoch: self.epoch,
            sequence_number: self.record_seq,
            payload: Bytes::copy_from_slice(data),
        };
        let sealed = seal_record(&record, &keys.server_write_key, &keys.server_write_iv)?;
        let mut buf = BytesMut::new();
        sealed.encode(&mut buf);
        self.record_seq += 1;
        self.out.push_back(buf.freeze());
        Ok(())
    }

    fn handle_record(&mut self, rec: DtlsRecord) -> Result<()> {
        let payload = if rec.epoch == 0 {
            rec.payload.clone()
        } else {
            self.decrypt_inbound(&rec)?
        };

        match rec.content_type {
            ContentType::ChangeCipherSpec => {
                trace!("change cipher spec from client");
            }
            ContentType::Alert => {
                if payload.len() >= 2 && payload[1] == 0 {
                    debug!("close_notify from client");
                    self.state = SessionState::Closed;
                }
            }
            ContentType::ApplicationData => {
                if self.state == SessionState::Established {
                    self.plaintext.push_back(payload);
                }
            }
            ContentType::Handshake => self.handle_handshake_payload(payload)?,
        }
        Ok(())
    }

    fn decrypt_inbound(&self, rec: &DtlsRecord) -> Result<Bytes> {
        let keys = self
            .keys
            .as_ref()
            .context("encrypted record before key derivation")?;
        open_record(rec, &keys.client_write_key, &keys.client_write_iv)
    }

    fn handle_handshake_payload(&mut self, mut body: Bytes) -> Result<()> {
        while !body.is_empty() {
            let before = body.clone();
            let Some(msg) = HandshakeMessage::decode(&mut body)? else {
                break;
            };
            let consumed = before.len() - body.len();
            let raw = before.slice(..consumed);

            if msg.message_seq < self.recv_message_seq {
                // The only interesting duplicate: a retransmitted
                // ClientHello means our flight was lost.
                if msg.msg_type == HandshakeType::ClientHello {
                    self.retransmit_flight();
                }
                continue;
            }
            if msg.message_seq > self.recv_message_seq {
                debug!(
                    "out-of-order handshake message: got {}, expected {}",
                    msg.message_seq, self.recv_message_seq
                );
                continue;
            }

            let (msg, raw) = if msg.total_length != msg.fragment_length {
                match self.reassemble(msg)? {
                    Some(complete) => complete,
                    None => continue,
                }
            } else {
                (msg, raw)
            };

            self.recv_message_seq += 1;
            if msg.msg_type != HandshakeType::Finished {
                self.transcript.extend_from_slice(&raw);
            }

            match msg.msg_type {
                HandshakeType::ClientHello => self.on_client_hello(&msg)?,
                HandshakeType::ClientKeyExchange => self.on_client_key_exchange(&msg)?,
                HandshakeType::Finished => self.on_finished(&msg, &raw)?,
                other => trace!("ignoring handshake message {:?}", other),
            }
        }
        Ok(())
    }

    fn reassemble(&mut self, msg: HandshakeMessage) -> Result<Option<(HandshakeMessage, Bytes)>> {
        if self.reassembly_seq != msg.message_seq || msg.fragment_offset == 0 {
            self.reassembly.clear();
            self.reassembly_seq = msg.message_seq;
        }
        self.reassembly.extend_from_slice(&msg.body);
        if (self.reassembly.len() as u32) < msg.total_length {
            return Ok(None);
        }

        let complete =
            HandshakeMessage::unfragmented(msg.msg_type, msg.message_seq, self.reassembly.split().freeze());
        let mut raw = BytesMut::new();
        complete.encode(&mut raw);
        Ok(Some((complete, raw.freeze())))
    }

    fn on_client_hello(&mut self, msg: &HandshakeMessage) -> Result<()> {
        let mut body = msg.body.clone();
        let hello = ClientHello::decode(&mut body)?;
        if hello.version.major != ProtocolVersion::DTLS_1_2.major {
            bail!("not a dtls hello");
        }
        if !hello
            .cipher_suites
            .contains(&CIPHER_SUITE_ECDHE_ECDSA_AES128_GCM_SHA256)
        {
            self.state = SessionState::Failed;
            bail!("client offers no common cipher suite");
        }

        self.client_random = Some(hello.random);
        self.ems = hello.offers_extended_master_secret();

        let mut server_random = [0u8; 32];
        OsRng.fill_bytes(&mut server_random);
        self.server_random = Some(server_random);

        let mut extensions = Vec::new();
        // Renegotiation info, empty.
        extensions.extend_from_slice(&[0xFF, 0x01, 0x00, 0x01, 0x00]);
        // EC point formats: uncompressed.
        extensions.extend_from_slice(&[0x00, 0x0B, 0x00, 0x02, 0x01, 0x00]);
        if self.ems {
            extensions.extend_from_slice(&[0x00, 0x17, 0x00, 0x00]);
        }

        // A fresh session id every time keeps resumption off the table.
        let mut session_id = vec![0u8; 32];
        OsRng.fill_bytes(&mut session_id);

        let mut flight = BytesMut::new();

        let mut body = BytesMut::new();
        ServerHello {
            version: ProtocolVersion::DTLS_1_2,
            random: server_random,
            session_id,
            cipher_suite: CIPHER_SUITE_ECDHE_ECDSA_AES128_GCM_SHA256,
            extensions,
        }
        .encode(&mut body);
        self.queue_handshake(HandshakeType::ServerHello, body.freeze(), &mut flight);

        let mut body = BytesMut::new();
        CertificateMessage {
            certificates: vec![self.ctx.certificate_der.clone()],
        }
        .encode(&mut body);
        self.queue_handshake(HandshakeType::Certificate, body.freeze(), &mut flight);

        let params = ServerKeyExchange::signed_params(
            &hello.random,
            &server_random,
            &self.local_public,
        );
        let signature: p256::ecdsa::Signature =
            self.ctx.signing_key.sign_with_rng(&mut OsRng, &params);
        let mut body = BytesMut::new();
        ServerKeyExchange {
            public_key: self.local_public.clone(),
            signature: signature.to_der().as_bytes().to_vec(),
        }
        .encode(&mut body);
        self.queue_handshake(HandshakeType::ServerKeyExchange, body.freeze(), &mut flight);

        self.queue_handshake(HandshakeType::ServerHelloDone, Bytes::new(), &mut flight);

        let flight = flight.freeze();
        self.last_flight = Some(flight.clone());
        self.out.push_back(flight);
        debug!("server hello flight queued");
        Ok(())
    }

    /// Encode a plaintext (epoch 0) handshake record into `flight` and feed
    /// the transcript.
    fn queue_handshake(&mut self, msg_type: HandshakeType, body: Bytes, flight: &mut BytesMut) {
        let msg = HandshakeMessage::unfragmented(msg_type, self.message_seq, body);
        self.message_seq += 1;

        let mut encoded = BytesMut::new();
        msg.encode(&mut encoded);
        self.transcript.extend_from_slice(&encoded);

        DtlsRecord {
            content_type: ContentType::Handshake,
            version: ProtocolVersion::DTLS_1_2,
            epoch: 0,
            sequence_number: self.record_seq,
            payload: encoded.freeze(),
        }
        .encode(flight);
        self.record_seq += 1;
    }

    fn on_client_key_exchange(&mut self, msg: &HandshakeMessage) -> Result<()> {
        if self.keys.is_some() {
            return Ok(());
        }
        let mut body = msg.body.clone();
        let cke = ClientKeyExchange::decode(&mut body)?;
        let peer_key = PublicKey::from_sec1_bytes(&cke.public_key)
            .map_err(|_| anyhow!("bad client ecdh public key"))?;
        let secret = self
            .local_secret
            .as_ref()
            .context("ephemeral key already consumed")?;
        let shared = secret.diffie_hellman(&peer_key);
        let pre_master_secret = shared.raw_secret_bytes();

        let client_random = self.client_random.context("client random missing")?;
        let server_random = self.server_random.context("server random missing")?;

        let master_secret = if self.ems {
            let session_hash = Sha256::digest(&self.transcript);
            prf_sha256(
                pre_master_secret.as_slice(),
                b"extended master secret",
                &session_hash,
                48,
            )?
        } else {
            let seed = [client_random.as_slice(), server_random.as_slice()].concat();
            prf_sha256(pre_master_secret.as_slice(), b"master secret", &seed, 48)?
        };

        self.keys = Some(expand_keys(&master_secret, &client_random, &server_random)?);
        trace!("session keys derived");
        Ok(())
    }

    fn on_finished(&mut self, msg: &HandshakeMessage, raw: &[u8]) -> Result<()> {
        let mut body = msg.body.clone();
        let finished = Finished::decode(&mut body)?;
        let master_secret = self
            .keys
            .as_ref()
            .context("finished before key derivation")?
            .master_secret
            .clone();

        let expected = verify_data(&master_secret, b"client finished", &self.transcript)?;
        if finished.verify_data != expected {
            self.state = SessionState::Failed;
            bail!("finished verification failed");
        }
        self.transcript.extend_from_slice(raw);

        let mut flight = BytesMut::new();
        DtlsRecord {
            content_type: ContentType::ChangeCipherSpec,
            version: ProtocolVersion::DTLS_1_2,
            epoch: 0,
            sequence_number: self.record_seq,
            payload: Bytes::from_static(&[1]),
        }
        .encode(&mut flight);

        self.epoch += 1;
        self.record_seq = 0;

        let server_verify = verify_data(&master_secret, b"server finished", &self.transcript)?;
        let finished_msg = HandshakeMessage::unfragmented(
            HandshakeType::Finished,
            self.message_seq,
            {
                let mut body = BytesMut::new();
                Finished {
                    verify_data: server_verify,
                }
                .encode(&mut body);
                body.freeze()
            },
        );
        self.message_seq += 1;

        let mut encoded = BytesMut::new();
        finished_msg.encode(&mut encoded);

        let keys = self.keys.as_ref().context("session keys missing")?;
        let record = DtlsRecord {
            content_type: ContentType::Handshake,
            version: ProtocolVersion::DTLS_1_2,
            epoch: self.epoch,
            sequence_number: self.record_seq,
            payload: encoded.freeze(),
        };
        seal_record(&record, &keys.server_write_key, &keys.server_write_iv)?.encode(&mut flight);
        self.record_seq += 1;

        self.out.push_back(flight.freeze());
        self.state = SessionState::Established;
        self.local_secret = None;
        self.transcript = Vec::new();
        debug!("dtls handshake complete");
        Ok(())
    }

    fn retransmit_flight(&mut self) {
        if let Some(flight) = &self.last_flight {
            trace!("retransmitting server flight");
            self.out.push_back(flight.clone());
        }
    }

    /// Session in the established state with caller-supplied keys, for
    /// exercising the layers above without a live handshake.
    #[cfg(test)]
    pub(crate) fn established_with(ctx: Arc<DtlsContext>, keys: SessionKeys) -> Self {
        let mut session = Self::new(ctx);
        session.keys = Some(keys);
        session.state = SessionState::Established;
        session.epoch = 1;
        session.record_seq = 0;
        session.local_secret = None;
        session
    }
}

fn hmac_sha256(secret: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret)
        .map_err(|_| anyhow!("invalid hmac key length"))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// TLS 1.2 P_SHA256: block i is HMAC(secret, A(i) + label + seed), where
/// A(0) = label + seed and A(i) = HMAC(secret, A(i-1)).
pub(crate) fn prf_sha256(
    secret: &[u8],
    label: &[u8],
    seed: &[u8],
    output_length: usize,
) -> Result<Vec<u8>> {
    let mut output = vec![0u8; output_length];
    let mut a = hmac_sha256(secret, &[label, seed])?;
    for chunk in output.chunks_mut(32) {
        let block = hmac_sha256(secret, &[&a, label, seed])?;
        chunk.copy_from_slice(&block[..chunk.len()]);
        a = hmac_sha256(secret, &[&a])?;
    }
    Ok(output)
}

pub(crate) fn expand_keys(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> Result<SessionKeys> {
    // Key expansion seeds with the randoms swapped relative to the master
    // secret derivation.
    let mut seed = Vec::with_capacity(server_random.len() + client_random.len());
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);
    let key_block = prf_sha256(master_secret, b"key expansion", &seed, 40)?;
    Ok(SessionKeys::from_key_block(master_secret, key_block))
}

pub(crate) fn verify_data(
    master_secret: &[u8],
    label: &[u8],
    transcript: &[u8],
) -> Result<Vec<u8>> {
    let hash = Sha256::digest(transcript);
    prf_sha256(master_secret, label, &hash, 12)
}

/// Additional authenticated data for one record: the 64-bit sequence field
/// (epoch + 48-bit number) followed by the header the peer will see, with
/// the plaintext length in place of the wire length.
fn record_aad(record: &DtlsRecord, payload_len: usize) -> BytesMut {
    let mut aad = BytesMut::with_capacity(13);
    aad.put_u16(record.epoch);
    aad.put_uint(record.sequence_number, 6);
    aad.put_u8(record.content_type as u8);
    aad.put_u8(record.version.major);
    aad.put_u8(record.version.minor);
    aad.put_u16(payload_len as u16);
    aad
}

fn gcm_nonce(iv: &[u8], explicit: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(iv);
    nonce[4..].copy_from_slice(explicit);
    nonce
}

/// AES-128-GCM record protection. Takes a plaintext record and returns the
/// same record with its payload replaced by explicit nonce (the sequence
/// field), ciphertext and tag.
pub(crate) fn seal_record(record: &DtlsRecord, key: &[u8], iv: &[u8]) -> Result<DtlsRecord> {
    let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| anyhow!("invalid key length"))?;
    let full_seq = ((record.epoch as u64) << 48) | record.sequence_number;
    let aad = record_aad(record, record.payload.len());

    let mut sealed =
        BytesMut::with_capacity(AEAD_EXPLICIT_NONCE_LEN + record.payload.len() + AEAD_TAG_LEN);
    sealed.put_u64(full_seq);
    sealed.extend_from_slice(&record.payload);

    let nonce = gcm_nonce(iv, &full_seq.to_be_bytes());
    let tag = cipher
        .encrypt_in_place_detached(
            Nonce::from_slice(&nonce),
            &aad,
            &mut sealed[AEAD_EXPLICIT_NONCE_LEN..],
        )
        .map_err(|e| anyhow!("encryption failed: {}", e))?;
    sealed.put_slice(&tag);

    Ok(DtlsRecord {
        payload: sealed.freeze(),
        ..record.clone()
    })
}

/// Inverse of [`seal_record`]: authenticate against the record header and
/// return the plaintext.
pub(crate) fn open_record(record: &DtlsRecord, key: &[u8], iv: &[u8]) -> Result<Bytes> {
    if record.payload.len() < AEAD_EXPLICIT_NONCE_LEN + AEAD_TAG_LEN {
        bail!("record too short");
    }
    let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| anyhow!("invalid key length"))?;
    let (explicit_nonce, rest) = record.payload.split_at(AEAD_EXPLICIT_NONCE_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - AEAD_TAG_LEN);

    let aad = record_aad(record, ciphertext.len());
    let nonce = gcm_nonce(iv, explicit_nonce);

    let mut plain = BytesMut::from(ciphertext);
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&nonce),
            &aad,
            &mut plain,
            Tag::from_slice(tag),
        )
        .map_err(|e| anyhow!("decryption failed: {}", e))?;
    Ok(plain.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys() -> SessionKeys {
        SessionKeys {
            client_write_key: vec![1u8; 16],
            server_write_key: vec![2u8; 16],
            client_write_iv: vec![3u8; 4],
            server_write_iv: vec![4u8; 4],
            master_secret: vec![5u8; 48],
        }
    }

    #[test]
    fn fingerprint_is_colon_separated_sha256() {
        let fp = fingerprint(b"not a real certificate");
        assert_eq!(fp.len(), 32 * 3 - 1);
        assert!(fp.split(':').all(|part| {
            part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit())
        }));
        assert_eq!(fp, fp.to_uppercase());
    }

    #[test]
    fn context_creation_yields_key_and_fingerprint() {
        let ctx = DtlsContext::new().unwrap();
        assert!(!ctx.certificate_der.is_empty());
        assert_eq!(ctx.fingerprint().len(), 95);
    }

    #[test]
    fn prf_is_deterministic_and_sized() {
        let a = prf_sha256(b"secret", b"label", b"seed", 48).unwrap();
        let b = prf_sha256(b"secret", b"label", b"seed", 48).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 48);
        let c = prf_sha256(b"secret", b"other", b"seed", 48).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn key_expansion_splits_the_key_block() {
        let keys = expand_keys(&[7u8; 48], &[1u8; 32], &[2u8; 32]).unwrap();
        assert_eq!(keys.client_write_key.len(), 16);
        assert_eq!(keys.server_write_key.len(), 16);
        assert_eq!(keys.client_write_iv.len(), 4);
        assert_eq!(keys.server_write_iv.len(), 4);
        assert_ne!(keys.client_write_key, keys.server_write_key);
    }

    fn app_record(epoch: u16, sequence_number: u64, payload: &'static [u8]) -> DtlsRecord {
        DtlsRecord {
            content_type: ContentType::ApplicationData,
            version: ProtocolVersion::DTLS_1_2,
            epoch,
            sequence_number,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn sealed_record_round_trips() {
        let keys = test_keys();
        let record = app_record(1, 5, b"sctp goes here");
        let sealed = seal_record(&record, &keys.server_write_key, &keys.server_write_iv).unwrap();
        assert_eq!(sealed.epoch, record.epoch);
        assert_eq!(sealed.sequence_number, record.sequence_number);
        assert_ne!(sealed.payload, record.payload);
        let plain = open_record(&sealed, &keys.server_write_key, &keys.server_write_iv).unwrap();
        assert_eq!(&plain[..], b"sctp goes here");
    }

    #[test]
    fn tampered_record_fails_authentication() {
        let keys = test_keys();
        let record = app_record(1, 1, b"payload");
        let mut sealed =
            seal_record(&record, &keys.client_write_key, &keys.client_write_iv).unwrap();
        let mut wire = sealed.payload.to_vec();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        sealed.payload = wire.into();
        assert!(open_record(&sealed, &keys.client_write_key, &keys.client_write_iv).is_err());
    }

    #[test]
    fn header_mismatch_fails_authentication() {
        let keys = test_keys();
        let record = app_record(1, 7, b"payload");
        let mut sealed =
            seal_record(&record, &keys.client_write_key, &keys.client_write_iv).unwrap();
        // The header is authenticated; a replay under another sequence
        // number must not open.
        sealed.sequence_number = 8;
        assert!(open_record(&sealed, &keys.client_write_key, &keys.client_write_iv).is_err());
    }

    #[test]
    fn established_session_moves_app_data_both_ways() {
        let ctx = Arc::new(DtlsContext::new().unwrap());
        let keys = test_keys();
        let mut session = DtlsSession::established_with(ctx, keys.clone());

        // Server -> client.
        session.write_app(b"from server").unwrap();
        let datagram = session.take_outgoing().unwrap();
        let mut wire = datagram.clone();
        let rec = DtlsRecord::decode(&mut wire).unwrap().unwrap();
        assert_eq!(rec.epoch, 1);
        let plain = open_record(&rec, &keys.server_write_key, &keys.server_write_iv).unwrap();
        assert_eq!(&plain[..], b"from server");

        // Client -> server.
        let record = app_record(1, 9, b"from client");
        let sealed = seal_record(&record, &keys.client_write_key, &keys.client_write_iv).unwrap();
        let mut buf = BytesMut::new();
        sealed.encode(&mut buf);
        session.feed(&buf);
        assert_eq!(&session.read_plaintext().unwrap()[..], b"from client");
    }
}
