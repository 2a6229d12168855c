use crate::transports::dtls::DtlsSession;
use std::any::Any;
use std::net::SocketAddrV4;

/// Lifecycle of a peer slot. A free slot has no `Peer` at all; transitions
/// only move forward except for the jump to `WaitingRemoval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// DTLS handshake in progress (initial state after the SDP exchange).
    DtlsHandshake,
    /// COOKIE-ECHO seen; the SCTP association is up.
    SctpEstablished,
    /// DCEP OPEN answered; user data may flow.
    DataChannelOpen,
    /// Marked for teardown on the next tick.
    WaitingRemoval,
}

pub(crate) struct Peer {
    /// Bound by the first authenticated STUN binding request.
    pub address: Option<SocketAddrV4>,
    pub server_ufrag: String,
    pub server_password: String,
    pub remote_ufrag: String,
    #[allow(dead_code)]
    pub remote_password: String,
    pub state: PeerState,
    pub dtls: DtlsSession,

    /// Mirrors the remote UDP port observed at STUN binding; browsers key
    /// the association on it.
    pub local_sctp_port: u16,
    pub remote_sctp_port: u16,
    /// The client's initiate tag; stamped on every outbound packet header.
    pub verification_tag: u32,
    /// Highest TSN observed from the peer.
    pub remote_tsn: u32,
    /// Next TSN to emit.
    pub local_tsn: u32,

    pub ttl: f64,
    pub next_heartbeat: f64,

    /// Slot for the embedder to hang its own state off a peer.
    pub user_data: Option<Box<dyn Any + Send>>,
}

impl Peer {
    pub fn new(
        dtls: DtlsSession,
        server_ufrag: String,
        server_password: String,
        remote_ufrag: String,
        remote_password: String,
        ttl: f64,
        heartbeat: f64,
    ) -> Self {
        Self {
            address: None,
            server_ufrag,
            server_password,
            remote_ufrag,
            remote_password,
            state: PeerState::DtlsHandshake,
            dtls,
            local_sctp_port: 0,
            remote_sctp_port: 0,
            verification_tag: 0,
            remote_tsn: 0,
            local_tsn: 1,
            ttl,
            next_heartbeat: heartbeat,
            user_data: None,
        }
    }
}
