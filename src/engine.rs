//! The server engine: one state machine per peer, a dispatcher that demuxes
//! the UDP datagram stream onto them, and the pending event queue.
//!
//! Everything here is synchronous and single-threaded. The embedder owns the
//! socket and the loop: it feeds inbound datagrams to [`Server::handle_udp`],
//! drains events with [`Server::update`] until it returns `None`, and
//! receives outbound datagrams through the write callback, invoked inline.

use bytes::Bytes;
use std::any::Any;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::buffer::{Arena, PeerHandle, Pool, RingQueue};
use crate::config::ServerConfig;
use crate::datachannel::{self, DcepOpen};
use crate::errors::{Error, Result};
use crate::peer::{Peer, PeerState};
use crate::sdp;
use crate::transports::dtls::{DtlsContext, DtlsSession};
use crate::transports::sctp::{self, DataChunk, InitChunk, SackChunk, SctpChunk, SctpHeader};
use crate::transports::stun::{self, BindingRequest};
use crate::util::{self, Clock};

/// User-visible happenings, drained one at a time via [`Server::update`].
///
/// Payload bytes live in the per-tick arena; hold them across ticks and the
/// engine falls back to a fresh allocation, so copies are cheap but not free.
#[derive(Debug, Clone)]
pub enum Event {
    /// The peer's data channel is open; data may now be exchanged.
    ClientJoin(PeerHandle),
    /// The peer is gone. Emitted exactly once per peer, after its data.
    ClientLeave(PeerHandle),
    TextData { peer: PeerHandle, data: Bytes },
    BinaryData { peer: PeerHandle, data: Bytes },
}

/// Result of a successful [`Server::exchange_sdp`].
pub struct SdpExchange {
    pub peer: PeerHandle,
    pub answer: String,
}

type WriteFn = Box<dyn FnMut(&[u8], SocketAddr, PeerHandle) + Send>;
type ErrorFn = Box<dyn FnMut(&str) + Send>;

pub struct Server {
    config: ServerConfig,
    ctx: Arc<DtlsContext>,
    clock: Clock,
    time: f64,
    peers: Pool<Peer>,
    events: RingQueue<Event>,
    arena: Arena,
    write_udp: WriteFn,
    on_error: ErrorFn,
}

impl Server {
    /// Build the engine: generates the certificate and key, reserves all
    /// peer slots and the arena. Certificate failure is fatal.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let ctx = DtlsContext::new().map_err(Error::CryptoInit)?;
        let clock = Clock::new();
        let time = clock.now_seconds();
        Ok(Self {
            peers: Pool::new(config.max_peers),
            events: RingQueue::new(config.event_queue_capacity),
            arena: Arena::new(config.arena_capacity),
            ctx: Arc::new(ctx),
            clock,
            time,
            write_udp: Box::new(|_, _, _| {}),
            on_error: Box::new(|_| {}),
            config,
        })
    }

    /// Callback invoked synchronously for every outbound datagram.
    pub fn set_write_callback(
        &mut self,
        callback: impl FnMut(&[u8], SocketAddr, PeerHandle) + Send + 'static,
    ) {
        self.write_udp = Box::new(callback);
    }

    /// Callback for recoverable faults (queue overflow, arena exhaustion).
    pub fn set_error_callback(&mut self, callback: impl FnMut(&str) + Send + 'static) {
        self.on_error = Box::new(callback);
    }

    pub fn fingerprint(&self) -> &str {
        self.ctx.fingerprint()
    }

    /// Number of peer slots currently in use.
    pub fn connected_peers(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_address(&self, handle: PeerHandle) -> Option<SocketAddr> {
        self.peers
            .get(handle)
            .and_then(|peer| peer.address)
            .map(SocketAddr::V4)
    }

    pub fn peer_state(&self, handle: PeerHandle) -> Option<PeerState> {
        self.peers.get(handle).map(|peer| peer.state)
    }

    /// Attach embedder state to a peer. Returns false for a stale handle.
    pub fn set_peer_data(&mut self, handle: PeerHandle, data: Box<dyn Any + Send>) -> bool {
        match self.peers.get_mut(handle) {
            Some(peer) => {
                peer.user_data = Some(data);
                true
            }
            None => false,
        }
    }

    pub fn peer_data(&self, handle: PeerHandle) -> Option<&(dyn Any + Send)> {
        self.peers.get(handle)?.user_data.as_deref()
    }

    /// Take an offer, allocate a peer and synthesize the answer. The peer
    /// starts in [`PeerState::DtlsHandshake`] and has no bound address until
    /// its first authenticated binding request arrives.
    pub fn exchange_sdp(&mut self, offer: &str) -> Result<SdpExchange> {
        let remote = sdp::parse_offer(offer)?;
        if self.peers.len() >= self.peers.capacity() {
            return Err(Error::MaxClients);
        }

        // The (server, remote) ufrag pair is the STUN routing key; keep it
        // unique even if the same offer shows up twice.
        let mut server_ufrag = util::random_ascii(4);
        while self
            .find_by_credentials(&server_ufrag, &remote.ufrag)
            .is_some()
        {
            server_ufrag = util::random_ascii(4);
        }
        let server_password = util::random_ascii(24);

        let answer = sdp::answer(
            self.config.host,
            self.config.port,
            self.ctx.fingerprint(),
            &server_ufrag,
            &server_password,
            util::random_u64(),
        );

        let peer = Peer::new(
            DtlsSession::new(self.ctx.clone()),
            server_ufrag,
            server_password,
            remote.ufrag,
            remote.password,
            self.config.peer_ttl_seconds,
            self.config.heartbeat_seconds,
        );
        let handle = self.peers.insert(peer).ok_or(Error::MaxClients)?;
        debug!(
            "peer admitted, {}/{} slots in use",
            self.peers.len(),
            self.peers.capacity()
        );
        Ok(SdpExchange {
            peer: handle,
            answer,
        })
    }

    /// Dispatch one inbound datagram: STUN binding requests bind addresses,
    /// everything else is DTLS for the peer owning the source address.
    pub fn handle_udp(&mut self, remote: SocketAddr, datagram: &[u8]) {
        let SocketAddr::V4(remote) = remote else {
            return;
        };
        if let Ok(request) = stun::parse_binding_request(datagram) {
            self.handle_stun(&request, datagram, remote);
        } else if let Some(handle) = self.find_by_address(remote) {
            self.handle_dtls(handle, datagram);
        } else {
            trace!("datagram from unknown address {} dropped", remote);
        }
    }

    /// Drain one pending event, or run one tick and return `None`. The
    /// embedder pattern is `while let Some(event) = server.update() { .. }`.
    pub fn update(&mut self) -> Option<Event> {
        let now = self.clock.now_seconds();
        self.update_at(now)
    }

    /// [`Server::update`] with an explicit clock, for fixed-timestep
    /// embedders and deterministic tests. `now` is monotonic seconds.
    pub fn update_at(&mut self, now: f64) -> Option<Event> {
        if let Some(event) = self.events.pop() {
            return Some(event);
        }

        let dt = (now - self.time).max(0.0);
        self.time = now;

        for index in 0..self.peers.capacity() {
            let Some(handle) = self.peers.handle_at(index) else {
                continue;
            };
            let heartbeat_due = {
                let peer = self.peers.get_mut(handle).expect("live slot");
                peer.ttl -= dt;
                peer.next_heartbeat -= dt;
                if peer.next_heartbeat <= 0.0 {
                    peer.next_heartbeat = self.config.heartbeat_seconds;
                    true
                } else {
                    false
                }
            };
            if heartbeat_due {
                self.send_heartbeat(handle, now);
            }
            self.flush_peer(handle);
        }

        self.arena.reset();

        for index in 0..self.peers.capacity() {
            let Some(handle) = self.peers.handle_at(index) else {
                continue;
            };
            let expired = {
                let peer = self.peers.get(handle).expect("live slot");
                peer.ttl <= 0.0 || peer.state == PeerState::WaitingRemoval
            };
            if expired {
                self.destroy_peer(handle);
            }
        }

        None
    }

    pub fn send_text(&mut self, handle: PeerHandle, text: &str) -> Result<()> {
        self.send_user_data(handle, text.as_bytes(), datachannel::PPID_TEXT)
    }

    pub fn send_binary(&mut self, handle: PeerHandle, data: &[u8]) -> Result<()> {
        self.send_user_data(handle, data, datachannel::PPID_BINARY)
    }

    /// Tear a peer down now: best-effort SHUTDOWN, a `ClientLeave` event,
    /// DTLS teardown, slot back to the pool. Stale handles are ignored.
    pub fn remove_peer(&mut self, handle: PeerHandle) {
        if self.peers.get(handle).is_some() {
            self.destroy_peer(handle);
        }
    }

    fn send_user_data(&mut self, handle: PeerHandle, data: &[u8], ppid: u32) -> Result<()> {
        let (header, chunk) = {
            let peer = self.peers.get_mut(handle).ok_or(Error::NotConnected)?;
            if peer.state != PeerState::DataChannelOpen {
                return Err(Error::NotConnected);
            }
            let tsn = peer.local_tsn;
            peer.local_tsn += 1;
            (
                SctpHeader {
                    source_port: self.config.port,
                    destination_port: peer.remote_sctp_port,
                    verification_tag: peer.verification_tag,
                },
                SctpChunk::Data(DataChunk {
                    flags: sctp::COMPLETE_UNRELIABLE,
                    tsn,
                    stream_id: 0,
                    stream_seq: 0,
                    ppid,
                    payload: Bytes::copy_from_slice(data),
                }),
            )
        };
        self.send_sctp(handle, header, &[chunk]);
        Ok(())
    }

    fn handle_stun(&mut self, request: &BindingRequest, raw: &[u8], remote: SocketAddrV4) {
        let Some(handle) = self.find_by_credentials(&request.server_ufrag, &request.remote_ufrag)
        else {
            trace!("binding request with unknown credentials dropped");
            return;
        };
        let reply = {
            let peer = self.peers.get(handle).expect("live slot");
            if request.has_integrity
                && !stun::verify_integrity(raw, peer.server_password.as_bytes())
            {
                trace!("binding request failed integrity check");
                return;
            }
            stun::serialize_binding_success(
                request.transaction_id,
                remote,
                peer.server_password.as_bytes(),
            )
        };
        (self.write_udp)(&reply, SocketAddr::V4(remote), handle);

        let peer = self.peers.get_mut(handle).expect("live slot");
        if peer.address.is_none() {
            debug!("peer bound to {}", remote);
        }
        peer.local_sctp_port = remote.port();
        peer.address = Some(remote);
    }

    fn handle_dtls(&mut self, handle: PeerHandle, datagram: &[u8]) {
        if let Some(peer) = self.peers.get_mut(handle) {
            peer.dtls.feed(datagram);
        }
        self.flush_peer(handle);

        loop {
            let plaintext = match self.peers.get_mut(handle) {
                Some(peer) if peer.dtls.is_established() => peer.dtls.read_plaintext(),
                _ => None,
            };
            let Some(plaintext) = plaintext else {
                break;
            };
            // Copy out of the session's buffers so they can be reused on
            // the next read; event payloads point into the arena.
            let Some(copy) = self.arena.acquire(&plaintext) else {
                (self.on_error)("arena exhausted; inbound message dropped");
                continue;
            };
            self.handle_sctp(handle, copy);
        }
        self.flush_peer(handle);
    }

    /// SCTP dispatch for one decrypted packet, in wire order.
    fn handle_sctp(&mut self, handle: PeerHandle, packet: Bytes) {
        let Ok((header, chunks)) = sctp::parse_packet(&packet) else {
            trace!("malformed sctp packet dropped");
            return;
        };

        for chunk in chunks {
            match chunk {
                SctpChunk::Init(init) => {
                    self.on_init(handle, &header, init);
                    break;
                }
                SctpChunk::CookieEcho { .. } => self.on_cookie_echo(handle, &header),
                SctpChunk::Data(data) => self.on_data(handle, &header, data),
                SctpChunk::Heartbeat { info } => self.on_heartbeat(handle, &header, info),
                SctpChunk::HeartbeatAck { .. } => {
                    if let Some(peer) = self.peers.get_mut(handle) {
                        peer.ttl = self.config.peer_ttl_seconds;
                    }
                }
                SctpChunk::Abort => {
                    if let Some(peer) = self.peers.get_mut(handle) {
                        debug!("abort from peer");
                        peer.state = PeerState::WaitingRemoval;
                    }
                    return;
                }
                SctpChunk::Shutdown { .. } => {
                    let Some(peer) = self.peers.get_mut(handle) else {
                        continue;
                    };
                    let tag = peer.verification_tag;
                    peer.state = PeerState::WaitingRemoval;
                    self.send_sctp(
                        handle,
                        reply_header(&header, tag),
                        &[SctpChunk::ShutdownAck],
                    );
                }
                SctpChunk::Sack(sack) => self.on_sack(handle, &header, sack),
                // Client-side chunks; a server never receives meaningful
                // ones of these.
                SctpChunk::InitAck { .. }
                | SctpChunk::CookieAck
                | SctpChunk::ShutdownAck
                | SctpChunk::ForwardTsn { .. } => {}
            }
        }
    }

    fn on_init(&mut self, handle: PeerHandle, header: &SctpHeader, init: InitChunk) {
        let reply = {
            let Some(peer) = self.peers.get_mut(handle) else {
                return;
            };
            peer.verification_tag = init.initiate_tag;
            peer.remote_tsn = init.initial_tsn.wrapping_sub(1);
            SctpChunk::InitAck {
                init: InitChunk {
                    initiate_tag: util::random_u32(),
                    window: sctp::DEFAULT_WINDOW,
                    outbound_streams: init.inbound_streams,
                    inbound_streams: init.outbound_streams,
                    initial_tsn: peer.local_tsn,
                },
                cookie: Bytes::copy_from_slice(&util::random_bytes::<16>()),
            }
        };
        trace!("init, tag {:08x}", init.initiate_tag);
        self.send_sctp(handle, reply_header(header, init.initiate_tag), &[reply]);
    }

    fn on_cookie_echo(&mut self, handle: PeerHandle, header: &SctpHeader) {
        let Some(peer) = self.peers.get_mut(handle) else {
            return;
        };
        if peer.state == PeerState::DtlsHandshake {
            peer.state = PeerState::SctpEstablished;
            debug!("sctp association established");
        }
        let tag = peer.verification_tag;
        self.send_sctp(handle, reply_header(header, tag), &[SctpChunk::CookieAck]);
    }

    fn on_data(&mut self, handle: PeerHandle, header: &SctpHeader, data: DataChunk) {
        let (tag, cumulative, joined, event, ack) = {
            let Some(peer) = self.peers.get_mut(handle) else {
                return;
            };
            peer.remote_tsn = peer.remote_tsn.max(data.tsn);
            peer.ttl = self.config.peer_ttl_seconds;

            let mut joined = false;
            let mut event = None;
            let mut ack = None;
            match data.ppid {
                datachannel::PPID_CONTROL => {
                    if let Ok(open) = DcepOpen::decode(&data.payload) {
                        trace!("dcep open, label {:?}", open.label);
                        peer.remote_sctp_port = header.source_port;
                        let tsn = peer.local_tsn;
                        peer.local_tsn += 1;
                        ack = Some(SctpChunk::Data(DataChunk {
                            flags: sctp::COMPLETE_UNRELIABLE,
                            tsn,
                            stream_id: data.stream_id,
                            stream_seq: 0,
                            ppid: datachannel::PPID_CONTROL,
                            payload: Bytes::from_static(&datachannel::ACK_MESSAGE),
                        }));
                        if peer.state != PeerState::DataChannelOpen {
                            peer.state = PeerState::DataChannelOpen;
                            joined = true;
                        }
                    }
                }
                datachannel::PPID_TEXT => {
                    event = Some(Event::TextData {
                        peer: handle,
                        data: data.payload.clone(),
                    });
                }
                datachannel::PPID_BINARY => {
                    event = Some(Event::BinaryData {
                        peer: handle,
                        data: data.payload.clone(),
                    });
                }
                other => trace!("data chunk with unhandled ppid {} ignored", other),
            }
            (peer.verification_tag, peer.remote_tsn, joined, event, ack)
        };

        if joined {
            debug!("data channel open");
            self.push_event(Event::ClientJoin(handle));
        }
        if let Some(event) = event {
            self.push_event(event);
        }
        if let Some(ack) = ack {
            self.send_sctp(handle, reply_header(header, tag), &[ack]);
        }
        self.send_sctp(
            handle,
            reply_header(header, tag),
            &[SctpChunk::Sack(SackChunk {
                cumulative_tsn_ack: cumulative,
                window: sctp::DEFAULT_WINDOW,
                gap_blocks: Vec::new(),
                duplicate_tsns: Vec::new(),
            })],
        );
    }

    fn on_heartbeat(&mut self, handle: PeerHandle, header: &SctpHeader, info: Bytes) {
        let Some(peer) = self.peers.get_mut(handle) else {
            return;
        };
        peer.ttl = self.config.peer_ttl_seconds;
        let tag = peer.verification_tag;
        self.send_sctp(
            handle,
            reply_header(header, tag),
            &[SctpChunk::HeartbeatAck { info }],
        );
    }

    /// A SACK reporting gaps means the peer is missing chunks we will never
    /// retransmit; jump its cumulative TSN past everything in flight.
    fn on_sack(&mut self, handle: PeerHandle, header: &SctpHeader, sack: SackChunk) {
        if sack.gap_blocks.is_empty() {
            return;
        }
        let Some(peer) = self.peers.get(handle) else {
            return;
        };
        let tag = peer.verification_tag;
        let new_cumulative_tsn = peer.local_tsn;
        self.send_sctp(
            handle,
            reply_header(header, tag),
            &[SctpChunk::ForwardTsn { new_cumulative_tsn }],
        );
    }

    fn send_heartbeat(&mut self, handle: PeerHandle, now: f64) {
        let Some(peer) = self.peers.get(handle) else {
            return;
        };
        let header = SctpHeader {
            source_port: self.config.port,
            destination_port: peer.remote_sctp_port,
            verification_tag: peer.verification_tag,
        };
        let chunk = SctpChunk::Heartbeat {
            info: sctp::heartbeat_info(&now.to_le_bytes()),
        };
        self.send_sctp(handle, header, &[chunk]);
    }

    fn destroy_peer(&mut self, handle: PeerHandle) {
        let Some((header, cumulative)) = self.peers.get(handle).map(|peer| {
            (
                SctpHeader {
                    source_port: peer.local_sctp_port,
                    destination_port: peer.remote_sctp_port,
                    verification_tag: peer.verification_tag,
                },
                peer.remote_tsn,
            )
        }) else {
            return;
        };
        self.send_sctp(
            handle,
            header,
            &[SctpChunk::Shutdown {
                cumulative_tsn_ack: cumulative,
            }],
        );
        self.push_event(Event::ClientLeave(handle));
        if let Some(peer) = self.peers.remove(handle) {
            debug!("peer {} removed", peer.server_ufrag);
        }
    }

    /// Serialize, encrypt and flush one SCTP packet to the peer. Silently a
    /// no-op while the DTLS handshake is still running.
    fn send_sctp(&mut self, handle: PeerHandle, header: SctpHeader, chunks: &[SctpChunk]) {
        let packet = sctp::serialize_packet(&header, chunks);
        if let Some(peer) = self.peers.get_mut(handle) {
            if let Err(e) = peer.dtls.write_app(&packet) {
                trace!("sctp egress dropped: {}", e);
            }
        }
        self.flush_peer(handle);
    }

    fn flush_peer(&mut self, handle: PeerHandle) {
        let Some(peer) = self.peers.get_mut(handle) else {
            return;
        };
        let Some(address) = peer.address else {
            return;
        };
        while let Some(datagram) = peer.dtls.take_outgoing() {
            (self.write_udp)(&datagram, SocketAddr::V4(address), handle);
        }
    }

    fn push_event(&mut self, event: Event) {
        if self.events.push(event).is_err() {
            (self.on_error)(&Error::QueueFull.to_string());
        }
    }

    fn find_by_address(&self, address: SocketAddrV4) -> Option<PeerHandle> {
        (0..self.peers.capacity()).find_map(|index| {
            let handle = self.peers.handle_at(index)?;
            let peer = self.peers.get(handle)?;
            (peer.address == Some(address)).then_some(handle)
        })
    }

    fn find_by_credentials(&self, server_ufrag: &str, remote_ufrag: &str) -> Option<PeerHandle> {
        (0..self.peers.capacity()).find_map(|index| {
            let handle = self.peers.handle_at(index)?;
            let peer = self.peers.get(handle)?;
            (peer.server_ufrag == server_ufrag && peer.remote_ufrag == remote_ufrag)
                .then_some(handle)
        })
    }
}

fn reply_header(inbound: &SctpHeader, verification_tag: u32) -> SctpHeader {
    SctpHeader {
        source_port: inbound.destination_port,
        destination_port: inbound.source_port,
        verification_tag,
    }
}
