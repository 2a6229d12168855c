//! A minimal WebRTC data-channel server core.
//!
//! `datachan` terminates browser data channels over a single UDP socket
//! without a full WebRTC stack: it synthesizes SDP answers, answers ICE
//! connectivity checks (STUN short-term credentials), runs a passive DTLS
//! 1.2 handshake per peer and speaks just enough SCTP to carry the WebRTC
//! data-channel sub-protocol — unordered, unreliable, single-fragment
//! messages on stream 0.
//!
//! The engine is sans-IO and single-threaded: the embedder owns the socket
//! and the loop.
//!
//! ```no_run
//! use datachan::{Event, Server, ServerConfig};
//!
//! let mut server = Server::new(ServerConfig::default()).unwrap();
//! server.set_write_callback(|datagram, addr, _peer| {
//!     // send `datagram` to `addr` on the UDP socket
//!     let _ = (datagram, addr);
//! });
//!
//! // signalling: offer in, answer out
//! # let offer = "";
//! let exchange = server.exchange_sdp(offer).unwrap();
//! println!("{}", exchange.answer);
//!
//! loop {
//!     // feed inbound datagrams: server.handle_udp(addr, &buf);
//!     while let Some(event) = server.update() {
//!         match event {
//!             Event::TextData { peer, data } => {
//!                 let _ = server.send_binary(peer, &data);
//!             }
//!             _ => {}
//!         }
//!     }
//!     // sleep / poll
//! }
//! ```

mod buffer;
pub mod config;
pub mod datachannel;
mod engine;
pub mod errors;
mod peer;
mod sdp;
pub mod transports;
mod util;

pub use buffer::PeerHandle;
pub use config::{ServerConfig, ServerConfigBuilder};
pub use engine::{Event, SdpExchange, Server};
pub use errors::{Error, Result};
pub use peer::PeerState;
