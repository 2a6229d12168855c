use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced through the public API. Network-level faults (malformed
/// datagrams, unknown senders) are dropped internally and never reach here.
#[derive(Debug, Error)]
pub enum Error {
    /// The offer SDP is missing `a=ice-ufrag` or `a=ice-pwd`.
    #[error("offer is missing ice credentials")]
    InvalidSdp,

    /// Every peer slot is in use.
    #[error("peer slots exhausted")]
    MaxClients,

    /// Certificate or key setup failed at server creation.
    #[error("crypto initialisation failed: {0}")]
    CryptoInit(anyhow::Error),

    /// The pending event queue is full; the newest event was dropped.
    #[error("event queue full")]
    QueueFull,

    /// The peer has no open data channel (or the handle is stale).
    #[error("peer is not connected")]
    NotConnected,
}
