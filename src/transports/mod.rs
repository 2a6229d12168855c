pub mod dtls;
pub mod sctp;
pub mod stun;
