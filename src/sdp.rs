//! Offer parsing and answer synthesis.
//!
//! Only the ICE credentials are read from the offer; everything else the
//! browser sends is irrelevant to a data-channel-only answerer. The answer
//! is a fixed minimal template: one `m=application` section, our
//! fingerprint, credentials and a single host candidate.

use crate::errors::{Error, Result};
use std::fmt::Write;
use std::net::Ipv4Addr;

/// ICE credentials extracted from a remote offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteCredentials {
    pub ufrag: String,
    pub password: String,
}

pub(crate) fn parse_offer(sdp: &str) -> Result<RemoteCredentials> {
    let mut ufrag = None;
    let mut password = None;

    for raw_line in sdp.lines() {
        let line = raw_line.trim();
        if let Some(value) = line.strip_prefix("a=ice-ufrag:") {
            ufrag.get_or_insert_with(|| value.to_string());
        } else if let Some(value) = line.strip_prefix("a=ice-pwd:") {
            password.get_or_insert_with(|| value.to_string());
        }
    }

    match (ufrag, password) {
        (Some(ufrag), Some(password)) if !ufrag.is_empty() && !password.is_empty() => {
            Ok(RemoteCredentials { ufrag, password })
        }
        _ => Err(Error::InvalidSdp),
    }
}

pub(crate) fn answer(
    host: Ipv4Addr,
    port: u16,
    fingerprint: &str,
    ufrag: &str,
    password: &str,
    session_id: u64,
) -> String {
    let mut out = String::with_capacity(512);
    let _ = writeln!(out, "v=0");
    let _ = writeln!(out, "o=- {} 1 IN IP4 {}", session_id, host);
    let _ = writeln!(out, "s=-");
    let _ = writeln!(out, "t=0 0");
    let _ = writeln!(out, "m=application {} DTLS/SCTP 5000", port);
    let _ = writeln!(out, "c=IN IP4 {}", host);
    let _ = writeln!(out, "a=ice-ufrag:{}", ufrag);
    let _ = writeln!(out, "a=ice-pwd:{}", password);
    let _ = writeln!(out, "a=fingerprint:sha-256 {}", fingerprint);
    let _ = writeln!(out, "a=setup:passive");
    let _ = writeln!(out, "a=mid:data");
    let _ = writeln!(out, "a=sctpmap:5000 webrtc-datachannel 1024");
    let _ = writeln!(
        out,
        "a=candidate:1 1 UDP 2130706431 {} {} typ host",
        host, port
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=- 4611686018427387904 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        m=application 9 DTLS/SCTP 5000\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=ice-ufrag:abcd\r\n\
        a=ice-pwd:efghijklmnopqrstuvwxyzAB\r\n\
        a=fingerprint:sha-256 AA:BB\r\n\
        a=setup:actpass\r\n";

    #[test]
    fn parses_ice_credentials() {
        let creds = parse_offer(OFFER).unwrap();
        assert_eq!(creds.ufrag, "abcd");
        assert_eq!(creds.password, "efghijklmnopqrstuvwxyzAB");
    }

    #[test]
    fn rejects_offer_without_ufrag() {
        let offer = OFFER.replace("a=ice-ufrag:abcd\r\n", "");
        assert!(matches!(parse_offer(&offer), Err(Error::InvalidSdp)));
    }

    #[test]
    fn rejects_offer_without_password() {
        let offer = OFFER.replace("a=ice-pwd:efghijklmnopqrstuvwxyzAB\r\n", "");
        assert!(matches!(parse_offer(&offer), Err(Error::InvalidSdp)));
    }

    #[test]
    fn answer_contains_required_lines() {
        let out = answer(
            Ipv4Addr::new(10, 0, 0, 2),
            9555,
            "AA:BB:CC",
            "wxyz",
            "0123456789abcdefghijklmn",
            42,
        );
        assert!(out.starts_with("v=0\n"));
        assert!(out.contains("m=application 9555 DTLS/SCTP 5000"));
        assert!(out.contains("c=IN IP4 10.0.0.2"));
        assert!(out.contains("a=ice-ufrag:wxyz"));
        assert!(out.contains("a=ice-pwd:0123456789abcdefghijklmn"));
        assert!(out.contains("a=fingerprint:sha-256 AA:BB:CC"));
        assert!(out.contains("a=setup:passive"));
        assert!(out.contains("a=sctpmap:5000 webrtc-datachannel 1024"));
        assert!(out.contains("a=candidate:1 1 UDP 2130706431 10.0.0.2 9555 typ host"));
    }
}
