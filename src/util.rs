use rand_core::{OsRng, RngCore};
use std::time::Instant;

/// Characters allowed in ICE short-term credentials.
const CREDENTIAL_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Monotonic clock reporting fractional seconds since creation.
#[derive(Debug)]
pub(crate) struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

pub(crate) fn random_u32() -> u32 {
    u32::from_be_bytes(random_bytes::<4>())
}

pub(crate) fn random_u64() -> u64 {
    u64::from_be_bytes(random_bytes::<8>())
}

/// Random printable string drawn from the credential-safe character set.
pub(crate) fn random_ascii(len: usize) -> String {
    let mut out = String::with_capacity(len);
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    for byte in buf {
        out.push(CREDENTIAL_CHARSET[byte as usize % CREDENTIAL_CHARSET.len()] as char);
    }
    out
}
