//! Outbound operations a codec can encode onto the wire.

use bytes::Bytes;

#[derive(Debug, Clone)]
pub enum Request {
    Get {
        key: Vec<u8>,
        opaque: u32,
    },
    Set {
        key: Vec<u8>,
        value: Bytes,
        opaque: u32,
    },
    /// The legacy DELETE probe (spec.md §4.2 `delete90_request`, wired to
    /// `--delete90` per SPEC_FULL.md §6).
    Delete {
        key: Vec<u8>,
        opaque: u32,
    },
    SaslPlain {
        username: String,
        password: String,
        opaque: u32,
    },
}
