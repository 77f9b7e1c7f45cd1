//! Wire-protocol codecs (spec §4.2): a tagged variant over the three
//! protocols this crate speaks, rather than dynamic dispatch (spec §9
//! "Dynamic dispatch over protocol").

pub mod ascii;
pub mod binary;
pub mod request;
pub mod resp;
pub mod response;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::MutenantError;

pub use request::Request;
pub use response::{Response, ResponseKind};

use self::ascii::AsciiCodec;
use self::binary::BinaryCodec;
use self::resp::RespCodec;

pub const MIN_VALUELEN: usize = 1;
pub const MAX_VALUELEN: usize = 524_000;

/// Clamps a sampled/trace value length to the wire-safe range (spec §4.3).
/// Dialect 2 trace records carry an inflated field that must have its
/// framing overhead (76 bytes) and the key length subtracted first.
pub fn clamp_valuelen(raw: i64, dialect2_adjust_keylen: Option<usize>) -> usize {
    let adjusted = match dialect2_adjust_keylen {
        Some(keylen) => raw - 76 - keylen as i64,
        None => raw,
    };
    adjusted.clamp(MIN_VALUELEN as i64, MAX_VALUELEN as i64) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Ascii,
    Binary,
    Resp,
}

/// The common capability every wire protocol exposes: encode `Request`s,
/// decode `Response`s, and report whether responses correlate by FIFO
/// order or by the `opaque` field (spec §4.2, §5 "Ordering").
#[derive(Debug)]
pub enum Protocol {
    Ascii(AsciiCodec),
    Binary(BinaryCodec),
    Resp(RespCodec),
}

impl Protocol {
    pub fn new(kind: ProtocolKind) -> Self {
        match kind {
            ProtocolKind::Ascii => Protocol::Ascii(AsciiCodec::new()),
            ProtocolKind::Binary => Protocol::Binary(BinaryCodec::new()),
            ProtocolKind::Resp => Protocol::Resp(RespCodec::new()),
        }
    }

    /// Binary responses may arrive out of order and must be correlated by
    /// `opaque`; ASCII/RESP are strictly FIFO.
    pub fn is_out_of_order(&self) -> bool {
        matches!(self, Protocol::Binary(_))
    }

    /// Binary is the only protocol with a SASL handshake.
    pub fn supports_sasl(&self) -> bool {
        matches!(self, Protocol::Binary(_))
    }
}

impl Encoder<Request> for Protocol {
    type Error = MutenantError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self {
            Protocol::Ascii(c) => c.encode(item, dst),
            Protocol::Binary(c) => c.encode(item, dst),
            Protocol::Resp(c) => c.encode(item, dst),
        }
    }
}

impl Decoder for Protocol {
    type Item = Response;
    type Error = MutenantError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, Self::Error> {
        match self {
            Protocol::Ascii(c) => c.decode(src),
            Protocol::Binary(c) => c.decode(src),
            Protocol::Resp(c) => c.decode(src),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_enforces_bounds() {
        assert_eq!(clamp_valuelen(0, None), MIN_VALUELEN);
        assert_eq!(clamp_valuelen(10_000_000, None), MAX_VALUELEN);
        assert_eq!(clamp_valuelen(5000, None), 5000);
    }

    #[test]
    fn clamp_applies_dialect2_adjustment() {
        let raw = 200;
        let keylen = 10;
        assert_eq!(clamp_valuelen(raw, Some(keylen)), (raw - 76 - keylen as i64) as usize);
    }

    #[test]
    fn binary_is_out_of_order_ascii_and_resp_are_not() {
        assert!(Protocol::new(ProtocolKind::Binary).is_out_of_order());
        assert!(!Protocol::new(ProtocolKind::Ascii).is_out_of_order());
        assert!(!Protocol::new(ProtocolKind::Resp).is_out_of_order());
    }
}
