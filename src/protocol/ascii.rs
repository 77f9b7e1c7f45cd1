//! ASCII memcached codec (spec §4.2). Strictly ordered: responses are
//! correlated to the head of the connection's `OpQueue`, not by opaque.
//!
//! The decoder mirrors the teacher's `TagMsgCodec`/`PayloadCodec` style of
//! returning `Ok(None)` on a short buffer and only consuming bytes once a
//! complete frame is known to be present, grounded line-for-line on
//! `original_source/Protocol.cc`'s `ascii_protocol_t::handle_response`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::MutenantError;

use super::request::Request;
use super::response::{Response, ResponseKind};

#[derive(Debug, Default)]
enum ReadState {
    #[default]
    WaitingForLine,
    WaitingForData {
        obj_size: usize,
    },
    WaitingForTrailingEnd {
        obj_size: usize,
    },
}

#[derive(Debug, Default)]
pub struct AsciiCodec {
    state: ReadState,
}

impl AsciiCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_crlf(buf: &[u8]) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }
}

impl Encoder<Request> for AsciiCodec {
    type Error = MutenantError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Request::Get { key, .. } => {
                dst.put_slice(b"get ");
                dst.put_slice(&key);
                dst.put_slice(b"\r\n");
            }
            Request::Set { key, value, .. } => {
                dst.put_slice(b"set ");
                dst.put_slice(&key);
                dst.put_slice(format!(" 0 0 {}\r\n", value.len()).as_bytes());
                dst.put_slice(&value);
                dst.put_slice(b"\r\n");
            }
            Request::Delete { key, .. } => {
                dst.put_slice(b"delete ");
                dst.put_slice(&key);
                dst.put_slice(b"\r\n");
            }
            Request::SaslPlain { .. } => {
                return Err(MutenantError::Protocol(
                    "SASL is not supported over the ASCII protocol".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Decoder for AsciiCodec {
    type Item = Response;
    type Error = MutenantError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, Self::Error> {
        loop {
            match self.state {
                ReadState::WaitingForLine => {
                    let Some(pos) = Self::find_crlf(src) else { return Ok(None) };
                    let line = src.split_to(pos + 2);
                    let line = &line[..line.len() - 2];

                    if line == b"END" {
                        return Ok(Some(Response { kind: ResponseKind::Get, opaque: None, hit: false, obj_size: 0 }));
                    }

                    if let Some(rest) = line.strip_prefix(b"VALUE ") {
                        let text = std::str::from_utf8(rest)
                            .map_err(|_| MutenantError::Protocol("non-utf8 VALUE line".into()))?;
                        let mut parts = text.split(' ');
                        let _key = parts.next();
                        let _flags = parts.next();
                        let len_str = parts.next().ok_or_else(|| {
                            MutenantError::Protocol("malformed VALUE line".into())
                        })?;
                        let obj_size: usize = len_str
                            .parse()
                            .map_err(|_| MutenantError::Protocol("malformed VALUE length".into()))?;
                        self.state = ReadState::WaitingForData { obj_size };
                        continue;
                    }

                    // Any other line (STORED, DELETED, NOT_FOUND, ERROR, ...)
                    // is a generic ack for whichever SET/DELETE is at the
                    // head of the OpQueue.
                    return Ok(Some(Response { kind: ResponseKind::Ack, opaque: None, hit: true, obj_size: 0 }));
                }
                ReadState::WaitingForData { obj_size } => {
                    // data + trailing CRLF.
                    let needed = obj_size + 2;
                    if src.len() < needed {
                        return Ok(None);
                    }
                    src.advance(needed);
                    self.state = ReadState::WaitingForTrailingEnd { obj_size };
                    continue;
                }
                ReadState::WaitingForTrailingEnd { obj_size } => {
                    // The "END\r\n" line that closes a VALUE block.
                    let Some(pos) = Self::find_crlf(src) else { return Ok(None) };
                    let end_line = src.split_to(pos + 2);
                    debug_assert_eq!(&end_line[..end_line.len() - 2], b"END");
                    self.state = ReadState::WaitingForLine;
                    return Ok(Some(Response {
                        kind: ResponseKind::Get,
                        opaque: None,
                        hit: true,
                        obj_size,
                    }));
                }
            }
        }
    }
}

pub fn encode_value(bytes: &[u8]) -> Bytes {
    Bytes::copy_from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_get() {
        let mut codec = AsciiCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Request::Get { key: b"foo".to_vec(), opaque: 0 }, &mut buf).unwrap();
        assert_eq!(&buf[..], b"get foo\r\n");
    }

    #[test]
    fn encodes_set() {
        let mut codec = AsciiCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Request::Set { key: b"foo".to_vec(), value: Bytes::from_static(b"abc"), opaque: 0 }, &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"set foo 0 0 3\r\nabc\r\n");
    }

    #[test]
    fn decodes_get_hit() {
        let mut codec = AsciiCodec::new();
        let mut buf = BytesMut::from(&b"VALUE k 0 3\r\nabc\r\nEND\r\n"[..]);
        let resp = codec.decode(&mut buf).unwrap().unwrap();
        assert!(resp.hit);
        assert_eq!(resp.obj_size, 3);
        assert_eq!(resp.kind, ResponseKind::Get);
        assert!(buf.is_empty());
    }

    #[test]
    fn decodes_get_miss() {
        let mut codec = AsciiCodec::new();
        let mut buf = BytesMut::from(&b"END\r\n"[..]);
        let resp = codec.decode(&mut buf).unwrap().unwrap();
        assert!(!resp.hit);
        assert_eq!(resp.kind, ResponseKind::Get);
    }

    #[test]
    fn decodes_set_ack() {
        let mut codec = AsciiCodec::new();
        let mut buf = BytesMut::from(&b"STORED\r\n"[..]);
        let resp = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(resp.kind, ResponseKind::Ack);
    }

    #[test]
    fn partial_buffers_are_resumable() {
        let whole = b"VALUE k 0 3\r\nabc\r\nEND\r\n";
        let mut one_shot_codec = AsciiCodec::new();
        let mut one_shot_buf = BytesMut::from(&whole[..]);
        let one_shot = one_shot_codec.decode(&mut one_shot_buf).unwrap().unwrap();

        let mut byte_codec = AsciiCodec::new();
        let mut byte_buf = BytesMut::new();
        let mut result = None;
        for &b in whole {
            byte_buf.put_u8(b);
            if let Some(r) = byte_codec.decode(&mut byte_buf).unwrap() {
                result = Some(r);
                break;
            }
        }
        let byte_by_byte = result.unwrap();
        assert_eq!(one_shot.obj_size, byte_by_byte.obj_size);
        assert_eq!(one_shot.hit, byte_by_byte.hit);
    }
}
