//! RESP (Redis) codec (spec §4.2). Strictly ordered like ASCII memcached;
//! the first byte of a reply line discriminates its shape.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::MutenantError;

use super::request::Request;
use super::response::{Response, ResponseKind};

#[derive(Debug, Default)]
enum ReadState {
    #[default]
    WaitingForLine,
    WaitingForBulk {
        len: usize,
    },
}

#[derive(Debug, Default)]
pub struct RespCodec {
    state: ReadState,
}

impl RespCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_crlf(buf: &[u8]) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }

    fn encode_bulk_string(dst: &mut BytesMut, bytes: &[u8]) {
        dst.put_slice(format!("${}\r\n", bytes.len()).as_bytes());
        dst.put_slice(bytes);
        dst.put_slice(b"\r\n");
    }
}

impl Encoder<Request> for RespCodec {
    type Error = MutenantError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Request::Get { key, .. } => {
                dst.put_slice(b"*2\r\n");
                Self::encode_bulk_string(dst, b"GET");
                Self::encode_bulk_string(dst, &key);
            }
            Request::Set { key, value, .. } => {
                dst.put_slice(b"*3\r\n");
                Self::encode_bulk_string(dst, b"SET");
                Self::encode_bulk_string(dst, &key);
                Self::encode_bulk_string(dst, &value);
            }
            Request::Delete { key, .. } => {
                dst.put_slice(b"*2\r\n");
                Self::encode_bulk_string(dst, b"DEL");
                Self::encode_bulk_string(dst, &key);
            }
            Request::SaslPlain { .. } => {
                return Err(MutenantError::Protocol("SASL is not supported over RESP".into()));
            }
        }
        Ok(())
    }
}

impl Decoder for RespCodec {
    type Item = Response;
    type Error = MutenantError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, Self::Error> {
        loop {
            match self.state {
                ReadState::WaitingForLine => {
                    let Some(pos) = Self::find_crlf(src) else { return Ok(None) };
                    let line = src.split_to(pos + 2);
                    let line = &line[..line.len() - 2];
                    if line.is_empty() {
                        return Err(MutenantError::Protocol("empty RESP line".into()));
                    }
                    let (tag, rest) = (line[0], &line[1..]);
                    match tag {
                        b'$' => {
                            let n: i64 = std::str::from_utf8(rest)
                                .ok()
                                .and_then(|s| s.parse().ok())
                                .ok_or_else(|| MutenantError::Protocol("malformed RESP bulk length".into()))?;
                            if n < 0 {
                                return Ok(Some(Response {
                                    kind: ResponseKind::Get,
                                    opaque: None,
                                    hit: false,
                                    obj_size: 0,
                                }));
                            }
                            self.state = ReadState::WaitingForBulk { len: n as usize };
                            continue;
                        }
                        b'+' | b':' => {
                            return Ok(Some(Response { kind: ResponseKind::Ack, opaque: None, hit: true, obj_size: 0 }));
                        }
                        b'-' => {
                            return Err(MutenantError::Protocol(format!(
                                "RESP error reply: {}",
                                String::from_utf8_lossy(rest)
                            )));
                        }
                        other => {
                            return Err(MutenantError::Protocol(format!(
                                "unrecognized RESP reply tag: {}",
                                other as char
                            )));
                        }
                    }
                }
                ReadState::WaitingForBulk { len } => {
                    let needed = len + 2;
                    if src.len() < needed {
                        return Ok(None);
                    }
                    src.advance(needed);
                    self.state = ReadState::WaitingForLine;
                    return Ok(Some(Response { kind: ResponseKind::Get, opaque: None, hit: true, obj_size: len }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn encodes_get() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Request::Get { key: b"k".to_vec(), opaque: 0 }, &mut buf).unwrap();
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");
    }

    #[test]
    fn encodes_set() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Request::Set { key: b"k".to_vec(), value: Bytes::from_static(b"v"), opaque: 0 }, &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn decodes_null_bulk_as_miss() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"$-1\r\n"[..]);
        let resp = codec.decode(&mut buf).unwrap().unwrap();
        assert!(!resp.hit);
    }

    #[test]
    fn decodes_bulk_hit_with_object_size() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"$3\r\nabc\r\n"[..]);
        let resp = codec.decode(&mut buf).unwrap().unwrap();
        assert!(resp.hit);
        assert_eq!(resp.obj_size, 3);
    }

    #[test]
    fn decodes_simple_string_ack() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"+OK\r\n"[..]);
        let resp = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(resp.kind, ResponseKind::Ack);
    }

    #[test]
    fn partial_buffers_are_resumable() {
        let whole = b"$3\r\nabc\r\n";
        let mut byte_codec = RespCodec::new();
        let mut byte_buf = BytesMut::new();
        let mut result = None;
        for &b in whole {
            byte_buf.extend_from_slice(&[b]);
            if let Some(r) = byte_codec.decode(&mut byte_buf).unwrap() {
                result = Some(r);
                break;
            }
        }
        assert_eq!(result.unwrap().obj_size, 3);
    }
}
