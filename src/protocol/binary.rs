//! Binary memcached codec (spec §4.2): 24-byte fixed header, optional SASL
//! PLAIN negotiation, out-of-order responses correlated by `opaque`.
//!
//! Header layout (all multi-byte fields network byte order), grounded on
//! `original_source/Protocol.cc`'s `binary_protocol_t`:
//! `magic(1) opcode(1) key_len(2) extras_len(1) data_type(1)
//! status(2) total_body_len(4) opaque(4) cas(8)`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::MutenantError;

use super::request::Request;
use super::response::{Response, ResponseKind};

const HEADER_LEN: usize = 24;
const REQ_MAGIC: u8 = 0x80;
const RESP_MAGIC: u8 = 0x81;

const OPCODE_GET: u8 = 0x00;
const OPCODE_SET: u8 = 0x01;
const OPCODE_DELETE: u8 = 0x04;
const OPCODE_SASL_AUTH: u8 = 0x21;

const STATUS_OK: u16 = 0x0000;

#[derive(Debug, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    pub fn new() -> Self {
        Self
    }

    fn write_header(
        dst: &mut BytesMut,
        opcode: u8,
        key_len: u16,
        extras_len: u8,
        total_body_len: u32,
        opaque: u32,
    ) {
        dst.put_u8(REQ_MAGIC);
        dst.put_u8(opcode);
        dst.put_u16(key_len);
        dst.put_u8(extras_len);
        dst.put_u8(0); // data type
        dst.put_u16(0); // vbucket id, unused by this client
        dst.put_u32(total_body_len);
        dst.put_u32(opaque);
        dst.put_u64(0); // cas
    }
}

impl Encoder<Request> for BinaryCodec {
    type Error = MutenantError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Request::Get { key, opaque } => {
                Self::write_header(dst, OPCODE_GET, key.len() as u16, 0, key.len() as u32, opaque);
                dst.put_slice(&key);
            }
            Request::Set { key, value, opaque } => {
                let extras_len = 8u8;
                let total = extras_len as u32 + key.len() as u32 + value.len() as u32;
                Self::write_header(dst, OPCODE_SET, key.len() as u16, extras_len, total, opaque);
                dst.put_u32(0); // flags
                dst.put_u32(0); // expiration
                dst.put_slice(&key);
                dst.put_slice(&value);
            }
            Request::Delete { key, opaque } => {
                Self::write_header(dst, OPCODE_DELETE, key.len() as u16, 0, key.len() as u32, opaque);
                dst.put_slice(&key);
            }
            Request::SaslPlain { username, password, opaque } => {
                let mechanism = b"PLAIN\0";
                let body = format!("\0{username}\0{password}");
                let total = mechanism.len() as u32 + body.len() as u32;
                Self::write_header(dst, OPCODE_SASL_AUTH, mechanism.len() as u16, 0, total, opaque);
                dst.put_slice(mechanism);
                dst.put_slice(body.as_bytes());
            }
        }
        Ok(())
    }
}

impl Decoder for BinaryCodec {
    type Item = Response;
    type Error = MutenantError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let total_body_len = u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;
        if src.len() < HEADER_LEN + total_body_len {
            return Ok(None);
        }

        let mut header = src.split_to(HEADER_LEN);
        let magic = header.get_u8();
        if magic != RESP_MAGIC {
            return Err(MutenantError::Protocol(format!("bad binary response magic: {magic:#x}")));
        }
        let opcode = header.get_u8();
        let key_len = header.get_u16() as usize;
        let extras_len = header.get_u8() as usize;
        let _data_type = header.get_u8();
        let status = header.get_u16();
        let _total_body_len = header.get_u32();
        let opaque = header.get_u32();
        let _cas = header.get_u64();

        let body = src.split_to(total_body_len);
        let value_len = total_body_len.saturating_sub(extras_len + key_len);

        let kind = match opcode {
            OPCODE_GET => ResponseKind::Get,
            OPCODE_SASL_AUTH => ResponseKind::Sasl,
            _ => ResponseKind::Ack,
        };

        if kind == ResponseKind::Sasl {
            if status != STATUS_OK {
                return Err(MutenantError::Protocol(format!("SASL status {status:#x}")));
            }
            return Ok(Some(Response { kind, opaque: Some(opaque), hit: true, obj_size: 0 }));
        }

        if kind == ResponseKind::Get {
            let hit = status == STATUS_OK;
            let obj_size = if hit { value_len } else { 0 };
            let _ = body;
            return Ok(Some(Response { kind, opaque: Some(opaque), hit, obj_size }));
        }

        Ok(Some(Response { kind, opaque: Some(opaque), hit: status == STATUS_OK, obj_size: 0 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn push_header(buf: &mut BytesMut, opcode: u8, key_len: u16, extras_len: u8, status: u16, body_len: u32, opaque: u32) {
        buf.put_u8(RESP_MAGIC);
        buf.put_u8(opcode);
        buf.put_u16(key_len);
        buf.put_u8(extras_len);
        buf.put_u8(0);
        buf.put_u16(status);
        buf.put_u32(body_len);
        buf.put_u32(opaque);
        buf.put_u64(0);
    }

    #[test]
    fn encodes_get_request_header() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Request::Get { key: b"k".to_vec(), opaque: 17 }, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN + 1);
        assert_eq!(buf[0], REQ_MAGIC);
        assert_eq!(buf[1], OPCODE_GET);
    }

    #[test]
    fn nonzero_status_on_get_is_a_miss() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        push_header(&mut buf, OPCODE_GET, 0, 0, 0x0001, 0, 17);
        let resp = codec.decode(&mut buf).unwrap().unwrap();
        assert!(!resp.hit);
        assert_eq!(resp.opaque, Some(17));
    }

    #[test]
    fn get_hit_reports_value_length() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        push_header(&mut buf, OPCODE_GET, 0, 4, 0x0000, 7, 5);
        buf.put_slice(b"xxxabc"); // 4 extras bytes + 3 value bytes == 7
        let resp = codec.decode(&mut buf).unwrap().unwrap();
        assert!(resp.hit);
        assert_eq!(resp.obj_size, 3);
    }

    #[test]
    fn sasl_success_yields_sasl_response() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        push_header(&mut buf, OPCODE_SASL_AUTH, 0, 0, STATUS_OK, 0, 1);
        let resp = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(resp.kind, ResponseKind::Sasl);
    }

    #[test]
    fn sasl_failure_is_an_error() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        push_header(&mut buf, OPCODE_SASL_AUTH, 0, 0, 0x0020, 0, 1);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn partial_header_is_resumable() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        push_header(&mut buf, OPCODE_GET, 0, 0, 0, 0, 9);
        let full = buf.clone();
        let mut partial = BytesMut::from(&full[..HEADER_LEN - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.put_slice(&full[HEADER_LEN - 1..]);
        let resp = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(resp.opaque, Some(9));
    }

    #[test]
    fn delete_encode_has_no_extras() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Request::Delete { key: b"k".to_vec(), opaque: 1 }, &mut buf).unwrap();
        assert_eq!(buf[1], OPCODE_DELETE);
    }

    #[test]
    fn set_encode_includes_flags_and_expiration_extras() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Request::Set { key: b"k".to_vec(), value: Bytes::from_static(b"v"), opaque: 1 }, &mut buf)
            .unwrap();
        assert_eq!(buf[1], OPCODE_SET);
        assert_eq!(buf[4], 8); // extras_len
    }
}
