//! Binary DOIP envelope codec.
//!
//! Envelope layout (10-byte header, big-endian, followed by object id and
//! payload):
//! ```text
//! | version (1B) | msg_type (1B) | op_code (1B) | flags (1B) | object_id_len (2B) | payload_len (4B) |
//! | object_id (NB) | block ... block |
//! ```
//! Each payload block is `| type (1B) | length (4B) | body |`. Metadata and
//! workflow bodies are compact UTF-8 JSON objects; component bodies carry
//! their own framing:
//! ```text
//! | id_len (2B) | id | media_len (2B) | media_type | content_len (4B) | content |
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::consts::*;

/// Errors raised while encoding or decoding an envelope.
///
/// Every variant maps to `MalformedFrame` at the server boundary.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("header too short: expected {HEADER_SIZE} bytes, got {0}")]
    ShortHeader(usize),
    #[error("unsupported DOIP version 0x{0:02x}")]
    UnsupportedVersion(u8),
    #[error("truncated envelope")]
    TruncatedEnvelope,
    #[error("trailing bytes after envelope")]
    TrailingBytes,
    #[error("truncated block header at offset {0}")]
    TruncatedBlockHeader(usize),
    #[error("truncated block body at offset {0}")]
    TruncatedBlockBody(usize),
    #[error("unknown block type 0x{0:02x}")]
    UnknownBlockType(u8),
    #[error("component block too small: {0} bytes")]
    ComponentTooSmall(usize),
    #[error("component block length mismatch")]
    ComponentLengthMismatch,
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("block body is not a JSON object")]
    NotAJsonObject,
    #[error("invalid JSON in block: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("{0} exceeds the wire limit")]
    Oversized(&'static str),
}

/// Parsed envelope header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub msg_type: u8,
    pub op_code: u8,
    pub flags: u8,
    pub object_id_len: u16,
    pub payload_len: u32,
}

impl Header {
    /// Decode the fixed header; only version 0x02 is accepted.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::ShortHeader(buf.len()));
        }
        let mut b = buf;
        let version = b.get_u8();
        let msg_type = b.get_u8();
        let op_code = b.get_u8();
        let flags = b.get_u8();
        let object_id_len = b.get_u16();
        let payload_len = b.get_u32();
        if version != DOIP_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            msg_type,
            op_code,
            flags,
            object_id_len,
            payload_len,
        })
    }
}

/// Binary component block inside a DOIP payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentBlock {
    pub component_id: String,
    /// Declared media type, verbatim from the wire (possibly empty).
    pub media_type: String,
    pub content: Bytes,
}

impl ComponentBlock {
    pub fn new(
        component_id: impl Into<String>,
        media_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            media_type: media_type.into(),
            content: content.into(),
        }
    }

    /// Declared media type, or the octet-stream default when empty.
    pub fn media_type_or_default(&self) -> &str {
        if self.media_type.is_empty() {
            DEFAULT_MEDIA_TYPE
        } else {
            &self.media_type
        }
    }

    fn body_len(&self) -> usize {
        2 + self.component_id.len() + 2 + self.media_type.len() + 4 + self.content.len()
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        let id_len =
            u16::try_from(self.component_id.len()).map_err(|_| WireError::Oversized("component id"))?;
        let media_len =
            u16::try_from(self.media_type.len()).map_err(|_| WireError::Oversized("media type"))?;
        let content_len =
            u32::try_from(self.content.len()).map_err(|_| WireError::Oversized("component content"))?;
        buf.put_u16(id_len);
        buf.put_slice(self.component_id.as_bytes());
        buf.put_u16(media_len);
        buf.put_slice(self.media_type.as_bytes());
        buf.put_u32(content_len);
        buf.put_slice(&self.content);
        Ok(())
    }

    /// Decode a component body; the body must be consumed exactly.
    fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        if body.len() < 8 {
            return Err(WireError::ComponentTooSmall(body.len()));
        }
        let mut b = body;
        let id_len = b.get_u16() as usize;
        if b.remaining() < id_len + 2 {
            return Err(WireError::ComponentLengthMismatch);
        }
        let component_id = std::str::from_utf8(&b[..id_len])
            .map_err(|_| WireError::InvalidUtf8("component id"))?
            .to_string();
        b.advance(id_len);
        let media_len = b.get_u16() as usize;
        if b.remaining() < media_len + 4 {
            return Err(WireError::ComponentLengthMismatch);
        }
        let media_type = std::str::from_utf8(&b[..media_len])
            .map_err(|_| WireError::InvalidUtf8("media type"))?
            .to_string();
        b.advance(media_len);
        let content_len = b.get_u32() as usize;
        if b.remaining() != content_len {
            return Err(WireError::ComponentLengthMismatch);
        }
        let content = Bytes::copy_from_slice(b);
        Ok(Self {
            component_id,
            media_type,
            content,
        })
    }
}

/// A parsed or to-be-encoded DOIP message envelope.
///
/// `msg_type`, `op_code` and `flags` stay raw so that tolerated unknown
/// values (e.g. an op-code routed by metadata hint) round-trip bit-exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub msg_type: u8,
    pub op_code: u8,
    pub flags: u8,
    pub object_id: String,
    pub metadata: Vec<Value>,
    pub components: Vec<ComponentBlock>,
    pub workflows: Vec<Value>,
}

impl Message {
    fn with_type(msg_type: u8, op_code: u8, object_id: impl Into<String>) -> Self {
        Self {
            msg_type,
            op_code,
            flags: 0,
            object_id: object_id.into(),
            metadata: Vec::new(),
            components: Vec::new(),
            workflows: Vec::new(),
        }
    }

    pub fn request(op_code: u8, object_id: impl Into<String>) -> Self {
        Self::with_type(MSG_TYPE_REQUEST, op_code, object_id)
    }

    pub fn response(op_code: u8, object_id: impl Into<String>) -> Self {
        Self::with_type(MSG_TYPE_RESPONSE, op_code, object_id)
    }

    pub fn error(op_code: u8, object_id: impl Into<String>) -> Self {
        Self::with_type(MSG_TYPE_ERROR, op_code, object_id)
    }

    /// Encode into the wire representation.
    ///
    /// Blocks are written in the order metadata, components, workflows. JSON
    /// bodies are compact, non-ASCII unescaped, keys in insertion order.
    pub fn to_bytes(&self) -> Result<Bytes, WireError> {
        let mut payload = BytesMut::new();
        for block in &self.metadata {
            put_json_block(&mut payload, BLOCK_METADATA, block)?;
        }
        for block in &self.components {
            let body_len =
                u32::try_from(block.body_len()).map_err(|_| WireError::Oversized("component block"))?;
            payload.put_u8(BLOCK_COMPONENT);
            payload.put_u32(body_len);
            block.encode_body(&mut payload)?;
        }
        for block in &self.workflows {
            put_json_block(&mut payload, BLOCK_WORKFLOW, block)?;
        }

        let object_id_len =
            u16::try_from(self.object_id.len()).map_err(|_| WireError::Oversized("object id"))?;
        let payload_len =
            u32::try_from(payload.len()).map_err(|_| WireError::Oversized("payload"))?;

        let mut out = BytesMut::with_capacity(HEADER_SIZE + self.object_id.len() + payload.len());
        out.put_u8(DOIP_VERSION);
        out.put_u8(self.msg_type);
        out.put_u8(self.op_code);
        out.put_u8(self.flags);
        out.put_u16(object_id_len);
        out.put_u32(payload_len);
        out.put_slice(self.object_id.as_bytes());
        out.put_slice(&payload);
        Ok(out.freeze())
    }

    /// Decode a complete envelope; no bytes may remain after the payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        let header = Header::decode(data)?;
        let object_id_end = HEADER_SIZE + header.object_id_len as usize;
        let payload_end = object_id_end + header.payload_len as usize;
        if data.len() < payload_end {
            return Err(WireError::TruncatedEnvelope);
        }
        if data.len() > payload_end {
            return Err(WireError::TrailingBytes);
        }
        Self::decode_parts(
            &header,
            &data[HEADER_SIZE..object_id_end],
            &data[object_id_end..],
        )
    }

    /// Assemble a message from a header and the exact object-id/payload
    /// slices the header declared.
    pub fn decode_parts(
        header: &Header,
        object_id: &[u8],
        payload: &[u8],
    ) -> Result<Self, WireError> {
        let object_id = std::str::from_utf8(object_id)
            .map_err(|_| WireError::InvalidUtf8("object id"))?
            .to_string();

        let mut metadata = Vec::new();
        let mut components = Vec::new();
        let mut workflows = Vec::new();

        let mut offset = 0;
        while offset < payload.len() {
            if payload.len() - offset < 5 {
                return Err(WireError::TruncatedBlockHeader(offset));
            }
            let mut b = &payload[offset..];
            let block_type = b.get_u8();
            let block_len = b.get_u32() as usize;
            offset += 5;
            if payload.len() - offset < block_len {
                return Err(WireError::TruncatedBlockBody(offset));
            }
            let body = &payload[offset..offset + block_len];
            offset += block_len;

            match block_type {
                BLOCK_METADATA => metadata.push(decode_json_object(body)?),
                BLOCK_WORKFLOW => workflows.push(decode_json_object(body)?),
                BLOCK_COMPONENT => components.push(ComponentBlock::decode_body(body)?),
                other => return Err(WireError::UnknownBlockType(other)),
            }
        }

        Ok(Self {
            msg_type: header.msg_type,
            op_code: header.op_code,
            flags: header.flags,
            object_id,
            metadata,
            components,
            workflows,
        })
    }
}

fn put_json_block(buf: &mut BytesMut, block_type: u8, value: &Value) -> Result<(), WireError> {
    let body = serde_json::to_vec(value)?;
    let body_len = u32::try_from(body.len()).map_err(|_| WireError::Oversized("JSON block"))?;
    buf.put_u8(block_type);
    buf.put_u32(body_len);
    buf.put_slice(&body);
    Ok(())
}

fn decode_json_object(body: &[u8]) -> Result<Value, WireError> {
    let value: Value = serde_json::from_slice(body)?;
    if !value.is_object() {
        return Err(WireError::NotAJsonObject);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_message() -> Message {
        let mut msg = Message::response(OP_RETRIEVE, "Q123");
        msg.metadata.push(json!({"operation": "retrieve", "note": "größe π"}));
        msg.components.push(ComponentBlock::new(
            "primary",
            "application/pdf",
            &b"%PDF-1.7 fake"[..],
        ));
        msg.components
            .push(ComponentBlock::new("thumb", "", &b"\x00\x01\x02"[..]));
        msg.workflows
            .push(json!({"workflow": "equation_extraction", "params": {}}));
        msg
    }

    #[test]
    fn message_round_trips_bit_exactly() {
        let msg = sample_message();
        let encoded = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn bytes_round_trip_bit_exactly() {
        let encoded = sample_message().to_bytes().unwrap();
        let reencoded = Message::from_bytes(&encoded).unwrap().to_bytes().unwrap();
        assert_eq!(reencoded, encoded);
    }

    #[test]
    fn every_truncation_fails() {
        let encoded = sample_message().to_bytes().unwrap();
        for cut in 0..encoded.len() {
            assert!(
                Message::from_bytes(&encoded[..cut]).is_err(),
                "prefix of {cut} bytes decoded successfully"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut encoded = sample_message().to_bytes().unwrap().to_vec();
        encoded.push(0);
        assert!(matches!(
            Message::from_bytes(&encoded),
            Err(WireError::TrailingBytes)
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut encoded = sample_message().to_bytes().unwrap().to_vec();
        for version in [0x00, 0x01, 0x03, 0xFF] {
            encoded[0] = version;
            assert!(matches!(
                Message::from_bytes(&encoded),
                Err(WireError::UnsupportedVersion(v)) if v == version
            ));
        }
    }

    #[test]
    fn component_content_length_mismatch_is_rejected() {
        // id_len=1 "a", media_len=0, content_len=5 but only 2 content bytes.
        let body = [0u8, 1, b'a', 0, 0, 0, 0, 0, 5, b'x', b'y'];
        let mut payload = vec![BLOCK_COMPONENT];
        payload.extend_from_slice(&(body.len() as u32).to_be_bytes());
        payload.extend_from_slice(&body);
        let header = Header {
            version: DOIP_VERSION,
            msg_type: MSG_TYPE_RESPONSE,
            op_code: OP_RETRIEVE,
            flags: 0,
            object_id_len: 0,
            payload_len: payload.len() as u32,
        };
        assert!(matches!(
            Message::decode_parts(&header, b"", &payload),
            Err(WireError::ComponentLengthMismatch)
        ));
    }

    #[test]
    fn component_with_undeclared_content_is_rejected() {
        // Declared content_len shorter than the remaining bytes also violates
        // the exact-body invariant.
        let body = [0u8, 1, b'a', 0, 0, 0, 0, 0, 1, b'x', b'y'];
        let mut payload = vec![BLOCK_COMPONENT];
        payload.extend_from_slice(&(body.len() as u32).to_be_bytes());
        payload.extend_from_slice(&body);
        let header = Header {
            version: DOIP_VERSION,
            msg_type: MSG_TYPE_RESPONSE,
            op_code: OP_RETRIEVE,
            flags: 0,
            object_id_len: 0,
            payload_len: payload.len() as u32,
        };
        assert!(matches!(
            Message::decode_parts(&header, b"", &payload),
            Err(WireError::ComponentLengthMismatch)
        ));
    }

    #[test]
    fn unknown_block_type_is_fatal() {
        let payload = [0x09u8, 0, 0, 0, 0];
        let header = Header {
            version: DOIP_VERSION,
            msg_type: MSG_TYPE_REQUEST,
            op_code: OP_HELLO,
            flags: 0,
            object_id_len: 0,
            payload_len: payload.len() as u32,
        };
        assert!(matches!(
            Message::decode_parts(&header, b"", &payload),
            Err(WireError::UnknownBlockType(0x09))
        ));
    }

    #[test]
    fn metadata_must_be_a_json_object() {
        let body = b"[1,2,3]";
        let mut payload = vec![BLOCK_METADATA];
        payload.extend_from_slice(&(body.len() as u32).to_be_bytes());
        payload.extend_from_slice(body);
        let header = Header {
            version: DOIP_VERSION,
            msg_type: MSG_TYPE_REQUEST,
            op_code: OP_HELLO,
            flags: 0,
            object_id_len: 0,
            payload_len: payload.len() as u32,
        };
        assert!(matches!(
            Message::decode_parts(&header, b"", &payload),
            Err(WireError::NotAJsonObject)
        ));
    }

    #[test]
    fn metadata_with_invalid_json_is_rejected() {
        let body = b"{not json";
        let mut payload = vec![BLOCK_METADATA];
        payload.extend_from_slice(&(body.len() as u32).to_be_bytes());
        payload.extend_from_slice(body);
        let header = Header {
            version: DOIP_VERSION,
            msg_type: MSG_TYPE_REQUEST,
            op_code: OP_HELLO,
            flags: 0,
            object_id_len: 0,
            payload_len: payload.len() as u32,
        };
        assert!(matches!(
            Message::decode_parts(&header, b"", &payload),
            Err(WireError::InvalidJson(_))
        ));
    }

    #[test]
    fn blocks_decode_in_any_order() {
        // workflow before metadata before component
        let mut payload = BytesMut::new();
        put_json_block(&mut payload, BLOCK_WORKFLOW, &json!({"workflow": "w"})).unwrap();
        put_json_block(&mut payload, BLOCK_METADATA, &json!({"operation": "x"})).unwrap();
        let comp = ComponentBlock::new("c", "text/plain", &b"hi"[..]);
        payload.put_u8(BLOCK_COMPONENT);
        payload.put_u32(comp.body_len() as u32);
        comp.encode_body(&mut payload).unwrap();

        let header = Header {
            version: DOIP_VERSION,
            msg_type: MSG_TYPE_RESPONSE,
            op_code: OP_INVOKE,
            flags: 0,
            object_id_len: 2,
            payload_len: payload.len() as u32,
        };
        let msg = Message::decode_parts(&header, b"Q1", &payload).unwrap();
        assert_eq!(msg.metadata.len(), 1);
        assert_eq!(msg.workflows.len(), 1);
        assert_eq!(msg.components, vec![comp]);
    }

    #[test]
    fn empty_media_type_round_trips_and_defaults() {
        let block = ComponentBlock::new("c", "", &b"data"[..]);
        assert_eq!(block.media_type_or_default(), DEFAULT_MEDIA_TYPE);
        let mut msg = Message::response(OP_RETRIEVE, "Q1");
        msg.components.push(block.clone());
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.components[0].media_type, "");
    }

    #[test]
    fn non_ascii_json_is_not_escaped() {
        let mut msg = Message::request(OP_HELLO, "");
        msg.metadata.push(json!({"note": "π"}));
        let encoded = msg.to_bytes().unwrap();
        // raw UTF-8 on the wire, no \u escape
        assert!(encoded.windows(2).any(|w| w == "π".as_bytes()));
        assert!(!encoded.windows(2).any(|w| w == br"\u"));
    }

    #[test]
    fn unknown_op_code_round_trips() {
        let mut msg = Message::request(0x99, "Q1");
        msg.metadata.push(json!({"operation": "hello"}));
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.op_code, 0x99);
    }
}
