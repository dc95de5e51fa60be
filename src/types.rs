//! Wire protocol types for VexDB client-server communication.
//!
//! The VexDB protocol is a binary framed protocol: fixed little-endian
//! headers followed by a method name and JSON-encoded metadata/payload
//! sections. Requests carry a fully-qualified method name so the transport
//! stays generic over the service definition.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for protocol encode/decode operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Invalid frame format
    #[error("Invalid frame format: {0}")]
    InvalidFormat(String),

    /// Invalid status code byte
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u8),

    /// Frame larger than the configured limit
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Request header size in bytes
pub const REQUEST_HEADER_LEN: usize = 16;

/// Response header size in bytes
pub const RESPONSE_HEADER_LEN: usize = 16;

/// Fully-qualified RPC method names understood by this client. The service
/// schema file must declare every one of these.
pub mod methods {
    /// Initial handshake / capability probe
    pub const CONNECT: &str = "vexdb.api.Connect";
    /// Liveness probe
    pub const PING: &str = "vexdb.api.Ping";
    /// Server build and runtime information
    pub const SERVER_INFO: &str = "vexdb.api.ServerInfo";
    /// Server version string (newer servers only)
    pub const SERVER_VERSION: &str = "vexdb.api.ServerVersion";
    /// Create a collection
    pub const CREATE_COLLECTION: &str = "vexdb.api.CreateCollection";
    /// Describe a collection
    pub const DESCRIBE_COLLECTION: &str = "vexdb.api.DescribeCollection";
    /// Drop a collection
    pub const DROP_COLLECTION: &str = "vexdb.api.DropCollection";
    /// List collection names
    pub const LIST_COLLECTIONS: &str = "vexdb.api.ListCollections";
    /// Per-collection statistics (newer servers only)
    pub const COLLECTION_STATS: &str = "vexdb.api.CollectionStats";

    /// Every method this client may dispatch; validated against the loaded
    /// service schema at construction.
    pub const ALL: &[&str] = &[
        CONNECT,
        PING,
        SERVER_INFO,
        SERVER_VERSION,
        CREATE_COLLECTION,
        DESCRIBE_COLLECTION,
        DROP_COLLECTION,
        LIST_COLLECTIONS,
        COLLECTION_STATS,
    ];
}

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Operation succeeded
    Ok = 0x00,
    /// General error
    Error = 0x01,
    /// Method name not recognized by the server
    UnknownMethod = 0x02,
    /// Authentication required or rejected
    Unauthorized = 0x03,
    /// Named entity not found
    NotFound = 0x04,
    /// Named entity already exists
    AlreadyExists = 0x05,
    /// Malformed request payload
    InvalidArgument = 0x06,
    /// Internal server error
    Internal = 0x07,
}

impl TryFrom<u8> for StatusCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(StatusCode::Ok),
            0x01 => Ok(StatusCode::Error),
            0x02 => Ok(StatusCode::UnknownMethod),
            0x03 => Ok(StatusCode::Unauthorized),
            0x04 => Ok(StatusCode::NotFound),
            0x05 => Ok(StatusCode::AlreadyExists),
            0x06 => Ok(StatusCode::InvalidArgument),
            0x07 => Ok(StatusCode::Internal),
            _ => Err(ProtocolError::InvalidStatusCode(value)),
        }
    }
}

/// Request header (16 bytes, little-endian)
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RequestHeader {
    /// Protocol version
    pub version: u8,
    /// Request flags (reserved)
    pub flags: u8,
    /// Method name length in bytes
    pub method_len: u16,
    /// Client-local sequence ID
    pub seq: u32,
    /// Metadata section length in bytes
    pub metadata_len: u32,
    /// Payload section length in bytes
    pub payload_len: u32,
}

impl RequestHeader {
    /// Create a new request header
    pub fn new(seq: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: 0,
            method_len: 0,
            seq,
            metadata_len: 0,
            payload_len: 0,
        }
    }

    /// Set the section lengths
    pub fn with_lengths(mut self, method_len: u16, metadata_len: u32, payload_len: u32) -> Self {
        self.method_len = method_len;
        self.metadata_len = metadata_len;
        self.payload_len = payload_len;
        self
    }

    /// Parse a request header from exactly [`REQUEST_HEADER_LEN`] bytes
    pub fn parse(mut bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < REQUEST_HEADER_LEN {
            return Err(ProtocolError::InvalidFormat("request header too short".into()));
        }
        Ok(Self {
            version: bytes.get_u8(),
            flags: bytes.get_u8(),
            method_len: bytes.get_u16_le(),
            seq: bytes.get_u32_le(),
            metadata_len: bytes.get_u32_le(),
            payload_len: bytes.get_u32_le(),
        })
    }

    /// Total length of the sections following the header
    pub fn body_len(&self) -> usize {
        self.method_len as usize + self.metadata_len as usize + self.payload_len as usize
    }
}

/// A single RPC request frame
#[derive(Debug, Clone)]
pub struct Request {
    /// Request header
    pub header: RequestHeader,
    /// Fully-qualified method name
    pub method: String,
    /// JSON-encoded metadata map
    pub metadata: Bytes,
    /// JSON-encoded payload
    pub payload: Bytes,
}

impl Request {
    /// Build a request frame from a method name, metadata map and payload
    pub fn new(
        seq: u32,
        method: &str,
        metadata: &BTreeMap<String, String>,
        payload: &serde_json::Value,
    ) -> Result<Self, ProtocolError> {
        if method.len() > u16::MAX as usize {
            return Err(ProtocolError::InvalidFormat("method name too long".into()));
        }
        let metadata = serde_json::to_vec(metadata)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        let payload = serde_json::to_vec(payload)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            header: RequestHeader::new(seq).with_lengths(
                method.len() as u16,
                metadata.len() as u32,
                payload.len() as u32,
            ),
            method: method.to_string(),
            metadata: Bytes::from(metadata),
            payload: Bytes::from(payload),
        })
    }

    /// Serialize the request to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + self.header.body_len());

        buf.put_u8(self.header.version);
        buf.put_u8(self.header.flags);
        buf.put_u16_le(self.header.method_len);
        buf.put_u32_le(self.header.seq);
        buf.put_u32_le(self.header.metadata_len);
        buf.put_u32_le(self.header.payload_len);

        buf.extend_from_slice(self.method.as_bytes());
        buf.extend_from_slice(&self.metadata);
        buf.extend_from_slice(&self.payload);

        buf.freeze()
    }

    /// Deserialize a request from bytes (header plus body)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = RequestHeader::parse(bytes)?;
        let mut body = &bytes[REQUEST_HEADER_LEN..];
        if body.len() < header.body_len() {
            return Err(ProtocolError::InvalidFormat("truncated request body".into()));
        }
        let method_bytes = body.copy_to_bytes(header.method_len as usize);
        let method = String::from_utf8(method_bytes.to_vec())
            .map_err(|_| ProtocolError::InvalidFormat("method name is not UTF-8".into()))?;
        let metadata = body.copy_to_bytes(header.metadata_len as usize);
        let payload = body.copy_to_bytes(header.payload_len as usize);
        Ok(Self {
            header,
            method,
            metadata,
            payload,
        })
    }

    /// Decode the metadata section into a header map
    pub fn metadata_map(&self) -> Result<BTreeMap<String, String>, ProtocolError> {
        if self.metadata.is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&self.metadata)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

/// Response header (16 bytes, little-endian)
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ResponseHeader {
    /// Status code
    pub status: u8,
    /// Response flags (reserved)
    pub flags: u8,
    /// Reserved
    pub reserved: u16,
    /// Sequence number echoed from the request
    pub seq: u32,
    /// Payload length in bytes
    pub payload_len: u32,
    /// Extra data (reserved)
    pub extra: u32,
}

impl ResponseHeader {
    /// Create a new response header
    pub fn new(status: StatusCode, seq: u32) -> Self {
        Self {
            status: status as u8,
            flags: 0,
            reserved: 0,
            seq,
            payload_len: 0,
            extra: 0,
        }
    }

    /// Set the payload length
    pub fn with_payload_len(mut self, len: u32) -> Self {
        self.payload_len = len;
        self
    }

    /// Parse a response header from exactly [`RESPONSE_HEADER_LEN`] bytes
    pub fn parse(mut bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < RESPONSE_HEADER_LEN {
            return Err(ProtocolError::InvalidFormat("response header too short".into()));
        }
        let status = bytes.get_u8();
        StatusCode::try_from(status)?;
        Ok(Self {
            status,
            flags: bytes.get_u8(),
            reserved: bytes.get_u16_le(),
            seq: bytes.get_u32_le(),
            payload_len: bytes.get_u32_le(),
            extra: bytes.get_u32_le(),
        })
    }
}

/// A single RPC response frame
#[derive(Debug, Clone)]
pub struct Response {
    /// Response header
    pub header: ResponseHeader,
    /// JSON-encoded response payload
    pub payload: Bytes,
}

impl Response {
    /// Create a new response
    pub fn new(header: ResponseHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            header: header.with_payload_len(payload.len() as u32),
            payload,
        }
    }

    /// Create a success response
    pub fn ok(seq: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(ResponseHeader::new(StatusCode::Ok, seq), payload)
    }

    /// Create an error response carrying a message payload
    pub fn error(status: StatusCode, seq: u32, message: &str) -> Self {
        Self::new(
            ResponseHeader::new(status, seq),
            Bytes::from(message.as_bytes().to_vec()),
        )
    }

    /// Serialize the response to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + self.payload.len());

        buf.put_u8(self.header.status);
        buf.put_u8(self.header.flags);
        buf.put_u16_le(self.header.reserved);
        buf.put_u32_le(self.header.seq);
        buf.put_u32_le(self.header.payload_len);
        buf.put_u32_le(self.header.extra);

        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Deserialize a response from bytes (header plus payload)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = ResponseHeader::parse(bytes)?;
        let body = &bytes[RESPONSE_HEADER_LEN..];
        if body.len() < header.payload_len as usize {
            return Err(ProtocolError::InvalidFormat("invalid payload length".into()));
        }
        let payload = Bytes::copy_from_slice(&body[..header.payload_len as usize]);
        Ok(Self { header, payload })
    }

    /// Check if the response indicates success
    pub fn is_ok(&self) -> bool {
        matches!(StatusCode::try_from(self.header.status), Ok(StatusCode::Ok))
    }

    /// Get the status code
    pub fn status(&self) -> StatusCode {
        StatusCode::try_from(self.header.status).unwrap_or(StatusCode::Error)
    }

    /// Decode the payload as a typed value
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

// ============================================================================
// Handshake and administrative payloads
// ============================================================================

/// Payload of the initial handshake request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Unique identifier of this client instance
    pub client_id: String,
    /// Configured username (empty when unauthenticated)
    pub username: String,
    /// SDK identifier
    pub sdk: String,
    /// SDK version
    pub version: String,
}

/// Payload of the handshake response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// Server version string
    pub server_version: String,
    /// Server-assigned session identifier
    #[serde(default)]
    pub identifier: Option<String>,
}

/// Server information and runtime statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server version string
    pub version: String,
    /// When the server started
    pub started_at: DateTime<Utc>,
    /// Seconds since the server started
    pub uptime_seconds: u64,
    /// Number of collections currently defined
    pub collection_count: u64,
}

// ============================================================================
// Collection schema payloads
// ============================================================================

/// Scalar and vector data types a collection field may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Boolean scalar
    Bool,
    /// 64-bit signed integer scalar
    Int64,
    /// 32-bit float scalar
    Float,
    /// 64-bit float scalar
    Double,
    /// Variable-length string scalar
    VarChar,
    /// Dense float vector; requires a dimension
    FloatVector,
}

/// Definition of one field in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name
    pub name: String,
    /// Field data type
    pub data_type: DataType,
    /// Vector dimension; only meaningful for vector types
    #[serde(default)]
    pub dimension: Option<u32>,
    /// Whether this field is the primary key
    pub is_primary: bool,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

/// Definition of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Field definitions
    pub fields: Vec<FieldSchema>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trip() {
        let mut metadata = BTreeMap::new();
        metadata.insert("client-id".to_string(), "abc".to_string());
        let payload = json!({"collection": "docs"});
        let req = Request::new(7, methods::DESCRIBE_COLLECTION, &metadata, &payload).unwrap();
        let bytes = req.to_bytes();

        let decoded = Request::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.header.seq, 7);
        assert_eq!(decoded.method, methods::DESCRIBE_COLLECTION);
        assert_eq!(decoded.metadata_map().unwrap(), metadata);
        let value: serde_json::Value = serde_json::from_slice(&decoded.payload).unwrap();
        assert_eq!(value, payload);
    }

    #[test]
    fn response_round_trip() {
        let resp = Response::ok(9, Bytes::from(serde_json::to_vec(&json!({"x": 1})).unwrap()));
        let bytes = resp.to_bytes();
        let decoded = Response::from_bytes(&bytes).unwrap();
        assert!(decoded.is_ok());
        assert_eq!(decoded.header.seq, 9);
        let value: serde_json::Value = decoded.json().unwrap();
        assert_eq!(value, json!({"x": 1}));
    }

    #[test]
    fn error_response_carries_message() {
        let resp = Response::error(StatusCode::NotFound, 3, "no such collection");
        let decoded = Response::from_bytes(&resp.to_bytes()).unwrap();
        assert_eq!(decoded.status(), StatusCode::NotFound);
        assert_eq!(
            String::from_utf8_lossy(&decoded.payload),
            "no such collection"
        );
    }

    #[test]
    fn short_header_rejected() {
        assert!(ResponseHeader::parse(&[0u8; 4]).is_err());
        assert!(RequestHeader::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn invalid_status_code_rejected() {
        let mut bytes = Response::ok(1, Bytes::new()).to_bytes().to_vec();
        bytes[0] = 0xFF;
        assert!(Response::from_bytes(&bytes).is_err());
    }

    #[test]
    fn field_schema_serializes_snake_case_types() {
        let field = FieldSchema {
            name: "embedding".to_string(),
            data_type: DataType::FloatVector,
            dimension: Some(768),
            is_primary: false,
            description: String::new(),
        };
        let value = serde_json::to_value(&field).unwrap();
        assert_eq!(value["data_type"], "float_vector");
        let back: FieldSchema = serde_json::from_value(value).unwrap();
        assert_eq!(back, field);
    }
}
