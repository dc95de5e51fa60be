//! # VexDB Client
//!
//! Official Rust client for VexDB - a remote vector database reachable over
//! the VexDB binary RPC protocol.
//!
//! ## Features
//!
//! - **Channel Pooling** - bounded elastic pool of framed connections,
//!   created on demand and revalidated before reuse
//! - **TLS** - plaintext, one-way (server-authenticated) or mutual TLS,
//!   selected from the address scheme and the TLS configuration block
//! - **Capability Tracking** - a single-flight handshake probes the server
//!   once and gates version-sensitive operations behind the result
//! - **Schema-Aware Payloads** - collection and field schema types are
//!   resolved from bundled interface-description files and used to encode
//!   nested sub-messages
//!
//! ## Example
//! ```no_run
//! use vexdb_client::{Client, ClientConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::build(ClientConfig::new("https://db.example.com:19530"))?;
//!
//!     client.ping().await?;
//!     for name in client.list_collections().await? {
//!         println!("collection: {name}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

mod client;
mod config;
mod connection;
mod credentials;
mod error;
mod pool;
mod schema;
mod state;
mod types;

pub use client::{CallContext, Client};
pub use config::{
    default_channel_options, options, ChannelTuning, ClientConfig, OptionValue, SchemaPaths,
    TlsConfig, DEFAULT_POOL_SIZE, DEFAULT_TIMEOUT,
};
pub use credentials::SecurityMode;
pub use error::Error;
pub use schema::{
    load as load_schema, FieldDescriptor, FieldKind, MethodDescriptor, SchemaCatalog, SchemaTypes,
    TypeDescriptor, COLLECTION_SCHEMA_TYPE, FIELD_SCHEMA_TYPE,
};
pub use state::ConnectionStatus;
pub use types::{
    methods, CollectionSchema, ConnectRequest, ConnectResponse, DataType, FieldSchema,
    ProtocolError, Request, RequestHeader, Response, ResponseHeader, ServerInfo, StatusCode,
    PROTOCOL_VERSION, REQUEST_HEADER_LEN, RESPONSE_HEADER_LEN,
};

/// Custom result type for VexDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Re-export of the `bytes` crate for convenience
pub use bytes;

/// Re-export of the `tracing` crate for convenience
pub use tracing;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_conversion() {
        // io::Error converts into the transport class
        let io_error = std::io::Error::new(std::io::ErrorKind::Other, "test");
        let error: Error = io_error.into();
        assert!(matches!(error, Error::Io(_)));
        assert!(error.is_transport());

        // incompatibility is its own failure kind, distinguishable from
        // connectivity
        let error = Error::Incompatible("old server".to_string());
        assert!(!error.is_transport());
    }
}
