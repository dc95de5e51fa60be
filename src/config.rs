//! Client configuration: target address, credentials, TLS material paths,
//! channel tuning options and schema file overrides.
//!
//! Configuration is resolved once, at [`Client::build`](crate::Client::build)
//! time, and is immutable afterwards.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::{Error, Result};

/// Default per-request (and handshake) timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default channel pool bound
pub const DEFAULT_POOL_SIZE: usize = 10;

/// TLS configuration for client connections
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Path to the root certificate file. Presence of this path selects
    /// mutual TLS regardless of the address scheme or ssl flag.
    pub root_cert_path: Option<String>,
    /// Path to the client private key file (for mutual TLS)
    pub client_key_path: Option<String>,
    /// Path to the client certificate chain file (for mutual TLS)
    pub cert_chain_path: Option<String>,
    /// Server name override for SNI
    pub server_name: Option<String>,
    /// Accept invalid certificates (for testing only)
    pub accept_invalid_certs: bool,
}

impl TlsConfig {
    /// Create an empty TLS config (one-way TLS, server trust only)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root certificate path, selecting mutual TLS
    pub fn with_root_cert(mut self, path: impl Into<String>) -> Self {
        self.root_cert_path = Some(path.into());
        self
    }

    /// Set the client certificate chain and private key paths
    pub fn with_client_identity(
        mut self,
        cert_chain_path: impl Into<String>,
        key_path: impl Into<String>,
    ) -> Self {
        self.cert_chain_path = Some(cert_chain_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Override the server name used for SNI and certificate verification
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Accept invalid certificates (for testing only)
    pub fn accept_invalid_certs(mut self) -> Self {
        self.accept_invalid_certs = true;
        self
    }
}

/// Value of a single channel tuning option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// Boolean option
    Bool(bool),
    /// Integer option
    Int(u64),
}

/// Channel option keys understood by the transport
pub mod options {
    /// Maximum frame size in bytes; 0 means unlimited
    pub const MAX_FRAME_BYTES: &str = "max_frame_bytes";
    /// Idle interval after which a pooled channel is ping-probed before reuse
    pub const KEEPALIVE_SECS: &str = "keepalive_secs";
    /// Whether idle channels are probed (kept alive) rather than discarded
    pub const KEEPALIVE_WHILE_IDLE: &str = "keepalive_while_idle";
    /// Whether the pool silently replaces a channel that fails its probe
    pub const RETRY_ENABLED: &str = "retry_enabled";
    /// TCP_NODELAY on the underlying socket
    pub const NODELAY: &str = "nodelay";
}

/// Built-in channel option defaults. User-supplied options are merged over
/// these; unknown keys are rejected at construction.
pub fn default_channel_options() -> BTreeMap<String, OptionValue> {
    BTreeMap::from([
        (options::MAX_FRAME_BYTES.to_string(), OptionValue::Int(0)),
        (options::KEEPALIVE_SECS.to_string(), OptionValue::Int(30)),
        (
            options::KEEPALIVE_WHILE_IDLE.to_string(),
            OptionValue::Bool(true),
        ),
        (options::RETRY_ENABLED.to_string(), OptionValue::Bool(true)),
        (options::NODELAY.to_string(), OptionValue::Bool(true)),
    ])
}

/// Typed view of the merged channel options, consumed by the channel
/// factory and the pool.
#[derive(Debug, Clone)]
pub struct ChannelTuning {
    /// Maximum frame size accepted on reads
    pub max_frame_bytes: usize,
    /// Idle interval after which a pooled channel is probed before reuse
    pub keepalive: Duration,
    /// Probe idle channels instead of discarding them
    pub keepalive_while_idle: bool,
    /// Silently replace a channel that fails its idle probe
    pub retry_enabled: bool,
    /// TCP_NODELAY
    pub nodelay: bool,
}

impl ChannelTuning {
    /// Merge user options over the built-in defaults and interpret them.
    pub fn from_options(user: &BTreeMap<String, OptionValue>) -> Result<Self> {
        let mut merged = default_channel_options();
        for (key, value) in user {
            match merged.get(key) {
                Some(existing) => {
                    if std::mem::discriminant(existing) != std::mem::discriminant(value) {
                        return Err(Error::config(format!(
                            "channel option `{key}` has the wrong type"
                        )));
                    }
                }
                None => {
                    return Err(Error::config(format!("unknown channel option `{key}`")));
                }
            }
            merged.insert(key.clone(), value.clone());
        }

        let int = |key: &str| match merged.get(key) {
            Some(OptionValue::Int(v)) => *v,
            _ => 0,
        };
        let flag = |key: &str| matches!(merged.get(key), Some(OptionValue::Bool(true)));

        let max_frame = int(options::MAX_FRAME_BYTES);
        Ok(Self {
            max_frame_bytes: if max_frame == 0 {
                usize::MAX
            } else {
                max_frame as usize
            },
            keepalive: Duration::from_secs(int(options::KEEPALIVE_SECS)),
            keepalive_while_idle: flag(options::KEEPALIVE_WHILE_IDLE),
            retry_enabled: flag(options::RETRY_ENABLED),
            nodelay: flag(options::NODELAY),
        })
    }
}

/// Override paths for the two bundled schema files
#[derive(Debug, Clone, Default)]
pub struct SchemaPaths {
    /// Path to the data-type schema file; bundled default when `None`
    pub types_path: Option<PathBuf>,
    /// Path to the service schema file; bundled default when `None`
    pub service_path: Option<PathBuf>,
}

/// Full client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Target address, e.g. `"https://db.example.com:19530"` or `"host:1"`.
    /// Mandatory and non-empty.
    pub address: String,
    /// Request one-way TLS even when the address scheme is not secure
    pub ssl: bool,
    /// Username for authentication; empty when unauthenticated
    pub username: String,
    /// Password for authentication; empty when unauthenticated
    pub password: String,
    /// TLS material paths and verification options
    pub tls: Option<TlsConfig>,
    /// Channel tuning options, merged over built-in defaults
    pub channel_options: BTreeMap<String, OptionValue>,
    /// Unique identifier of this client instance
    pub client_id: Uuid,
    /// Per-request and handshake timeout
    pub timeout: Duration,
    /// Channel pool bound
    pub pool_size: usize,
    /// Schema file overrides
    pub schema_paths: SchemaPaths,
}

impl ClientConfig {
    /// Create a configuration for the given address with defaults everywhere
    /// else
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ssl: false,
            username: String::new(),
            password: String::new(),
            tls: None,
            channel_options: BTreeMap::new(),
            client_id: Uuid::new_v4(),
            timeout: DEFAULT_TIMEOUT,
            pool_size: DEFAULT_POOL_SIZE,
            schema_paths: SchemaPaths::default(),
        }
    }

    /// Positional-parameter convenience constructor
    pub fn with_params(
        address: impl Into<String>,
        ssl: bool,
        username: impl Into<String>,
        password: impl Into<String>,
        channel_options: BTreeMap<String, OptionValue>,
    ) -> Self {
        let mut config = Self::new(address);
        config.ssl = ssl;
        config.username = username.into();
        config.password = password.into();
        config.channel_options = channel_options;
        config
    }

    /// Request one-way TLS regardless of the address scheme
    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Set the username and password
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the TLS configuration block
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set one channel tuning option
    pub fn with_channel_option(mut self, key: impl Into<String>, value: OptionValue) -> Self {
        self.channel_options.insert(key.into(), value);
        self
    }

    /// Set an explicit client identifier
    pub fn with_client_id(mut self, client_id: Uuid) -> Self {
        self.client_id = client_id;
        self
    }

    /// Set the request and handshake timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the request and handshake timeout in milliseconds
    pub fn with_timeout_millis(mut self, millis: u64) -> Self {
        self.timeout = Duration::from_millis(millis);
        self
    }

    /// Set the channel pool bound
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Override the bundled schema file paths
    pub fn with_schema_paths(mut self, schema_paths: SchemaPaths) -> Self {
        self.schema_paths = schema_paths;
        self
    }
}

/// Parsed form of the configured address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `host:port` pair the socket dials
    pub authority: String,
    /// Host part, used for SNI when no server-name override is given
    pub host: String,
}

/// Validate the configured address and split it into dialable parts. Runs
/// before any file or network I/O so an empty address fails immediately.
pub(crate) fn parse_endpoint(address: &str) -> Result<Endpoint> {
    if address.is_empty() {
        return Err(Error::config("address must not be empty"));
    }
    let authority = address
        .strip_prefix("https://")
        .or_else(|| address.strip_prefix("http://"))
        .unwrap_or(address)
        .trim_end_matches('/');
    if authority.is_empty() {
        return Err(Error::config(format!("invalid address `{address}`")));
    }
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| Error::config(format!("address `{address}` is missing a port")))?;
    if host.is_empty() || port.is_empty() || port.parse::<u16>().is_err() {
        return Err(Error::config(format!("invalid address `{address}`")));
    }
    Ok(Endpoint {
        authority: authority.to_string(),
        host: host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_scheme() {
        let ep = parse_endpoint("https://db.example.com:19530").unwrap();
        assert_eq!(ep.authority, "db.example.com:19530");
        assert_eq!(ep.host, "db.example.com");

        let ep = parse_endpoint("host:1").unwrap();
        assert_eq!(ep.authority, "host:1");
    }

    #[test]
    fn endpoint_rejects_bad_addresses() {
        assert!(matches!(parse_endpoint(""), Err(Error::Config(_))));
        assert!(matches!(parse_endpoint("http://"), Err(Error::Config(_))));
        assert!(matches!(parse_endpoint("hostonly"), Err(Error::Config(_))));
        assert!(matches!(parse_endpoint("host:notaport"), Err(Error::Config(_))));
    }

    #[test]
    fn tuning_defaults() {
        let tuning = ChannelTuning::from_options(&BTreeMap::new()).unwrap();
        assert_eq!(tuning.max_frame_bytes, usize::MAX);
        assert_eq!(tuning.keepalive, Duration::from_secs(30));
        assert!(tuning.keepalive_while_idle);
        assert!(tuning.retry_enabled);
        assert!(tuning.nodelay);
    }

    #[test]
    fn tuning_merges_user_options() {
        let user = BTreeMap::from([
            (
                options::MAX_FRAME_BYTES.to_string(),
                OptionValue::Int(16 * 1024 * 1024),
            ),
            (options::RETRY_ENABLED.to_string(), OptionValue::Bool(false)),
        ]);
        let tuning = ChannelTuning::from_options(&user).unwrap();
        assert_eq!(tuning.max_frame_bytes, 16 * 1024 * 1024);
        assert!(!tuning.retry_enabled);
        // untouched keys keep their defaults
        assert!(tuning.keepalive_while_idle);
    }

    #[test]
    fn tuning_rejects_unknown_and_mistyped_options() {
        let unknown = BTreeMap::from([("bogus".to_string(), OptionValue::Bool(true))]);
        assert!(matches!(
            ChannelTuning::from_options(&unknown),
            Err(Error::Config(_))
        ));

        let mistyped = BTreeMap::from([(
            options::KEEPALIVE_SECS.to_string(),
            OptionValue::Bool(true),
        )]);
        assert!(matches!(
            ChannelTuning::from_options(&mistyped),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn config_defaults() {
        let a = ClientConfig::new("localhost:19530");
        let b = ClientConfig::new("localhost:19530");
        assert_eq!(a.timeout, DEFAULT_TIMEOUT);
        assert_eq!(a.pool_size, DEFAULT_POOL_SIZE);
        assert!(a.username.is_empty());
        // client ids are freshly generated, not shared
        assert_ne!(a.client_id, b.client_id);
    }
}
