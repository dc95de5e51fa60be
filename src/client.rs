//! The VexDB client: configuration resolution at construction, pooled
//! dispatch of RPC calls, and the handshake/compatibility machinery gating
//! version-sensitive operations.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{parse_endpoint, ChannelTuning, ClientConfig};
use crate::connection::ChannelFactory;
use crate::credentials::{self, SecurityMode};
use crate::pool::ChannelPool;
use crate::schema::{self, SchemaCatalog, SchemaTypes};
use crate::state::{self, ConnectionState, ConnectionStatus, Role};
use crate::types::{methods, CollectionSchema, ConnectRequest, ConnectResponse, Response, ServerInfo};
use crate::{Error, Result};

/// SDK identifier sent in the handshake
const SDK_NAME: &str = "vexdb-client-rust";

/// Default message raised when a version-sensitive operation hits an older
/// server and no fallback was supplied
const DEFAULT_INCOMPATIBLE: &str =
    "this operation is not supported by the connected server; \
     the client and server versions are mismatched";

/// Per-call request context: metadata layered over the client-wide map.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Headers attached to this call, overriding client-wide entries with
    /// the same name
    pub metadata: BTreeMap<String, String>,
}

impl CallContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach one metadata header to this call
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug)]
struct ClientInner {
    client_id: Uuid,
    username: String,
    timeout: Duration,
    security_mode: SecurityMode,
    pool: ChannelPool,
    state: ConnectionState,
    catalog: SchemaCatalog,
    schema_types: SchemaTypes,
    metadata: RwLock<BTreeMap<String, String>>,
    server_version: RwLock<Option<String>>,
}

/// A client for a VexDB server.
///
/// Construction is two-phase and synchronous: [`Client::build`] validates
/// the configuration, resolves credentials and loads the protocol schema,
/// failing with a configuration error before any network I/O. Channels are
/// dialed lazily on first use. The client is cheap to clone; clones share
/// the channel pool and connection state.
///
/// ```no_run
/// use vexdb_client::{Client, ClientConfig, Result};
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let client = Client::build(ClientConfig::new("https://db.example.com:19530"))?;
///     client.ping().await?;
///     println!("server: {:?}", client.server_info().await?);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Build a client from configuration. The address is validated first,
    /// then credentials are resolved (reading any configured TLS files) and
    /// the two schema files are loaded; any failure aborts construction so
    /// a client is never half-initialized.
    pub fn build(config: ClientConfig) -> Result<Self> {
        let endpoint = parse_endpoint(&config.address)?;
        let (security_mode, credentials) =
            credentials::resolve(&config.address, config.tls.as_ref(), config.ssl)?;
        let (catalog, schema_types) = schema::load(&config.schema_paths)?;
        let tuning = ChannelTuning::from_options(&config.channel_options)?;

        let server_name = config.tls.as_ref().and_then(|t| t.server_name.as_deref());
        let factory =
            ChannelFactory::new(&endpoint, server_name, credentials, tuning, config.timeout);
        let pool = ChannelPool::new(factory, config.pool_size);

        let mut metadata = BTreeMap::new();
        metadata.insert("client-id".to_string(), config.client_id.to_string());
        if !config.username.is_empty() {
            metadata.insert(
                "authorization".to_string(),
                format!("{}:{}", config.username, config.password),
            );
        }

        info!(
            "VexDB client configured for {} ({:?} transport, pool of {})",
            endpoint.authority, security_mode, pool.max_size()
        );
        Ok(Self {
            inner: Arc::new(ClientInner {
                client_id: config.client_id,
                username: config.username,
                timeout: config.timeout,
                security_mode,
                pool,
                state: ConnectionState::new(),
                catalog,
                schema_types,
                metadata: RwLock::new(metadata),
                server_version: RwLock::new(None),
            }),
        })
    }

    /// Convenience constructor from a bare address
    pub fn new(address: impl Into<String>) -> Result<Self> {
        Self::build(ClientConfig::new(address))
    }

    /// Security mode resolved at construction
    pub fn security_mode(&self) -> SecurityMode {
        self.inner.security_mode
    }

    /// Identifier of this client instance
    pub fn client_id(&self) -> Uuid {
        self.inner.client_id
    }

    /// Current connection status
    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.state.status()
    }

    /// Server version reported by the handshake, if one has completed
    pub fn server_version_cached(&self) -> Option<String> {
        self.inner
            .server_version
            .read()
            .expect("server version lock poisoned")
            .clone()
    }

    /// The resolved collection/field schema type descriptors
    pub fn schema_types(&self) -> &SchemaTypes {
        &self.inner.schema_types
    }

    /// The loaded schema catalog
    pub fn schema_catalog(&self) -> &SchemaCatalog {
        &self.inner.catalog
    }

    /// Snapshot of the client-wide metadata attached to every call
    pub fn global_metadata(&self) -> BTreeMap<String, String> {
        self.inner
            .metadata
            .read()
            .expect("metadata lock poisoned")
            .clone()
    }

    /// Set one client-wide metadata header
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .metadata
            .write()
            .expect("metadata lock poisoned")
            .insert(key.into(), value.into());
    }

    /// Remove one client-wide metadata header
    pub fn remove_metadata(&self, key: &str) {
        self.inner
            .metadata
            .write()
            .expect("metadata lock poisoned")
            .remove(key);
    }

    /// Forget a settled handshake outcome so the next gated call probes the
    /// server again
    pub fn reset_connection(&self) {
        self.inner.state.reset();
    }

    // ========================================================================
    // Handshake and compatibility
    // ========================================================================

    /// Await the current or a new handshake probe. At most one probe is in
    /// flight regardless of how many callers arrive; every joined caller
    /// observes the same outcome. Returns the settled status for Connected
    /// and Unimplemented servers, and the underlying connectivity error for
    /// failed handshakes.
    pub async fn ensure_connected(&self) -> Result<ConnectionStatus> {
        match self.inner.state.begin_probe() {
            Role::Settled(status, failure) => Self::settled(status, failure),
            Role::Join(rx) => {
                state::wait_settled(rx).await;
                let (status, failure) = self.inner.state.snapshot();
                Self::settled(status, failure)
            }
            Role::Lead(tx, rx) => {
                debug!("starting handshake probe");
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    Self::run_probe(inner, tx).await;
                });
                state::wait_settled(rx).await;
                let (status, failure) = self.inner.state.snapshot();
                Self::settled(status, failure)
            }
        }
    }

    fn settled(status: ConnectionStatus, failure: Option<String>) -> Result<ConnectionStatus> {
        match status {
            ConnectionStatus::Connected | ConnectionStatus::Unimplemented => Ok(status),
            ConnectionStatus::Failed => Err(Error::Connection(
                failure.unwrap_or_else(|| "handshake failed".to_string()),
            )),
            ConnectionStatus::NotConnected | ConnectionStatus::Connecting => Err(
                Error::connection("connection state changed while awaiting the handshake"),
            ),
        }
    }

    /// Runs detached so a cancelled caller cannot strand the state machine
    /// in Connecting; the connect timeout bounds the whole attempt.
    async fn run_probe(inner: Arc<ClientInner>, tx: tokio::sync::watch::Sender<bool>) {
        let outcome = timeout(inner.timeout, Self::probe(&inner)).await;
        let (status, failure) = match outcome {
            Ok(Ok(version)) => {
                info!("connected to VexDB server {version}");
                *inner
                    .server_version
                    .write()
                    .expect("server version lock poisoned") = Some(version);
                (ConnectionStatus::Connected, None)
            }
            Ok(Err(Error::UnknownMethod(_))) => {
                info!("server predates the handshake RPC, continuing degraded");
                (ConnectionStatus::Unimplemented, None)
            }
            Ok(Err(e)) => {
                warn!("handshake failed: {e}");
                (ConnectionStatus::Failed, Some(e.to_string()))
            }
            Err(_) => {
                let message = format!("handshake timed out after {:?}", inner.timeout);
                warn!("{message}");
                (ConnectionStatus::Failed, Some(message))
            }
        };
        inner.state.settle(status, failure, tx);
    }

    async fn probe(inner: &ClientInner) -> Result<String> {
        let mut channel = inner.pool.acquire().await?;
        let request = ConnectRequest {
            client_id: inner.client_id.to_string(),
            username: inner.username.clone(),
            sdk: SDK_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let payload = serde_json::to_value(&request)?;
        let metadata = inner
            .metadata
            .read()
            .expect("metadata lock poisoned")
            .clone();
        let result = channel.invoke(methods::CONNECT, &metadata, &payload).await;
        if let Err(e) = &result {
            if e.is_transport() {
                channel.invalidate();
            }
        }
        let hello: ConnectResponse = result?.json()?;
        Ok(hello.server_version)
    }

    /// Block a version-sensitive operation until server capability is
    /// known. Connected servers pass; Unimplemented servers raise an
    /// incompatibility error with `message` (or a default explanation);
    /// failed handshakes propagate their connectivity error instead.
    pub async fn ensure_compatible(&self, message: Option<&str>) -> Result<()> {
        match self.ensure_connected().await? {
            ConnectionStatus::Connected => Ok(()),
            ConnectionStatus::Unimplemented => Err(Error::Incompatible(
                message.unwrap_or(DEFAULT_INCOMPATIBLE).to_string(),
            )),
            _ => Err(Error::connection("connection is not established")),
        }
    }

    /// Like [`ensure_compatible`](Self::ensure_compatible), but degrades
    /// instead of failing: against an Unimplemented server the fallback
    /// runs and its result is returned as `Some`; against a Connected
    /// server nothing runs and `None` is returned.
    pub async fn ensure_compatible_or<T, F, Fut>(
        &self,
        fallback: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.ensure_connected().await? {
            ConnectionStatus::Connected => Ok(None),
            ConnectionStatus::Unimplemented => fallback().await.map(Some),
            _ => Err(Error::connection("connection is not established")),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Invoke one RPC with the client-wide metadata
    pub async fn call(&self, method: &str, payload: Value) -> Result<Response> {
        self.call_with_context(method, payload, &CallContext::default())
            .await
    }

    /// Invoke one RPC. Waits out an in-flight handshake (without starting
    /// one), checks out a channel, performs the call and releases the
    /// channel - invalid when the call failed at the transport level, so a
    /// broken channel is never re-offered to the next caller.
    pub async fn call_with_context(
        &self,
        method: &str,
        payload: Value,
        ctx: &CallContext,
    ) -> Result<Response> {
        if let Some(rx) = self.inner.state.join_signal() {
            state::wait_settled(rx).await;
        }
        let mut channel = self.inner.pool.acquire().await?;
        let metadata = self.merged_metadata(ctx);
        let result = channel.invoke(method, &metadata, &payload).await;
        if let Err(e) = &result {
            if e.is_transport() {
                channel.invalidate();
            }
        }
        result
    }

    fn merged_metadata(&self, ctx: &CallContext) -> BTreeMap<String, String> {
        let mut metadata = self.global_metadata();
        for (key, value) in &ctx.metadata {
            metadata.insert(key.clone(), value.clone());
        }
        metadata
    }

    // ========================================================================
    // Thin RPC wrappers
    // ========================================================================

    /// Ping the server
    pub async fn ping(&self) -> Result<()> {
        self.call(methods::PING, Value::Null).await.map(|_| ())
    }

    /// Server build and runtime information
    pub async fn server_info(&self) -> Result<ServerInfo> {
        let response = self.call(methods::SERVER_INFO, Value::Null).await?;
        Ok(response.json()?)
    }

    /// Server version string. Version-sensitive: older servers lack this
    /// RPC, so the call passes the compatibility gate first.
    pub async fn server_version(&self) -> Result<String> {
        self.ensure_compatible(Some(
            "the connected server does not support the ServerVersion RPC",
        ))
        .await?;
        #[derive(Deserialize)]
        struct VersionResponse {
            version: String,
        }
        let response = self.call(methods::SERVER_VERSION, Value::Null).await?;
        let decoded: VersionResponse = response.json()?;
        Ok(decoded.version)
    }

    /// Create a collection. Each field definition is hand-encoded as a
    /// nested binary sub-message via the resolved field schema type.
    pub async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let mut encoded = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let value = serde_json::to_value(field)?;
            let bytes = self.inner.schema_types.field.encode(&value)?;
            encoded.push(hex::encode(bytes));
        }
        let payload = json!({
            "collection": schema.name,
            "description": schema.description,
            "schema": encoded,
        });
        self.call(methods::CREATE_COLLECTION, payload).await.map(|_| ())
    }

    /// Describe a collection. The response is validated against the
    /// resolved collection schema type before decoding.
    pub async fn describe_collection(&self, name: &str) -> Result<CollectionSchema> {
        let response = self
            .call(methods::DESCRIBE_COLLECTION, json!({ "collection": name }))
            .await?;
        let value: Value = response.json()?;
        self.inner.schema_types.collection.check(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Drop a collection
    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        self.call(methods::DROP_COLLECTION, json!({ "collection": name }))
            .await
            .map(|_| ())
    }

    /// List collection names
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct ListResponse {
            collections: Vec<String>,
        }
        let response = self.call(methods::LIST_COLLECTIONS, Value::Null).await?;
        let decoded: ListResponse = response.json()?;
        Ok(decoded.collections)
    }

    /// Per-collection statistics. Version-sensitive: passes the
    /// compatibility gate first.
    pub async fn collection_stats(&self, name: &str) -> Result<BTreeMap<String, u64>> {
        self.ensure_compatible(Some(
            "the connected server does not support the CollectionStats RPC",
        ))
        .await?;
        #[derive(Deserialize)]
        struct StatsResponse {
            stats: BTreeMap<String, u64>,
        }
        let response = self
            .call(methods::COLLECTION_STATS, json!({ "collection": name }))
            .await?;
        let decoded: StatsResponse = response.json()?;
        Ok(decoded.stats)
    }
}
