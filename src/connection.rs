//! Live RPC channels: a framed connection to one VexDB endpoint, plain TCP
//! or TLS depending on the resolved credentials.
//!
//! A [`Channel`] exposes a single generic capability,
//! [`invoke`](Channel::invoke): serialize one request frame, read one
//! response frame, classify the wire status. All typed RPC wrappers are thin
//! facades over it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rustls::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::{debug, info};

use crate::config::{ChannelTuning, Endpoint};
use crate::credentials::Credentials;
use crate::types::{
    methods, Request, Response, ResponseHeader, StatusCode, RESPONSE_HEADER_LEN,
};
use crate::{Error, Result};

/// Default TCP connect timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection stream type (plain TCP or TLS)
#[derive(Debug)]
enum ConnectionStream {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl ConnectionStream {
    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            ConnectionStream::Plain(stream) => {
                stream.read_exact(buf).await?;
                Ok(())
            }
            ConnectionStream::Tls(stream) => {
                stream.read_exact(buf).await?;
                Ok(())
            }
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            ConnectionStream::Plain(stream) => stream.write_all(buf).await,
            ConnectionStream::Tls(stream) => stream.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ConnectionStream::Plain(stream) => stream.flush().await,
            ConnectionStream::Tls(stream) => stream.flush().await,
        }
    }
}

/// A live RPC channel to a VexDB server
#[derive(Debug)]
pub struct Channel {
    /// The underlying stream (TCP or TLS)
    stream: Mutex<ConnectionStream>,
    /// Peer address, for diagnostics
    peer: String,
    /// Next sequence number
    next_seq: AtomicU32,
    /// Request timeout
    request_timeout: Duration,
    /// Maximum accepted response frame size
    max_frame_bytes: usize,
    /// Channel creation instant; base for the idle clock
    created: Instant,
    /// Milliseconds after `created` at which the channel was last used
    last_used_ms: AtomicU64,
}

impl Channel {
    fn next_seq(&self) -> u32 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn touch(&self) {
        self.last_used_ms
            .store(self.created.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// How long this channel has sat unused
    pub fn idle_for(&self) -> Duration {
        let last_used = Duration::from_millis(self.last_used_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last_used)
    }

    /// Peer address this channel is bound to
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Invoke one RPC: write a request frame, read one response frame and
    /// classify the wire status. An `Ok` status yields the response; an
    /// `UnknownMethod` status yields [`Error::UnknownMethod`]; any other
    /// status yields [`Error::Server`] with the server's message.
    pub async fn invoke(
        &self,
        method: &str,
        metadata: &BTreeMap<String, String>,
        payload: &serde_json::Value,
    ) -> Result<Response> {
        let seq = self.next_seq();
        let frame = Request::new(seq, method, metadata, payload)
            .map_err(|e| Error::protocol(e.to_string()))?
            .to_bytes();
        debug!("invoking {} (seq={}, {} bytes)", method, seq, frame.len());

        let mut stream = self.stream.lock().await;

        timeout(self.request_timeout, stream.write_all(&frame))
            .await
            .map_err(Error::Timeout)??;
        timeout(self.request_timeout, stream.flush())
            .await
            .map_err(Error::Timeout)??;

        let mut header_buf = [0u8; RESPONSE_HEADER_LEN];
        timeout(self.request_timeout, stream.read_exact(&mut header_buf))
            .await
            .map_err(Error::Timeout)??;
        let header = ResponseHeader::parse(&header_buf)
            .map_err(|e| Error::protocol(format!("invalid response header: {e}")))?;

        let payload_len = header.payload_len as usize;
        if payload_len > self.max_frame_bytes {
            return Err(Error::protocol(format!(
                "response too large: {payload_len} bytes (max: {})",
                self.max_frame_bytes
            )));
        }
        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            timeout(self.request_timeout, stream.read_exact(&mut payload))
                .await
                .map_err(Error::Timeout)??;
        }
        drop(stream);

        if header.seq != seq {
            return Err(Error::protocol(format!(
                "sequence number mismatch: expected {seq}, got {}",
                header.seq
            )));
        }
        self.touch();

        let response = Response {
            header,
            payload: Bytes::from(payload),
        };
        match response.status() {
            StatusCode::Ok => Ok(response),
            StatusCode::UnknownMethod => Err(Error::UnknownMethod(method.to_string())),
            status => Err(Error::server(
                status,
                String::from_utf8_lossy(&response.payload).into_owned(),
            )),
        }
    }

    /// Liveness probe; the pool uses this to revalidate stale idle channels
    pub async fn ping(&self) -> Result<()> {
        self.invoke(methods::PING, &BTreeMap::new(), &serde_json::Value::Null)
            .await
            .map(|_| ())
    }
}

/// Creates channels bound to one address/credential pair. The factory is the
/// only owner of the resolved credentials.
#[derive(Debug)]
pub(crate) struct ChannelFactory {
    authority: String,
    server_name: String,
    credentials: Credentials,
    tuning: ChannelTuning,
    request_timeout: Duration,
}

impl ChannelFactory {
    pub(crate) fn new(
        endpoint: &Endpoint,
        server_name_override: Option<&str>,
        credentials: Credentials,
        tuning: ChannelTuning,
        request_timeout: Duration,
    ) -> Self {
        Self {
            authority: endpoint.authority.clone(),
            server_name: server_name_override
                .unwrap_or(endpoint.host.as_str())
                .to_string(),
            credentials,
            tuning,
            request_timeout,
        }
    }

    pub(crate) fn tuning(&self) -> &ChannelTuning {
        &self.tuning
    }

    /// Dial one new channel. Failures surface as connectivity errors; there
    /// is no silent retry at this layer.
    pub(crate) async fn connect(&self) -> Result<Channel> {
        debug!("connecting channel to {}", self.authority);
        let tcp = timeout(DEFAULT_CONNECT_TIMEOUT, TcpStream::connect(&self.authority))
            .await
            .map_err(Error::Timeout)??;
        if self.tuning.nodelay {
            tcp.set_nodelay(true)?;
        }

        let stream = match &self.credentials {
            Credentials::Insecure => ConnectionStream::Plain(tcp),
            Credentials::Tls(config) => {
                let connector = TlsConnector::from(Arc::clone(config));
                let server_name = ServerName::try_from(self.server_name.as_str())
                    .map_err(|e| {
                        Error::config(format!("invalid server name `{}`: {e}", self.server_name))
                    })?;
                let tls = connector.connect(server_name, tcp).await.map_err(|e| {
                    Error::connection(format!("TLS handshake failed: {e}"))
                })?;
                info!("TLS connection established to {}", self.authority);
                ConnectionStream::Tls(tls)
            }
        };

        Ok(Channel {
            stream: Mutex::new(stream),
            peer: self.authority.clone(),
            next_seq: AtomicU32::new(1),
            request_timeout: self.request_timeout,
            max_frame_bytes: self.tuning.max_frame_bytes,
            created: Instant::now(),
            last_used_ms: AtomicU64::new(0),
        })
    }
}
