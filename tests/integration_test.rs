//! Integration tests for the VexDB client against an in-process stub server
//! speaking the VexDB wire protocol.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_test::assert_ok;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use vexdb_client::{
    methods, CallContext, Client, ClientConfig, CollectionSchema, ConnectionStatus, DataType,
    Error, FieldSchema, Request, RequestHeader, Response, StatusCode, REQUEST_HEADER_LEN,
};

/// How the stub answers the handshake RPC
#[derive(Clone, Copy)]
enum ConnectBehavior {
    /// Normal modern server
    Ok,
    /// Older server that does not know the handshake method
    UnknownMethod,
    /// Server that errors on the handshake
    Internal,
    /// Server that never answers the handshake
    Hang,
}

struct Stub {
    authority: String,
    accepts: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

async fn spawn_stub(behavior: ConnectBehavior) -> Stub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let authority = listener.local_addr().unwrap().to_string();
    let accepts = Arc::new(AtomicUsize::new(0));
    let connects = Arc::new(AtomicUsize::new(0));
    let (accepts_counter, connects_counter) = (accepts.clone(), connects.clone());
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            accepts_counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(handle(socket, behavior, connects_counter.clone()));
        }
    });
    Stub {
        authority,
        accepts,
        connects,
    }
}

async fn handle(mut socket: TcpStream, behavior: ConnectBehavior, connects: Arc<AtomicUsize>) {
    loop {
        let mut header = [0u8; REQUEST_HEADER_LEN];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let parsed = RequestHeader::parse(&header).unwrap();
        let mut body = vec![0u8; parsed.body_len()];
        if socket.read_exact(&mut body).await.is_err() {
            return;
        }
        let mut frame = header.to_vec();
        frame.extend_from_slice(&body);
        let request = Request::from_bytes(&frame).unwrap();
        let seq = request.header.seq;

        let response = match request.method.as_str() {
            methods::CONNECT => {
                connects.fetch_add(1, Ordering::SeqCst);
                match behavior {
                    ConnectBehavior::Ok => json_ok(
                        seq,
                        json!({"server_version": "1.4.0", "identifier": "stub-session"}),
                    ),
                    ConnectBehavior::UnknownMethod => Response::error(
                        StatusCode::UnknownMethod,
                        seq,
                        "unknown method vexdb.api.Connect",
                    ),
                    ConnectBehavior::Internal => {
                        Response::error(StatusCode::Internal, seq, "handshake exploded")
                    }
                    ConnectBehavior::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        return;
                    }
                }
            }
            methods::PING => json_ok(seq, json!({})),
            methods::SERVER_INFO => json_ok(
                seq,
                json!({
                    "version": "1.4.0",
                    "started_at": "2026-01-01T00:00:00Z",
                    "uptime_seconds": 42,
                    "collection_count": 1
                }),
            ),
            methods::SERVER_VERSION => json_ok(seq, json!({"version": "1.4.0"})),
            methods::LIST_COLLECTIONS => json_ok(seq, json!({"collections": ["docs"]})),
            methods::CREATE_COLLECTION => {
                // the field definitions arrive as hex-encoded nested
                // sub-messages; decode one to prove the shape
                let payload: Value = serde_json::from_slice(&request.payload).unwrap();
                let encoded = payload["schema"].as_array().unwrap();
                assert!(!encoded.is_empty());
                let raw = hex::decode(encoded[0].as_str().unwrap()).unwrap();
                let field: Value = serde_json::from_slice(&raw).unwrap();
                assert!(field["name"].is_string());
                json_ok(seq, json!({}))
            }
            methods::DESCRIBE_COLLECTION => json_ok(
                seq,
                json!({
                    "name": "docs",
                    "description": "",
                    "fields": [{
                        "name": "id",
                        "data_type": "int64",
                        "dimension": null,
                        "is_primary": true,
                        "description": ""
                    }]
                }),
            ),
            methods::DROP_COLLECTION => json_ok(seq, json!({})),
            methods::COLLECTION_STATS => json_ok(seq, json!({"stats": {"row_count": 128}})),
            "test.Echo" => json_ok(
                seq,
                serde_json::to_value(request.metadata_map().unwrap()).unwrap(),
            ),
            // drop the connection without responding
            "test.Die" => return,
            _ => Response::error(StatusCode::UnknownMethod, seq, "unknown method"),
        };

        if socket.write_all(&response.to_bytes()).await.is_err() {
            return;
        }
    }
}

fn json_ok(seq: u32, value: Value) -> Response {
    Response::ok(seq, serde_json::to_vec(&value).unwrap())
}

fn client_for(stub: &Stub) -> Client {
    Client::build(ClientConfig::new(stub.authority.clone())).unwrap()
}

#[tokio::test]
async fn concurrent_callers_share_one_handshake() {
    let stub = spawn_stub(ConnectBehavior::Ok).await;
    let client = client_for(&stub);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(
            async move { client.ensure_connected().await },
        ));
    }
    for task in tasks {
        let status = task.await.unwrap().unwrap();
        assert_eq!(status, ConnectionStatus::Connected);
    }

    assert_eq!(stub.connects.load(Ordering::SeqCst), 1);
    assert_eq!(client.connection_status(), ConnectionStatus::Connected);
    assert_eq!(client.server_version_cached().as_deref(), Some("1.4.0"));
}

#[tokio::test]
async fn unimplemented_server_is_degraded_not_failed() {
    let stub = spawn_stub(ConnectBehavior::UnknownMethod).await;
    let client = client_for(&stub);

    let status = client.ensure_connected().await.unwrap();
    assert_eq!(status, ConnectionStatus::Unimplemented);
    // the outcome is settled; a second caller does not probe again
    let status = client.ensure_connected().await.unwrap();
    assert_eq!(status, ConnectionStatus::Unimplemented);
    assert_eq!(stub.connects.load(Ordering::SeqCst), 1);

    // gate without fallback raises a descriptive incompatibility error
    let err = client.ensure_compatible(None).await.unwrap_err();
    match err {
        Error::Incompatible(message) => assert!(message.contains("mismatched")),
        other => panic!("expected Incompatible, got {other}"),
    }
    let err = client
        .ensure_compatible(Some("needs server >= 1.4"))
        .await
        .unwrap_err();
    match err {
        Error::Incompatible(message) => assert_eq!(message, "needs server >= 1.4"),
        other => panic!("expected Incompatible, got {other}"),
    }

    // gate with fallback degrades instead of failing
    let fallback = client
        .ensure_compatible_or(|| async { Ok(7) })
        .await
        .unwrap();
    assert_eq!(fallback, Some(7));

    // non-gated calls still work against the old server
    assert_ok!(client.ping().await);
}

#[tokio::test]
async fn failed_handshake_propagates_connectivity_error() {
    let stub = spawn_stub(ConnectBehavior::Internal).await;
    let client = client_for(&stub);

    let err = client.ensure_connected().await.unwrap_err();
    match &err {
        Error::Connection(message) => assert!(message.contains("handshake exploded")),
        other => panic!("expected Connection, got {other}"),
    }
    assert_eq!(client.connection_status(), ConnectionStatus::Failed);

    // the gate surfaces the connection failure, not an incompatibility
    let err = client.ensure_compatible(None).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {err}");
}

#[tokio::test]
async fn handshake_timeout_settles_failed() {
    let stub = spawn_stub(ConnectBehavior::Hang).await;
    let client = Client::build(
        ClientConfig::new(stub.authority.clone()).with_timeout_millis(200),
    )
    .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), client.ensure_connected())
        .await
        .expect("handshake must not hang past its timeout")
        .unwrap_err();
    match err {
        Error::Connection(message) => assert!(message.contains("timed out")),
        other => panic!("expected Connection, got {other}"),
    }
    assert_eq!(client.connection_status(), ConnectionStatus::Failed);
}

#[tokio::test]
async fn rpc_wrappers_round_trip() {
    let stub = spawn_stub(ConnectBehavior::Ok).await;
    let client = client_for(&stub);

    assert_ok!(client.ping().await);

    let info = client.server_info().await.unwrap();
    assert_eq!(info.version, "1.4.0");
    assert_eq!(info.uptime_seconds, 42);
    assert_eq!(info.collection_count, 1);

    // gated wrappers pass against a modern server
    assert_eq!(client.server_version().await.unwrap(), "1.4.0");
    let stats = client.collection_stats("docs").await.unwrap();
    assert_eq!(stats.get("row_count"), Some(&128));

    let schema = CollectionSchema {
        name: "docs".to_string(),
        description: "test collection".to_string(),
        fields: vec![
            FieldSchema {
                name: "id".to_string(),
                data_type: DataType::Int64,
                dimension: None,
                is_primary: true,
                description: String::new(),
            },
            FieldSchema {
                name: "embedding".to_string(),
                data_type: DataType::FloatVector,
                dimension: Some(8),
                is_primary: false,
                description: String::new(),
            },
        ],
    };
    assert_ok!(client.create_collection(&schema).await);

    let described = client.describe_collection("docs").await.unwrap();
    assert_eq!(described.name, "docs");
    assert!(described.fields[0].is_primary);

    assert_eq!(client.list_collections().await.unwrap(), vec!["docs"]);
    assert_ok!(client.drop_collection("docs").await);
}

#[tokio::test]
async fn broken_channel_is_never_reoffered() {
    let stub = spawn_stub(ConnectBehavior::Ok).await;
    let client = client_for(&stub);

    client.ping().await.unwrap();
    assert_eq!(stub.accepts.load(Ordering::SeqCst), 1);

    // the stub kills the connection mid-call; the client marks the channel
    // invalid on release
    let err = client.call("test.Die", Value::Null).await.unwrap_err();
    assert!(err.is_transport(), "unexpected error: {err}");

    // the next call succeeds on a freshly dialed channel
    client.ping().await.unwrap();
    assert_eq!(stub.accepts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sequential_calls_reuse_one_channel() {
    let stub = spawn_stub(ConnectBehavior::Ok).await;
    let client = client_for(&stub);

    for _ in 0..10 {
        client.ping().await.unwrap();
    }
    assert_eq!(stub.accepts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn metadata_reaches_the_server() {
    let stub = spawn_stub(ConnectBehavior::Ok).await;
    let client = Client::build(
        ClientConfig::new(stub.authority.clone()).with_credentials("reader", "secret"),
    )
    .unwrap();
    client.set_metadata("database", "analytics");

    let response = client.call("test.Echo", Value::Null).await.unwrap();
    let echoed: Value = response.json().unwrap();
    assert_eq!(echoed["authorization"], "reader:secret");
    assert_eq!(echoed["database"], "analytics");
    assert_eq!(echoed["client-id"], client.client_id().to_string());

    // a per-call context overrides the client-wide map for that call only
    let ctx = CallContext::new().with_metadata("database", "staging");
    let response = client
        .call_with_context("test.Echo", Value::Null, &ctx)
        .await
        .unwrap();
    let echoed: Value = response.json().unwrap();
    assert_eq!(echoed["database"], "staging");
    assert_eq!(client.global_metadata()["database"], "analytics");
}
