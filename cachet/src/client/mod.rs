mod connection;

use crate::domain::{CacheEntry, CasResult, CheckValue, StorageOptions};
use crate::ports::{CacheClient, ClientFactory};
use crate::protocol::{Request, Response};
use async_trait::async_trait;
use bytes::Bytes;
use connection::Connection;
use shared::{Error, Result, TtlMs};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Tuning for the TCP transport. Applied once when the pool is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    pub address: String,
    pub connect_timeout: Duration,
    pub receive_timeout: Duration,
    pub enable_pipelining: bool,
    pub max_connections: usize,
    pub max_concurrent_requests_per_connection: usize,
}

impl ClientOptions {
    pub const DEFAULT_ADDRESS: &str = "127.0.0.1:5500";

    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    fn in_flight_per_connection(&self) -> usize {
        if self.enable_pipelining {
            self.max_concurrent_requests_per_connection.max(1)
        } else {
            1
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            address: Self::DEFAULT_ADDRESS.to_string(),
            connect_timeout: Duration::from_secs(2),
            receive_timeout: Duration::from_secs(2),
            enable_pipelining: true,
            max_connections: 2,
            max_concurrent_requests_per_connection: 15,
        }
    }
}

/// Pooled, pipelined client for the cachet TCP protocol.
pub struct TcpCacheClient {
    address: String,
    connections: Vec<Connection>,
    next: AtomicUsize,
}

impl TcpCacheClient {
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        let count = options.max_connections.max(1);
        let mut connections = Vec::with_capacity(count);

        for _ in 0..count {
            match Connection::open(&options).await {
                Ok(connection) => connections.push(connection),
                Err(e) => {
                    for opened in &connections {
                        opened.close().await;
                    }
                    return Err(e);
                }
            }
        }

        info!(
            "Connected to cache at {} with {} connection(s)",
            options.address, count
        );

        Ok(Self {
            address: options.address,
            connections,
            next: AtomicUsize::new(0),
        })
    }

    pub async fn ping(&self) -> Result<()> {
        match self.pick().call(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected("PING", other)),
        }
    }

    fn pick(&self) -> &Connection {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        &self.connections[index]
    }
}

#[async_trait]
impl CacheClient for TcpCacheClient {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let request = Request::Get { key: key_bytes(key) };
        match self.pick().call(request).await? {
            Response::Value { value, .. } => Ok(Some(value)),
            Response::NotFound => Ok(None),
            other => Err(unexpected("GET", other)),
        }
    }

    async fn gets(&self, key: &str) -> Result<Option<CacheEntry>> {
        let request = Request::Gets { key: key_bytes(key) };
        match self.pick().call(request).await? {
            Response::Value { value, cas } => Ok(Some(CacheEntry::new(value, cas))),
            Response::NotFound => Ok(None),
            other => Err(unexpected("GETS", other)),
        }
    }

    async fn set(&self, key: &str, value: Bytes, options: StorageOptions) -> Result<()> {
        let request = Request::Set {
            key: key_bytes(key),
            value,
            ttl_ms: TtlMs::from_duration(options.expires_in).0,
        };
        match self.pick().call(request).await? {
            Response::Stored => Ok(()),
            other => Err(unexpected("SET", other)),
        }
    }

    async fn cas(
        &self,
        key: &str,
        check_value: CheckValue,
        value: Bytes,
        options: StorageOptions,
    ) -> Result<CasResult> {
        let request = Request::Cas {
            key: key_bytes(key),
            cas: check_value,
            value,
            ttl_ms: TtlMs::from_duration(options.expires_in).0,
        };
        match self.pick().call(request).await? {
            Response::Stored => Ok(CasResult::Stored),
            Response::Exists => Ok(CasResult::Exists),
            Response::NotFound => Ok(CasResult::NotFound),
            other => Err(unexpected("CAS", other)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let request = Request::Delete { key: key_bytes(key) };
        match self.pick().call(request).await? {
            Response::Deleted => Ok(true),
            Response::NotFound => Ok(false),
            other => Err(unexpected("DELETE", other)),
        }
    }

    async fn dispose(&self) {
        for connection in &self.connections {
            connection.close().await;
        }
        debug!("Closed connection pool to {}", self.address);
    }
}

impl std::fmt::Debug for TcpCacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpCacheClient")
            .field("address", &self.address)
            .field("connections", &self.connections.len())
            .finish()
    }
}

/// Builds a [`TcpCacheClient`] when the store first needs one.
#[derive(Clone, Debug, Default)]
pub struct TcpClientFactory {
    options: ClientOptions,
}

impl TcpClientFactory {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ClientFactory for TcpClientFactory {
    async fn connect(&self) -> Result<Arc<dyn CacheClient>> {
        let client = TcpCacheClient::connect(self.options.clone()).await?;
        Ok(Arc::new(client))
    }
}

fn key_bytes(key: &str) -> Bytes {
    Bytes::copy_from_slice(key.as_bytes())
}

fn unexpected(op: &str, response: Response) -> Error {
    match response {
        Response::Error { msg } => Error::Server(msg),
        other => Error::Protocol(format!("unexpected response to {}: {:?}", op, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame_codec;
    use futures::{SinkExt, StreamExt};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    /// Answers every request with the given response after reversing
    /// the arrival order of each pair, to exercise id routing.
    async fn spawn_swapping_server(response: Response) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(socket, frame_codec());
            loop {
                let Some(Ok(first)) = framed.next().await else { return };
                let Some(Ok(second)) = framed.next().await else { return };
                let (first_id, _) = Request::decode(first.freeze()).unwrap();
                let (second_id, _) = Request::decode(second.freeze()).unwrap();
                framed.send(response.encode(second_id)).await.unwrap();
                framed.send(response.encode(first_id)).await.unwrap();
            }
        });

        address
    }

    fn single_connection(address: String) -> ClientOptions {
        ClientOptions {
            max_connections: 1,
            ..ClientOptions::with_address(address)
        }
    }

    #[test]
    fn test_default_options() {
        let options = ClientOptions::default();
        assert_eq!(options.address, "127.0.0.1:5500");
        assert_eq!(options.connect_timeout, Duration::from_secs(2));
        assert_eq!(options.receive_timeout, Duration::from_secs(2));
        assert!(options.enable_pipelining);
        assert_eq!(options.max_connections, 2);
        assert_eq!(options.in_flight_per_connection(), 15);
    }

    #[test]
    fn test_pipelining_off_allows_one_in_flight() {
        let options = ClientOptions {
            enable_pipelining: false,
            ..ClientOptions::default()
        };
        assert_eq!(options.in_flight_per_connection(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_are_routed_by_id() {
        let address = spawn_swapping_server(Response::NotFound).await;
        let client = TcpCacheClient::connect(single_connection(address))
            .await
            .unwrap();

        let (a, b) = tokio::join!(client.get("_a"), client.delete("_b"));
        assert_eq!(a.unwrap(), None);
        assert!(!b.unwrap());

        client.dispose().await;
    }

    #[tokio::test]
    async fn test_server_error_is_surfaced() {
        let address = spawn_swapping_server(Response::Error {
            msg: "disk on fire".to_string(),
        })
        .await;
        let client = TcpCacheClient::connect(single_connection(address))
            .await
            .unwrap();

        let (a, b) = tokio::join!(client.get("_a"), client.get("_b"));
        assert!(matches!(a, Err(Error::Server(msg)) if msg == "disk on fire"));
        assert!(matches!(b, Err(Error::Server(_))));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = TcpCacheClient::connect(ClientOptions {
            receive_timeout: Duration::from_millis(50),
            ..single_connection(address)
        })
        .await
        .unwrap();

        assert!(matches!(client.get("_k").await, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_connect_refused_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpCacheClient::connect(ClientOptions::with_address(address)).await;
        assert!(matches!(result, Err(Error::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_dropped_client_closes_its_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let accepted = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let client = TcpCacheClient::connect(single_connection(address))
            .await
            .unwrap();
        let mut socket = accepted.await.unwrap();

        drop(client);

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf)).await;
        assert!(matches!(read, Ok(Ok(0))), "server should see EOF, got {:?}", read);
    }

    #[tokio::test]
    async fn test_calls_after_dispose_fail() {
        let address = spawn_swapping_server(Response::NotFound).await;
        let client = TcpCacheClient::connect(single_connection(address))
            .await
            .unwrap();

        client.dispose().await;
        assert!(matches!(client.get("_k").await, Err(Error::Unavailable(_))));
    }
}
