use bytes::Bytes;
use cachet::domain::CasResult;
use cachet::protocol::{Request, Response, frame_codec};
use futures::{SinkExt, StreamExt};
use shared::TtlMs;
use std::sync::Arc;
use storage_engine::VersionedStore;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// Accepts connections forever, serving each on its own task.
pub async fn serve(
    listener: TcpListener,
    store: Arc<dyn VersionedStore>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let (socket, addr) = listener.accept().await?;
        let store = store.clone();
        tokio::spawn(async move {
            tracing::info!("Connection {addr} successful.");

            if let Err(err) = process_connection(socket, store).await {
                tracing::warn!("Connection {addr} error: {err:?}");
            }
        });
    }
}

pub async fn process_connection(
    socket: TcpStream,
    store: Arc<dyn VersionedStore>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    socket.set_nodelay(true).ok();

    // Wrap the socket with the codec - now we get BytesMut frames instead of raw bytes
    let mut framed = Framed::new(socket, frame_codec());

    // Process each frame (message) from the client
    while let Some(frame_result) = framed.next().await {
        let frame = frame_result?;

        let (id, request) = match Request::decode(frame.freeze()) {
            Ok(decoded) => decoded,
            Err(e) => {
                // Without a readable id the client cannot match a reply, so
                // the connection is dropped.
                tracing::error!("Failed to decode request: {}", e);
                return Err(e.into());
            }
        };

        debug!("Received request {}: {:?}", id, request);

        let response = handle(store.as_ref(), request).await;

        // Encode the response and send it back
        framed.send(response.encode(id)).await?;
    }

    info!("Connection closed by client");
    Ok(())
}

async fn handle(store: &dyn VersionedStore, request: Request) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Set { key, value, ttl_ms } => match store.set(key, value, TtlMs(ttl_ms)).await {
            Ok(_) => Response::Stored,
            Err(e) => Response::Error {
                msg: format!("Set failed: {}", e),
            },
        },

        Request::Get { key } | Request::Gets { key } => match store.get(&key).await {
            Ok(Some(entry)) => Response::Value {
                value: entry.data,
                cas: entry.cas,
            },
            Ok(None) => Response::NotFound,
            Err(e) => Response::Error {
                msg: format!("Get failed: {}", e),
            },
        },

        Request::Cas {
            key,
            cas,
            value,
            ttl_ms,
        } => match store.cas(key.clone(), cas, value, TtlMs(ttl_ms)).await {
            Ok(CasResult::Stored) => Response::Stored,
            Ok(CasResult::Exists) => {
                debug!(
                    "CAS mismatch on {:?}: check value {} is stale",
                    String::from_utf8_lossy(&key),
                    cas
                );
                Response::Exists
            }
            Ok(CasResult::NotFound) => Response::NotFound,
            Err(e) => Response::Error {
                msg: format!("Cas failed: {}", e),
            },
        },

        Request::Delete { key } => match store.delete(&key).await {
            Ok(true) => Response::Deleted,
            Ok(false) => Response::NotFound,
            Err(e) => Response::Error {
                msg: format!("Delete failed: {}", e),
            },
        },
    }
}

/// Binds `address` and serves `store` on a background task, returning the
/// bound address. Port `0` picks a free port.
pub async fn spawn(
    address: &str,
    store: Arc<dyn VersionedStore>,
) -> std::io::Result<std::net::SocketAddr> {
    let listener = TcpListener::bind(address).await?;
    let local = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = serve(listener, store).await {
            tracing::warn!("Listener stopped: {err:?}");
        }
    });

    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_engine::MokaStore;

    fn key(k: &'static str) -> Bytes {
        Bytes::from_static(k.as_bytes())
    }

    #[tokio::test]
    async fn test_gets_returns_stored_check_value() {
        let store = MokaStore::new_unbounded();
        let cas = store.set(key("k"), Bytes::from("v"), TtlMs::NONE).await.unwrap();

        let response = handle(&store, Request::Gets { key: key("k") }).await;
        assert_eq!(
            response,
            Response::Value {
                value: Bytes::from("v"),
                cas
            }
        );
    }

    #[tokio::test]
    async fn test_cas_replies() {
        let store = MokaStore::new_unbounded();

        let missing = handle(
            &store,
            Request::Cas {
                key: key("k"),
                cas: 1,
                value: Bytes::from("v"),
                ttl_ms: 0,
            },
        )
        .await;
        assert_eq!(missing, Response::NotFound);

        let cas = store.set(key("k"), Bytes::from("v"), TtlMs::NONE).await.unwrap();
        let stale = handle(
            &store,
            Request::Cas {
                key: key("k"),
                cas: cas + 100,
                value: Bytes::from("v2"),
                ttl_ms: 0,
            },
        )
        .await;
        assert_eq!(stale, Response::Exists);
    }

    #[tokio::test]
    async fn test_delete_replies() {
        let store = MokaStore::new_unbounded();
        store.set(key("k"), Bytes::from("v"), TtlMs::NONE).await.unwrap();

        assert_eq!(
            handle(&store, Request::Delete { key: key("k") }).await,
            Response::Deleted
        );
        assert_eq!(
            handle(&store, Request::Delete { key: key("k") }).await,
            Response::NotFound
        );
    }
}
