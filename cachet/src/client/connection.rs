use super::ClientOptions;
use crate::protocol::{Request, RequestId, Response, frame_codec};
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use shared::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, trace, warn};

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;
type Pending = Arc<DashMap<RequestId, oneshot::Sender<Response>>>;

/// One framed connection. Requests are written under a lock and their
/// responses are routed back by id from a background reader task, so many
/// requests can be in flight at once.
pub(crate) struct Connection {
    address: String,
    sink: Mutex<SplitSink<FramedStream, Bytes>>,
    pending: Pending,
    permits: Semaphore,
    next_id: AtomicU32,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    receive_timeout: Duration,
}

impl Connection {
    pub(crate) async fn open(options: &ClientOptions) -> Result<Self> {
        let address = options.address.clone();

        let socket = match timeout(options.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                return Err(Error::Unavailable(format!(
                    "connect to {} failed: {}",
                    address, e
                )));
            }
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "connect to {} took longer than {:?}",
                    address, options.connect_timeout
                )));
            }
        };
        socket.set_nodelay(true).ok();

        let (sink, stream) = Framed::new(socket, frame_codec()).split();
        let pending: Pending = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_responses(
            stream,
            pending.clone(),
            closed.clone(),
            address.clone(),
        ));

        Ok(Self {
            address,
            sink: Mutex::new(sink),
            pending,
            permits: Semaphore::new(options.in_flight_per_connection()),
            next_id: AtomicU32::new(0),
            closed,
            reader,
            receive_timeout: options.receive_timeout,
        })
    }

    pub(crate) async fn call(&self, request: Request) -> Result<Response> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| self.closed_error())?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // The reader flags the connection before draining `pending`, so a
        // registration that raced the drain is caught here.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&id);
            return Err(self.closed_error());
        }

        trace!("Sending request {} to {}: {:?}", id, self.address, request);

        let sent = self.sink.lock().await.send(request.encode(id)).await;
        if let Err(e) = sent {
            self.pending.remove(&id);
            return Err(Error::Transport(format!(
                "write to {} failed: {}",
                self.address, e
            )));
        }

        match timeout(self.receive_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                self.pending.remove(&id);
                Err(Error::Timeout(format!(
                    "no response from {} within {:?}",
                    self.address, self.receive_timeout
                )))
            }
        }
    }

    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
        self.reader.abort();

        if let Err(e) = self.sink.lock().await.close().await {
            debug!("Error closing connection to {}: {}", self.address, e);
        }

        self.pending.clear();
    }

    fn closed_error(&self) -> Error {
        Error::Unavailable(format!("connection to {} is closed", self.address))
    }
}

impl Drop for Connection {
    // The reader task owns the read half; the socket only closes once it is gone.
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_responses(
    mut stream: SplitStream<FramedStream>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    address: String,
) {
    while let Some(frame_result) = stream.next().await {
        let frame = match frame_result {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Connection to {} failed: {}", address, e);
                break;
            }
        };

        match Response::decode(frame.freeze()) {
            Ok((id, response)) => match pending.remove(&id) {
                Some((_, waiter)) => {
                    // the caller may have timed out and gone away
                    let _ = waiter.send(response);
                }
                None => debug!("Dropping response {} from {}: no waiter", id, address),
            },
            Err(e) => {
                error!("Failed to decode response from {}: {}", address, e);
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a closed error.
    pending.clear();
    debug!("Reader for {} stopped", address);
}
