//! The multiplexed RPC session with the manager.
//!
//! One [`SecureChannel`] carries every call for the life of the process. Calls
//! take a write lock only while their frame is sent; a reader task routes each
//! reply to the waiting caller by `call_id`. When the session ends, every call
//! still waiting fails with [`ChainError::Transport`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use networkservice::{
    Acknowledgement, ChainError, Connection, NetworkServiceClient, NetworkServiceRequest, NscError,
    ResourceDescriptor, TokenGenerator,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::codec::{framing, CallEnvelope, Method, ReplyEnvelope};
use crate::{tls, IdentitySource, Target, TransportError};

type Reply = Result<Value, ChainError>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;
type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LengthDelimitedCodec>;

/// Dials `target`, completes the mutual-TLS handshake, and starts the session.
///
/// Dial and handshake together are bounded by `dial_timeout`. Every failure
/// is reported as [`NscError::Connect`].
pub async fn open_channel(
    target: &Target,
    identity: Arc<dyn IdentitySource>,
    tokens: Arc<dyn TokenGenerator>,
    token_lifetime: Duration,
    dial_timeout: Duration,
) -> Result<SecureChannel, NscError> {
    let connect_error = |message: String| NscError::Connect {
        target: target.to_string(),
        message,
    };

    let dial = async {
        let config = tls::client_config(identity, tls::default_provider())?;
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = target.server_name()?;
        let channel = match target {
            Target::Tcp { host, port } => {
                let tcp = tokio::net::TcpStream::connect((host.as_str(), *port)).await?;
                tcp.set_nodelay(true)?;
                let session = connector.connect(server_name, tcp).await?;
                SecureChannel::over(session, tokens, token_lifetime)
            }
            #[cfg(unix)]
            Target::Unix(path) => {
                let unix = tokio::net::UnixStream::connect(path).await?;
                let session = connector.connect(server_name, unix).await?;
                SecureChannel::over(session, tokens, token_lifetime)
            }
            #[cfg(not(unix))]
            Target::Unix(_) => {
                return Err(TransportError::InvalidTarget {
                    target: target.to_string(),
                    reason: "unix sockets are not supported on this platform".into(),
                })
            }
        };
        Ok::<_, TransportError>(channel)
    };

    match tokio::time::timeout(dial_timeout, dial).await {
        Ok(Ok(channel)) => {
            tracing::info!(%target, "connected to network service manager");
            Ok(channel)
        }
        Ok(Err(err)) => Err(connect_error(err.to_string())),
        Err(_) => Err(connect_error(format!("no session within {dial_timeout:?}"))),
    }
}

/// A live session with the manager; the terminal stage of the chain.
pub struct SecureChannel {
    writer: tokio::sync::Mutex<Writer>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_call: AtomicU64,
    tokens: Arc<dyn TokenGenerator>,
    token_lifetime: Duration,
    reader: JoinHandle<()>,
}

impl SecureChannel {
    /// Runs the session over an already-established stream.
    pub fn over<S>(stream: S, tokens: Arc<dyn TokenGenerator>, token_lifetime: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let write: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write);
        let pending: Pending = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_replies(
            FramedRead::new(read, framing()),
            pending.clone(),
            closed.clone(),
        ));
        Self {
            writer: tokio::sync::Mutex::new(FramedWrite::new(write, framing())),
            pending,
            closed,
            next_call: AtomicU64::new(0),
            tokens,
            token_lifetime,
            reader,
        }
    }

    /// Returns `true` once the manager has hung up.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn call(
        &self,
        method: Method,
        payload: Value,
        resources: Vec<ResourceDescriptor>,
    ) -> Result<Value, ChainError> {
        let token = self.tokens.mint(self.token_lifetime)?;
        let call_id = self.next_call.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(call_id, tx);
        // Removes the entry if this call is abandoned, e.g. by a caller timeout.
        let _guard = PendingGuard {
            pending: &self.pending,
            call_id,
        };
        if self.is_closed() {
            return Err(ChainError::Transport("session closed".into()));
        }

        let frame = serde_json::to_vec(&CallEnvelope {
            call_id,
            method,
            token: token.value,
            resources,
            payload,
        })
        .map_err(|err| ChainError::Transport(format!("cannot encode call: {err}")))?;

        self.writer
            .lock()
            .await
            .send(Bytes::from(frame))
            .await
            .map_err(|err| ChainError::Transport(format!("send failed: {err}")))?;
        tracing::trace!(call_id, ?method, "call sent");

        rx.await
            .map_err(|_| ChainError::Transport("session closed".into()))?
    }
}

#[async_trait]
impl NetworkServiceClient for SecureChannel {
    async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, ChainError> {
        let resources = request.resources.clone();
        let payload = serde_json::to_value(&request)
            .map_err(|err| ChainError::Transport(format!("cannot encode request: {err}")))?;
        let reply = self.call(Method::Request, payload, resources).await?;
        serde_json::from_value(reply)
            .map_err(|err| ChainError::Transport(format!("malformed connection in reply: {err}")))
    }

    async fn close(&self, connection: Connection) -> Result<Acknowledgement, ChainError> {
        let payload = serde_json::to_value(&connection)
            .map_err(|err| ChainError::Transport(format!("cannot encode connection: {err}")))?;
        self.call(Method::Close, payload, Vec::new()).await?;
        Ok(Acknowledgement::Closed)
    }
}

impl Drop for SecureChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("in_flight", &self.pending.lock().len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct PendingGuard<'a> {
    pending: &'a Pending,
    call_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.call_id);
    }
}

async fn read_replies<R>(
    mut frames: FramedRead<ReadHalf<R>, LengthDelimitedCodec>,
    pending: Pending,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Send,
{
    while let Some(frame) = frames.next().await {
        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(error = %err, "session read failed");
                break;
            }
        };
        let reply: ReplyEnvelope = match serde_json::from_slice(&bytes) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "discarding malformed reply");
                continue;
            }
        };
        match pending.lock().remove(&reply.call_id) {
            Some(tx) => {
                let _ = tx.send(reply.result.map_err(ChainError::Remote));
            }
            None => tracing::debug!(call_id = reply.call_id, "reply for an abandoned call"),
        }
    }

    closed.store(true, Ordering::SeqCst);
    let orphaned: Vec<_> = pending.lock().drain().collect();
    if !orphaned.is_empty() {
        tracing::warn!(in_flight = orphaned.len(), "session closed with calls in flight");
    }
    for (_, tx) in orphaned {
        let _ = tx.send(Err(ChainError::Transport("session closed".into())));
    }
}
