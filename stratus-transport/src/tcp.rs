//! TCP transport implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ntex_bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use stratus_codec::{DEFAULT_MAX_FRAME_SIZE, EnvelopeCodec};
use stratus_core::{
    BoxFuture, Endpoint, Envelope, EnvelopeKind, HealthProbe, Listener, MessageHandler,
    MessageSender, TransportError,
};

use crate::client::{ConnectFuture, Connector, TransportClient};
use crate::mux::Multiplexer;

const READ_CHUNK: usize = 8 * 1024;

/// Configuration for TCP client.
#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Enable TCP nodelay.
    pub nodelay: bool,

    /// Maximum frame size.
    pub max_frame_size: usize,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            nodelay: true,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl TcpClientConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable TCP nodelay.
    #[must_use]
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }
}

/// Opens multiplexed TCP connections.
///
/// Each connection gets one reader task that feeds responses into the
/// connection's [`Multiplexer`]. When the peer goes away, or sends a frame
/// that cannot be decoded, the reader closes the multiplexer: every pending
/// request fails with `ConnectionClosed` and the client reports not alive.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: TcpClientConfig,
}

impl TcpConnector {
    /// Create a connector with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector with custom configuration.
    #[must_use]
    pub fn with_config(config: TcpClientConfig) -> Self {
        Self { config }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, endpoint: &Endpoint) -> ConnectFuture {
        let config = self.config.clone();
        let endpoint = endpoint.clone();

        Box::pin(async move {
            let stream = open_stream(&endpoint, config.connect_timeout).await?;
            if config.nodelay {
                stream.set_nodelay(true)?;
            }

            let codec = EnvelopeCodec::with_max_frame_size(config.max_frame_size);
            let (reader, writer) = stream.into_split();
            let mux = Arc::new(Multiplexer::new());
            let sender = Arc::new(FrameSender::new(writer, codec.clone()));

            tokio::spawn(read_responses(
                reader,
                codec,
                mux.clone(),
                sender.clone(),
                endpoint.clone(),
            ));

            tracing::debug!(endpoint = %endpoint, "tcp connection opened");
            Ok(Arc::new(TransportClient::new(endpoint, mux, sender)))
        })
    }
}

async fn open_stream(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream, TransportError> {
    match tokio::time::timeout(timeout, TcpStream::connect(endpoint.authority())).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::ConnectionFailed(format!("{endpoint}: {e}"))),
        Err(_) => Err(TransportError::ConnectionFailed(format!(
            "{endpoint}: connect timed out after {timeout:?}"
        ))),
    }
}

/// Client-side receive loop.
async fn read_responses(
    mut reader: OwnedReadHalf,
    codec: EnvelopeCodec,
    mux: Arc<Multiplexer>,
    sender: Arc<FrameSender>,
    endpoint: Endpoint,
) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    'conn: loop {
        loop {
            match codec.decode_frame(&mut buf) {
                Ok(Some(envelope)) => match envelope.kind {
                    EnvelopeKind::Result | EnvelopeKind::Fault | EnvelopeKind::Pong => {
                        mux.dispatch(envelope);
                    }
                    EnvelopeKind::Ping => {
                        if let Err(e) = sender.send(Envelope::pong(envelope.correlation_id)).await {
                            tracing::debug!(endpoint = %endpoint, error = %e, "failed to answer ping");
                        }
                    }
                    EnvelopeKind::Invoke => {
                        tracing::debug!(endpoint = %endpoint, "ignoring invocation on client channel");
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(endpoint = %endpoint, error = %e, "codec error, closing connection");
                    break 'conn;
                }
            }
        }

        tokio::select! {
            read = reader.read(&mut chunk) => match read {
                Ok(0) => {
                    tracing::debug!(endpoint = %endpoint, "connection closed by peer");
                    break;
                }
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "read failed");
                    break;
                }
            },
            () = mux.closed() => break,
        }
    }

    mux.close();
    sender.shutdown().await;
}

/// Writes framed envelopes to one half of a TCP stream.
struct FrameSender {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    codec: EnvelopeCodec,
}

impl FrameSender {
    fn new(writer: OwnedWriteHalf, codec: EnvelopeCodec) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            codec,
        }
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut frame = BytesMut::new();
        self.codec
            .encode_frame(envelope, &mut frame)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        Ok(())
    }

    async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl MessageSender for FrameSender {
    fn send(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move { self.write(&envelope).await })
    }

    fn send_and_close(&self, envelope: Envelope) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.write(&envelope).await?;
            self.shutdown().await;
            Ok(())
        })
    }
}

/// Connect-and-drop liveness probe.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    /// Create a probe with a per-attempt connect timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl HealthProbe for TcpProbe {
    fn probe(&self, endpoint: &Endpoint) -> BoxFuture<'_, bool> {
        let endpoint = endpoint.clone();
        Box::pin(async move { open_stream(&endpoint, self.timeout).await.is_ok() })
    }
}

/// Configuration for TCP server.
#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    /// Maximum frame size.
    pub max_frame_size: usize,

    /// Enable TCP nodelay on accepted channels.
    pub nodelay: bool,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            nodelay: true,
        }
    }
}

impl TcpServerConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum frame size.
    #[must_use]
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// `Starting` holds the slot while the socket binds, so a second `start`
/// is refused instead of racing the first.
enum ListenerState {
    Idle,
    Starting,
    Running(Running),
}

/// TCP listener feeding inbound envelopes to a [`MessageHandler`].
///
/// Every accepted channel runs in its own task, and every request on a
/// channel is handled concurrently; replies go back on the same channel
/// in completion order. `Ping` is answered with `Pong` directly. A codec
/// error closes the offending channel only.
pub struct TcpListener<H> {
    config: TcpServerConfig,
    handler: Arc<H>,
    state: Mutex<ListenerState>,
}

impl<H: MessageHandler> TcpListener<H> {
    /// Create a listener with default configuration.
    pub fn new(handler: H) -> Self {
        Self::with_config(TcpServerConfig::default(), handler)
    }

    /// Create a listener with custom configuration.
    pub fn with_config(config: TcpServerConfig, handler: H) -> Self {
        Self::from_shared(config, Arc::new(handler))
    }

    /// Create a listener over a shared handler.
    pub fn from_shared(config: TcpServerConfig, handler: Arc<H>) -> Self {
        Self {
            config,
            handler,
            state: Mutex::new(ListenerState::Idle),
        }
    }

    /// The bound address, while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock() {
            ListenerState::Running(running) => Some(running.local_addr),
            ListenerState::Idle | ListenerState::Starting => None,
        }
    }
}

impl<H: MessageHandler> Listener for TcpListener<H> {
    async fn start(&self, endpoint: &Endpoint) -> Result<SocketAddr, TransportError> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, ListenerState::Idle) {
                return Err(TransportError::Protocol("listener already started".into()));
            }
            *state = ListenerState::Starting;
        }

        let bound = async {
            let listener = TokioTcpListener::bind(endpoint.authority()).await?;
            let local_addr = listener.local_addr()?;
            Ok::<_, TransportError>((listener, local_addr))
        }
        .await;
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                *self.state.lock() = ListenerState::Idle;
                return Err(e);
            }
        };
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            self.handler.clone(),
            self.config.clone(),
            shutdown_rx,
        ));

        *self.state.lock() = ListenerState::Running(Running {
            local_addr,
            shutdown,
            task,
        });
        tracing::info!(addr = %local_addr, "tcp listener started");
        Ok(local_addr)
    }

    async fn stop(&self) {
        let running = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ListenerState::Idle) {
                ListenerState::Running(running) => Some(running),
                other => {
                    *state = other;
                    None
                }
            }
        };
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            let _ = running.task.await;
            tracing::info!(addr = %running.local_addr, "tcp listener stopped");
        }
    }
}

async fn accept_loop<H: MessageHandler>(
    listener: TokioTcpListener,
    handler: Arc<H>,
    config: TcpServerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let codec = EnvelopeCodec::with_max_frame_size(config.max_frame_size);
    let mut channels = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if config.nodelay {
                        let _ = stream.set_nodelay(true);
                    }
                    channels.spawn(serve_channel(
                        stream,
                        peer,
                        handler.clone(),
                        codec.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            Some(_) = channels.join_next(), if !channels.is_empty() => {}
        }
    }

    drop(listener);
    // Channels observe the same shutdown signal; wait until all are closed.
    while channels.join_next().await.is_some() {}
}

async fn serve_channel<H: MessageHandler>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    codec: EnvelopeCodec,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(peer = %peer, "channel opened");

    let (mut reader, writer) = stream.into_split();
    let sender = Arc::new(FrameSender::new(writer, codec.clone()));
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut requests = JoinSet::new();

    'conn: loop {
        loop {
            match codec.decode_frame(&mut buf) {
                Ok(Some(envelope)) => route_inbound(envelope, &handler, &sender, &mut requests),
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(peer = %peer, error = %e, "codec error, closing channel");
                    break 'conn;
                }
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "read failed");
                    break;
                }
            },
            Some(_) = requests.join_next(), if !requests.is_empty() => {}
        }
    }

    // In-flight requests still get their replies before the channel closes.
    while requests.join_next().await.is_some() {}
    sender.shutdown().await;
    tracing::debug!(peer = %peer, "channel closed");
}

fn route_inbound<H: MessageHandler>(
    envelope: Envelope,
    handler: &Arc<H>,
    sender: &Arc<FrameSender>,
    requests: &mut JoinSet<()>,
) {
    let sender = sender.clone();
    match envelope.kind {
        EnvelopeKind::Ping => {
            requests.spawn(async move {
                let _ = sender.send(Envelope::pong(envelope.correlation_id)).await;
            });
        }
        EnvelopeKind::Invoke => {
            let handler = handler.clone();
            requests.spawn(async move {
                let correlation_id = envelope.correlation_id;
                let reply = handler.handle(envelope).await;
                if let Err(e) = sender.send(reply).await {
                    tracing::debug!(correlation_id, error = %e, "failed to write reply");
                }
            });
        }
        kind => tracing::debug!(?kind, "ignoring unexpected envelope on server channel"),
    }
}
