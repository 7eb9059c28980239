//! TCP server and client for Parley connections.
//!
//! A [`PeerNode`] binds a local TCP listener and accepts incoming
//! connections. It can also dial out to other nodes. Each connection first
//! performs a handshake that checks the protocol version and the capability
//! registration fingerprint, then splits into one reader task (the inbound
//! path, feeding the [`FrameHandler`]) and one writer task draining the
//! connection's outbound queue.

use crate::connection::{Connection, FrameHandler, WireError};
use crate::message::*;
use crate::registry::{PeerEntry, PeerRegistry, PeerState};

use async_trait::async_trait;
use parley_types::{ConnectionId, TransportKind};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Configuration for a PeerNode.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Address to bind the listener on.
    pub listen_addr: SocketAddr,
    /// This node's human-readable name.
    pub node_name: String,
    /// Registration fingerprint announced in the handshake. An empty
    /// fingerprint on either side disables the check.
    pub fingerprint: String,
    /// Outbound queue capacity per connection.
    pub outbound_queue: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            node_name: format!("parley-{}", uuid::Uuid::new_v4().simple()),
            fingerprint: String::new(),
            outbound_queue: 1024,
        }
    }
}

/// A handshaked TCP connection.
struct TcpConnection {
    id: ConnectionId,
    peer: String,
    outbound: mpsc::Sender<Vec<u8>>,
    open: AtomicBool,
    shutdown: watch::Sender<bool>,
}

#[async_trait]
impl Connection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    async fn send(&self, frame: Vec<u8>, kind: TransportKind) -> Result<(), WireError> {
        if !self.is_open() {
            return Err(WireError::ConnectionClosed);
        }
        if frame.len() > MAX_FRAME_SIZE as usize {
            return Err(WireError::FrameTooLarge {
                size: frame.len() as u32,
                max: MAX_FRAME_SIZE,
            });
        }
        match kind {
            TransportKind::Reliable => self
                .outbound
                .send(frame)
                .await
                .map_err(|_| WireError::ConnectionClosed),
            TransportKind::Unreliable => match self.outbound.try_send(frame) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection = %self.id, "Outbound queue full, dropping unreliable frame");
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(WireError::ConnectionClosed),
            },
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(connection = %self.id, "Closing connection to {}", self.peer);
            let _ = self.shutdown.send(true);
        }
    }
}

/// The local network node. Listens for connections and dials peers.
pub struct PeerNode {
    config: PeerConfig,
    registry: PeerRegistry,
    handler: Arc<dyn FrameHandler>,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
}

impl PeerNode {
    /// Create and start listening on the configured address.
    pub async fn start(
        config: PeerConfig,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), WireError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            "Parley: listening on {} (node={})",
            local_addr, config.node_name
        );

        let node = Arc::new(Self {
            config,
            registry: PeerRegistry::new(),
            handler,
            local_addr,
        });

        let node_clone = Arc::clone(&node);
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, node_clone).await;
        });

        Ok((node, accept_handle))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the node name.
    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    /// Get a reference to the peer registry.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Connect to a remote node and perform the handshake.
    pub async fn connect(&self, addr: SocketAddr) -> Result<Arc<dyn Connection>, WireError> {
        info!("Parley: connecting to peer at {}", addr);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let hello = Handshake::Hello {
            node_name: self.config.node_name.clone(),
            protocol_version: PROTOCOL_VERSION,
            fingerprint: self.config.fingerprint.clone(),
        };
        write_raw(&mut writer, &encode_handshake(&hello)?).await?;

        let body = read_frame(&mut reader).await?;
        match decode_handshake(&body)? {
            Handshake::HelloAck {
                node_name,
                protocol_version,
                fingerprint,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(WireError::VersionMismatch {
                        local: PROTOCOL_VERSION,
                        remote: protocol_version,
                    });
                }
                if !fingerprints_agree(&self.config.fingerprint, &fingerprint) {
                    return Err(WireError::FingerprintMismatch {
                        local: self.config.fingerprint.clone(),
                        remote: fingerprint,
                    });
                }
                info!("Parley: handshake complete with {} at {}", node_name, addr);
                Ok(self.establish(
                    reader,
                    writer,
                    addr,
                    node_name,
                    fingerprint,
                    protocol_version,
                ))
            }
            Handshake::Error { code, message } => Err(WireError::HandshakeFailed(format!(
                "Remote error {code}: {message}"
            ))),
            Handshake::Hello { .. } => Err(WireError::HandshakeFailed(
                "Unexpected response to handshake".to_string(),
            )),
        }
    }

    /// Accept loop, run in a spawned task.
    async fn accept_loop(listener: TcpListener, node: Arc<PeerNode>) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Parley: accepted connection from {}", addr);
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        if let Err(e) = node.handle_inbound(stream, addr).await {
                            debug!("Parley: inbound connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Parley: accept error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Handle a single inbound connection: verify the handshake, then hand
    /// the stream over to the reader/writer tasks.
    async fn handle_inbound(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), WireError> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let body = read_frame(&mut reader).await?;
        let hello = match decode_handshake(&body) {
            Ok(msg) => msg,
            Err(e) => {
                reject(&mut writer, 400, "Malformed handshake").await?;
                return Err(WireError::Json(e));
            }
        };

        match hello {
            Handshake::Hello {
                node_name,
                protocol_version,
                fingerprint,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    let message = format!(
                        "Protocol version mismatch: expected {}, got {}",
                        PROTOCOL_VERSION, protocol_version
                    );
                    reject(&mut writer, 1, &message).await?;
                    return Err(WireError::VersionMismatch {
                        local: PROTOCOL_VERSION,
                        remote: protocol_version,
                    });
                }
                if !fingerprints_agree(&self.config.fingerprint, &fingerprint) {
                    warn!(
                        "Parley: rejected {} from {}: capability registration differs",
                        node_name, addr
                    );
                    reject(&mut writer, 409, "Capability registration mismatch").await?;
                    return Err(WireError::FingerprintMismatch {
                        local: self.config.fingerprint.clone(),
                        remote: fingerprint,
                    });
                }

                let ack = Handshake::HelloAck {
                    node_name: self.config.node_name.clone(),
                    protocol_version: PROTOCOL_VERSION,
                    fingerprint: self.config.fingerprint.clone(),
                };
                write_raw(&mut writer, &encode_handshake(&ack)?).await?;

                info!("Parley: handshake with {} from {}", node_name, addr);
                self.establish(
                    reader,
                    writer,
                    addr,
                    node_name,
                    fingerprint,
                    protocol_version,
                );
                Ok(())
            }
            _ => {
                warn!(
                    "Parley: rejected message from {}: handshake required",
                    addr
                );
                reject(&mut writer, 401, "Handshake required before any frame").await?;
                Err(WireError::HandshakeFailed(
                    "Rejected frame before handshake".into(),
                ))
            }
        }
    }

    /// Register a handshaked stream and spawn its reader and writer tasks.
    fn establish(
        &self,
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        addr: SocketAddr,
        node_name: String,
        fingerprint: String,
        protocol_version: u32,
    ) -> Arc<dyn Connection> {
        let id = ConnectionId::next();
        let (tx, rx) = mpsc::channel(self.config.outbound_queue.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let conn: Arc<dyn Connection> = Arc::new(TcpConnection {
            id,
            peer: format!("{node_name}@{addr}"),
            outbound: tx,
            open: AtomicBool::new(true),
            shutdown: shutdown_tx,
        });

        self.registry.add_peer(PeerEntry {
            connection_id: id,
            node_name,
            address: addr,
            fingerprint,
            state: PeerState::Connected,
            connected_at: chrono::Utc::now(),
            protocol_version,
        });

        self.handler.connected(&conn);

        tokio::spawn(write_loop(writer, rx, shutdown_rx.clone()));

        let registry = self.registry.clone();
        let handler = Arc::clone(&self.handler);
        let reader_conn = Arc::clone(&conn);
        tokio::spawn(async move {
            if let Err(e) = read_loop(reader, &reader_conn, &*handler, shutdown_rx).await {
                debug!("Parley: connection {} ended: {}", reader_conn.id(), e);
            }
            reader_conn.close();
            registry.mark_disconnected(reader_conn.id());
            handler.disconnected(&reader_conn);
        });

        conn
    }
}

fn fingerprints_agree(local: &str, remote: &str) -> bool {
    local.is_empty() || remote.is_empty() || local == remote
}

async fn reject(writer: &mut OwnedWriteHalf, code: i32, message: &str) -> Result<(), WireError> {
    let err = Handshake::Error {
        code,
        message: message.to_string(),
    };
    write_raw(writer, &encode_handshake(&err)?).await
}

/// Inbound path: deliver every frame to the handler, in order.
async fn read_loop(
    mut reader: OwnedReadHalf,
    conn: &Arc<dyn Connection>,
    handler: &dyn FrameHandler,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), WireError> {
    loop {
        tokio::select! {
            frame = read_frame(&mut reader) => match frame {
                Ok(frame) => handler.frame_received(conn, frame),
                Err(WireError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            },
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

/// Drain the outbound queue onto the socket until shutdown.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(body) => {
                    if let Err(e) = write_raw(&mut writer, &encode_frame(&body)).await {
                        debug!("Parley: write failed: {}", e);
                        return;
                    }
                }
                None => return,
            },
            _ = shutdown.changed() => return,
        }
    }
}

/// Write already-framed bytes to a TCP stream.
async fn write_raw(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> Result<(), WireError> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame body.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, WireError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}
