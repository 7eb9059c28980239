//! In-process connections.
//!
//! [`pair`] joins two [`FrameHandler`]s with a pair of unbounded channels.
//! Each direction has one pump task that plays the role of the inbound
//! path, so ordering and lifecycle behave like a real connection without
//! any sockets.

use crate::connection::{Connection, FrameHandler, WireError};
use async_trait::async_trait;
use parley_types::{ConnectionId, TransportKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// State shared by both ends of a pair.
struct Link {
    open: AtomicBool,
    drop_unreliable: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// One end of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    peer: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    link: Arc<Link>,
}

impl MemoryConnection {
    /// Make both ends drop every unreliable frame, simulating loss.
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.link.drop_unreliable.store(drop, Ordering::Release);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
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
        if kind == TransportKind::Unreliable && self.link.drop_unreliable.load(Ordering::Acquire) {
            debug!(connection = %self.id, "Dropping unreliable frame");
            return Ok(());
        }
        self.outbound
            .send(frame)
            .map_err(|_| WireError::ConnectionClosed)
    }

    fn is_open(&self) -> bool {
        self.link.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.link.open.swap(false, Ordering::AcqRel) {
            let _ = self.link.shutdown.send(true);
        }
    }
}

/// Create a connected pair of endpoints.
///
/// The first returned connection belongs to `a` (frames sent on it reach
/// `b`), the second to `b`. Both handlers see `connected` before this
/// function returns.
pub fn pair(
    a: Arc<dyn FrameHandler>,
    b: Arc<dyn FrameHandler>,
) -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
    let (shutdown, _) = watch::channel(false);
    let link = Arc::new(Link {
        open: AtomicBool::new(true),
        drop_unreliable: AtomicBool::new(false),
        shutdown,
    });
    let (a_to_b, b_inbox) = mpsc::unbounded_channel();
    let (b_to_a, a_inbox) = mpsc::unbounded_channel();

    let conn_a = Arc::new(MemoryConnection {
        id: ConnectionId::next(),
        peer: "memory-b".to_string(),
        outbound: a_to_b,
        link: Arc::clone(&link),
    });
    let conn_b = Arc::new(MemoryConnection {
        id: ConnectionId::next(),
        peer: "memory-a".to_string(),
        outbound: b_to_a,
        link: Arc::clone(&link),
    });

    let dyn_a: Arc<dyn Connection> = conn_a.clone();
    let dyn_b: Arc<dyn Connection> = conn_b.clone();
    a.connected(&dyn_a);
    b.connected(&dyn_b);

    tokio::spawn(pump(a_inbox, dyn_a, a, link.shutdown.subscribe()));
    tokio::spawn(pump(b_inbox, dyn_b, b, link.shutdown.subscribe()));

    (conn_a, conn_b)
}

async fn pump(
    mut inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    conn: Arc<dyn Connection>,
    handler: Arc<dyn FrameHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = inbox.recv() => match frame {
                Some(frame) => handler.frame_received(&conn, frame),
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    conn.close();
    handler.disconnected(&conn);
}
