//! Shared fixtures: two invocation spaces joined by an in-memory link,
//! with every inbound frame recorded on the way in.

#![allow(dead_code)]

use parley_rmi::message::{self, Frame, InvocationRequest, InvocationResult};
use parley_rmi::InvocationSpace;
use parley_types::SpaceConfig;
use parley_wire::memory::{self, MemoryConnection};
use parley_wire::{Connection, FrameHandler};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records decoded frames, then hands them to the space.
pub struct Tap {
    space: InvocationSpace,
    seen: Mutex<Vec<Frame>>,
}

impl Tap {
    fn new(space: InvocationSpace) -> Self {
        Self {
            space,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<InvocationRequest> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|f| match f {
                Frame::Invoke(request) => Some(request.clone()),
                Frame::Result(_) => None,
            })
            .collect()
    }

    pub fn results(&self) -> Vec<InvocationResult> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|f| match f {
                Frame::Result(result) => Some(result.clone()),
                Frame::Invoke(_) => None,
            })
            .collect()
    }
}

impl FrameHandler for Tap {
    fn connected(&self, conn: &Arc<dyn Connection>) {
        self.space.connected(conn);
    }

    fn frame_received(&self, conn: &Arc<dyn Connection>, frame: Vec<u8>) {
        if let Ok(decoded) = message::decode(&frame) {
            self.seen.lock().unwrap().push(decoded);
        }
        self.space.frame_received(conn, frame);
    }

    fn disconnected(&self, conn: &Arc<dyn Connection>) {
        self.space.disconnected(conn);
    }
}

/// Two spaces with identical registrations, joined in memory.
pub struct Link {
    pub client: InvocationSpace,
    pub server: InvocationSpace,
    /// The client's end: proxies for server objects use it.
    pub client_conn: Arc<dyn Connection>,
    /// The server's end: proxies for client objects use it.
    pub server_conn: Arc<dyn Connection>,
    pub client_end: Arc<MemoryConnection>,
    /// Frames received by the client.
    pub client_tap: Arc<Tap>,
    /// Frames received by the server.
    pub server_tap: Arc<Tap>,
}

pub fn link_with(config: SpaceConfig, register: impl Fn(&InvocationSpace)) -> Link {
    let client = InvocationSpace::new(config.clone());
    let server = InvocationSpace::new(config);
    register(&client);
    register(&server);

    let client_tap = Arc::new(Tap::new(client.clone()));
    let server_tap = Arc::new(Tap::new(server.clone()));
    let (client_end, server_end) = memory::pair(client_tap.clone(), server_tap.clone());
    let client_conn: Arc<dyn Connection> = client_end.clone();
    let server_conn: Arc<dyn Connection> = server_end;
    Link {
        client,
        server,
        client_conn,
        server_conn,
        client_end,
        client_tap,
        server_tap,
    }
}

pub fn link(register: impl Fn(&InvocationSpace)) -> Link {
    link_with(SpaceConfig::default(), register)
}

/// Let in-flight frames land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
