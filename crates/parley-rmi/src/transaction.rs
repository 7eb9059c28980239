//! Transaction result store.
//!
//! Results are keyed by transaction id. A result may arrive before or
//! after someone waits for it: an early result is parked until read, a
//! waiter parks a oneshot sender until the result arrives. Waiting never
//! blocks a thread, only the calling task.
//!
//! A parked result that nobody collects is dropped by [`TransactionStore::expire`]
//! once it is older than the store's retention.

use crate::error::{RmiError, RmiResult};
use parley_types::{ConnectionId, TransactionId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Upper bound on remembered abandoned ids.
const MAX_ABANDONED: usize = 10_000;

/// Number of lost connections remembered for fail-fast reads.
const MAX_DEAD: usize = 256;

/// How long an uncollected result is kept by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

/// What a read does with its transaction when it times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnTimeout {
    /// Forget the transaction; a late result is discarded.
    Abandon,
    /// Stop waiting but park a late result for another read.
    Keep,
}

type Outcome<T> = RmiResult<T>;

enum Slot<T> {
    Arrived(Outcome<T>),
    Waiting(oneshot::Sender<Outcome<T>>),
}

struct Entry<T> {
    connection: Option<ConnectionId>,
    slot: Slot<T>,
}

struct StoreState<T> {
    slots: HashMap<TransactionId, Entry<T>>,
    abandoned: HashSet<TransactionId>,
    /// Most recently lost connections, oldest first.
    dead: VecDeque<ConnectionId>,
    /// Parked results in arrival order.
    arrivals: VecDeque<(Instant, TransactionId)>,
}

pub struct TransactionStore<T> {
    state: Mutex<StoreState<T>>,
    retention: Duration,
}

impl<T: Send + 'static> TransactionStore<T> {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// A store that keeps uncollected results for `retention`.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState {
                slots: HashMap::new(),
                abandoned: HashSet::new(),
                dead: VecDeque::new(),
                arrivals: VecDeque::new(),
            }),
            retention,
        }
    }

    /// Record a result and wake its waiter, if any.
    pub fn write(&self, id: TransactionId, connection: Option<ConnectionId>, value: T) {
        self.deliver(id, connection, Ok(value));
    }

    /// Record a failure for a transaction.
    pub fn fail(&self, id: TransactionId, connection: Option<ConnectionId>, err: RmiError) {
        self.deliver(id, connection, Err(err));
    }

    fn deliver(&self, id: TransactionId, connection: Option<ConnectionId>, outcome: Outcome<T>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.abandoned.remove(&id) {
            debug!(transaction = %id, "Discarding result for abandoned transaction");
            return;
        }
        match state.slots.remove(&id) {
            Some(Entry {
                slot: Slot::Waiting(waiter),
                ..
            }) => {
                if waiter.send(outcome).is_err() {
                    debug!(transaction = %id, "Waiter went away before the result arrived");
                }
            }
            Some(first @ Entry {
                slot: Slot::Arrived(_),
                ..
            }) => {
                warn!(transaction = %id, "Duplicate result, keeping the first");
                state.slots.insert(id, first);
            }
            None => {
                state.slots.insert(
                    id,
                    Entry {
                        connection,
                        slot: Slot::Arrived(outcome),
                    },
                );
                state.arrivals.push_back((Instant::now(), id));
            }
        }
    }

    /// Wait up to `timeout` for a transaction's result, consuming it. A
    /// timed-out transaction is abandoned.
    ///
    /// `connection` ties the wait to a connection so that losing it wakes
    /// the waiter with [`RmiError::Disconnected`].
    pub async fn read(
        &self,
        id: TransactionId,
        connection: Option<ConnectionId>,
        timeout: Duration,
    ) -> Outcome<T> {
        self.read_with(id, connection, timeout, OnTimeout::Abandon).await
    }

    pub async fn read_with(
        &self,
        id: TransactionId,
        connection: Option<ConnectionId>,
        timeout: Duration,
        on_timeout: OnTimeout,
    ) -> Outcome<T> {
        let receiver = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.slots.remove(&id) {
                Some(Entry {
                    slot: Slot::Arrived(outcome),
                    ..
                }) => return outcome,
                Some(waiting) => {
                    state.slots.insert(id, waiting);
                    return Err(RmiError::AlreadyAwaited(id));
                }
                None => {}
            }
            if let Some(conn) = connection.filter(|c| state.dead.contains(c)) {
                return Err(RmiError::Disconnected(conn));
            }
            let (sender, receiver) = oneshot::channel();
            state.slots.insert(
                id,
                Entry {
                    connection,
                    slot: Slot::Waiting(sender),
                },
            );
            receiver
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RmiError::SpaceClosed),
            Err(_) => {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if matches!(
                    state.slots.get(&id),
                    Some(Entry {
                        slot: Slot::Waiting(_),
                        ..
                    })
                ) {
                    state.slots.remove(&id);
                    if on_timeout == OnTimeout::Abandon {
                        if state.abandoned.len() >= MAX_ABANDONED {
                            state.abandoned.clear();
                        }
                        state.abandoned.insert(id);
                    }
                }
                Err(RmiError::Timeout {
                    transaction: id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// True if the transaction has an entry, arrived or awaited.
    pub fn contains(&self, id: TransactionId) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.slots.contains_key(&id)
    }

    /// True if a result (or failure) has arrived and not been read.
    pub fn has_value(&self, id: TransactionId) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        matches!(
            state.slots.get(&id),
            Some(Entry {
                slot: Slot::Arrived(_),
                ..
            })
        )
    }

    /// Mark a connection dead and fail everyone waiting on it.
    pub fn fail_connection(&self, connection: ConnectionId) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.dead.contains(&connection) {
            if state.dead.len() >= MAX_DEAD {
                state.dead.pop_front();
            }
            state.dead.push_back(connection);
        }
        let doomed: Vec<TransactionId> = state
            .slots
            .iter()
            .filter(|(_, e)| e.connection == Some(connection) && matches!(e.slot, Slot::Waiting(_)))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            if let Some(Entry {
                slot: Slot::Waiting(waiter),
                ..
            }) = state.slots.remove(id)
            {
                let _ = waiter.send(Err(RmiError::Disconnected(connection)));
            }
        }
        doomed.len()
    }

    /// Drop parked results older than the retention and return their ids.
    pub fn expire(&self) -> Vec<TransactionId> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut expired = Vec::new();
        while let Some(&(arrived, id)) = state.arrivals.front() {
            if now.duration_since(arrived) < self.retention {
                break;
            }
            state.arrivals.pop_front();
            if matches!(
                state.slots.get(&id),
                Some(Entry {
                    slot: Slot::Arrived(_),
                    ..
                })
            ) {
                state.slots.remove(&id);
                expired.push(id);
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired uncollected results");
        }
        expired
    }

    /// Drop every entry; parked waiters wake with [`RmiError::SpaceClosed`].
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.slots.clear();
        state.abandoned.clear();
        state.arrivals.clear();
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> Default for TransactionStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
