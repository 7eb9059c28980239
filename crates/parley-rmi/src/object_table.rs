//! Object table: the objects a space hosts, by id.
//!
//! Objects are hosted either explicitly by the application (pinned until
//! unhosted) or implicitly when a local object crosses the wire as a
//! callback-style argument or remote result. Implicit entries remember
//! which connections they were exported to and are dropped once all of
//! them are gone.

use crate::error::{RmiError, RmiResult};
use crate::value::{object_address, ObjectRef};
use parley_types::{ConnectionId, ObjectId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

struct Entry {
    object: ObjectRef,
    /// `None` for explicitly hosted objects.
    exported_to: Option<HashSet<ConnectionId>>,
}

struct TableState {
    next_id: u32,
    by_id: HashMap<ObjectId, Entry>,
    by_address: HashMap<usize, ObjectId>,
}

impl TableState {
    fn allocate(&mut self) -> ObjectId {
        while self.by_id.contains_key(&ObjectId(self.next_id)) {
            self.next_id = self.next_id.wrapping_add(1);
        }
        let id = ObjectId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn bind(&mut self, id: ObjectId, object: ObjectRef, exported_to: Option<HashSet<ConnectionId>>) {
        self.by_address.entry(object_address(&object)).or_insert(id);
        self.by_id.insert(
            id,
            Entry {
                object,
                exported_to,
            },
        );
    }
}

/// Thread-safe id to object table.
pub struct ObjectTable {
    state: Mutex<TableState>,
}

impl ObjectTable {
    pub fn new(first_id: u32) -> Self {
        Self {
            state: Mutex::new(TableState {
                next_id: first_id,
                by_id: HashMap::new(),
                by_address: HashMap::new(),
            }),
        }
    }

    /// Host an object under the next free id.
    ///
    /// An object that is already hosted keeps its id and becomes pinned.
    pub fn host(&self, object: ObjectRef) -> ObjectId {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&id) = state.by_address.get(&object_address(&object)) {
            if let Some(entry) = state.by_id.get_mut(&id) {
                entry.exported_to = None;
            }
            return id;
        }
        let id = state.allocate();
        state.bind(id, object, None);
        debug!(object = %id, "Hosted object");
        id
    }

    /// Host an object under a caller-chosen id.
    pub fn host_with_id(&self, id: ObjectId, object: ObjectRef) -> RmiResult<ObjectId> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.by_id.contains_key(&id) {
            return Err(RmiError::DuplicateObjectId(id));
        }
        state.bind(id, object, None);
        if id.0 >= state.next_id {
            state.next_id = id.0.wrapping_add(1);
        }
        debug!(object = %id, "Hosted object with explicit id");
        Ok(id)
    }

    /// Export an object to a connection, hosting it if needed.
    ///
    /// Exporting the same object again returns the same id.
    pub fn export(&self, connection: ConnectionId, object: &ObjectRef) -> ObjectId {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&id) = state.by_address.get(&object_address(object)) {
            if let Some(Entry {
                exported_to: Some(set),
                ..
            }) = state.by_id.get_mut(&id)
            {
                set.insert(connection);
            }
            return id;
        }
        let id = state.allocate();
        state.bind(id, object.clone(), Some(HashSet::from([connection])));
        debug!(object = %id, %connection, "Exported object");
        id
    }

    pub fn resolve(&self, id: ObjectId) -> Option<ObjectRef> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.by_id.get(&id).map(|e| e.object.clone())
    }

    pub fn id_of(&self, object: &ObjectRef) -> Option<ObjectId> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.by_address.get(&object_address(object)).copied()
    }

    pub fn unhost(&self, id: ObjectId) -> Option<ObjectRef> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let entry = state.by_id.remove(&id)?;
        let address = object_address(&entry.object);
        if state.by_address.get(&address) == Some(&id) {
            state.by_address.remove(&address);
            // Another id may still hold the same object.
            let other = state
                .by_id
                .iter()
                .find(|(_, e)| object_address(&e.object) == address)
                .map(|(other, _)| *other);
            if let Some(other) = other {
                state.by_address.insert(address, other);
            }
        }
        debug!(object = %id, "Unhosted object");
        Some(entry.object)
    }

    /// Forget a connection; implicit exports left with no connection are
    /// unhosted. Returns how many entries were dropped.
    pub fn retire_connection(&self, connection: ConnectionId) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut orphaned = Vec::new();
        for (id, entry) in state.by_id.iter_mut() {
            if let Some(set) = entry.exported_to.as_mut() {
                if set.remove(&connection) && set.is_empty() {
                    orphaned.push(*id);
                }
            }
        }
        for id in &orphaned {
            if let Some(entry) = state.by_id.remove(id) {
                let address = object_address(&entry.object);
                if state.by_address.get(&address) == Some(id) {
                    state.by_address.remove(&address);
                }
            }
        }
        orphaned.len()
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
