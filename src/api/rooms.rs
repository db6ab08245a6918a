//! Rooms hosted by the server
//!
//! A room is one [`Network`] plus the [`Dispatcher`] serving it. Rooms are
//! opened by the first WebSocket handshake that names them and persist their
//! roster through a [`RosterStore`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client::NORMAL_CLOSE;
use crate::config::{Config, PersistenceMode};
use crate::dispatch::{ContextHook, Dispatcher};
use crate::host::{ErrorHook, FileStore, MemoryStore, RosterStore, TransportTable};
use crate::network::{JoinAction, Network, NetworkOptions};
use crate::router::Router;
use crate::{Error, Result};

const MAX_ROOM_ID_LEN: usize = 128;

/// Where rooms keep their rosters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    Memory,
    /// One `{room}.json` file per room in this directory
    Files(PathBuf),
}

impl Persistence {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        match config.persistence {
            PersistenceMode::Memory => Self::Memory,
            PersistenceMode::Files => Self::Files(config.rooms_dir()),
        }
    }
}

/// One open room
#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub network: Network,
    pub dispatcher: Dispatcher,
}

/// Registry of open rooms
pub struct Rooms {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    persistence: Persistence,
    router: Router,
    options: NetworkOptions,
    context: Option<ContextHook>,
    error_hook: Option<ErrorHook>,
}

impl Rooms {
    #[must_use]
    pub fn new(router: Router, persistence: Persistence, options: NetworkOptions) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            persistence,
            router,
            options,
            context: None,
            error_hook: None,
        }
    }

    /// Build the session context of every inbound request
    #[must_use]
    pub fn with_context(mut self, hook: ContextHook) -> Self {
        self.context = Some(hook);
        self
    }

    /// Receive failures reported by any room
    #[must_use]
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hook = Some(hook);
        self
    }

    #[must_use]
    pub const fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    /// Open a room for a joining peer
    ///
    /// `create` always succeeds, restoring a persisted roster if there is one.
    /// `join` and `rejoin` need the room to be open or persisted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Handshake` for an invalid room id, `Error::RoomNotFound`
    /// for an unknown room, or a store error
    pub async fn open(&self, room_id: &str, action: JoinAction) -> Result<Arc<Room>> {
        validate_room_id(room_id)?;

        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(room_id) {
            return Ok(Arc::clone(room));
        }

        let store: Arc<dyn RosterStore> = match &self.persistence {
            Persistence::Memory => {
                if action != JoinAction::Create {
                    return Err(Error::RoomNotFound(room_id.to_string()));
                }
                Arc::new(MemoryStore::new())
            }
            Persistence::Files(dir) => {
                let store = FileStore::new(dir.join(format!("{room_id}.json")));
                if action != JoinAction::Create && !store.exists().await? {
                    return Err(Error::RoomNotFound(room_id.to_string()));
                }
                Arc::new(store)
            }
        };

        let network = Network::restore(store, Arc::new(TransportTable::new()), &self.options).await?;
        if let Some(hook) = &self.error_hook {
            network.set_error_hook(Arc::clone(hook));
        }

        let mut dispatcher = Dispatcher::new(self.router.clone(), network.clone());
        if let Some(hook) = &self.context {
            dispatcher = dispatcher.with_context(Arc::clone(hook));
        }

        let room = Arc::new(Room {
            id: room_id.to_string(),
            network,
            dispatcher,
        });
        rooms.insert(room_id.to_string(), Arc::clone(&room));

        tracing::info!(room_id = %room_id, action = %action, "room opened");
        Ok(room)
    }

    /// An open room
    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(room_id).cloned()
    }

    /// Ids of every open room
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Close a room's sockets and erase its persisted roster
    ///
    /// Returns false if the room was not open
    ///
    /// # Errors
    ///
    /// Returns error if the store fails to destroy the roster
    pub async fn destroy(&self, room_id: &str) -> Result<bool> {
        let Some(room) = self.rooms.lock().await.remove(room_id) else {
            return Ok(false);
        };

        let transports = room.network.transports();
        for peer in room.network.connected_clients() {
            if let Some(transport) = transports.get_transport(&peer.peer_id) {
                transport.close(NORMAL_CLOSE, "room destroyed").await;
            }
        }
        room.network.destroy().await?;

        tracing::info!(room_id = %room_id, "room destroyed");
        Ok(true)
    }
}

impl std::fmt::Debug for Rooms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rooms")
            .field("persistence", &self.persistence)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

fn validate_room_id(room_id: &str) -> Result<()> {
    let valid = !room_id.is_empty()
        && room_id.len() <= MAX_ROOM_ID_LEN
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(Error::Handshake(format!("invalid room id '{room_id}'")))
    }
}
