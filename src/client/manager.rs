//! Lazily created, resettable client

use std::sync::Mutex;

use super::options::ClientOptions;
use super::runtime::Client;
use super::state::ConnectionState;
use crate::pending::lock;
use crate::router::Router;

type OptionsFactory = Box<dyn Fn() -> ClientOptions + Send + Sync>;

/// Owns at most one [`Client`], built on first use
///
/// The options factory runs each time a client is built, so a reset picks up
/// fresh options.
pub struct ClientManager {
    router: Router,
    factory: OptionsFactory,
    client: Mutex<Option<Client>>,
}

impl ClientManager {
    #[must_use]
    pub fn new(
        router: Router,
        factory: impl Fn() -> ClientOptions + Send + Sync + 'static,
    ) -> Self {
        Self {
            router,
            factory: Box::new(factory),
            client: Mutex::new(None),
        }
    }

    /// Current client, building it if there is none
    #[must_use]
    pub fn get_client(&self) -> Client {
        let mut slot = lock(&self.client);
        slot.get_or_insert_with(|| {
            tracing::debug!("creating client");
            Client::new(self.router.clone(), (self.factory)())
        })
        .clone()
    }

    /// Disconnect and drop the current client
    pub async fn reset_client(&self) {
        let client = lock(&self.client).take();
        if let Some(client) = client {
            client.disconnect().await;
        }
    }

    #[must_use]
    pub fn has_client(&self) -> bool {
        lock(&self.client).is_some()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.client).as_ref().is_some_and(Client::is_connected)
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.client)
            .as_ref()
            .map_or(ConnectionState::Offline, Client::state)
    }
}

impl std::fmt::Debug for ClientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientManager")
            .field("router", &self.router)
            .field("client", &*lock(&self.client))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ClientManager {
        ClientManager::new(Router::new(), || {
            ClientOptions::new("ws://127.0.0.1:9", "room", "alice")
        })
    }

    #[test]
    fn degrades_without_client() {
        let manager = manager();
        assert!(!manager.has_client());
        assert!(!manager.is_connected());
        assert_eq!(manager.connection_state(), ConnectionState::Offline);
    }

    #[tokio::test]
    async fn builds_once_and_resets() {
        let manager = manager();
        let first = manager.get_client();
        let second = manager.get_client();
        assert_eq!(first.peer_id(), "alice");
        assert!(manager.has_client());
        assert_eq!(second.state(), ConnectionState::Offline);

        manager.reset_client().await;
        assert!(!manager.has_client());
        assert_eq!(manager.connection_state(), ConnectionState::Offline);
    }
}
