pub mod auth;
pub mod blocking;
pub mod connection;
pub mod registry;

use std::time::Duration;

use quest_core::chat::ChatService;

use crate::registry::ConnectionRegistry;

/// Everything a realtime connection needs. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    pub registry: ConnectionRegistry,
    pub chat: ChatService,
    pub storage_timeout: Duration,
}

impl Gateway {
    pub fn new(chat: ChatService, storage_timeout: Duration) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            chat,
            storage_timeout,
        }
    }
}
