//! Session cache keyed by (host, port, username).
//!
//! Several directories deployed to the same machine reuse one session. The
//! caller owns the manager and disposes sessions explicitly.

use super::{Connection, ConnectionKey, ConnectionTarget, LocalSession, RemoteSession, SshSession};
use crate::utils::errors::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Opens new sessions
pub trait Connector: Send + Sync {
    fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn RemoteSession>>;
}

/// Opens SSH sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

impl Connector for SshConnector {
    fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn RemoteSession>> {
        Ok(Box::new(SshSession::connect(target)?))
    }
}

/// Opens sessions on the local machine, ignoring host and credentials
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalConnector;

impl Connector for LocalConnector {
    fn connect(&self, _target: &ConnectionTarget) -> Result<Box<dyn RemoteSession>> {
        Ok(Box::new(LocalSession::new()))
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    connections: HashMap<ConnectionKey, Connection>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: HashMap::new(),
        }
    }

    /// Manager opening SSH sessions
    pub fn ssh() -> Self {
        Self::new(Arc::new(SshConnector))
    }

    /// Return the cached connection for the target's key or open a new one.
    pub async fn connect(&mut self, target: &ConnectionTarget) -> Result<Connection> {
        let key = target.key();
        if let Some(connection) = self.connections.get(&key) {
            tracing::debug!("Reusing connection to {}", key);
            return Ok(connection.clone());
        }

        tracing::info!("Connecting to {} ...", key);

        let connector = Arc::clone(&self.connector);
        let owned_target = target.clone();
        let session = tokio::task::spawn_blocking(move || connector.connect(&owned_target)).await??;

        let connection = Connection::new(key.clone(), session);
        self.connections.insert(key, connection.clone());
        Ok(connection)
    }

    /// Drop the cached session for `key`. Returns whether one existed.
    ///
    /// The session closes once every outstanding clone is dropped.
    pub fn disconnect(&mut self, key: &ConnectionKey) -> bool {
        self.connections.remove(key).is_some()
    }

    pub fn disconnect_all(&mut self) {
        self.connections.clear();
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
