//! Registry of active connections.
//!
//! The registry exclusively owns every live [`ConnectionContext`]. All
//! reads and writes go through one lock; subscriber callbacks always run
//! outside it so arbitrary external code never executes under the lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use metrics::{Counter, Gauge};

use crate::auth::Identity;
use crate::connection::context::{ConnectionContext, ConnectionId};

/// Receives connection lifecycle events. At most one subscriber per
/// server.
pub trait ConnectionEvents: Send + Sync {
    /// Called when a client connects.
    fn connection_start(&self, _ctx: &ConnectionContext) {}

    /// Called when a client disconnects. The context is released after
    /// this callback returns; the reference must not be retained.
    fn connection_end(&self, _ctx: &ConnectionContext) {}

    /// Whether the connection should be considered idle, e.g. because
    /// every session associated with it has expired. Consulted on the
    /// idle-poll period; a true result is a hint for the engine to close
    /// the connection.
    fn is_idle_connection(&self, _ctx: &ConnectionContext) -> bool {
        false
    }
}

struct RegistryMetrics {
    /// Number of currently active connections.
    connections_in_use: Gauge,
    /// Total connections accepted over the lifetime of the server.
    total_connections: Counter,
}

/// Concurrent store of active connection contexts.
pub struct ConnectionRegistry {
    server_name: String,
    connections: Mutex<HashMap<ConnectionId, Arc<ConnectionContext>>>,
    events: Option<Arc<dyn ConnectionEvents>>,
    metrics: Option<RegistryMetrics>,
}

impl ConnectionRegistry {
    /// Create a registry. With a metrics prefix, a `connections-in-use`
    /// gauge and a `total-connections` counter are registered under it.
    pub fn new(
        server_name: &str,
        events: Option<Arc<dyn ConnectionEvents>>,
        metrics_prefix: Option<&str>,
    ) -> Self {
        let metrics = metrics_prefix.map(|prefix| RegistryMetrics {
            connections_in_use: metrics::gauge!(format!("{}.connections-in-use", prefix)),
            total_connections: metrics::counter!(format!("{}.total-connections", prefix)),
        });
        Self {
            server_name: server_name.to_string(),
            connections: Mutex::new(HashMap::new()),
            events,
            metrics,
        }
    }

    /// Register a new connection: build its context, insert it and notify
    /// the subscriber.
    pub fn on_connect(&self, peer: SocketAddr, identity: Identity) -> Arc<ConnectionContext> {
        let ctx = Arc::new(ConnectionContext::new(identity, peer, &self.server_name));
        {
            let mut connections = self.connections.lock().unwrap();
            connections.insert(ctx.connection_id(), Arc::clone(&ctx));
        }
        if let Some(m) = &self.metrics {
            m.connections_in_use.increment(1.0);
            m.total_connections.increment(1);
        }
        tracing::debug!(
            connection_id = %ctx.connection_id(),
            peer = %peer,
            "connection established"
        );

        // Subscriber runs outside the lock.
        if let Some(events) = &self.events {
            events.connection_start(&ctx);
        }
        ctx
    }

    /// Remove a connection and notify the subscriber. After this returns,
    /// no lookup can find the context and the registry's ownership of it
    /// is released.
    pub fn on_disconnect(&self, id: ConnectionId) {
        let removed = self.connections.lock().unwrap().remove(&id);
        let Some(ctx) = removed else {
            return;
        };
        if let Some(m) = &self.metrics {
            m.connections_in_use.decrement(1.0);
        }
        tracing::debug!(connection_id = %id, "connection closed");

        if let Some(events) = &self.events {
            events.connection_end(&ctx);
        }
    }

    /// Whether the subscriber considers this connection idle. False
    /// without a subscriber.
    pub fn is_idle(&self, ctx: &ConnectionContext) -> bool {
        self.events
            .as_ref()
            .is_some_and(|events| events.is_idle_connection(ctx))
    }

    /// Consistent point-in-time list of all active connection contexts.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionContext>> {
        self.connections
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }

    /// Look up one active connection by id.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionContext>> {
        self.connections.lock().unwrap().get(&id).cloned()
    }

    /// Number of currently active connections.
    pub fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        starts: AtomicUsize,
        ends: AtomicUsize,
    }

    impl ConnectionEvents for Recorder {
        fn connection_start(&self, _ctx: &ConnectionContext) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn connection_end(&self, _ctx: &ConnectionContext) {
            self.ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn connect_then_disconnect_updates_registry() {
        let recorder = Arc::new(Recorder::default());
        let registry =
            ConnectionRegistry::new("unit", Some(recorder.clone() as Arc<dyn ConnectionEvents>), None);

        let ctx = registry.on_connect(peer(), Identity::anonymous());
        assert_eq!(registry.len(), 1);
        assert_eq!(recorder.starts.load(Ordering::SeqCst), 1);
        assert!(registry.get(ctx.connection_id()).is_some());

        registry.on_disconnect(ctx.connection_id());
        assert_eq!(registry.len(), 0);
        assert_eq!(recorder.ends.load(Ordering::SeqCst), 1);
        assert!(registry.get(ctx.connection_id()).is_none());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn snapshot_size_matches_active_count() {
        let registry = ConnectionRegistry::new("unit", None, None);
        let a = registry.on_connect(peer(), Identity::anonymous());
        let b = registry.on_connect(peer(), Identity::anonymous());
        assert_ne!(a.connection_id(), b.connection_id());
        assert_eq!(registry.snapshot().len(), registry.len());
        registry.on_disconnect(a.connection_id());
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn duplicate_disconnect_is_harmless() {
        let registry = ConnectionRegistry::new("unit", None, None);
        let ctx = registry.on_connect(peer(), Identity::anonymous());
        registry.on_disconnect(ctx.connection_id());
        registry.on_disconnect(ctx.connection_id());
        assert!(registry.is_empty());
    }

    #[test]
    fn idle_defaults_to_false_without_subscriber() {
        let registry = ConnectionRegistry::new("unit", None, None);
        let ctx = registry.on_connect(peer(), Identity::anonymous());
        assert!(!registry.is_idle(&ctx));
    }
}
