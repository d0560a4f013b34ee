//! Composition root — builds and wires one harness instance.
//!
//! Nothing here is process-global: every registry, store and server is
//! owned by the [`Harness`] handle, so several independent instances can
//! run in one process (each test gets its own). Startup order matters:
//! gateway ports bind first so the port pool only contains ports the host
//! actually listens on, then the channel server starts admitting clients,
//! then the gateway begins serving.

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::channel::{ChannelHub, ChannelServer};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::HarnessError;
use crate::gateway;
use crate::pending::PendingReplies;
use crate::registry::ClientRegistry;
use crate::traffic::TrafficLog;

/// A running harness instance.
pub struct Harness {
    gateway_ports: Vec<u16>,
    channel_addr: SocketAddr,
    registry: ClientRegistry,
    pending: PendingReplies,
    traffic: TrafficLog,
    shutdown: CancellationToken,
}

impl Harness {
    /// Bind, wire and start every component.
    pub async fn start(config: Config) -> Result<Self, HarnessError> {
        let shutdown = CancellationToken::new();

        // Gateway ports first: the bound set *is* the reservable pool.
        let listeners = gateway::bind(&config.gateway.ports).await?;
        let gateway_ports: Vec<u16> = listeners.iter().map(|l| l.port).collect();

        let registry = ClientRegistry::new(config.gateway.mode, gateway_ports.iter().copied());
        let hub = ChannelHub::new();
        let pending = PendingReplies::new();
        let traffic = TrafficLog::new(config.admin.traffic_capacity);
        let dispatcher = Dispatcher::new(
            config.gateway.mode,
            registry.clone(),
            hub.clone(),
            pending.clone(),
            traffic.clone(),
            config.gateway.reply_timeout,
        );

        let channel = ChannelServer::bind(&config.channel.bind).await?;
        let channel_addr = channel.local_addr();
        channel.start(
            registry.clone(),
            hub.clone(),
            pending.clone(),
            shutdown.clone(),
        );

        gateway::serve(
            listeners,
            dispatcher,
            registry.clone(),
            traffic.clone(),
            shutdown.clone(),
        );

        info!(
            gateway_ports = ?gateway_ports,
            channel = %channel_addr,
            mode = ?config.gateway.mode,
            reply_timeout_ms = config.gateway.reply_timeout.as_millis() as u64,
            "harness started"
        );

        Ok(Self {
            gateway_ports,
            channel_addr,
            registry,
            pending,
            traffic,
            shutdown,
        })
    }

    /// The gateway ports that actually bound, in configuration order.
    pub fn gateway_ports(&self) -> &[u16] {
        &self.gateway_ports
    }

    /// Where stub clients should connect.
    pub fn channel_addr(&self) -> SocketAddr {
        self.channel_addr
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingReplies {
        &self.pending
    }

    pub fn traffic(&self) -> &TrafficLog {
        &self.traffic
    }

    /// Begin cooperative shutdown of every component.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DispatchMode};

    #[tokio::test]
    async fn starts_on_ephemeral_ports() {
        let harness = Harness::start(Config::test_default()).await.unwrap();
        assert_eq!(harness.gateway_ports().len(), 1);
        assert_ne!(harness.gateway_ports()[0], 0);
        assert_ne!(harness.channel_addr().port(), 0);
        harness.shutdown();
    }

    #[tokio::test]
    async fn two_instances_coexist() {
        let a = Harness::start(Config::test_default()).await.unwrap();
        let b = Harness::start(Config::test_default()).await.unwrap();
        assert_ne!(a.channel_addr(), b.channel_addr());
        assert_ne!(a.gateway_ports(), b.gateway_ports());
        // Registries are instance-owned, not process-global.
        assert_eq!(a.registry().client_count().await, 0);
        assert_eq!(b.registry().client_count().await, 0);
    }

    #[tokio::test]
    async fn broadcast_config_is_honoured() {
        let mut config = Config::test_default();
        config.gateway.mode = DispatchMode::Broadcast;
        let harness = Harness::start(config).await.unwrap();
        assert_eq!(harness.registry().mode(), DispatchMode::Broadcast);
    }
}
