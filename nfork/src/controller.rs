use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::InboundDescriptor;
use crate::error::{Error, Result};
use crate::inbound::Inbound;
use crate::server::InboundServer;
use crate::stats::StatsSnapshot;

/// Process-wide registry of inbound servers, keyed by inbound name. The
/// single mutex serializes administrative mutations; the data plane never
/// takes it.
pub struct Controller {
    inbounds: Mutex<HashMap<String, InboundServer>>,
}

impl Controller {
    pub fn new() -> Self {
        Self {
            inbounds: Mutex::new(HashMap::new()),
        }
    }

    /// Builds and binds a server for every configured inbound. Any invalid
    /// descriptor or bind failure is fatal.
    pub async fn start(descriptors: &[InboundDescriptor]) -> Result<Self> {
        let controller = Self::new();
        for descriptor in descriptors {
            controller.add_inbound(descriptor).await?;
        }
        Ok(controller)
    }

    /// Closes every inbound server and empties the registry.
    pub async fn close(&self) {
        let mut inbounds = self.inbounds.lock().await;
        for (name, server) in inbounds.drain() {
            info!(inbound = %name, "closing inbound");
            server.close();
        }
    }

    pub async fn list(&self) -> Vec<InboundDescriptor> {
        let inbounds = self.inbounds.lock().await;
        inbounds.values().map(InboundServer::list).collect()
    }

    pub async fn list_inbound(&self, inbound: &str) -> Result<InboundDescriptor> {
        let inbounds = self.inbounds.lock().await;
        let server = inbounds
            .get(inbound)
            .ok_or_else(|| Error::UnknownInbound(inbound.to_string()))?;
        Ok(server.list())
    }

    /// The bound address of an inbound, which may differ from the configured
    /// listen string when port 0 was requested.
    pub async fn inbound_addr(&self, inbound: &str) -> Result<SocketAddr> {
        let inbounds = self.inbounds.lock().await;
        let server = inbounds
            .get(inbound)
            .ok_or_else(|| Error::UnknownInbound(inbound.to_string()))?;
        Ok(server.local_addr())
    }

    pub async fn read_stats(&self) -> HashMap<String, HashMap<String, StatsSnapshot>> {
        let inbounds = self.inbounds.lock().await;
        inbounds
            .iter()
            .map(|(name, server)| (name.clone(), server.read_stats()))
            .collect()
    }

    pub async fn read_inbound_stats(
        &self,
        inbound: &str,
    ) -> Result<HashMap<String, StatsSnapshot>> {
        let inbounds = self.inbounds.lock().await;
        let server = inbounds
            .get(inbound)
            .ok_or_else(|| Error::UnknownInbound(inbound.to_string()))?;
        Ok(server.read_stats())
    }

    pub async fn read_outbound_stats(
        &self,
        inbound: &str,
        outbound: &str,
    ) -> Result<StatsSnapshot> {
        let inbounds = self.inbounds.lock().await;
        let server = inbounds
            .get(inbound)
            .ok_or_else(|| Error::UnknownInbound(inbound.to_string()))?;
        server.read_outbound_stats(outbound)
    }

    /// Validates the descriptor, binds its listener and registers it.
    /// Duplicate names are rejected.
    pub async fn add_inbound(&self, descriptor: &InboundDescriptor) -> Result<()> {
        let inbound = Inbound::from_descriptor(descriptor)?;
        let name = inbound.name().to_string();

        {
            let inbounds = self.inbounds.lock().await;
            if inbounds.contains_key(&name) {
                return Err(Error::InboundExists(name));
            }
        }

        // The registry mutex is never held across I/O, so bind first and
        // re-check the name under the lock afterwards.
        let server = InboundServer::bind(inbound).await?;

        let mut inbounds = self.inbounds.lock().await;
        if inbounds.contains_key(&name) {
            // A concurrent add won the name while we were binding.
            server.close();
            return Err(Error::InboundExists(name));
        }

        info!(inbound = %name, listen = %server.local_addr(), "inbound added");
        inbounds.insert(name, server);

        Ok(())
    }

    pub async fn remove_inbound(&self, inbound: &str) -> Result<()> {
        let mut inbounds = self.inbounds.lock().await;
        let server = inbounds
            .remove(inbound)
            .ok_or_else(|| Error::UnknownInbound(inbound.to_string()))?;
        server.close();

        info!(inbound, "inbound removed");
        Ok(())
    }

    pub async fn add_outbound(&self, inbound: &str, outbound: &str, addr: &str) -> Result<()> {
        let inbounds = self.inbounds.lock().await;
        let server = inbounds
            .get(inbound)
            .ok_or_else(|| Error::UnknownInbound(inbound.to_string()))?;
        server.add_outbound(outbound, addr);

        info!(inbound, outbound, addr, "outbound added");
        Ok(())
    }

    pub async fn remove_outbound(&self, inbound: &str, outbound: &str) -> Result<()> {
        let inbounds = self.inbounds.lock().await;
        let server = inbounds
            .get(inbound)
            .ok_or_else(|| Error::UnknownInbound(inbound.to_string()))?;
        server.remove_outbound(outbound)?;

        info!(inbound, outbound, "outbound removed");
        Ok(())
    }

    pub async fn activate_outbound(&self, inbound: &str, outbound: &str) -> Result<()> {
        let inbounds = self.inbounds.lock().await;
        let server = inbounds
            .get(inbound)
            .ok_or_else(|| Error::UnknownInbound(inbound.to_string()))?;
        server.activate_outbound(outbound)?;

        info!(inbound, outbound, "outbound activated");
        Ok(())
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}
