use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::InboundDescriptor;
use crate::error::{Error, Result};
use crate::inbound::Inbound;
use crate::stats::StatsSnapshot;

/// Binds an `Inbound` to its listener and publishes it behind an atomic
/// reference. The request path loads the reference without locking; each
/// mutation snapshots the current inbound, applies the change to the copy
/// and publishes it, so in-flight requests keep the version they started
/// with. Mutations are serialized by the `Controller`.
pub struct InboundServer {
    inbound: Arc<ArcSwap<Inbound>>,
    local_addr: SocketAddr,
    acceptor: JoinHandle<()>,
}

impl InboundServer {
    pub async fn bind(inbound: Inbound) -> Result<Self> {
        let listen = inbound.listen().to_string();
        let listener = TcpListener::bind(&listen)
            .await
            .map_err(|source| Error::Bind {
                listen: listen.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let name = inbound.name().to_string();
        let inbound = Arc::new(ArcSwap::from_pointee(inbound));
        let acceptor = tokio::spawn(accept_loop(listener, Arc::clone(&inbound)));

        info!(inbound = %name, listen = %local_addr, "inbound listening");

        Ok(Self {
            inbound,
            local_addr,
            acceptor,
        })
    }

    /// The address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting. Requests already in flight finish against the
    /// inbound version they captured.
    pub fn close(&self) {
        self.acceptor.abort();
    }

    pub fn list(&self) -> InboundDescriptor {
        self.inbound.load().descriptor()
    }

    pub fn read_stats(&self) -> HashMap<String, StatsSnapshot> {
        self.inbound.load().read_stats()
    }

    pub fn read_outbound_stats(&self, outbound: &str) -> Result<StatsSnapshot> {
        self.inbound.load().read_outbound_stats(outbound)
    }

    pub fn add_outbound(&self, outbound: &str, addr: &str) {
        let mut copy = self.inbound.load().snapshot();
        copy.add_outbound(outbound, addr);
        self.inbound.store(Arc::new(copy));
    }

    pub fn remove_outbound(&self, outbound: &str) -> Result<()> {
        let mut copy = self.inbound.load().snapshot();
        copy.remove_outbound(outbound)?;
        self.inbound.store(Arc::new(copy));
        Ok(())
    }

    pub fn activate_outbound(&self, outbound: &str) -> Result<()> {
        let mut copy = self.inbound.load().snapshot();
        copy.activate_outbound(outbound)?;
        self.inbound.store(Arc::new(copy));
        Ok(())
    }
}

impl Drop for InboundServer {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(listener: TcpListener, inbound: Arc<ArcSwap<Inbound>>) {
    loop {
        let (stream, _remote) = match listener.accept().await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        stream.set_nodelay(true).ok();

        let inbound = Arc::clone(&inbound);
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |request| {
                let inbound = inbound.load_full();
                async move { Ok::<_, Infallible>(inbound.serve(request).await) }
            });

            if let Err(err) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await
            {
                debug!(error = %err, "connection closed");
            }
        });
    }
}
