//! Proxy mode: a TCP relay that dumps every buffer it forwards.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::dumper::Dumper;
use crate::error::{RelayError, Result};
use crate::metrics::{ConnectionTimer, Metrics};
use crate::session::DumpSink;

mod relay;

pub use relay::{ConnectionInfo, RelayStats};
use relay::RelayContext;

pub struct ProxyServer {
    listener: TcpListener,
    ctx: Arc<RelayContext>,
}

impl ProxyServer {
    pub async fn bind(
        config: &ProxyConfig,
        dumper: Arc<dyn Dumper>,
        sink: Arc<dyn DumpSink>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;

        Ok(Self {
            listener,
            ctx: Arc::new(RelayContext {
                remote_addr: config.remote_addr.clone(),
                buffer_size: config.buffer_size,
                dumper,
                sink,
                metrics,
                connections: Arc::new(DashMap::new()),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle on the live connection table, usable after `run` takes `self`
    pub fn connections(&self) -> Arc<DashMap<Uuid, ConnectionInfo>> {
        self.ctx.connections.clone()
    }

    pub fn active_connections(&self) -> usize {
        self.ctx.connections.len()
    }

    /// Accepts connections until `shutdown` fires. Relays already in flight
    /// keep running on their own sockets.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let local = self.listener.local_addr()?;
        tracing::info!(
            listen = %local,
            remote = %self.ctx.remote_addr,
            dumper = self.ctx.dumper.name(),
            "Proxy server listening"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Proxy server stopped accepting connections");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, client_addr)) => self.spawn_connection(stream, client_addr),
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                            self.ctx.metrics.record_connection_error();
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, client_addr: SocketAddr) {
        let ctx = self.ctx.clone();
        let span = tracing::info_span!("conn", client = %client_addr);

        tokio::spawn(
            async move {
                let timer = ConnectionTimer::new(ctx.metrics.clone());
                tracing::debug!("Accepted connection");

                match relay::handle_connection(stream, client_addr, ctx).await {
                    Ok(stats) => {
                        tracing::info!(
                            client_to_remote = stats.client_to_remote,
                            remote_to_client = stats.remote_to_client,
                            "Connection closed"
                        );
                        timer.finish();
                    }
                    Err(e) => {
                        tracing::warn!("Connection failed: {}", e);
                        timer.fail();
                    }
                }
            }
            .instrument(span),
        );
    }
}
