//! Server network layer accepting WebSocket clients and wiring the game engine

use crate::config::ServerConfig;
use crate::connection::serve_connection;
use crate::hub::{Hub, HubHandle};
use crate::manager::Manager;
use crate::settlement::{BlockchainService, SettlementDispatcher};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Main server owning the listener, the game manager and the hub
pub struct Server {
    listener: TcpListener,
    manager: Arc<Manager>,
    hub: HubHandle,
    outbound_queue: usize,
    write_timeout: Duration,
}

impl Server {
    /// Binds the listener and starts the settlement workers and the hub loop.
    pub async fn bind(
        config: ServerConfig,
        service: Arc<dyn BlockchainService>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.address()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let settlement = SettlementDispatcher::start(
            service,
            config.settlement_workers,
            config.settlement_queue,
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let outbound_queue = config.outbound_queue;
        let write_timeout = config.write_timeout;
        let manager = Arc::new(Manager::new(config, settlement, events_tx));

        let (hub, handle) = Hub::new(Arc::clone(&manager), events_rx);
        tokio::spawn(hub.run());

        Ok(Server {
            listener,
            manager,
            hub: handle,
            outbound_queue,
            write_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn manager(&self) -> Arc<Manager> {
        Arc::clone(&self.manager)
    }

    pub fn handle(&self) -> HubHandle {
        self.hub.clone()
    }

    /// Accept loop. Each client runs on its own task.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(
                        stream,
                        peer,
                        self.hub.clone(),
                        self.outbound_queue,
                        self.write_timeout,
                    ));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}
