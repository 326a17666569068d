//! TCP transport: socket options, outbound connects and the accept loop.

use std::io;
use std::net::SocketAddr;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::protocol::connection::Connection;
use crate::protocol::handler::ConnectionHandler;
use crate::transport::Role;
use crate::utils::timeout::{with_timeout_error, PRUNE_INTERVAL, SHUTDOWN_TIMEOUT};

/// Apply the connection's socket options to a TCP stream.
///
/// Transport-level keep-alive is only armed when the application-layer
/// keep-alive is disabled.
pub fn configure_socket(stream: &TcpStream, config: &ConnectionConfig) -> io::Result<()> {
    stream.set_nodelay(config.no_delay)?;

    let socket = SockRef::from(stream);
    socket.set_recv_buffer_size(config.receive_buffer_size)?;
    socket.set_send_buffer_size(config.send_buffer_size)?;
    socket.set_linger(config.linger)?;

    if !config.keepalive.enabled {
        if let Some(time) = config.tcp_keepalive {
            socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(time))?;
        }
    }

    Ok(())
}

/// Connect to `addr` and start a client-role connection over it
#[instrument(skip(config, handler), fields(address = %addr))]
pub async fn connect<H: ConnectionHandler>(
    addr: &str,
    config: ConnectionConfig,
    handler: H,
) -> Result<Connection> {
    config.validate_strict()?;

    let stream = with_timeout_error(
        async { Ok(TcpStream::connect(addr).await?) },
        config.connect_timeout,
    )
    .await?;
    debug!("TCP connection established");

    let conn = Connection::new(handler);
    conn.start(Role::Client, stream, config).await?;
    Ok(conn)
}

/// Accepts inbound TCP connections and starts them in the server role
pub struct Listener {
    inner: TcpListener,
    config: ConnectionConfig,
}

impl Listener {
    #[instrument(skip(config), fields(address = %addr))]
    pub async fn bind(addr: &str, config: ConnectionConfig) -> Result<Self> {
        config.validate_strict()?;
        let inner = TcpListener::bind(addr).await?;
        info!(local = ?inner.local_addr().ok(), "Listening");
        Ok(Self { inner, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Accept one connection and start it with `handler`
    #[instrument(skip_all)]
    pub async fn accept<H: ConnectionHandler>(&self, handler: H) -> Result<Connection> {
        let (stream, peer) = self.inner.accept().await?;
        debug!(peer = %peer, "Accepted connection");

        let conn = Connection::new(handler);
        conn.start(Role::Server, stream, self.config.clone()).await?;
        Ok(conn)
    }

    /// Accept connections until `shutdown_rx` fires.
    ///
    /// `factory` builds a handler per peer. Each connection is started on its
    /// own task. On shutdown every live connection is disconnected and the
    /// loop waits up to [`SHUTDOWN_TIMEOUT`] for them to finish.
    #[instrument(skip_all)]
    pub async fn serve<F, H>(self, factory: F, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()>
    where
        F: Fn(SocketAddr) -> H,
        H: ConnectionHandler,
    {
        let mut live = LiveConnections::default();
        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    live.prune();
                    info!(connections = live.len(), "Shutting down listener");
                    shutdown_all(live.into_inner()).await;
                    return Ok(());
                }

                _ = prune.tick() => {
                    let removed = live.prune();
                    if removed > 0 {
                        debug!(removed, remaining = live.len(), "Pruned closed connections");
                    }
                }

                accepted = self.inner.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            live.prune();

                            let conn = Connection::new(factory(peer));
                            live.track(conn.clone());

                            let config = self.config.clone();
                            tokio::spawn(async move {
                                if let Err(e) = conn.start(Role::Server, stream, config).await {
                                    warn!(peer = %peer, error = %e, "Failed to start connection");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }
}

/// Connections accepted by [`Listener::serve`] that may still be open
#[derive(Default)]
struct LiveConnections(Vec<Connection>);

impl LiveConnections {
    fn track(&mut self, conn: Connection) {
        self.0.push(conn);
    }

    /// Drop disposed connections, returning how many were removed
    fn prune(&mut self) -> usize {
        let before = self.0.len();
        self.0.retain(|c| !c.is_disposed());
        before - self.0.len()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn into_inner(self) -> Vec<Connection> {
        self.0
    }
}

async fn shutdown_all(live: Vec<Connection>) {
    let drain = async {
        for conn in &live {
            conn.disconnect().await;
        }
        for conn in &live {
            conn.wait_disconnected().await;
        }
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        warn!("Shutdown timeout reached, forcing exit");
    } else {
        info!("All connections closed");
    }
}
