//! TCP accept loop and client connector.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::NetworkConfig;
use crate::error::{constants, Result};
use crate::protocol::packets::Side;
use crate::protocol::registry::PacketRegistry;
use crate::session::{PacketListener, SessionHandle, SessionOptions};
use crate::utils::metrics::{Metrics, Timer};
use crate::utils::timeout::{with_timeout_error, DEFAULT_TIMEOUT};

type Sessions = Arc<Mutex<HashMap<u64, SessionHandle>>>;

/// Bind `config.server.address` and serve until CTRL+C.
#[instrument(skip_all, fields(address = %config.server.address))]
pub async fn start_server<F>(
    config: NetworkConfig,
    registry: Arc<PacketRegistry>,
    factory: F,
) -> Result<Arc<Metrics>>
where
    F: Fn(SocketAddr) -> Arc<dyn PacketListener> + Send + Sync + 'static,
{
    let listener = TcpListener::bind(&config.server.address).await?;
    info!(address = %config.server.address, "Listening");

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    serve(listener, config, registry, factory, shutdown_rx).await
}

/// Accept connections on `listener` until `shutdown` fires.
///
/// Every accepted stream becomes a server-side session whose listener is built
/// by `factory`. Connections beyond `max_connections` are dropped on accept.
/// On shutdown every open session is closed and given
/// `shutdown_timeout` to finish.
#[instrument(skip_all)]
pub async fn serve<F>(
    listener: TcpListener,
    config: NetworkConfig,
    registry: Arc<PacketRegistry>,
    factory: F,
    mut shutdown: mpsc::Receiver<()>,
) -> Result<Arc<Metrics>>
where
    F: Fn(SocketAddr) -> Arc<dyn PacketListener> + Send + Sync + 'static,
{
    let metrics = Arc::new(Metrics::new());
    let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
    let options = SessionOptions::from_config(&config, Side::Server);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutting down server. Waiting for connections to close...");
                drain(&sessions, config.server.shutdown_timeout).await;
                metrics.log_summary();
                return Ok(metrics);
            }

            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        continue;
                    }
                };

                if sessions.lock().len() >= config.server.max_connections {
                    warn!(peer = %addr, limit = config.server.max_connections, "Connection limit reached, rejecting");
                    metrics.connection_rejected();
                    continue;
                }
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
                }

                let session = SessionHandle::new(addr, registry.clone(), factory(addr), metrics.clone());
                let driver = match session.attach(stream, options.clone()) {
                    Ok(driver) => driver,
                    Err(e) => {
                        error!(peer = %addr, error = %e, "Failed to start session");
                        continue;
                    }
                };
                info!(peer = %addr, session = session.id(), "New connection established");
                track(&sessions, session, driver);
            }
        }
    }
}

fn track(sessions: &Sessions, session: SessionHandle, driver: JoinHandle<()>) {
    let id = session.id();
    sessions.lock().insert(id, session);
    let sessions = sessions.clone();
    tokio::spawn(async move {
        if let Err(e) = driver.await {
            error!(session = id, error = %e, "Session driver panicked");
        }
        sessions.lock().remove(&id);
    });
}

async fn drain(sessions: &Sessions, limit: Duration) {
    let _timer = Timer::start("server_shutdown");
    let open: Vec<SessionHandle> = sessions.lock().values().cloned().collect();
    for session in open {
        session.close(constants::REASON_SERVER_SHUTDOWN, false);
    }

    let timeout = tokio::time::sleep(limit);
    tokio::pin!(timeout);
    loop {
        let remaining = sessions.lock().len();
        if remaining == 0 {
            info!("All connections closed, shutting down");
            return;
        }
        tokio::select! {
            _ = &mut timeout => {
                warn!(connections = remaining, "Shutdown timeout reached, forcing exit");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                debug!(connections = remaining, "Waiting for connections to close");
            }
        }
    }
}

/// Open a client-side session to `addr`.
///
/// Sends issued before the driver starts are queued; the returned join
/// handle resolves once the session closes.
#[instrument(skip(addr, registry, listener, options))]
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    registry: Arc<PacketRegistry>,
    listener: Arc<dyn PacketListener>,
    options: SessionOptions,
) -> Result<(SessionHandle, JoinHandle<()>)> {
    let stream = with_timeout_error(DEFAULT_TIMEOUT, async {
        TcpStream::connect(addr).await.map_err(Into::into)
    })
    .await?;
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    debug!(peer = %peer, "Connected");

    let session = SessionHandle::new(peer, registry, listener, Arc::new(Metrics::new()));
    let driver = session.attach(stream, options)?;
    Ok((session, driver))
}
