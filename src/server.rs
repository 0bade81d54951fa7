//! The NFSv4 TCP server: listener, worker pool and connection handoff.
//!
//! [`Server::bind`] opens the listener; [`Server::serve`] accepts
//! connections until the shutdown channel fires. Each privileged-port
//! connection gets its own [`Conn`] loop. Connections arriving from
//! non-privileged source ports (>= 1024) are read once for logging and
//! closed — a crude rendition of the traditional privileged-port
//! convention.
//!
//! The worker pool maps (session id, uid) to a live [`Worker`]. The
//! mapping survives across compounds so open files, listers and cached
//! attributes persist between requests; a worker is replaced when its
//! credentials change or when the previous instance was discarded. For
//! v4.0 traffic, which has no sessions, the pool key is synthesised from
//! the peer's IP address.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::auth::Creds;
use crate::clients::Clients;
use crate::conn::Conn;
use crate::vfs::{AdvancedLinkFs, ErrorFs};
use crate::worker::{Worker, WorkerGuard, WorkerSource};

/// Loads a root filesystem for the given credentials. Called whenever a
/// worker is (re)created for a (session, uid) pair.
#[async_trait]
pub trait RootLoader: Send + Sync + 'static {
    async fn load(&self, creds: &Creds) -> Result<Box<dyn AdvancedLinkFs>, anyhow::Error>;
}

#[async_trait]
impl<F, Fut> RootLoader for F
where
    F: Fn(Creds) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Box<dyn AdvancedLinkFs>, anyhow::Error>> + Send,
{
    async fn load(&self, creds: &Creds) -> Result<Box<dyn AdvancedLinkFs>, anyhow::Error> {
        self(creds.clone()).await
    }
}

/// An NFSv4 server. Create with [`Server::bind`], run with
/// [`Server::serve`].
pub struct Server {
    listener: TcpListener,
    clients: Arc<Clients>,
    loader: Arc<dyn RootLoader>,
}

impl Server {
    /// Binds the listener on `addr` (e.g. `"0.0.0.0:2049"`).
    pub async fn bind(addr: &str, loader: impl RootLoader) -> io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Server {
            listener,
            clients: Clients::new(),
            loader: Arc::new(loader),
        })
    }

    /// The bound address; useful after binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and serves connections until `shutdown` fires. On shutdown
    /// the listener closes, pending reads unblock and every worker is
    /// discarded.
    pub async fn serve(&self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        self.clients.spawn_sweeper(shutdown.clone());

        let pool = Arc::new(WorkerPool {
            loader: Arc::clone(&self.loader),
            clients: Arc::clone(&self.clients),
            shutdown: shutdown.clone(),
            workers: Mutex::new(HashMap::new()),
        });

        info!("serving NFS at {:?}", self.listener.local_addr());

        loop {
            let accepted = tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                accepted = self.listener.accept() => accepted,
            };

            let (socket, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!("accept error: {err}");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            // Disallow unprivileged source ports.
            if peer.port() >= 1024 {
                tokio::spawn(handle_trap(socket, peer, shutdown.clone()));
                continue;
            }

            info!("accepting connection from {peer}");

            let conn = Conn {
                stream: socket,
                clients: Arc::clone(&self.clients),
                workers: pool.clone() as Arc<dyn WorkerSource>,
                remote: peer.to_string(),
            };

            let conn_shutdown = shutdown.clone();

            tokio::spawn(async move {
                if let Err(err) = conn.serve(conn_shutdown).await {
                    error!(remote_ip = %peer.ip(), "session failed: {err}");
                }
            });
        }
    }
}

/// Reads at most 128 bytes from a connection that arrived on an
/// unprivileged source port, logs it, and hangs up.
async fn handle_trap(socket: TcpStream, peer: SocketAddr, mut shutdown: watch::Receiver<bool>) {
    use tokio::io::AsyncReadExt;

    let mut socket = socket;
    let mut buf = [0_u8; 128];

    let read = tokio::select! {
        _ = shutdown.changed() => return,
        read = socket.read(&mut buf) => read,
    };

    match read {
        Ok(0) => {}
        Ok(n) => error!("received data from unprivileged port: {n} bytes from {peer}"),
        Err(err) => debug!("failed to read trap: {err}"),
    }
}

/// The server-wide worker table.
pub struct WorkerPool {
    loader: Arc<dyn RootLoader>,
    clients: Arc<Clients>,
    shutdown: watch::Receiver<bool>,
    workers: Mutex<HashMap<([u8; 16], u32), Arc<Worker>>>,
}

impl WorkerPool {
    pub fn new(
        loader: Arc<dyn RootLoader>,
        clients: Arc<Clients>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<WorkerPool> {
        Arc::new(WorkerPool {
            loader,
            clients,
            shutdown,
            workers: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl WorkerSource for WorkerPool {
    async fn acquire(&self, creds: &Creds, session_id: [u8; 16]) -> WorkerGuard {
        let mut workers = self.workers.lock().await;

        if let Some(worker) = workers.get(&(session_id, creds.uid)) {
            if !worker.creds.equal(creds) {
                warn!(
                    "discarding old worker for uid {} because credentials changed: {} -> {}",
                    creds.uid, worker.creds, creds
                );
                worker.discard();
            } else if let Some(guard) = worker.try_use() {
                return guard;
            }
        }

        let fs = match self.loader.load(creds).await {
            Ok(fs) => fs,
            Err(err) => {
                error!("failed to load root filesystem: {err}");
                ErrorFs::new(err)
            }
        };

        let worker = Worker::new(
            fs,
            creds.clone(),
            Arc::clone(&self.clients),
            self.shutdown.clone(),
        );
        let guard = worker.initial_guard();

        workers.insert((session_id, creds.uid), worker);

        guard
    }
}
