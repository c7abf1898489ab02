//! TCP front end: a tokio accept loop handing each connection to a blocking
//! worker that owns one [`Executor`].

use std::collections::HashMap;
use std::future::Future;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::catalog::TableManager;
use crate::types::{KeelError, Result};

use super::executor::Executor;
use super::transport::{Package, Transport};

/// Default listen address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:9999";
/// Default cap on concurrent sessions.
pub const DEFAULT_MAX_CONNECTIONS: usize = 20;

/// Accepts clients and serves each on its own blocking worker.
pub struct Server {
    catalog: Arc<TableManager>,
    max_connections: usize,
}

impl Server {
    /// Creates a server over `catalog` allowing `max_connections` sessions.
    pub fn new(catalog: Arc<TableManager>, max_connections: usize) -> Self {
        Self {
            catalog,
            max_connections: max_connections.max(1),
        }
    }

    /// Binds `addr` and serves until `shutdown` resolves.
    pub async fn run(self, addr: SocketAddr, shutdown: impl Future<Output = ()>) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from `listener` until `shutdown` resolves.
    ///
    /// A new connection is only accepted once a session slot is free. On
    /// shutdown the sockets of running sessions are shut down and their
    /// workers awaited, so every session's executor has been dropped, and
    /// its open transaction aborted, by the time this returns.
    pub async fn serve(self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        let slots = Arc::new(Semaphore::new(self.max_connections));
        let open = Arc::new(Mutex::new(HashMap::<u64, TcpStream>::new()));
        let mut sessions = JoinSet::new();
        let mut next_session = 0u64;
        info!(
            addr = %listener.local_addr()?,
            max_connections = self.max_connections,
            "server.listening"
        );
        tokio::pin!(shutdown);
        loop {
            while let Some(done) = sessions.try_join_next() {
                log_join(done);
            }
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&slots).acquire_owned() => {
                    permit.map_err(|_| KeelError::Invalid("session limiter closed"))?
                }
            };
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "server.accept_failed");
                        continue;
                    }
                },
            };
            info!(%peer, "server.accept");
            let stream = stream.into_std()?;
            stream.set_nonblocking(false)?;
            let id = next_session;
            next_session += 1;
            open.lock().insert(id, stream.try_clone()?);
            let catalog = Arc::clone(&self.catalog);
            let open = Arc::clone(&open);
            sessions.spawn_blocking(move || {
                let _permit = permit;
                if let Err(err) = serve_session(stream, catalog) {
                    warn!(%peer, error = %err, "server.session_failed");
                }
                open.lock().remove(&id);
                info!(%peer, "server.disconnect");
            });
        }

        let running: Vec<TcpStream> = open.lock().drain().map(|(_, stream)| stream).collect();
        info!(sessions = running.len(), "server.shutdown");
        for stream in running {
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                debug!(error = %err, "server.session_shutdown_failed");
            }
        }
        while let Some(done) = sessions.join_next().await {
            log_join(done);
        }
        info!("server.stopped");
        Ok(())
    }
}

fn log_join(done: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = done {
        warn!(error = %err, "server.session_panicked");
    }
}

/// Runs one client session to completion.
///
/// Each data package is a statement; the reply is its result or an error
/// package. `exit`, `quit` or end of stream ends the session.
pub fn serve_session<S: Read + Write>(stream: S, catalog: Arc<TableManager>) -> Result<()> {
    let mut transport = Transport::new(stream);
    let mut executor = Executor::new(catalog);
    while let Some(package) = transport.receive()? {
        let Package::Data(raw) = package else {
            return Err(KeelError::Invalid("client sent an error package"));
        };
        let sql = String::from_utf8_lossy(&raw);
        let sql = sql.trim();
        if sql.eq_ignore_ascii_case("exit") || sql.eq_ignore_ascii_case("quit") {
            break;
        }
        let reply = match executor.execute(sql) {
            Ok(out) => Package::Data(out.into_bytes()),
            Err(err) => {
                debug!(error = %err, "session.statement_failed");
                Package::Error(err.to_string())
            }
        };
        transport.send(&reply)?;
    }
    Ok(())
}
