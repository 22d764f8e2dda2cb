//! Gated acceptor for the external controller connection.
//!
//! At most one controller is admitted per open/close cycle. The accept task
//! runs a cancellable loop: it waits for either one incoming connection or
//! the shutdown signal. After handing the first connection to the caller it
//! parks on the shutdown signal without accepting further — the listening
//! socket stays bound, so later connection attempts sit in the backlog
//! unserved until `close` releases everything.
//!
//! `close` is idempotent: repeated calls re-send the shutdown signal and
//! find no task left to join. A close racing an in-flight accept resolves
//! through the select; it is shutdown, not an error.

use log::{info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub struct ControllerAcceptor {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ControllerAcceptor {
    /// Binds the controller listener and starts the accept task. The
    /// returned receiver yields at most one connection per open.
    pub async fn open(addr: &str) -> io::Result<(Self, mpsc::Receiver<TcpStream>)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Controller acceptor listening on {}", local_addr);

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let (conn_tx, conn_rx) = mpsc::channel(1);

        let task = tokio::spawn(async move {
            let accepted = tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        info!("Controller connected from {}", peer);
                        Some(stream)
                    }
                    // Accept aborted by socket teardown: normal shutdown
                    Err(e) => {
                        warn!("Controller accept ended: {}", e);
                        None
                    }
                },
                _ = shutdown_rx.changed() => None,
            };

            if let Some(stream) = accepted {
                if conn_tx.send(stream).await.is_err() {
                    warn!("Accepted controller dropped: receiver closed");
                }
                // Gate: park until close() releases us. No further accepts.
                let _ = shutdown_rx.changed().await;
            }
            info!("Controller acceptor stopped");
        });

        Ok((
            Self {
                local_addr,
                shutdown,
                task: Mutex::new(Some(task)),
            },
            conn_rx,
        ))
    }

    /// The bound listener address; useful when opened on an ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals shutdown and waits for the accept task to exit. Safe to call
    /// with an accept in flight, with a parked task, or more than once.
    pub async fn close(&self) {
        // Err means the task already exited and dropped its receiver
        let _ = self.shutdown.send(true);

        let handle = {
            let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
            task.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Controller acceptor task failed: {}", e);
            }
        }
    }
}
