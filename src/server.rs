//! Local socket server for demand and prediction requests.

mod handler;

pub use handler::{Exchange, handle_connection};

use crate::elevator::Elevator;
use crate::orchestrator::wait_for_shutdown;
use crate::protocol::{Request, Response};

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A bound listening socket.
///
/// The socket file is removed again when this value (or the server task that
/// took it over) is dropped.
pub struct Listener {
    listener: UnixListener,
    _guard: SocketGuard,
}

struct SocketGuard {
    path: PathBuf,
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path)
            && error.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(%error, path = %self.path.display(), "failed to remove socket file");
        }
    }
}

impl Listener {
    /// Bind the request socket at `path`, replacing a stale socket file.
    pub fn bind(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create socket directory: {}", parent.display())
            })?;
        }

        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("failed to remove stale socket: {}", path.display()))?;
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to bind request socket: {}", path.display()))?;

        Ok(Self {
            listener,
            _guard: SocketGuard {
                path: path.to_path_buf(),
            },
        })
    }
}

/// Spawn the accept loop.
///
/// Every accepted connection is handled on its own task. Once `shutdown`
/// flips to `true` the loop stops accepting, waits for in-flight exchanges to
/// finish, then releases the socket.
pub fn spawn_server(
    listener: Listener,
    elevator: Arc<Elevator>,
    request_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_server(listener, elevator, request_timeout, shutdown))
}

async fn run_server(
    listener: Listener,
    elevator: Arc<Elevator>,
    request_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    tracing::info!("request server started");

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            accepted = listener.listener.accept() => {
                match accepted {
                    Ok((stream, _address)) => {
                        let elevator = elevator.clone();
                        connections.spawn(async move {
                            match handle_connection(stream, &elevator, request_timeout).await {
                                Ok(Exchange::Answered { request, response }) => {
                                    tracing::debug!(?request, %response, "request served");
                                }
                                Ok(Exchange::Abandoned) => {
                                    tracing::debug!("client closed without a request");
                                }
                                Err(error) => {
                                    tracing::warn!(%error, "request connection failed");
                                }
                            }
                        });
                    }
                    Err(error) => {
                        tracing::warn!(%error, "failed to accept request connection");
                    }
                }
            }
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(error) = finished {
                    tracing::error!(%error, "request handler panicked");
                }
            }
        }
    }

    let in_flight = connections.len();
    if in_flight > 0 {
        tracing::info!(in_flight, "waiting for in-flight requests");
    }
    while let Some(finished) = connections.join_next().await {
        if let Err(error) = finished {
            tracing::error!(%error, "request handler panicked");
        }
    }

    drop(listener);
    tracing::info!("request server stopped");
}

/// Send one request to a running server and read its reply.
///
/// Returns `Ok(None)` when the server closed the connection without replying,
/// which is how it rejects a malformed request.
pub async fn send_request(socket: &Path, request: &Request) -> anyhow::Result<Option<Response>> {
    let stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("failed to connect to {}. is restfloor running?", socket.display()))?;
    let (reader, mut writer) = stream.into_split();

    writer.write_all(request.encode().as_bytes()).await?;
    writer.flush().await?;

    let mut reader = tokio::io::BufReader::new(reader);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }

    Ok(Some(Response::decode(&line)?))
}
