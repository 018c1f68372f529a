//! Process orchestration: start the request server and the periodic tasks,
//! supervise them, and shut everything down in order.

use crate::config::Config;
use crate::elevator::Elevator;
use crate::server::{Listener, spawn_server};
use crate::store::DemandStore;
use crate::tasks::{spawn_prune_loop, spawn_retrain_loop};

use anyhow::Context as _;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use std::future::Future;
use std::sync::Arc;

/// Resolve once shutdown has been requested (or the sender is gone).
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Resolve on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

async fn join_task(handle: &mut Option<JoinHandle<()>>) -> Result<(), JoinError> {
    match handle.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn report_early_exit(task: &'static str, result: Result<(), JoinError>) {
    match result {
        Ok(()) => tracing::error!(task, "background task exited early, not restarting"),
        Err(error) if error.is_panic() => {
            tracing::error!(task, %error, "background task panicked, not restarting");
        }
        Err(error) => tracing::error!(task, %error, "background task was cancelled"),
    }
}

/// The long-running units started by [`run`].
struct Supervised {
    server: JoinHandle<()>,
    retrain: JoinHandle<()>,
    prune: JoinHandle<()>,
}

/// Watch the tasks until `shutdown` resolves or the server stops.
///
/// A periodic task that ends is reported and left dead. Either way, every
/// remaining task is told to stop through `shutdown_tx` and awaited before
/// returning.
async fn supervise(
    tasks: Supervised,
    shutdown_tx: watch::Sender<bool>,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let mut server = Some(tasks.server);
    let mut retrain = Some(tasks.retrain);
    let mut prune = Some(tasks.prune);

    let mut outcome = Ok(());
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown requested");
                break;
            }
            result = join_task(&mut server) => {
                server = None;
                report_early_exit("request_server", result);
                outcome = Err(anyhow::anyhow!("request server stopped unexpectedly"));
                break;
            }
            result = join_task(&mut retrain) => {
                retrain = None;
                report_early_exit("retrain", result);
            }
            result = join_task(&mut prune) => {
                prune = None;
                report_early_exit("prune", result);
            }
        }
    }

    shutdown_tx.send(true).ok();
    for (task, handle) in [("request_server", server), ("retrain", retrain), ("prune", prune)] {
        if let Some(handle) = handle
            && let Err(error) = handle.await
        {
            tracing::error!(task, %error, "task failed during shutdown");
        }
    }

    outcome
}

/// Run the service until `shutdown` resolves.
///
/// Failing to open the database or bind the socket is fatal and returned
/// immediately. After startup, a periodic task that dies is logged and left
/// dead while the server keeps serving; if the server itself dies the whole
/// process shuts down with an error. On shutdown the server finishes its
/// in-flight exchanges, the periodic tasks are interrupted, and the database
/// is closed.
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.instance_dir).with_context(|| {
        format!(
            "failed to create instance directory: {}",
            config.instance_dir.display()
        )
    })?;

    let database_path = config.database_path();
    let store = DemandStore::connect(&database_path, config.feature_extractor())
        .await
        .with_context(|| format!("failed to open demand database: {}", database_path.display()))?;

    let socket_path = config.socket_path();
    let listener = Listener::bind(&socket_path)?;
    tracing::info!(socket = %socket_path.display(), "listening for requests");

    let elevator = Arc::new(Elevator::new(store.clone(), config.initial_floor));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tasks = Supervised {
        server: spawn_server(
            listener,
            elevator.clone(),
            config.request_timeout(),
            shutdown_rx.clone(),
        ),
        retrain: spawn_retrain_loop(
            elevator.clone(),
            store.clone(),
            config.model,
            config.retrain_interval(),
            config.retrain_on_start,
            shutdown_rx.clone(),
        ),
        prune: spawn_prune_loop(
            store.clone(),
            config.prune_interval(),
            config.retention(),
            shutdown_rx,
        ),
    };

    let outcome = supervise(tasks, shutdown_tx, shutdown).await;

    store.close().await;
    tracing::info!(floor = elevator.current_floor(), "restfloor stopped");
    outcome
}
