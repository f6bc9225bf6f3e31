//! Self-pipe-style reload coordinator (DESIGN NOTES / 4.C): a dedicated
//! `tokio::spawn`ed task that `tokio::signal::unix::signal`s and
//! `select!`s over SIGTERM/SIGINT/SIGUSR1/SIGHUP. SIGUSR1 reloads every
//! cached snapshot, SIGHUP exits with a distinguished status so a
//! supervisor re-execs the binary. A `tokio::sync::mpsc` channel plays
//! the role of the classic self-pipe: the signal task only ever sends a
//! [`ReloadEvent`], the coordinator loop is the sole reader.

use crate::KeyStateManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Exit code a supervisor should interpret as "please re-exec me".
pub const RESTART_EXIT_CODE: i32 = 75;

#[derive(Debug, Clone, Copy)]
pub enum ReloadEvent {
    Reload,
    Restart,
    Terminate,
}

/// Installs OS signal handlers and forwards them as [`ReloadEvent`]s.
/// Returns the receiving half for [`run_reload_loop`].
#[cfg(unix)]
pub fn install_signal_forwarder() -> mpsc::Receiver<ReloadEvent> {
    use tokio::signal::unix::{signal, SignalKind};

    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut sigusr1 = signal(SignalKind::user_defined1()).expect("SIGUSR1 handler installs");
        let mut sighup = signal(SignalKind::hangup()).expect("SIGHUP handler installs");
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler installs");
        let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler installs");

        loop {
            let event = tokio::select! {
                _ = sigusr1.recv() => ReloadEvent::Reload,
                _ = sighup.recv() => ReloadEvent::Restart,
                _ = sigterm.recv() => ReloadEvent::Terminate,
                _ = sigint.recv() => ReloadEvent::Terminate,
            };
            if tx.send(event).await.is_err() {
                break;
            }
            if matches!(event, ReloadEvent::Restart | ReloadEvent::Terminate) {
                break;
            }
        }
    });
    rx
}

#[cfg(not(unix))]
pub fn install_signal_forwarder() -> mpsc::Receiver<ReloadEvent> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = tx.send(ReloadEvent::Terminate).await;
    });
    rx
}

/// The dedicated coordinator task named in 4.C: single-threaded, owns
/// `rx`, reloads every exchange it knows about on `Reload`, drains
/// outstanding references and exits on `Terminate`, exits with
/// [`RESTART_EXIT_CODE`] on `Restart`.
pub async fn run_reload_loop(
    manager: Arc<KeyStateManager>,
    exchanges: Vec<String>,
    mut rx: mpsc::Receiver<ReloadEvent>,
    per_request_deadline: Duration,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ReloadEvent::Reload => {
                for exchange_url in &exchanges {
                    if let Err(e) = manager.reload(exchange_url, per_request_deadline).await {
                        tracing::warn!(%exchange_url, error = %e, "key-state reload failed");
                    }
                }
            }
            ReloadEvent::Restart => {
                tracing::info!("restart requested, exiting for supervisor re-exec");
                std::process::exit(RESTART_EXIT_CODE);
            }
            ReloadEvent::Terminate => {
                tracing::info!("terminate requested, draining key-state coordinator");
                return;
            }
        }
    }
}
