//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal `ControlEvent`s
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers config reload, not shutdown
//! - The file watcher feeds the same channel, so both reload paths behave alike

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Control-plane events consumed by `Gateway::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Re-read the configuration file and certificates.
    Reload,
    /// Stop accepting and drain.
    Shutdown,
}

/// Forward process signals into `events` until the receiver goes away.
pub fn spawn_signal_listener(events: mpsc::UnboundedSender<ControlEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut hangup, mut terminate) = match (signal(SignalKind::hangup()), signal(SignalKind::terminate())) {
                (Ok(hangup), Ok(terminate)) => (hangup, terminate),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(error = %e, "Cannot install signal handlers, only Ctrl+C is handled");
                    wait_for_ctrl_c(&events).await;
                    return;
                }
            };

            loop {
                let event = tokio::select! {
                    _ = hangup.recv() => {
                        tracing::info!("SIGHUP received, reloading");
                        ControlEvent::Reload
                    }
                    _ = terminate.recv() => {
                        tracing::info!("SIGTERM received, shutting down");
                        ControlEvent::Shutdown
                    }
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            tracing::error!(error = %e, "Ctrl+C handler failed");
                        }
                        tracing::info!("SIGINT received, shutting down");
                        ControlEvent::Shutdown
                    }
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }

        #[cfg(not(unix))]
        wait_for_ctrl_c(&events).await;
    })
}

async fn wait_for_ctrl_c(events: &mpsc::UnboundedSender<ControlEvent>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Ctrl+C received, shutting down");
            let _ = events.send(ControlEvent::Shutdown);
        }
        Err(e) => tracing::error!(error = %e, "Ctrl+C handler failed"),
    }
}
