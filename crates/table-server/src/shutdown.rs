//! External shutdown triggers: the console quit command and process signals.

use std::io::BufRead;

use tokio::signal;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// True for the literal console commands that stop the server.
#[must_use]
pub fn is_quit_command(line: &str) -> bool {
    matches!(line, "q" | "quit")
}

/// Read lines until a quit command. Returns false if input ends first.
pub fn listen_for_quit<R: BufRead>(reader: R) -> bool {
    for line in reader.lines() {
        match line {
            Ok(line) if is_quit_command(&line) => return true,
            Ok(line) => debug!(target: "table.shutdown", input = %line, "Ignoring console input"),
            Err(e) => {
                warn!(target: "table.shutdown", error = %e, "Console read failed");
                return false;
            }
        }
    }
    false
}

/// Resolves when `q` or `quit` is read from standard input.
///
/// The blocking read runs on a detached OS thread so it never holds up
/// runtime shutdown. If standard input ends first this never resolves.
pub async fn quit_command() {
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            if listen_for_quit(std::io::stdin().lock()) {
                let _ = tx.send(());
            } else {
                debug!(target: "table.shutdown", "Console input closed");
            }
        });

    if let Err(e) = spawned {
        warn!(target: "table.shutdown", error = %e, "Failed to spawn console reader");
        return std::future::pending().await;
    }

    if rx.await.is_ok() {
        info!(target: "table.shutdown", "Quit command received");
    } else {
        std::future::pending::<()>().await;
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed that source is ignored; the other
/// triggers still apply.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(target: "table.shutdown", error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(target: "table.shutdown", error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!(target: "table.shutdown", "Ctrl+C received"),
        () = terminate => info!(target: "table.shutdown", "SIGTERM received"),
    }
}
