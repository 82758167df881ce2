use anyhow::Result;
use std::fmt;
use tokio::signal;

/// The OS signal that ended [`wait_for_shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    CtrlC,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::CtrlC => f.write_str("Ctrl+C"),
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

#[cfg(unix)]
async fn terminate() -> std::io::Result<()> {
    let mut handler = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    handler.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> std::io::Result<()> {
    std::future::pending().await
}

/// Wait for termination signals (Ctrl+C, SIGTERM).
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    let received = tokio::select! {
        result = signal::ctrl_c() => result.map(|_| ShutdownSignal::CtrlC),
        result = terminate() => result.map(|_| ShutdownSignal::Terminate),
    };

    match received {
        Ok(sig) => {
            tracing::info!(signal = %sig, "Shutdown signal received, initiating graceful shutdown");
            Ok(sig)
        }
        Err(e) => {
            tracing::error!(%e, "Failed to install signal handler");
            Err(e.into())
        }
    }
}
