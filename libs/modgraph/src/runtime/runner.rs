//! Process runner.
//!
//! Phase order: **bootstrap → publish → serve → wait → drain**.
//! Shutdown can be driven by OS signals, an external `CancellationToken`,
//! or an arbitrary future.

use std::net::SocketAddr;
use std::{future::Future, pin::Pin, sync::Arc};

use tokio_util::sync::CancellationToken;

use super::application::{AppOptions, Application};
use super::host::HttpHost;
use crate::module::ModuleRef;

/// How the runner should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

pub struct RunOptions {
    pub root: ModuleRef,
    pub app: AppOptions,
    pub addr: SocketAddr,
    pub shutdown: ShutdownOptions,
}

/// Bootstraps the root module and serves it until shutdown.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                match modgraph_bootstrap::wait_for_shutdown().await {
                    Ok(sig) => {
                        tracing::info!(signal = %sig, "shutdown: signal received");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    let app = Application::bootstrap(&opts.root, opts.app).await?;
    let host = HttpHost::new();
    host.publish(Arc::new(app));
    host.serve(opts.addr, cancel).await
}
