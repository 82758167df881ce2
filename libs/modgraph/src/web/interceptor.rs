//! Interceptor chain.
//!
//! The chain is an ordered list of stages plus a terminal backend. Each stage
//! receives a [`Next`] holding the index of the following stage; calling
//! [`Next::run`] dispatches to it, and running past the last stage reaches
//! the backend.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use http::header::{HeaderValue, SERVER};
use http::StatusCode;

use super::request::Response;
use crate::defaults::AppMetadata;
use crate::errors::DiResult;
use crate::injector::Resolver;
use crate::provider::{Injectable, Provider};
use crate::token::InjectionToken;

/// Multi token collecting user interceptors.
pub static HTTP_INTERCEPTORS: LazyLock<InjectionToken<dyn HttpInterceptor>> =
    LazyLock::new(|| InjectionToken::new("HTTP_INTERCEPTORS"));

/// The built-in first stage of every chain.
pub static HTTP_FRONTEND: LazyLock<InjectionToken<dyn HttpInterceptor>> =
    LazyLock::new(|| InjectionToken::new("HTTP_FRONTEND"));

#[async_trait]
pub trait HttpInterceptor: Send + Sync {
    async fn intercept(&self, next: Next) -> anyhow::Result<()>;
}

/// Terminal stage: invokes the route handler and flushes the response.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn handle(&self) -> anyhow::Result<()>;
}

pub(crate) struct Chain {
    stages: Vec<Arc<dyn HttpInterceptor>>,
    backend: Arc<dyn HttpBackend>,
}

impl Chain {
    pub(crate) fn new(stages: Vec<Arc<dyn HttpInterceptor>>, backend: Arc<dyn HttpBackend>) -> Arc<Self> {
        Arc::new(Self { stages, backend })
    }

    pub(crate) fn dispatch(self: Arc<Self>, index: usize) -> BoxFuture<'static, anyhow::Result<()>> {
        match self.stages.get(index).cloned() {
            Some(stage) => Box::pin(async move {
                stage
                    .intercept(Next {
                        chain: self,
                        index: index + 1,
                    })
                    .await
            }),
            None => {
                let backend = Arc::clone(&self.backend);
                Box::pin(async move { backend.handle().await })
            }
        }
    }
}

/// The remainder of the chain.
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    pub async fn run(self) -> anyhow::Result<()> {
        self.chain.dispatch(self.index).await
    }
}

/// Sets the `server` header, then continues.
pub struct DefaultHttpFrontend {
    res: Arc<Response>,
    meta: Arc<AppMetadata>,
}

impl Injectable for DefaultHttpFrontend {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self {
            res: r.get()?,
            meta: r.get()?,
        })
    }
}

#[async_trait]
impl HttpInterceptor for DefaultHttpFrontend {
    async fn intercept(&self, next: Next) -> anyhow::Result<()> {
        if let Ok(v) = HeaderValue::from_str(&self.meta.server_name) {
            self.res.set_header(SERVER, v);
        }
        next.run().await
    }
}

/// Races the rest of the chain against a timer and answers 504 when the
/// timer wins.
pub struct TimeoutInterceptor {
    res: Arc<Response>,
    after: Duration,
}

impl TimeoutInterceptor {
    /// Multi provider for [`HTTP_INTERCEPTORS`]; declare it per request.
    pub fn provider(after: Duration) -> Provider {
        Provider::use_factory(HTTP_INTERCEPTORS.token(), move |r| {
            let res = r.get::<Response>()?;
            Ok(Arc::new(TimeoutInterceptor { res, after }) as Arc<dyn HttpInterceptor>)
        })
        .multi()
    }
}

#[async_trait]
impl HttpInterceptor for TimeoutInterceptor {
    async fn intercept(&self, next: Next) -> anyhow::Result<()> {
        match tokio::time::timeout(self.after, next.run()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(after_ms = self.after.as_millis() as u64, "request timed out");
                if !self.res.is_sent() {
                    self.res.send_status(StatusCode::GATEWAY_TIMEOUT);
                }
                Ok(())
            }
        }
    }
}
