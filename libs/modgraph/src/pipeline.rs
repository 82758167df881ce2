//! Per-request handling of a matched route.
//!
//! `build scope -> query -> guards -> body (optional) -> interceptor chain ->
//! handler`. Failures before the error handler exists fall back to a plain
//! 500; everything after is delegated to the request's [`ErrorHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;

use crate::errors::DiResult;
use crate::injector::{Injector, Scope};
use crate::module::MethodHandler;
use crate::provider::Instance;
use crate::router::RouteParam;
use crate::routes::RouteHandle;
use crate::token::Token;
use crate::web::{
    send_internal_server_error, write_error, BodyParser, Chain, ErrorHandler, GuardOutcome, HttpBackend,
    HttpInterceptor, RawRequest, RawResponse, Request, HTTP_FRONTEND, HTTP_INTERCEPTORS,
};

/// Services resolved up front from a fresh request scope.
struct Prepared {
    injector: Arc<Injector>,
    error_handler: Arc<dyn ErrorHandler>,
    request: Arc<Request>,
    controller: Instance,
}

fn prepare(handle: &RouteHandle, req: &Arc<RawRequest>, res: &Arc<RawResponse>) -> DiResult<Prepared> {
    let injector = handle.injector.child_with_seeds(
        Scope::Request,
        Arc::clone(&handle.module),
        Arc::clone(&handle.providers),
        [
            (Token::of::<RawRequest>(), Instance::new(Arc::clone(req))),
            (Token::of::<RawResponse>(), Instance::new(Arc::clone(res))),
        ],
    );
    Ok(Prepared {
        error_handler: injector.get::<dyn ErrorHandler>()?,
        request: injector.get::<Request>()?,
        controller: injector.resolve(&handle.controller)?,
        injector,
    })
}

/// Runs the route for one request. The outcome is always written to `res`;
/// this function never fails.
pub async fn handle_route(handle: &RouteHandle, params: Vec<RouteParam>, req: Arc<RawRequest>, res: Arc<RawResponse>) {
    let prepared = match prepare(handle, &req, &res) {
        Ok(p) => p,
        Err(err) => {
            send_internal_server_error(&req, &res, &err);
            return;
        }
    };
    prepared.request.set_params(params);

    if let Err(err) = run(handle, &prepared, &res).await {
        prepared.error_handler.handle_error(err).await;
    }
}

async fn run(handle: &RouteHandle, p: &Prepared, res: &Arc<RawResponse>) -> anyhow::Result<()> {
    p.request.query_pairs();

    for item in handle.guards.iter() {
        let guard = item.resolve(&p.injector)?;
        match guard.can_activate(item.params()).await? {
            GuardOutcome::Allow => {}
            GuardOutcome::Deny => {
                tracing::debug!(guard = %item.token(), "guard rejected the request");
                write_status(res, StatusCode::UNAUTHORIZED);
                return Ok(());
            }
            GuardOutcome::Status(status) => {
                tracing::debug!(guard = %item.token(), status = status.as_u16(), "guard rejected the request");
                write_status(res, status);
                return Ok(());
            }
        }
    }

    if handle.parse_body {
        let parser = p.injector.get::<dyn BodyParser>()?;
        p.request.set_body(parser.get_body().await?);
    }

    let mut stages = vec![p.injector.get_token(&*HTTP_FRONTEND)?];
    stages.extend(p.injector.get_all::<dyn HttpInterceptor>(&HTTP_INTERCEPTORS.token())?);
    let backend = Arc::new(HandlerBackend {
        handle: Arc::clone(&handle.handler),
        controller: p.controller.clone(),
        res: Arc::clone(res),
    });
    Chain::new(stages, backend).dispatch(0).await
}

fn write_status(res: &RawResponse, status: StatusCode) {
    write_error(res, status, status.canonical_reason().unwrap_or(""));
}

/// Calls the controller method, then flushes whatever it wrote.
struct HandlerBackend {
    handle: MethodHandler,
    controller: Instance,
    res: Arc<RawResponse>,
}

#[async_trait]
impl HttpBackend for HandlerBackend {
    async fn handle(&self) -> anyhow::Result<()> {
        (self.handle)(self.controller.clone()).await?;
        if !self.res.is_sent() {
            self.res.flush();
        }
        Ok(())
    }
}
