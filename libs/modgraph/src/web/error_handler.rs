use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;

use super::error::HttpError;
use super::raw::{RawRequest, RawResponse};
use crate::errors::{DiError, DiResult};
use crate::injector::Resolver;
use crate::provider::Injectable;

/// Per-request sink for failures raised after the request scope was built:
/// guards, body parsing, interceptors and handlers.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle_error(&self, err: anyhow::Error);
}

pub struct DefaultErrorHandler {
    req: Arc<RawRequest>,
    res: Arc<RawResponse>,
}

impl Injectable for DefaultErrorHandler {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self {
            req: r.get()?,
            res: r.get()?,
        })
    }
}

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle_error(&self, err: anyhow::Error) {
        let (status, message) = match err.downcast_ref::<HttpError>() {
            Some(http) => (http.status, http.message.clone()),
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(
                method = %self.req.method(),
                path = %self.req.path(),
                status = status.as_u16(),
                error = ?err,
                "request failed"
            );
        } else {
            tracing::debug!(
                method = %self.req.method(),
                path = %self.req.path(),
                status = status.as_u16(),
                error = %err,
                "request rejected"
            );
        }

        if self.res.is_sent() {
            tracing::warn!(path = %self.req.path(), "response already sent; dropping error body");
            return;
        }
        write_error(&self.res, status, &message);
    }
}

pub(crate) fn write_error(res: &RawResponse, status: StatusCode, message: &str) {
    res.set_status(status);
    res.set_header(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res.set_body(message.to_string());
    res.flush();
}

/// Process-level fallback used when the request scope itself cannot be built
/// (for example a provider of the route is missing).
pub(crate) fn send_internal_server_error(req: &RawRequest, res: &RawResponse, err: &DiError) {
    tracing::error!(
        method = %req.method(),
        path = %req.path(),
        error = %err,
        "failed to build request scope"
    );
    write_error(res, StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
}
