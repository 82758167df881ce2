//! HTTP host: an axum server whose only route is a fallback that forwards
//! every request to the published [`Application`].

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum::body::Body;
use http::{HeaderName, Request, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::field::Empty;

use super::application::Application;

fn request_id_header() -> HeaderName {
    HeaderName::from_static("x-request-id")
}

/// Answers 503 until an application is published.
#[derive(Default)]
pub struct HttpHost {
    app: ArcSwapOption<Application>,
}

impl HttpHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes `app` the target of all subsequent requests.
    pub fn publish(&self, app: Arc<Application>) {
        self.app.store(Some(app));
    }

    pub fn is_ready(&self) -> bool {
        self.app.load().is_some()
    }

    async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let Some(app) = self.app.load_full() else {
            let mut res = Response::new(Body::from("Service Unavailable"));
            *res.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            return res;
        };
        app.handle(req).await
    }

    pub fn router(self: &Arc<Self>) -> axum::Router {
        let host = Arc::clone(self);
        let x_request_id = request_id_header();

        // Outermost first: Set -> Propagate -> Trace -> fallback.
        axum::Router::new()
            .fallback(move |req: Request<Body>| {
                let host = Arc::clone(&host);
                async move { host.dispatch(req).await }
            })
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(|req: &Request<Body>| {
                        let rid = req
                            .headers()
                            .get(request_id_header())
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("n/a");
                        tracing::info_span!(
                            "http_request",
                            method = %req.method(),
                            uri = %req.uri().path(),
                            request_id = %rid,
                            status = Empty,
                            latency_ms = Empty,
                        )
                    })
                    .on_response(|res: &Response<Body>, latency: std::time::Duration, span: &tracing::Span| {
                        span.record("status", res.status().as_u16());
                        span.record("latency_ms", latency.as_millis() as u64);
                    }),
            )
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
    }

    /// Serves until `cancel` fires, then drains in-flight requests.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr, cancel: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP server bound on {}", listener.local_addr()?);

        let shutdown = async move {
            cancel.cancelled().await;
            tracing::info!("HTTP server shutting down gracefully (cancellation)");
        };

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn unpublished_host_answers_503_with_request_id() {
        let host = HttpHost::new();
        assert!(!host.is_ready());

        let res = host
            .router()
            .oneshot(Request::get("/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(res.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn client_request_id_is_propagated() {
        let host = HttpHost::new();
        let res = host
            .router()
            .oneshot(
                Request::get("/")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.headers()["x-request-id"], "abc-123");
    }
}
