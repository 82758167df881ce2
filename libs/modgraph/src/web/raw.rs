use axum::body::Body;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{request::Parts, HeaderMap, Method, StatusCode, Uri};
use parking_lot::Mutex;

/// Inbound request as handed over by the transport. Seeded into every
/// request-scope injector.
pub struct RawRequest {
    parts: Parts,
    body: Mutex<Option<Body>>,
}

impl RawRequest {
    pub fn new(parts: Parts, body: Body) -> Self {
        Self {
            parts,
            body: Mutex::new(Some(body)),
        }
    }

    pub fn from_http(req: http::Request<Body>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(parts, body)
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn query_string(&self) -> &str {
        self.parts.uri.query().unwrap_or("")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The body can be consumed once.
    pub fn take_body(&self) -> Option<Body> {
        self.body.lock().take()
    }
}

impl std::fmt::Debug for RawRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRequest")
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .finish()
    }
}

#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    sent: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            sent: false,
        }
    }
}

/// Outbound response buffer. Seeded into every request-scope injector; the
/// transport turns it into an `http::Response` once the pipeline finishes.
#[derive(Debug, Default)]
pub struct RawResponse {
    state: Mutex<ResponseState>,
}

impl RawResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.state.lock().status
    }

    pub fn set_status(&self, status: StatusCode) {
        self.state.lock().status = status;
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.state.lock().headers.insert(name, value);
    }

    pub fn set_body(&self, body: impl Into<Bytes>) {
        self.state.lock().body = body.into();
    }

    /// Marks headers and body as final.
    pub fn flush(&self) {
        self.state.lock().sent = true;
    }

    pub fn is_sent(&self) -> bool {
        self.state.lock().sent
    }

    /// Moves the buffered state out into a transport response.
    pub fn take(&self) -> http::Response<Body> {
        let state = std::mem::take(&mut *self.state.lock());
        let mut res = http::Response::new(Body::from(state.body));
        *res.status_mut() = state.status;
        *res.headers_mut() = state.headers;
        res
    }
}
