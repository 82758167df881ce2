//! Per-request services available to guards, interceptors and controllers.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::error::HttpError;
use super::raw::{RawRequest, RawResponse};
use crate::errors::DiResult;
use crate::injector::Resolver;
use crate::provider::Injectable;
use crate::router::RouteParam;

pub struct Request {
    raw: Arc<RawRequest>,
    params: OnceLock<Vec<RouteParam>>,
    query: OnceLock<Vec<(String, String)>>,
    body: OnceLock<Value>,
}

impl Injectable for Request {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self::new(r.get()?))
    }
}

impl Request {
    pub fn new(raw: Arc<RawRequest>) -> Self {
        Self {
            raw,
            params: OnceLock::new(),
            query: OnceLock::new(),
            body: OnceLock::new(),
        }
    }

    pub fn raw(&self) -> &Arc<RawRequest> {
        &self.raw
    }

    pub fn method(&self) -> &http::Method {
        self.raw.method()
    }

    pub fn path(&self) -> &str {
        self.raw.path()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.raw.header(name)
    }

    pub fn params(&self) -> &[RouteParam] {
        self.params.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params()
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    /// Parsed query string pairs, in order of appearance.
    pub fn query_pairs(&self) -> &[(String, String)] {
        self.query.get_or_init(|| {
            url::form_urlencoded::parse(self.raw.query_string().as_bytes())
                .into_owned()
                .collect()
        })
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query_pairs()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parsed body; `None` unless the route asked for body parsing.
    pub fn body(&self) -> Option<&Value> {
        self.body.get()
    }

    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        let value = self.body().cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| HttpError::bad_request(e.to_string()))
    }

    pub(crate) fn set_params(&self, params: Vec<RouteParam>) {
        let _ = self.params.set(params);
    }

    pub(crate) fn set_body(&self, body: Value) {
        let _ = self.body.set(body);
    }
}

pub struct Response {
    raw: Arc<RawResponse>,
}

impl Injectable for Response {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self { raw: r.get()? })
    }
}

impl Response {
    pub fn new(raw: Arc<RawResponse>) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Arc<RawResponse> {
        &self.raw
    }

    pub fn status(&self) -> StatusCode {
        self.raw.status()
    }

    pub fn set_status(&self, status: StatusCode) -> &Self {
        self.raw.set_status(status);
        self
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) -> &Self {
        self.raw.set_header(name, value);
        self
    }

    pub fn is_sent(&self) -> bool {
        self.raw.is_sent()
    }

    pub fn send(&self, body: impl Into<Bytes>) {
        self.raw.set_body(body);
        self.raw.flush();
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.raw.set_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.send(text.into());
    }

    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<()> {
        let body = serde_json::to_vec(value)?;
        self.raw
            .set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.send(body);
        Ok(())
    }

    /// Status with its canonical reason phrase as a plain-text body.
    pub fn send_status(&self, status: StatusCode) {
        self.raw.set_status(status);
        self.send_text(status.canonical_reason().unwrap_or(""));
    }
}
