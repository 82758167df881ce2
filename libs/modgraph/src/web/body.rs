use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::{Map, Value};

use super::error::HttpError;
use super::raw::RawRequest;
use crate::errors::DiResult;
use crate::injector::Resolver;
use crate::provider::Injectable;

/// Reads and decodes the request body. Invoked only for routes flagged to
/// parse the body, after guards have allowed the request.
#[async_trait]
pub trait BodyParser: Send + Sync {
    async fn get_body(&self) -> anyhow::Result<Value>;
}

/// Application-wide body parsing limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyParserConfig {
    pub limit_bytes: usize,
}

impl Default for BodyParserConfig {
    fn default() -> Self {
        Self {
            limit_bytes: 1024 * 1024,
        }
    }
}

/// JSON, urlencoded form and plain text bodies.
pub struct DefaultBodyParser {
    raw: Arc<RawRequest>,
    config: Arc<BodyParserConfig>,
}

impl Injectable for DefaultBodyParser {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self {
            raw: r.get()?,
            config: r.get()?,
        })
    }
}

#[async_trait]
impl BodyParser for DefaultBodyParser {
    async fn get_body(&self) -> anyhow::Result<Value> {
        let limit = self.config.limit_bytes;
        let declared = self
            .raw
            .header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(HttpError::payload_too_large(format!("body exceeds {limit} bytes")).into());
        }

        let Some(body) = self.raw.take_body() else {
            return Ok(Value::Null);
        };
        let mut stream = body.into_data_stream();
        let mut bytes = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| HttpError::bad_request(format!("failed to read body: {e}")))?;
            if bytes.len() + chunk.len() > limit {
                return Err(HttpError::payload_too_large(format!("body exceeds {limit} bytes")).into());
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }

        let content_type = self
            .raw
            .header(CONTENT_TYPE.as_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") || content_type.ends_with("+json") {
            serde_json::from_slice(&bytes)
                .map_err(|e| HttpError::bad_request(format!("invalid JSON body: {e}")).into())
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let map: Map<String, Value> = url::form_urlencoded::parse(&bytes)
                .into_owned()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            Ok(Value::Object(map))
        } else {
            Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use bytes::Bytes;
    use http::StatusCode;

    fn parser(req: http::Request<Body>, limit_bytes: usize) -> DefaultBodyParser {
        DefaultBodyParser {
            raw: Arc::new(RawRequest::from_http(req)),
            config: Arc::new(BodyParserConfig { limit_bytes }),
        }
    }

    fn chunked(chunks: &[&'static str]) -> Body {
        let frames: Vec<Result<Bytes, std::io::Error>> =
            chunks.iter().map(|&c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        Body::from_stream(futures::stream::iter(frames))
    }

    fn status(err: anyhow::Error) -> StatusCode {
        err.downcast::<HttpError>().unwrap().status
    }

    #[tokio::test]
    async fn oversized_body_without_content_length_is_413() {
        let req = http::Request::post("/")
            .header(CONTENT_TYPE, "application/json")
            .body(chunked(&[r#"{"name":"#, r#""a much longer name"}"#]))
            .unwrap();

        let err = parser(req, 8).get_body().await.unwrap_err();
        assert_eq!(status(err), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn declared_length_over_the_limit_is_413() {
        let req = http::Request::post("/")
            .header(CONTENT_LENGTH, "100")
            .body(Body::from("{}"))
            .unwrap();

        let err = parser(req, 8).get_body().await.unwrap_err();
        assert_eq!(status(err), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn chunks_within_the_limit_are_joined() {
        let req = http::Request::post("/")
            .header(CONTENT_TYPE, "application/json")
            .body(chunked(&[r#"{"a":"#, "1}"]))
            .unwrap();

        assert_eq!(parser(req, 64).get_body().await.unwrap(), serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn form_bodies_become_objects() {
        let req = http::Request::post("/")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("name=ann&role=admin"))
            .unwrap();

        let body = parser(req, 64).get_body().await.unwrap();
        assert_eq!(body, serde_json::json!({"name": "ann", "role": "admin"}));
    }
}
