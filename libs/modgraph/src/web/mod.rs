//! HTTP-facing collaborators of the request pipeline.

mod body;
mod error;
mod error_handler;
mod guard;
mod interceptor;
mod raw;
mod request;

pub use body::{BodyParser, BodyParserConfig, DefaultBodyParser};
pub use error::HttpError;
pub use error_handler::{DefaultErrorHandler, ErrorHandler};
pub(crate) use error_handler::{send_internal_server_error, write_error};
pub use guard::{Guard, GuardItem, GuardOutcome};
pub(crate) use interceptor::Chain;
pub use interceptor::{
    DefaultHttpFrontend, HttpBackend, HttpInterceptor, Next, TimeoutInterceptor, HTTP_FRONTEND,
    HTTP_INTERCEPTORS,
};
pub use raw::{RawRequest, RawResponse};
pub use request::{Request, Response};
