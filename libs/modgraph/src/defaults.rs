//! Framework default providers.
//!
//! Defaults are plain data handed to [`Application::bootstrap`](crate::Application::bootstrap)
//! through [`AppOptions`](crate::AppOptions); nothing here is process-global.

use std::collections::HashSet;

use crate::provider::Provider;
use crate::routes::{PreRouterExtension, RoutesExtension, PRE_ROUTER_EXTENSIONS, ROUTES_EXTENSIONS};
use crate::token::Token;
use crate::web::{
    BodyParser, BodyParserConfig, DefaultBodyParser, DefaultErrorHandler, DefaultHttpFrontend, ErrorHandler,
    HttpInterceptor, RawRequest, RawResponse, Request, Response, HTTP_FRONTEND,
};

/// Application-level settings, registered per app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMetadata {
    pub server_name: String,
    pub prefix_per_app: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            server_name: "modgraph".to_string(),
            prefix_per_app: String::new(),
        }
    }
}

/// Registered first in every module's per-module providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConfig {
    pub name: String,
    pub prefix: String,
}

#[derive(Clone)]
pub struct Defaults {
    pub per_app: Vec<Provider>,
    pub per_req: Vec<Provider>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            per_app: vec![
                Provider::use_value(Token::of::<BodyParserConfig>(), BodyParserConfig::default()),
                ROUTES_EXTENSIONS.provider::<RoutesExtension>().into(),
                PRE_ROUTER_EXTENSIONS.provider::<PreRouterExtension>().into(),
            ],
            per_req: vec![
                Provider::class::<Request>(),
                Provider::class::<Response>(),
                Provider::use_class_as::<dyn BodyParser, DefaultBodyParser>(Token::of::<dyn BodyParser>(), |p| p),
                Provider::use_class_as::<dyn ErrorHandler, DefaultErrorHandler>(
                    Token::of::<dyn ErrorHandler>(),
                    |h| h,
                ),
                Provider::token_class::<dyn HttpInterceptor, DefaultHttpFrontend>(&HTTP_FRONTEND, |f| f),
            ],
        }
    }
}

impl Defaults {
    /// Tokens that modules may not export per request: the raw request and
    /// response plus every default per-request service.
    pub fn reserved_per_req(&self) -> HashSet<Token> {
        let mut tokens: HashSet<Token> = self.per_req.iter().map(|p| p.token().clone()).collect();
        tokens.insert(Token::of::<RawRequest>());
        tokens.insert(Token::of::<RawResponse>());
        tokens
    }
}
