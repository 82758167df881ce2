use std::fmt;

use thiserror::Error;

use crate::token::Token;

pub type DiResult<T> = Result<T, DiError>;

/// Failures of the injector hierarchy.
#[derive(Debug, Error)]
pub enum DiError {
    #[error("no provider for {token}{}", format_path(path))]
    MissingProvider { token: Token, path: Vec<Token> },

    #[error("cyclic dependency detected: {}", join_tokens(path, " -> "))]
    CircularDependency { path: Vec<Token> },

    #[error("provider for {token} does not produce a value of type {expected}")]
    TypeMismatch { token: Token, expected: &'static str },

    #[error("mixing multi and non-multi providers is not allowed for {token}")]
    MixedMulti { token: Token },

    #[error("failed to construct {token}")]
    Factory {
        token: Token,
        #[source]
        source: anyhow::Error,
    },
}

impl DiError {
    /// Token that could not be resolved, if this is a missing-provider error.
    pub fn missing_token(&self) -> Option<&Token> {
        match self {
            DiError::MissingProvider { token, .. } => Some(token),
            _ => None,
        }
    }
}

/// The provider scope a collision was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderScope {
    App,
    Module,
    Request,
}

impl fmt::Display for ProviderScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderScope::App => f.write_str("providers per app"),
            ProviderScope::Module => f.write_str("providers per module"),
            ProviderScope::Request => f.write_str("providers per request"),
        }
    }
}

/// Failures while normalizing and resolving the module graph.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("invalid configuration of module '{module}': {message}")]
    Configuration { module: String, message: String },

    #[error(
        "exported {token} from {module} should be included in providers per module or \
         providers per request, or in the exports of an imported module"
    )]
    Export { module: String, token: Token },

    #[error("{}", collision_message(module, tokens))]
    ProviderCollision {
        module: String,
        scope: ProviderScope,
        tokens: Vec<Token>,
    },

    #[error("cyclic module imports detected: {}", path.join(" -> "))]
    ImportCycle { path: Vec<String> },
}

impl ModuleError {
    pub fn configuration(module: impl Into<String>, message: impl Into<String>) -> Self {
        ModuleError::Configuration {
            module: module.into(),
            message: message.into(),
        }
    }
}

/// Failures while compiling the route table.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid configuration of route '{path}' (in '{module}'): path cannot start with a slash")]
    InvalidPath { module: String, path: String },

    #[error("route {method} /{path} is already registered")]
    Duplicate { method: http::Method, path: String },

    #[error("route /{path} declares parameter ':{name}' where ':{existing}' is already registered")]
    ParamConflict {
        path: String,
        name: String,
        existing: String,
    },
}

/// Anything that aborts [`Application::bootstrap`](crate::Application::bootstrap).
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Di(#[from] DiError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("extension group '{group}' failed")]
    Extension {
        group: String,
        #[source]
        source: anyhow::Error,
    },
}

fn format_path(path: &[Token]) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" (required by {})", join_tokens(path, " -> "))
    }
}

fn join_tokens(tokens: &[Token], sep: &str) -> String {
    tokens
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

fn collision_message(module: &str, tokens: &[Token]) -> String {
    let what = if tokens.len() > 1 {
        "these providers"
    } else {
        "this provider"
    };
    format!(
        "exporting providers to {module} failed: found collision for: {}. \
         You should manually add {what} to {module}.",
        join_tokens(tokens, ", ")
    )
}
