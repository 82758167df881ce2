use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde_json::Value;

use crate::errors::{DiError, DiResult};
use crate::injector::Injector;
use crate::provider::{expected, Instance};
use crate::token::Token;

/// Result of a guard check. Anything other than `Allow` ends the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Allow,
    /// Rejected with the default status (401).
    Deny,
    Status(StatusCode),
}

impl From<bool> for GuardOutcome {
    fn from(value: bool) -> Self {
        if value {
            GuardOutcome::Allow
        } else {
            GuardOutcome::Deny
        }
    }
}

impl From<StatusCode> for GuardOutcome {
    fn from(value: StatusCode) -> Self {
        GuardOutcome::Status(value)
    }
}

/// Checked before a route handler runs. Guards are resolved from the
/// request-scope injector, so they must be declared as providers visible to
/// the route's module (usually per request).
#[async_trait]
pub trait Guard: Send + Sync {
    async fn can_activate(&self, params: &[Value]) -> anyhow::Result<GuardOutcome>;
}

type CastFn = fn(&Instance) -> Option<Arc<dyn Guard>>;

/// A guard reference attached to a route, route tree node or imported module.
#[derive(Clone)]
pub struct GuardItem {
    token: Token,
    params: Vec<Value>,
    cast: CastFn,
    expected: &'static str,
}

impl GuardItem {
    pub fn of<G: Guard + 'static>() -> Self {
        Self::with_params::<G>(Vec::new())
    }

    pub fn with_params<G: Guard + 'static>(params: Vec<Value>) -> Self {
        Self {
            token: Token::of::<G>(),
            params,
            cast: cast_guard::<G>,
            expected: expected::<G>(),
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub(crate) fn resolve(&self, injector: &Arc<Injector>) -> DiResult<Arc<dyn Guard>> {
        let instance = injector.resolve(&self.token)?;
        (self.cast)(&instance).ok_or_else(|| DiError::TypeMismatch {
            token: self.token.clone(),
            expected: self.expected,
        })
    }
}

impl fmt::Debug for GuardItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.token)
        } else {
            write!(f, "{}({:?})", self.token, self.params)
        }
    }
}

fn cast_guard<G: Guard + 'static>(instance: &Instance) -> Option<Arc<dyn Guard>> {
    instance.downcast::<G>().map(|g| g as Arc<dyn Guard>)
}
