//! Provider declarations and the provider registry rules.
//!
//! A [`Provider`] tells an injector how to produce the value for a [`Token`]:
//! construct a type, hand out a fixed value, run a factory, or alias another
//! token. [`unique_providers`] collapses an ordered declaration list into its
//! canonical de-duplicated form.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{DiError, DiResult};
use crate::injector::Resolver;
use crate::token::{InjectionToken, Token, TypeKey};

/// A type-erased resolved value. Always holds an `Arc<T>` so sized types and
/// trait objects resolve the same way.
#[derive(Clone)]
pub struct Instance(Arc<dyn Any + Send + Sync>);

impl Instance {
    pub fn new<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
        Instance(Arc::new(value))
    }

    pub fn downcast<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.0.downcast_ref::<Arc<T>>().cloned()
    }

    /// True when both handles come from the same resolution.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Instance(..)")
    }
}

/// Types the injector can construct. Dependencies are pulled from the
/// resolver, which delegates to parent scopes when a token is absent.
///
/// ```rust,ignore
/// struct UsersService {
///     repo: Arc<UsersRepo>,
/// }
///
/// impl Injectable for UsersService {
///     fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
///         Ok(Self { repo: r.get()? })
///     }
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self>;
}

pub(crate) type ConstructFn = Arc<dyn Fn(&mut Resolver<'_>) -> DiResult<Instance> + Send + Sync>;
type SameValueFn = fn(&Instance, &Instance) -> bool;

#[derive(Clone)]
pub enum ProviderKind {
    Class {
        class: TypeKey,
        construct: ConstructFn,
    },
    Value {
        value: Instance,
        same: SameValueFn,
    },
    Factory {
        construct: ConstructFn,
    },
    Alias(Token),
}

impl ProviderKind {
    fn same_payload(&self, other: &ProviderKind) -> bool {
        match (self, other) {
            (ProviderKind::Class { class: a, .. }, ProviderKind::Class { class: b, .. }) => a == b,
            (
                ProviderKind::Value { value: a, same },
                ProviderKind::Value { value: b, .. },
            ) => a.ptr_eq(b) || same(a, b),
            (
                ProviderKind::Factory { construct: a },
                ProviderKind::Factory { construct: b },
            ) => Arc::ptr_eq(a, b),
            (ProviderKind::Alias(a), ProviderKind::Alias(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Class { class, .. } => write!(f, "class {class:?}"),
            ProviderKind::Value { .. } => f.write_str("value"),
            ProviderKind::Factory { .. } => f.write_str("factory"),
            ProviderKind::Alias(t) => write!(f, "alias of {t}"),
        }
    }
}

#[derive(Clone)]
pub struct Provider {
    token: Token,
    kind: ProviderKind,
    multi: bool,
}

impl Provider {
    /// Bare class reference: the type is both the token and the implementation.
    pub fn class<C: Injectable>() -> Self {
        Self::use_class::<C>(Token::of::<C>())
    }

    /// `{ token, class }` form.
    pub fn use_class<C: Injectable>(token: impl Into<Token>) -> Self {
        Self {
            token: token.into(),
            kind: ProviderKind::Class {
                class: TypeKey::of::<C>(),
                construct: Arc::new(|r| C::construct(r).map(|c| Instance::new(Arc::new(c)))),
            },
            multi: false,
        }
    }

    /// Class provider that is resolved as `Arc<I>`, typically a trait object.
    pub fn use_class_as<I, C>(token: impl Into<Token>, upcast: fn(Arc<C>) -> Arc<I>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        C: Injectable,
    {
        Self {
            token: token.into(),
            kind: ProviderKind::Class {
                class: TypeKey::of::<C>(),
                construct: Arc::new(move |r| {
                    C::construct(r).map(|c| Instance::new::<I>(upcast(Arc::new(c))))
                }),
            },
            multi: false,
        }
    }

    /// Fixed value compared by equality when de-duplicating.
    pub fn use_value<T>(token: impl Into<Token>, value: T) -> Self
    where
        T: PartialEq + Send + Sync + 'static,
    {
        Self {
            token: token.into(),
            kind: ProviderKind::Value {
                value: Instance::new(Arc::new(value)),
                same: same_value::<T>,
            },
            multi: false,
        }
    }

    /// Fixed shared value compared by pointer identity.
    pub fn use_arc<T>(token: impl Into<Token>, value: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            token: token.into(),
            kind: ProviderKind::Value {
                value: Instance::new(value),
                same: same_arc::<T>,
            },
            multi: false,
        }
    }

    /// Factory invoked with the resolver of the scope that owns the provider.
    pub fn use_factory<T, F>(token: impl Into<Token>, factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&mut Resolver<'_>) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let token = token.into();
        let owner = token.clone();
        Self {
            token,
            kind: ProviderKind::Factory {
                construct: Arc::new(move |r| {
                    factory(r).map(Instance::new).map_err(|source| {
                        match source.downcast::<DiError>() {
                            Ok(di) => di,
                            Err(source) => DiError::Factory {
                                token: owner.clone(),
                                source,
                            },
                        }
                    })
                }),
            },
            multi: false,
        }
    }

    /// Alias: resolving `token` yields the instance registered for `existing`.
    pub fn use_existing(token: impl Into<Token>, existing: impl Into<Token>) -> Self {
        Self {
            token: token.into(),
            kind: ProviderKind::Alias(existing.into()),
            multi: false,
        }
    }

    /// Class provider registered under a typed symbolic key.
    pub fn token_class<I, C>(token: &InjectionToken<I>, upcast: fn(Arc<C>) -> Arc<I>) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        C: Injectable,
    {
        Self::use_class_as::<I, C>(token.token(), upcast)
    }

    /// Marks the provider as multi: registrations under the same token
    /// accumulate instead of overriding each other.
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    pub fn is_multi(&self) -> bool {
        self.multi
    }

    /// Two providers are identical when token, multi flag and payload match.
    /// A bare class `C` and `{ token: C, class: C }` are the same declaration.
    pub fn is_identical(&self, other: &Provider) -> bool {
        self.token == other.token
            && self.multi == other.multi
            && self.kind.same_payload(&other.kind)
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Provider");
        d.field("token", &self.token).field("kind", &self.kind);
        if self.multi {
            d.field("multi", &true);
        }
        d.finish()
    }
}

fn same_value<T: PartialEq + Send + Sync + 'static>(a: &Instance, b: &Instance) -> bool {
    match (a.downcast::<T>(), b.downcast::<T>()) {
        (Some(a), Some(b)) => *a == *b,
        _ => false,
    }
}

fn same_arc<T: ?Sized + Send + Sync + 'static>(a: &Instance, b: &Instance) -> bool {
    match (a.downcast::<T>(), b.downcast::<T>()) {
        (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
        _ => false,
    }
}

/// Canonical de-duplication of an ordered provider list.
///
/// - Non-multi providers with the same token collapse to the last one, which
///   keeps its own position.
/// - Multi providers are kept individually; exact duplicates (same token and
///   payload) are dropped after the first occurrence.
pub fn unique_providers(providers: &[Provider]) -> Vec<Provider> {
    let mut keep = vec![true; providers.len()];
    let mut last_single: HashMap<&Token, usize> = HashMap::new();

    for (i, p) in providers.iter().enumerate() {
        if p.multi {
            if providers[..i]
                .iter()
                .zip(&keep)
                .any(|(q, kept)| *kept && q.multi && q.is_identical(p))
            {
                keep[i] = false;
            }
            continue;
        }

        if let Some(prev) = last_single.insert(&p.token, i) {
            keep[prev] = false;
        }
    }

    providers
        .iter()
        .zip(keep)
        .filter_map(|(p, kept)| kept.then(|| p.clone()))
        .collect()
}

/// Expected type name, used in mismatch diagnostics.
pub(crate) fn expected<T: ?Sized>() -> &'static str {
    type_name::<T>()
}
