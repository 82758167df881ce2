//! Lookup keys for the injector hierarchy.
//!
//! A [`Token`] is either a type identity, a plain string key, or a symbolic
//! key created through [`InjectionToken`]. Tokens have a total order so that
//! diagnostics (collision lists, cycle paths) print deterministically.

use std::any::{type_name, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Identity of a Rust type used as a token.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name with module paths stripped (`dyn modgraph::http::Guard` -> `dyn Guard`).
    pub fn short_name(&self) -> String {
        short_type_name(self.name)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

/// Identity of an [`InjectionToken`]; unique per construction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolKey {
    id: u64,
    name: &'static str,
}

impl SymbolKey {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InjectionToken {}#{}", self.name, self.id)
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Type(TypeKey),
    Key(Arc<str>),
    Symbol(SymbolKey),
}

impl Token {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Token::Type(TypeKey::of::<T>())
    }

    pub fn key(key: impl Into<Arc<str>>) -> Self {
        Token::Key(key.into())
    }

    fn rank(&self) -> u8 {
        match self {
            Token::Type(_) => 0,
            Token::Key(_) => 1,
            Token::Symbol(_) => 2,
        }
    }

    fn sort_name(&self) -> String {
        match self {
            Token::Type(t) => t.short_name(),
            Token::Key(k) => k.to_string(),
            Token::Symbol(s) => s.name.to_string(),
        }
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.sort_name().cmp(&other.sort_name()))
            .then_with(|| match (self, other) {
                (Token::Type(a), Token::Type(b)) => a.id.cmp(&b.id),
                (Token::Symbol(a), Token::Symbol(b)) => a.id.cmp(&b.id),
                _ => Ordering::Equal,
            })
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Type(t) => f.write_str(&t.short_name()),
            Token::Key(k) => f.write_str(k),
            Token::Symbol(s) => write!(f, "InjectionToken {}", s.name),
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Token::key(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Token::key(value)
    }
}

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(1);

/// Typed symbolic key. `T` is the type resolved under this token, usually a
/// trait object such as `dyn HttpInterceptor`.
///
/// Every call to [`InjectionToken::new`] yields a distinct identity, even for
/// equal names, so tokens are normally stored in a `LazyLock` static.
pub struct InjectionToken<T: ?Sized> {
    key: SymbolKey,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized> InjectionToken<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            key: SymbolKey {
                id: NEXT_SYMBOL.fetch_add(1, AtomicOrdering::Relaxed),
                name,
            },
            _marker: PhantomData,
        }
    }

    pub fn token(&self) -> Token {
        Token::Symbol(self.key)
    }

    pub fn name(&self) -> &'static str {
        self.key.name
    }
}

impl<T: ?Sized> Clone for InjectionToken<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Debug for InjectionToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InjectionToken {}", self.key.name)
    }
}

impl<T: ?Sized> From<&InjectionToken<T>> for Token {
    fn from(value: &InjectionToken<T>) -> Self {
        value.token()
    }
}

fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    for c in full.chars() {
        out.push(c);
        if out.ends_with("::") {
            let start = out
                .rfind(|ch: char| matches!(ch, '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' | ';'))
                .map(|i| i + 1)
                .unwrap_or(0);
            out.truncate(start);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Provider1;
    trait Service {}

    #[test]
    fn type_tokens_display_short_names() {
        assert_eq!(Token::of::<Provider1>().to_string(), "Provider1");
        assert_eq!(Token::of::<dyn Service>().to_string(), "dyn Service");
        assert_eq!(
            Token::of::<Vec<Arc<Provider1>>>().to_string(),
            "Vec<Arc<Provider1>>"
        );
    }

    #[test]
    fn injection_tokens_are_unique_per_instance() {
        let a: InjectionToken<dyn Service> = InjectionToken::new("NODE_REQ");
        let b: InjectionToken<dyn Service> = InjectionToken::new("NODE_REQ");
        assert_ne!(a.token(), b.token());
        assert_eq!(a.token(), a.clone().token());
        assert_eq!(a.token().to_string(), "InjectionToken NODE_REQ");
    }

    #[test]
    fn ordering_is_by_variant_then_name() {
        let sym: InjectionToken<dyn Service> = InjectionToken::new("A_TOKEN");
        let mut tokens = vec![
            sym.token(),
            Token::key("zeta"),
            Token::of::<Provider1>(),
            Token::key("alpha"),
        ];
        tokens.sort();
        let names: Vec<String> = tokens.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec!["Provider1", "alpha", "zeta", "InjectionToken A_TOKEN"]
        );
    }
}
