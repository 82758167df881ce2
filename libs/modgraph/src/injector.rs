//! Scoped injector hierarchy: application -> module -> request.
//!
//! Injectors are immutable after construction except for their instance
//! caches. A provider is always instantiated by the injector that owns it, so
//! its dependencies are looked up from that scope upwards and never from a
//! child scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::errors::{DiError, DiResult};
use crate::provider::{expected, Instance, Provider, ProviderKind};
use crate::token::{InjectionToken, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    App,
    Module,
    Request,
}

#[derive(Clone)]
enum Entry {
    Single(Provider),
    Multi(Vec<Provider>),
}

/// Provider lookup table for one scope, built once and shared by every
/// injector created from it.
#[derive(Clone, Default)]
pub struct ProviderTable {
    entries: HashMap<Token, Entry>,
    order: Vec<Token>,
}

impl ProviderTable {
    /// Later non-multi providers override earlier ones; multi providers
    /// accumulate in declaration order.
    pub fn build(providers: &[Provider]) -> DiResult<Self> {
        let mut table = ProviderTable::default();
        for p in providers {
            let token = p.token().clone();
            match table.entries.get_mut(&token) {
                None => {
                    table.order.push(token.clone());
                    let entry = if p.is_multi() {
                        Entry::Multi(vec![p.clone()])
                    } else {
                        Entry::Single(p.clone())
                    };
                    table.entries.insert(token, entry);
                }
                Some(Entry::Multi(list)) if p.is_multi() => list.push(p.clone()),
                Some(slot) if !p.is_multi() && matches!(slot, Entry::Single(_)) => {
                    *slot = Entry::Single(p.clone())
                }
                Some(_) => return Err(DiError::MixedMulti { token }),
            }
        }
        Ok(table)
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.entries.contains_key(token)
    }

    /// Tokens in first-registration order.
    pub fn tokens(&self) -> &[Token] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Default)]
struct ResolveCtx {
    stack: Vec<(usize, Token)>,
}

impl ResolveCtx {
    fn path(&self) -> Vec<Token> {
        self.stack.iter().map(|(_, t)| t.clone()).collect()
    }
}

pub struct Injector {
    scope: Scope,
    label: Arc<str>,
    table: Arc<ProviderTable>,
    parent: Option<Arc<Injector>>,
    cache: DashMap<Token, Instance>,
    multi_cache: DashMap<Token, Arc<Vec<Instance>>>,
    /// One construction lock per token, so a singleton is built exactly once
    /// even when several requests resolve it for the first time together.
    building: DashMap<Token, Arc<Mutex<()>>>,
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("scope", &self.scope)
            .field("label", &self.label)
            .field("providers", &self.table.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl Injector {
    /// Application-scope injector.
    pub fn root(label: impl Into<Arc<str>>, providers: &[Provider]) -> DiResult<Arc<Self>> {
        let table = ProviderTable::build(providers)?;
        Ok(Arc::new(Self::new(Scope::App, label.into(), Arc::new(table), None)))
    }

    pub fn child(
        self: &Arc<Self>,
        scope: Scope,
        label: impl Into<Arc<str>>,
        table: Arc<ProviderTable>,
    ) -> Arc<Self> {
        Arc::new(Self::new(scope, label.into(), table, Some(Arc::clone(self))))
    }

    /// Child injector whose cache is pre-populated with `seeds`. Seeded tokens
    /// resolve before any provider in `table` is consulted.
    pub fn child_with_seeds(
        self: &Arc<Self>,
        scope: Scope,
        label: impl Into<Arc<str>>,
        table: Arc<ProviderTable>,
        seeds: impl IntoIterator<Item = (Token, Instance)>,
    ) -> Arc<Self> {
        let inj = Self::new(scope, label.into(), table, Some(Arc::clone(self)));
        for (token, instance) in seeds {
            inj.cache.insert(token, instance);
        }
        Arc::new(inj)
    }

    fn new(scope: Scope, label: Arc<str>, table: Arc<ProviderTable>, parent: Option<Arc<Self>>) -> Self {
        Self {
            scope,
            label,
            table,
            parent,
            cache: DashMap::new(),
            multi_cache: DashMap::new(),
            building: DashMap::new(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn parent(&self) -> Option<&Arc<Injector>> {
        self.parent.as_ref()
    }

    pub fn table(&self) -> &Arc<ProviderTable> {
        &self.table
    }

    /// True if `token` is registered here or in an ancestor scope.
    pub fn has(&self, token: &Token) -> bool {
        self.table.contains(token)
            || self.cache.contains_key(token)
            || self.parent.as_ref().is_some_and(|p| p.has(token))
    }

    pub fn resolve(self: &Arc<Self>, token: &Token) -> DiResult<Instance> {
        let mut ctx = ResolveCtx::default();
        self.resolve_in(token, &mut ctx)
    }

    /// All instances of a multi token from the nearest scope that registers
    /// it. An unregistered token yields an empty list.
    pub fn resolve_all(self: &Arc<Self>, token: &Token) -> DiResult<Vec<Instance>> {
        let mut ctx = ResolveCtx::default();
        self.resolve_all_in(token, &mut ctx)
    }

    pub fn get<T: ?Sized + Send + Sync + 'static>(self: &Arc<Self>) -> DiResult<Arc<T>> {
        self.get_by(&Token::of::<T>())
    }

    pub fn get_by<T: ?Sized + Send + Sync + 'static>(self: &Arc<Self>, token: &Token) -> DiResult<Arc<T>> {
        downcast(token, self.resolve(token)?)
    }

    pub fn get_token<T: ?Sized + Send + Sync + 'static>(
        self: &Arc<Self>,
        token: &InjectionToken<T>,
    ) -> DiResult<Arc<T>> {
        self.get_by(&token.token())
    }

    pub fn get_all<T: ?Sized + Send + Sync + 'static>(self: &Arc<Self>, token: &Token) -> DiResult<Vec<Arc<T>>> {
        self.resolve_all(token)?
            .into_iter()
            .map(|i| downcast(token, i))
            .collect()
    }

    fn resolve_in(self: &Arc<Self>, token: &Token, ctx: &mut ResolveCtx) -> DiResult<Instance> {
        let mut current = self;
        loop {
            if let Some(hit) = current.cache.get(token) {
                return Ok(hit.value().clone());
            }
            match current.table.entries.get(token) {
                Some(Entry::Single(p)) => return current.instantiate(p, ctx),
                Some(Entry::Multi(_)) => {
                    return Err(DiError::TypeMismatch {
                        token: token.clone(),
                        expected: "a single provider (token is registered as multi)",
                    })
                }
                None => match &current.parent {
                    Some(parent) => current = parent,
                    None => {
                        return Err(DiError::MissingProvider {
                            token: token.clone(),
                            path: ctx.path(),
                        })
                    }
                },
            }
        }
    }

    fn resolve_all_in(self: &Arc<Self>, token: &Token, ctx: &mut ResolveCtx) -> DiResult<Vec<Instance>> {
        let mut current = self;
        loop {
            if let Some(hit) = current.multi_cache.get(token) {
                return Ok(hit.value().as_ref().clone());
            }
            match current.table.entries.get(token) {
                Some(Entry::Multi(list)) => return current.instantiate_multi(token, list, ctx),
                Some(Entry::Single(p)) => return current.instantiate(p, ctx).map(|i| vec![i]),
                None => match &current.parent {
                    Some(parent) => current = parent,
                    None => return Ok(Vec::new()),
                },
            }
        }
    }

    fn enter(self: &Arc<Self>, token: &Token, ctx: &mut ResolveCtx) -> DiResult<()> {
        let frame = (Arc::as_ptr(self) as usize, token.clone());
        if let Some(start) = ctx.stack.iter().position(|f| *f == frame) {
            let mut path: Vec<Token> = ctx.stack[start..].iter().map(|(_, t)| t.clone()).collect();
            path.push(token.clone());
            return Err(DiError::CircularDependency { path });
        }
        ctx.stack.push(frame);
        Ok(())
    }

    fn build_lock(&self, token: &Token) -> Arc<Mutex<()>> {
        Arc::clone(self.building.entry(token.clone()).or_default().value())
    }

    fn instantiate(self: &Arc<Self>, provider: &Provider, ctx: &mut ResolveCtx) -> DiResult<Instance> {
        let token = provider.token();
        self.enter(token, ctx)?;
        let lock = self.build_lock(token);
        let produced = {
            let _building = lock.lock();
            let cached = self.cache.get(token).map(|hit| hit.value().clone());
            match cached {
                Some(instance) => Ok(instance),
                None => self.produce(provider.kind(), ctx).inspect(|instance| {
                    self.cache.insert(token.clone(), instance.clone());
                }),
            }
        };
        ctx.stack.pop();
        produced
    }

    fn instantiate_multi(
        self: &Arc<Self>,
        token: &Token,
        list: &[Provider],
        ctx: &mut ResolveCtx,
    ) -> DiResult<Vec<Instance>> {
        self.enter(token, ctx)?;
        let lock = self.build_lock(token);
        let produced = {
            let _building = lock.lock();
            let cached = self.multi_cache.get(token).map(|hit| Arc::clone(hit.value()));
            match cached {
                Some(all) => Ok(all),
                None => list
                    .iter()
                    .map(|p| self.produce(p.kind(), ctx))
                    .collect::<DiResult<Vec<Instance>>>()
                    .map(|all| {
                        let all = Arc::new(all);
                        self.multi_cache.insert(token.clone(), Arc::clone(&all));
                        all
                    }),
            }
        };
        ctx.stack.pop();
        produced.map(|all| all.as_ref().clone())
    }

    fn produce(self: &Arc<Self>, kind: &ProviderKind, ctx: &mut ResolveCtx) -> DiResult<Instance> {
        match kind {
            ProviderKind::Class { construct, .. } | ProviderKind::Factory { construct } => {
                let mut r = Resolver { injector: self, ctx };
                construct(&mut r)
            }
            ProviderKind::Value { value, .. } => Ok(value.clone()),
            ProviderKind::Alias(target) => self.resolve_in(target, ctx),
        }
    }
}

fn downcast<T: ?Sized + Send + Sync + 'static>(token: &Token, instance: Instance) -> DiResult<Arc<T>> {
    instance.downcast::<T>().ok_or_else(|| DiError::TypeMismatch {
        token: token.clone(),
        expected: expected::<T>(),
    })
}

/// Dependency access handed to [`Injectable::construct`](crate::Injectable::construct)
/// and factory providers.
pub struct Resolver<'a> {
    injector: &'a Arc<Injector>,
    ctx: &'a mut ResolveCtx,
}

impl Resolver<'_> {
    pub fn get<T: ?Sized + Send + Sync + 'static>(&mut self) -> DiResult<Arc<T>> {
        self.get_by(&Token::of::<T>())
    }

    pub fn get_by<T: ?Sized + Send + Sync + 'static>(&mut self, token: &Token) -> DiResult<Arc<T>> {
        let instance = self.injector.resolve_in(token, self.ctx)?;
        downcast(token, instance)
    }

    pub fn get_token<T: ?Sized + Send + Sync + 'static>(&mut self, token: &InjectionToken<T>) -> DiResult<Arc<T>> {
        self.get_by(&token.token())
    }

    /// `None` when the token itself is not registered; failures of its own
    /// dependencies are still reported.
    pub fn get_optional<T: ?Sized + Send + Sync + 'static>(&mut self) -> DiResult<Option<Arc<T>>> {
        let token = Token::of::<T>();
        match self.get_by(&token) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.missing_token() == Some(&token) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_all<T: ?Sized + Send + Sync + 'static>(&mut self, token: &Token) -> DiResult<Vec<Arc<T>>> {
        self.injector
            .resolve_all_in(token, self.ctx)?
            .into_iter()
            .map(|i| downcast(token, i))
            .collect()
    }

    /// The injector that owns the provider being constructed.
    pub fn injector(&self) -> Arc<Injector> {
        Arc::clone(self.injector)
    }
}
