//! Module declarations.
//!
//! A module is declared once with [`ModuleDef::builder`] (or
//! [`ModuleDef::root`] for the application root) and referenced through the
//! cheap, clonable [`ModuleRef`]. Module identity is the identity of the
//! underlying allocation: keep each module in a `LazyLock` static (or build
//! it once and clone the ref) so every importer sees the same node.
//!
//! ```rust,ignore
//! static USERS: LazyLock<ModuleRef> = LazyLock::new(|| {
//!     ModuleDef::builder("UsersModule")
//!         .providers_per_mod([Provider::class::<UsersService>()])
//!         .controller(
//!             ControllerDef::of::<UsersController>()
//!                 .route(Route::get(":id"), "get_one", |c| async move { c.get_one().await })
//!                 .build(),
//!         )
//!         .build()
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use http::Method;
use serde_json::Value;

use crate::extension::ExtensionDecl;
use crate::provider::{Injectable, Instance, Provider};
use crate::token::Token;
use crate::web::{Guard, GuardItem};

/// Root-only application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootOptions {
    pub server_name: Option<String>,
    pub prefix_per_app: String,
}

pub struct ModuleDef {
    pub(crate) name: String,
    pub(crate) root: Option<RootOptions>,
    pub(crate) imports: Vec<ImportItem>,
    pub(crate) exports: Vec<ExportItem>,
    pub(crate) providers_per_app: Vec<Provider>,
    pub(crate) providers_per_mod: Vec<Provider>,
    pub(crate) providers_per_req: Vec<Provider>,
    pub(crate) controllers: Vec<ControllerDef>,
    pub(crate) routes: Vec<RouteNode>,
    pub(crate) extensions: Vec<ExtensionDecl>,
    pub(crate) errors: Vec<String>,
}

impl ModuleDef {
    pub fn builder(name: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder {
            def: ModuleDef {
                name: name.into(),
                root: None,
                imports: Vec::new(),
                exports: Vec::new(),
                providers_per_app: Vec::new(),
                providers_per_mod: Vec::new(),
                providers_per_req: Vec::new(),
                controllers: Vec::new(),
                routes: Vec::new(),
                extensions: Vec::new(),
                errors: Vec::new(),
            },
        }
    }

    pub fn root(name: impl Into<String>) -> ModuleBuilder {
        let mut b = Self::builder(name);
        b.def.root = Some(RootOptions::default());
        b
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.root.is_some()
    }
}

impl fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDef")
            .field("name", &self.name)
            .field("root", &self.root.is_some())
            .finish_non_exhaustive()
    }
}

pub struct ModuleBuilder {
    def: ModuleDef,
}

impl ModuleBuilder {
    pub fn import(mut self, item: impl Into<ImportItem>) -> Self {
        self.def.imports.push(item.into());
        self
    }

    pub fn imports<I>(mut self, items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ImportItem>,
    {
        self.def.imports.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn export(mut self, item: impl Into<ExportItem>) -> Self {
        self.def.exports.push(item.into());
        self
    }

    pub fn exports<I>(mut self, items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ExportItem>,
    {
        self.def.exports.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn providers_per_app(mut self, providers: impl IntoIterator<Item = Provider>) -> Self {
        self.def.providers_per_app.extend(providers);
        self
    }

    pub fn providers_per_mod(mut self, providers: impl IntoIterator<Item = Provider>) -> Self {
        self.def.providers_per_mod.extend(providers);
        self
    }

    pub fn providers_per_req(mut self, providers: impl IntoIterator<Item = Provider>) -> Self {
        self.def.providers_per_req.extend(providers);
        self
    }

    pub fn controller(mut self, controller: ControllerDef) -> Self {
        self.def.controllers.push(controller);
        self
    }

    pub fn route(mut self, node: RouteNode) -> Self {
        self.def.routes.push(node);
        self
    }

    pub fn routes(mut self, nodes: impl IntoIterator<Item = RouteNode>) -> Self {
        self.def.routes.extend(nodes);
        self
    }

    pub fn extension(mut self, decl: ExtensionDecl) -> Self {
        self.def.extensions.push(decl);
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        match self.def.root.as_mut() {
            Some(root) => root.server_name = Some(name.into()),
            None => self.def.errors.push("server name can only be set on the root module".into()),
        }
        self
    }

    pub fn prefix_per_app(mut self, prefix: impl Into<String>) -> Self {
        match self.def.root.as_mut() {
            Some(root) => root.prefix_per_app = prefix.into(),
            None => self.def.errors.push("prefix per app can only be set on the root module".into()),
        }
        self
    }

    pub fn build(self) -> ModuleRef {
        ModuleRef::Module(Arc::new(self.def))
    }
}

/// Reference to a module: plain, wrapped with import parameters, or deferred.
#[derive(Clone)]
pub enum ModuleRef {
    Module(Arc<ModuleDef>),
    WithParams(Arc<ModuleWithParams>),
    Forward(ForwardRef),
}

impl ModuleRef {
    /// Deferred reference, for modules that import each other's exports
    /// before both statics are initialized.
    pub fn forward(f: impl Fn() -> ModuleRef + Send + Sync + 'static) -> Self {
        ModuleRef::Forward(ForwardRef(Arc::new(f)))
    }

    /// Starts an import wrapper carrying a route prefix, guards and extra
    /// providers for this module.
    pub fn with_params(&self) -> WithParamsBuilder {
        WithParamsBuilder {
            params: ModuleWithParams {
                module: self.clone(),
                prefix: String::new(),
                guards: Vec::new(),
                providers_per_app: Vec::new(),
                providers_per_mod: Vec::new(),
                providers_per_req: Vec::new(),
            },
        }
    }

    /// Human readable name; forward references are not followed.
    pub fn name(&self) -> String {
        match self {
            ModuleRef::Module(def) => def.name.clone(),
            ModuleRef::WithParams(p) => p.module.name(),
            ModuleRef::Forward(_) => "<forward ref>".to_string(),
        }
    }
}

impl fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleRef::Module(def) => write!(f, "{}", def.name),
            ModuleRef::WithParams(p) => write!(f, "{:?} (prefix '{}')", p.module, p.prefix),
            ModuleRef::Forward(_) => f.write_str("<forward ref>"),
        }
    }
}

#[derive(Clone)]
pub struct ForwardRef(pub(crate) Arc<dyn Fn() -> ModuleRef + Send + Sync>);

pub struct ModuleWithParams {
    pub(crate) module: ModuleRef,
    pub(crate) prefix: String,
    pub(crate) guards: Vec<GuardItem>,
    pub(crate) providers_per_app: Vec<Provider>,
    pub(crate) providers_per_mod: Vec<Provider>,
    pub(crate) providers_per_req: Vec<Provider>,
}

pub struct WithParamsBuilder {
    params: ModuleWithParams,
}

impl WithParamsBuilder {
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.params.prefix = prefix.into();
        self
    }

    pub fn guard<G: Guard + 'static>(mut self) -> Self {
        self.params.guards.push(GuardItem::of::<G>());
        self
    }

    pub fn guard_item(mut self, item: GuardItem) -> Self {
        self.params.guards.push(item);
        self
    }

    pub fn providers_per_app(mut self, providers: impl IntoIterator<Item = Provider>) -> Self {
        self.params.providers_per_app.extend(providers);
        self
    }

    pub fn providers_per_mod(mut self, providers: impl IntoIterator<Item = Provider>) -> Self {
        self.params.providers_per_mod.extend(providers);
        self
    }

    pub fn providers_per_req(mut self, providers: impl IntoIterator<Item = Provider>) -> Self {
        self.params.providers_per_req.extend(providers);
        self
    }

    pub fn build(self) -> ModuleRef {
        ModuleRef::WithParams(Arc::new(self.params))
    }
}

pub enum ImportItem {
    Module(ModuleRef),
    Nested(Vec<ImportItem>),
}

impl From<ModuleRef> for ImportItem {
    fn from(value: ModuleRef) -> Self {
        ImportItem::Module(value)
    }
}

impl From<&ModuleRef> for ImportItem {
    fn from(value: &ModuleRef) -> Self {
        ImportItem::Module(value.clone())
    }
}

impl From<Vec<ImportItem>> for ImportItem {
    fn from(value: Vec<ImportItem>) -> Self {
        ImportItem::Nested(value)
    }
}

pub enum ExportItem {
    Module(ModuleRef),
    /// Re-export whatever provider the module sees under this token.
    Token(Token),
    /// Export this exact provider; its token must be visible to the module.
    Provider(Provider),
    Nested(Vec<ExportItem>),
}

impl ExportItem {
    pub fn of<T: ?Sized + 'static>() -> Self {
        ExportItem::Token(Token::of::<T>())
    }
}

impl From<ModuleRef> for ExportItem {
    fn from(value: ModuleRef) -> Self {
        ExportItem::Module(value)
    }
}

impl From<&ModuleRef> for ExportItem {
    fn from(value: &ModuleRef) -> Self {
        ExportItem::Module(value.clone())
    }
}

impl From<Token> for ExportItem {
    fn from(value: Token) -> Self {
        ExportItem::Token(value)
    }
}

impl From<Provider> for ExportItem {
    fn from(value: Provider) -> Self {
        ExportItem::Provider(value)
    }
}

impl From<Vec<ExportItem>> for ExportItem {
    fn from(value: Vec<ExportItem>) -> Self {
        ExportItem::Nested(value)
    }
}

/// Invokes a controller method on a resolved controller instance.
pub type MethodHandler = Arc<dyn Fn(Instance) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Route declaration on a controller method.
#[derive(Debug, Clone)]
pub struct Route {
    method: Method,
    path: String,
    guards: Vec<GuardItem>,
    parse_body: Option<bool>,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            guards: Vec::new(),
            parse_body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    pub fn options(path: impl Into<String>) -> Self {
        Self::new(Method::OPTIONS, path)
    }

    pub fn guard<G: Guard + 'static>(mut self) -> Self {
        self.guards.push(GuardItem::of::<G>());
        self
    }

    pub fn guard_with<G: Guard + 'static>(mut self, params: Vec<Value>) -> Self {
        self.guards.push(GuardItem::with_params::<G>(params));
        self
    }

    /// Overrides body parsing; by default only POST, PUT and PATCH parse.
    pub fn parse_body(mut self, parse: bool) -> Self {
        self.parse_body = Some(parse);
        self
    }
}

#[derive(Clone)]
pub struct RouteDecl {
    pub(crate) route: Route,
    pub(crate) method_name: Arc<str>,
    pub(crate) handler: MethodHandler,
}

impl RouteDecl {
    pub fn method(&self) -> &Method {
        &self.route.method
    }

    pub fn path(&self) -> &str {
        &self.route.path
    }

    pub fn guards(&self) -> &[GuardItem] {
        &self.route.guards
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn parse_body(&self) -> bool {
        self.route.parse_body.unwrap_or_else(|| {
            matches!(self.route.method, Method::POST | Method::PUT | Method::PATCH)
        })
    }

    pub(crate) fn handler(&self) -> &MethodHandler {
        &self.handler
    }
}

impl fmt::Debug for RouteDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDecl")
            .field("route", &self.route)
            .field("method_name", &self.method_name)
            .finish()
    }
}

/// A controller type and its routed methods. The controller is registered
/// as a per-request provider of the declaring module.
#[derive(Clone)]
pub struct ControllerDef {
    provider: Provider,
    routes: Vec<RouteDecl>,
}

impl ControllerDef {
    pub fn of<C: Injectable>() -> ControllerBuilder<C> {
        ControllerBuilder {
            routes: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn token(&self) -> &Token {
        self.provider.token()
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn routes(&self) -> &[RouteDecl] {
        &self.routes
    }
}

impl fmt::Debug for ControllerDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerDef")
            .field("token", self.token())
            .field("routes", &self.routes)
            .finish()
    }
}

pub struct ControllerBuilder<C> {
    routes: Vec<RouteDecl>,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Injectable> ControllerBuilder<C> {
    /// Binds `handler` to `route`. The handler receives the request-scoped
    /// controller instance.
    pub fn route<F, Fut>(mut self, route: Route, method_name: &str, handler: F) -> Self
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(
            move |instance: Instance| -> BoxFuture<'static, anyhow::Result<()>> {
                match instance.downcast::<C>() {
                    Some(ctrl) => Box::pin(handler(ctrl)),
                    None => Box::pin(async {
                        Err(anyhow::anyhow!("controller instance has an unexpected type"))
                    }),
                }
            },
        );
        self.routes.push(RouteDecl {
            route,
            method_name: Arc::from(method_name),
            handler,
        });
        self
    }

    pub fn build(self) -> ControllerDef {
        ControllerDef {
            provider: Provider::class::<C>(),
            routes: self.routes,
        }
    }
}

/// Node of a declarative route tree. Paths and guards are inherited by
/// children; a node without a controller only contributes its path.
#[derive(Clone, Debug)]
pub struct RouteNode {
    pub(crate) path: String,
    pub(crate) controller: Option<ControllerDef>,
    pub(crate) guards: Vec<GuardItem>,
    pub(crate) children: Vec<RouteNode>,
}

impl RouteNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            controller: None,
            guards: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn controller(mut self, controller: ControllerDef) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn guard<G: Guard + 'static>(mut self) -> Self {
        self.guards.push(GuardItem::of::<G>());
        self
    }

    pub fn child(mut self, node: RouteNode) -> Self {
        self.children.push(node);
        self
    }

    pub fn children(mut self, nodes: impl IntoIterator<Item = RouteNode>) -> Self {
        self.children.extend(nodes);
        self
    }
}
