//! Route compilation.
//!
//! Routing is driven by two built-in extension groups. [`ROUTES_EXTENSIONS`]
//! collects raw [`RouteMeta`] from every resolved module (listed controllers
//! and route trees, with prefixes and inherited guards applied).
//! [`PRE_ROUTER_EXTENSIONS`] awaits that group and turns each entry into a
//! [`PreparedRoute`] bound to its module's injector, which the application
//! then registers in the [`Router`](crate::router::Router).
//!
//! User extensions may join either group to contribute extra routes.

use std::fmt;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use http::Method;

use crate::errors::{DiResult, RouteError};
use crate::extension::{Extension, ExtensionGroup, ExtensionsManager, InitOnce, ModuleScope};
use crate::injector::{Injector, ProviderTable, Resolver};
use crate::module::{ControllerDef, MethodHandler, RouteNode};
use crate::provider::Injectable;
use crate::registry::NodeId;
use crate::token::Token;
use crate::web::GuardItem;

/// Raw route metadata, one entry per controller method.
pub static ROUTES_EXTENSIONS: LazyLock<ExtensionGroup<Vec<RouteMeta>>> =
    LazyLock::new(|| ExtensionGroup::new("ROUTES_EXTENSIONS"));

/// Routes bound to their module scope, ready for the router.
pub static PRE_ROUTER_EXTENSIONS: LazyLock<ExtensionGroup<Vec<PreparedRoute>>> =
    LazyLock::new(|| ExtensionGroup::new("PRE_ROUTER_EXTENSIONS"));

/// Joins path fragments with single slashes, dropping empty fragments and
/// surrounding slashes.
pub(crate) fn join_path(a: &str, b: &str) -> String {
    a.split('/')
        .chain(b.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn check_route_path(module: &str, path: &str) -> Result<(), RouteError> {
    if path.starts_with('/') {
        return Err(RouteError::InvalidPath {
            module: module.to_string(),
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Appends a controller route `path` to `prefix`. A trailing parameter
/// segment of the prefix is replaced by the route path, so `posts/:postId`
/// with `comments` gives `posts/comments`. An empty route path leaves the
/// prefix untouched.
pub fn compose_path(prefix: &str, path: &str) -> String {
    if path.split('/').all(str::is_empty) {
        return join_path(prefix, "");
    }
    let trimmed = prefix.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((head, last)) if last.starts_with(':') => join_path(head, path),
        None if trimmed.starts_with(':') => join_path("", path),
        _ => join_path(prefix, path),
    }
}

/// A controller method with its full path and guards, before it is bound to
/// an injector.
#[derive(Clone)]
pub struct RouteMeta {
    pub module: NodeId,
    pub module_name: Arc<str>,
    pub method: Method,
    /// Full path including the per-app and module prefixes, no leading slash.
    pub path: String,
    pub controller: Token,
    pub method_name: Arc<str>,
    pub handler: MethodHandler,
    pub parse_body: bool,
    pub guards: Vec<GuardItem>,
}

impl fmt::Debug for RouteMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMeta")
            .field("module", &self.module_name)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("controller", &self.controller)
            .field("method_name", &self.method_name)
            .field("parse_body", &self.parse_body)
            .field("guards", &self.guards)
            .finish()
    }
}

/// Everything the request pipeline needs once a route matched.
pub struct RouteHandle {
    pub module: Arc<str>,
    /// Module-scope injector; the parent of every request scope of this route.
    pub injector: Arc<Injector>,
    pub providers: Arc<ProviderTable>,
    pub controller: Token,
    pub method_name: Arc<str>,
    pub handler: MethodHandler,
    pub parse_body: bool,
    pub guards: Arc<[GuardItem]>,
}

impl fmt::Debug for RouteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteHandle")
            .field("module", &self.module)
            .field("controller", &self.controller)
            .field("method_name", &self.method_name)
            .field("parse_body", &self.parse_body)
            .field("guards", &self.guards)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct PreparedRoute {
    pub method: Method,
    pub path: String,
    pub handle: Arc<RouteHandle>,
}

/// Walks the controllers and route trees of every module.
pub fn collect_route_meta(prefix_per_app: &str, modules: &[Arc<ModuleScope>]) -> Result<Vec<RouteMeta>, RouteError> {
    let mut out = Vec::new();
    for scope in modules {
        let m = &scope.resolved;
        check_route_path(&m.name, prefix_per_app)?;
        check_route_path(&m.name, &m.prefix)?;

        let module = ModuleRoutes {
            id: m.id,
            name: Arc::from(m.name.as_str()),
        };
        let base = join_path(prefix_per_app, &m.prefix);
        for controller in &m.controllers {
            module.controller(&base, &m.guards, controller, &mut out)?;
        }
        for node in &m.routes {
            module.node(&base, &m.guards, node, &mut out)?;
        }
    }
    Ok(out)
}

struct ModuleRoutes {
    id: NodeId,
    name: Arc<str>,
}

impl ModuleRoutes {
    fn node(&self, prefix: &str, guards: &[GuardItem], node: &RouteNode, out: &mut Vec<RouteMeta>) -> Result<(), RouteError> {
        check_route_path(&self.name, &node.path)?;
        let path = join_path(prefix, &node.path);
        let mut inherited = guards.to_vec();
        inherited.extend(node.guards.iter().cloned());

        if let Some(controller) = &node.controller {
            self.controller(&path, &inherited, controller, out)?;
        }
        for child in &node.children {
            self.node(&path, &inherited, child, out)?;
        }
        Ok(())
    }

    fn controller(
        &self,
        prefix: &str,
        guards: &[GuardItem],
        controller: &ControllerDef,
        out: &mut Vec<RouteMeta>,
    ) -> Result<(), RouteError> {
        for decl in controller.routes() {
            check_route_path(&self.name, decl.path())?;
            let mut route_guards = guards.to_vec();
            route_guards.extend(decl.guards().iter().cloned());
            out.push(RouteMeta {
                module: self.id,
                module_name: Arc::clone(&self.name),
                method: decl.method().clone(),
                path: compose_path(prefix, decl.path()),
                controller: controller.token().clone(),
                method_name: Arc::from(decl.method_name()),
                handler: Arc::clone(decl.handler()),
                parse_body: decl.parse_body(),
                guards: route_guards,
            });
        }
        Ok(())
    }
}

/// Built-in member of [`ROUTES_EXTENSIONS`].
#[derive(Default)]
pub struct RoutesExtension {
    once: InitOnce<Vec<RouteMeta>>,
}

impl Injectable for RoutesExtension {
    fn construct(_: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self::default())
    }
}

#[async_trait]
impl Extension<Vec<RouteMeta>> for RoutesExtension {
    async fn init(&self, ext: &ExtensionsManager) -> anyhow::Result<Vec<RouteMeta>> {
        self.once
            .get_or_try_init(|| async {
                let meta = collect_route_meta(&ext.app_metadata().prefix_per_app, ext.modules())?;
                tracing::debug!(routes = meta.len(), "route metadata collected");
                Ok(meta)
            })
            .await
    }
}

/// Built-in member of [`PRE_ROUTER_EXTENSIONS`].
#[derive(Default)]
pub struct PreRouterExtension {
    once: InitOnce<Vec<PreparedRoute>>,
}

impl Injectable for PreRouterExtension {
    fn construct(_: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self::default())
    }
}

#[async_trait]
impl Extension<Vec<PreparedRoute>> for PreRouterExtension {
    async fn init(&self, ext: &ExtensionsManager) -> anyhow::Result<Vec<PreparedRoute>> {
        self.once
            .get_or_try_init(|| async {
                let groups = ext.init(&*ROUTES_EXTENSIONS).await?;
                let mut prepared = Vec::new();
                for meta in groups.iter().flatten() {
                    let Some(scope) = ext.modules().iter().find(|m| m.resolved.id == meta.module) else {
                        anyhow::bail!("route {} {} refers to an unknown module", meta.method, meta.path);
                    };
                    prepared.push(prepare(scope, meta));
                }
                Ok(prepared)
            })
            .await
    }
}

fn prepare(scope: &ModuleScope, meta: &RouteMeta) -> PreparedRoute {
    PreparedRoute {
        method: meta.method.clone(),
        path: meta.path.clone(),
        handle: Arc::new(RouteHandle {
            module: Arc::clone(&meta.module_name),
            injector: Arc::clone(&scope.injector),
            providers: Arc::clone(&scope.per_req),
            controller: meta.controller.clone(),
            method_name: Arc::clone(&meta.method_name),
            handler: Arc::clone(&meta.handler),
            parse_body: meta.parse_body,
            guards: meta.guards.iter().cloned().collect(),
        }),
    }
}
