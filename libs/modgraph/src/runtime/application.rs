//! Application bootstrap.
//!
//! Phase order: **scan → providers_per_app → modules → extensions → router**.
//! Every phase runs to completion before the next one starts and any failure
//! aborts the bootstrap; no partially built application is returned.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use http::StatusCode;
use modgraph_bootstrap::{AppConfig, ConfigProvider};

use crate::defaults::{AppMetadata, Defaults};
use crate::errors::{BootstrapError, DiError, ModuleError, RouteError};
use crate::extension::{ExtensionsManager, ModuleScope};
use crate::injector::{Injector, ProviderTable, Scope};
use crate::module::ModuleRef;
use crate::pipeline::handle_route;
use crate::provider::Provider;
use crate::registry::ModuleRegistry;
use crate::resolver::GraphResolver;
use crate::router::{display_path, Router};
use crate::routes::{check_route_path, RouteHandle, PRE_ROUTER_EXTENSIONS};
use crate::token::Token;
use crate::web::{BodyParserConfig, RawRequest, RawResponse};

/// Bootstrap settings. Values set here take precedence over the root
/// module's own declaration.
#[derive(Clone, Default)]
pub struct AppOptions {
    pub defaults: Defaults,
    /// Registered per app under `dyn ConfigProvider` when set.
    pub config: Option<Arc<dyn ConfigProvider>>,
    pub server_name: Option<String>,
    pub prefix_per_app: Option<String>,
    pub body_limit_bytes: Option<usize>,
    /// Extra application-level providers, registered before everything else.
    pub providers_per_app: Vec<Provider>,
}

impl AppOptions {
    /// Server settings from `config`; `provider` serves module sections.
    pub fn from_app_config(config: &AppConfig, provider: Arc<dyn ConfigProvider>) -> Self {
        Self {
            config: Some(provider),
            server_name: Some(config.server.server_name.clone()),
            prefix_per_app: Some(config.server.prefix.clone()),
            body_limit_bytes: Some(config.server.body_limit_bytes),
            ..Self::default()
        }
    }
}

impl fmt::Debug for AppOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppOptions")
            .field("has_config", &self.config.is_some())
            .field("server_name", &self.server_name)
            .field("prefix_per_app", &self.prefix_per_app)
            .field("body_limit_bytes", &self.body_limit_bytes)
            .field("providers_per_app", &self.providers_per_app.len())
            .finish_non_exhaustive()
    }
}

/// One compiled route, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSummary {
    pub method: http::Method,
    /// `/`-prefixed full path.
    pub path: String,
    pub module: String,
    /// `Controller::method`.
    pub handler: String,
}

/// A bootstrapped application: immutable injectors and the compiled router.
pub struct Application {
    meta: Arc<AppMetadata>,
    injector: Arc<Injector>,
    modules: Vec<Arc<ModuleScope>>,
    router: Router<Arc<RouteHandle>>,
    routes: Vec<RouteSummary>,
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("server_name", &self.meta.server_name)
            .field("modules", &self.modules.len())
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl Application {
    pub async fn bootstrap(root: &ModuleRef, opts: AppOptions) -> Result<Self, BootstrapError> {
        tracing::info!("Phase: scan");
        let registry = ModuleRegistry::scan(root)?;
        let root_name = registry.root().name().to_string();
        let declared = registry.root().meta.root.clone().unwrap_or_default();

        let meta = Arc::new(AppMetadata {
            server_name: opts
                .server_name
                .or(declared.server_name)
                .unwrap_or_else(|| AppMetadata::default().server_name),
            prefix_per_app: opts.prefix_per_app.unwrap_or(declared.prefix_per_app),
        });
        check_route_path(&root_name, &meta.prefix_per_app)?;

        tracing::info!("Phase: providers_per_app");
        let mut defaults = opts.defaults;
        if let Some(limit) = opts.body_limit_bytes {
            let token = Token::of::<BodyParserConfig>();
            defaults.per_app.retain(|p| p.token() != &token);
            defaults
                .per_app
                .push(Provider::use_value(token, BodyParserConfig { limit_bytes: limit }));
        }

        let mut framework = vec![Provider::use_arc(Token::of::<AppMetadata>(), Arc::clone(&meta))];
        if let Some(config) = opts.config {
            framework.push(Provider::use_arc(Token::of::<dyn ConfigProvider>(), config));
        }
        framework.extend(opts.providers_per_app);

        let resolver = GraphResolver::new(&registry, &defaults);
        let per_app = resolver.providers_per_app(&framework)?;
        let injector = Injector::root(root_name.as_str(), &per_app)?;
        tracing::debug!(providers = injector.table().len(), "application injector ready");

        tracing::info!("Phase: modules");
        let app_tokens: HashSet<Token> = per_app.iter().map(|p| p.token().clone()).collect();
        let modules = resolver
            .resolve_modules(&app_tokens)?
            .into_iter()
            .map(|resolved| {
                let per_mod = ProviderTable::build(&resolved.providers_per_mod)?;
                let per_req = ProviderTable::build(&resolved.providers_per_req)?;
                Ok(Arc::new(ModuleScope {
                    injector: injector.child(Scope::Module, resolved.name.as_str(), Arc::new(per_mod)),
                    per_req: Arc::new(per_req),
                    resolved,
                }))
            })
            .collect::<Result<Vec<_>, DiError>>()?;

        tracing::info!("Phase: extensions");
        let ext = ExtensionsManager::new(Arc::clone(&injector), Arc::clone(&meta), modules.clone());
        for group in resolver.extension_groups() {
            tracing::debug!(group = group.name(), "running extension group");
            group
                .run(&ext)
                .await
                .map_err(|e| extension_error(group.name(), e))?;
        }

        tracing::info!("Phase: router");
        let prepared = ext
            .init(&*PRE_ROUTER_EXTENSIONS)
            .await
            .map_err(|e| extension_error(PRE_ROUTER_EXTENSIONS.name(), e))?;

        let mut router = Router::new();
        let mut routes = Vec::new();
        for route in prepared.iter().flatten() {
            let summary = RouteSummary {
                method: route.method.clone(),
                path: display_path(&route.path),
                module: route.handle.module.to_string(),
                handler: format!("{}::{}", route.handle.controller, route.handle.method_name),
            };
            tracing::trace!(
                module = %summary.module,
                method = %summary.method,
                path = %summary.path,
                handler = %summary.handler,
                guards = ?route.handle.guards,
                "route compiled"
            );
            router.on(route.method.clone(), &route.path, Arc::clone(&route.handle))?;
            routes.push(summary);
        }

        tracing::info!(
            modules = modules.len(),
            routes = router.len(),
            server_name = %meta.server_name,
            "application bootstrapped"
        );

        Ok(Self {
            meta,
            injector,
            modules,
            router,
            routes,
        })
    }

    /// Dispatches one request. Never fails: every outcome is a response.
    pub async fn handle(&self, req: http::Request<Body>) -> http::Response<Body> {
        let (parts, body) = req.into_parts();
        let Some(found) = self.router.find(&parts.method, parts.uri.path()) else {
            tracing::debug!(method = %parts.method, path = %parts.uri.path(), "no route matched");
            return not_found();
        };
        let handle = Arc::clone(found.handle);
        let params = found.params;

        let raw_req = Arc::new(RawRequest::new(parts, body));
        let raw_res = Arc::new(RawResponse::new());
        handle_route(&handle, params, raw_req, Arc::clone(&raw_res)).await;
        raw_res.take()
    }

    pub fn routes(&self) -> &[RouteSummary] {
        &self.routes
    }

    /// The application-scope injector.
    pub fn injector(&self) -> &Arc<Injector> {
        &self.injector
    }

    pub fn module(&self, name: &str) -> Option<&Arc<ModuleScope>> {
        self.modules.iter().find(|m| m.name() == name)
    }

    pub fn metadata(&self) -> &AppMetadata {
        &self.meta
    }
}

fn not_found() -> http::Response<Body> {
    let mut res = http::Response::new(Body::from("Not Found"));
    *res.status_mut() = StatusCode::NOT_FOUND;
    res.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res
}

/// Configuration errors raised inside an extension keep their own kind.
fn extension_error(group: &str, err: anyhow::Error) -> BootstrapError {
    let err = match err.downcast::<RouteError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<ModuleError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    match err.downcast::<DiError>() {
        Ok(e) => e.into(),
        Err(source) => BootstrapError::Extension {
            group: group.to_string(),
            source,
        },
    }
}
