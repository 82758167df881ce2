//! # modgraph - modular application runtime
//!
//! Applications are trees of modules. Each module declares providers at three
//! scopes (application, module, request), imports other modules, exports a
//! subset of its providers and contributes controllers whose methods become
//! HTTP routes.
//!
//! Bootstrap phases: **scan → providers_per_app → modules → extensions → router**.
//!
//! ```rust,ignore
//! use modgraph::{ControllerDef, ModuleDef, Provider, Route, Request, Response};
//!
//! let users = ModuleDef::builder("users")
//!     .providers_per_mod([Provider::class::<UserRepo>()])
//!     .controller(
//!         ControllerDef::of::<UsersController>()
//!             .route(Route::get("users/:id"), "get_user", |c| async move { c.get_user().await })
//!             .build(),
//!     )
//!     .build();
//!
//! let root = ModuleDef::root("app").import(users.clone()).build();
//! let app = modgraph::Application::bootstrap(&root, Default::default()).await?;
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

pub mod errors;
pub mod token;
pub use errors::{BootstrapError, DiError, DiResult, ModuleError, ProviderScope, RouteError};
pub use token::{InjectionToken, Token};

// Dependency injection
pub mod injector;
pub mod provider;
pub use injector::{Injector, ProviderTable, Resolver, Scope};
pub use provider::{unique_providers, Injectable, Instance, Provider, ProviderKind};

// Module declarations and graph resolution
pub mod metadata;
pub mod module;
pub mod registry;
pub mod resolver;
pub use module::{
    ControllerBuilder, ControllerDef, ExportItem, ImportItem, MethodHandler, ModuleBuilder, ModuleDef, ModuleRef,
    RootOptions, Route, RouteDecl, RouteNode,
};
pub use registry::{ModuleRegistry, NodeId};
pub use resolver::{GraphResolver, ResolvedModule};

// Extensions
pub mod defaults;
pub mod extension;
pub use defaults::{AppMetadata, Defaults, ModuleConfig};
pub use extension::{Extension, ExtensionDecl, ExtensionGroup, ExtensionsManager, InitOnce, ModuleScope};

// Routing and request handling
pub mod pipeline;
pub mod router;
pub mod routes;
pub mod web;
pub use router::{RouteMatch, RouteParam, Router};
pub use routes::{PreparedRoute, RouteHandle, RouteMeta, PRE_ROUTER_EXTENSIONS, ROUTES_EXTENSIONS};
pub use web::{
    BodyParser, BodyParserConfig, ErrorHandler, Guard, GuardItem, GuardOutcome, HttpBackend, HttpError,
    HttpInterceptor, Next, RawRequest, RawResponse, Request, Response, TimeoutInterceptor, HTTP_FRONTEND,
    HTTP_INTERCEPTORS,
};

pub mod runtime;
pub use runtime::{run, AppOptions, Application, HttpHost, RouteSummary, RunOptions, ShutdownOptions};

pub use modgraph_bootstrap::{AppConfigProvider, ConfigProvider};
