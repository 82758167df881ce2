//! Built-in liveness and info endpoints.

use std::sync::Arc;

use modgraph::{
    AppMetadata, ControllerDef, DiResult, Injectable, ModuleConfig, ModuleDef, ModuleRef, Resolver, Response, Route,
};
use serde_json::json;

pub struct HealthController {
    res: Arc<Response>,
    app: Arc<AppMetadata>,
    module: Arc<ModuleConfig>,
}

impl Injectable for HealthController {
    fn construct(r: &mut Resolver<'_>) -> DiResult<Self> {
        Ok(Self {
            res: r.get()?,
            app: r.get()?,
            module: r.get()?,
        })
    }
}

impl HealthController {
    async fn health(&self) -> anyhow::Result<()> {
        self.res.send_json(&json!({ "status": "ok" }))
    }

    async fn info(&self) -> anyhow::Result<()> {
        self.res.send_json(&json!({
            "server": self.app.server_name,
            "version": env!("CARGO_PKG_VERSION"),
            "prefix": self.app.prefix_per_app,
            "module": self.module.name,
        }))
    }
}

pub fn module() -> ModuleRef {
    ModuleDef::builder("health")
        .controller(
            ControllerDef::of::<HealthController>()
                .route(Route::get("health"), "health", |c| async move { c.health().await })
                .route(Route::get("info"), "info", |c| async move { c.info().await })
                .build(),
        )
        .build()
}
