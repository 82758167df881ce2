//! Module graph resolution.
//!
//! Works on a scanned [`ModuleRegistry`] and produces:
//! - the merged per-app provider list, checked for collisions between
//!   feature modules;
//! - one [`ResolvedModule`] per graph node with its final per-module and
//!   per-request provider lists.
//!
//! Exports are computed children first. Everything the root module exports
//! becomes global: it is prepended to the lists of every other module.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::defaults::{Defaults, ModuleConfig};
use crate::errors::{ModuleError, ProviderScope};
use crate::extension::ExtensionGroupRef;
use crate::metadata::ExportEntry;
use crate::module::{ControllerDef, RouteNode};
use crate::provider::{unique_providers, Provider};
use crate::registry::{ModuleNode, ModuleRegistry, NodeId};
use crate::token::Token;
use crate::web::GuardItem;

/// Providers a module hands to its importers.
#[derive(Debug, Clone, Default)]
pub struct Exports {
    pub per_mod: Vec<Provider>,
    pub per_req: Vec<Provider>,
}

/// Final, immutable view of one module after resolution.
#[derive(Debug)]
pub struct ResolvedModule {
    pub id: NodeId,
    pub name: String,
    pub is_root: bool,
    /// Full route prefix of the module (without the per-app prefix).
    pub prefix: String,
    pub guards: Vec<GuardItem>,
    pub providers_per_mod: Vec<Provider>,
    pub providers_per_req: Vec<Provider>,
    pub exports: Exports,
    pub controllers: Vec<ControllerDef>,
    pub routes: Vec<RouteNode>,
}

pub struct GraphResolver<'a> {
    registry: &'a ModuleRegistry,
    defaults: &'a Defaults,
}

impl<'a> GraphResolver<'a> {
    pub fn new(registry: &'a ModuleRegistry, defaults: &'a Defaults) -> Self {
        Self { registry, defaults }
    }

    /// Per-app providers of every feature module, children first, followed
    /// by exported-only modules. The root module's own providers are not
    /// included.
    pub fn collect_providers_per_app(&self) -> Vec<Provider> {
        let root = self.registry.root().id;
        self.registry
            .post_order()
            .iter()
            .filter(|id| **id != root)
            .flat_map(|id| unique_providers(&own_providers_per_app(self.registry.node(*id))))
            .collect()
    }

    /// `framework` providers first, then defaults, then everything collected
    /// from feature modules and finally the root module's own providers.
    pub fn providers_per_app(&self, framework: &[Provider]) -> Result<Vec<Provider>, ModuleError> {
        let root = self.registry.root();
        let collected = self.collect_providers_per_app();
        let root_own = own_providers_per_app(root);

        let mut candidates: Vec<Provider> = framework.to_vec();
        candidates.extend(self.defaults.per_app.iter().cloned());
        candidates.extend(collected.iter().cloned());
        check_app_collisions(root.name(), &root_own, &candidates)?;

        candidates.extend(root_own);
        Ok(unique_providers(&candidates))
    }

    /// Extension groups declared by any module, deduplicated by token.
    pub fn extension_groups(&self) -> Vec<ExtensionGroupRef> {
        let mut seen = HashSet::new();
        self.registry
            .post_order()
            .iter()
            .flat_map(|id| self.registry.node(*id).meta.extensions.iter())
            .filter(|decl| seen.insert(decl.group().token()))
            .map(|decl| decl.group().clone())
            .collect()
    }

    /// Resolves every module, children before parents. `app_tokens` are the
    /// tokens of the merged per-app list.
    pub fn resolve_modules(&self, app_tokens: &HashSet<Token>) -> Result<Vec<Arc<ResolvedModule>>, ModuleError> {
        let order = self.registry.post_order();

        let mut exports: HashMap<NodeId, Exports> = HashMap::new();
        for id in order {
            let node = self.registry.node(*id);
            let lists = ProviderLists::new(node, &exports);
            let out = lists.exports(node, &exports)?;
            exports.insert(*id, out);
        }

        let root_id = self.registry.root().id;
        let globals = exports.get(&root_id).cloned().unwrap_or_default();
        let reserved = self.defaults.reserved_per_req();

        let mut resolved = Vec::with_capacity(order.len());
        for id in order {
            let node = self.registry.node(*id);
            check_has_content(node)?;

            let lists = ProviderLists::new(node, &exports);
            lists.check_collisions(node.name(), app_tokens, &reserved)?;

            let globals = if node.is_root() { Exports::default() } else { globals.clone() };
            let module_config = Provider::use_value(
                Token::of::<ModuleConfig>(),
                ModuleConfig {
                    name: node.name().to_string(),
                    prefix: node.prefix.clone(),
                },
            );

            let mut per_mod = vec![module_config];
            per_mod.extend(globals.per_mod);
            per_mod.extend(lists.imported.per_mod.iter().cloned());
            per_mod.extend(lists.own.per_mod.iter().cloned());

            let mut per_req: Vec<Provider> = controllers_of(node).map(|c| c.provider().clone()).collect();
            per_req.extend(self.defaults.per_req.iter().cloned());
            per_req.extend(globals.per_req);
            per_req.extend(lists.imported.per_req.iter().cloned());
            per_req.extend(lists.own.per_req.iter().cloned());

            tracing::trace!(
                module = node.name(),
                per_mod = per_mod.len(),
                per_req = per_req.len(),
                "module resolved"
            );

            resolved.push(Arc::new(ResolvedModule {
                id: *id,
                name: node.name().to_string(),
                is_root: node.is_root(),
                prefix: node.prefix.clone(),
                guards: node.guards.clone(),
                providers_per_mod: unique_providers(&per_mod),
                providers_per_req: unique_providers(&per_req),
                exports: exports.get(id).cloned().unwrap_or_default(),
                controllers: node.meta.controllers.clone(),
                routes: node.meta.routes.clone(),
            }));
        }
        Ok(resolved)
    }
}

fn own_providers_per_app(node: &ModuleNode) -> Vec<Provider> {
    let mut list = node.meta.providers_per_app.clone();
    list.extend(node.meta.extensions.iter().map(|e| e.provider().clone()));
    list
}

/// Listed controllers plus the controllers of the route tree.
fn controllers_of(node: &ModuleNode) -> impl Iterator<Item = &ControllerDef> {
    fn walk<'a>(nodes: &'a [RouteNode], out: &mut Vec<&'a ControllerDef>) {
        for n in nodes {
            if let Some(c) = &n.controller {
                out.push(c);
            }
            walk(&n.children, out);
        }
    }
    let mut out: Vec<&ControllerDef> = node.meta.controllers.iter().collect();
    walk(&node.meta.routes, &mut out);
    out.into_iter()
}

fn check_has_content(node: &ModuleNode) -> Result<(), ModuleError> {
    let m = &node.meta;
    let empty = controllers_of(node).next().is_none()
        && m.export_modules.is_empty()
        && m.export_entries.is_empty();
    if empty && !node.is_root() {
        return Err(ModuleError::configuration(
            node.name(),
            "this module should have some controllers or a non-empty exports list",
        ));
    }
    Ok(())
}

/// Per-app duplicates between framework defaults and feature modules are
/// collisions unless the root declares the token, one of them is multi, or
/// all of them are identical.
fn check_app_collisions(root: &str, root_own: &[Provider], candidates: &[Provider]) -> Result<(), ModuleError> {
    let root_tokens: HashSet<&Token> = root_own.iter().map(Provider::token).collect();
    let tokens = duplicated_tokens(candidates, |t| !root_tokens.contains(t));
    if tokens.is_empty() {
        Ok(())
    } else {
        Err(ModuleError::ProviderCollision {
            module: root.to_string(),
            scope: ProviderScope::App,
            tokens,
        })
    }
}

/// Tokens declared more than once in `list` by non-identical, non-multi
/// providers, in first-seen order.
fn duplicated_tokens(list: &[Provider], mut consider: impl FnMut(&Token) -> bool) -> Vec<Token> {
    let mut groups: Vec<(&Token, Vec<&Provider>)> = Vec::new();
    let mut index: HashMap<&Token, usize> = HashMap::new();
    for p in list {
        match index.get(p.token()) {
            Some(i) => groups[*i].1.push(p),
            None => {
                index.insert(p.token(), groups.len());
                groups.push((p.token(), vec![p]));
            }
        }
    }

    groups
        .into_iter()
        .filter(|(token, group)| {
            group.len() > 1
                && consider(*token)
                && !group.iter().any(|p| p.is_multi())
                && !group.iter().all(|p| p.is_identical(group[0]))
        })
        .map(|(token, _)| token.clone())
        .collect()
}

/// A module's own and imported providers.
struct ProviderLists {
    own: Exports,
    imported: Exports,
}

impl ProviderLists {
    fn new(node: &ModuleNode, exports: &HashMap<NodeId, Exports>) -> Self {
        let own = Exports {
            per_mod: unique_providers(&node.meta.providers_per_mod),
            per_req: unique_providers(&node.meta.providers_per_req),
        };
        let mut imported = Exports::default();
        for child in &node.imports {
            if let Some(e) = exports.get(child) {
                imported.per_mod.extend(e.per_mod.iter().cloned());
                imported.per_req.extend(e.per_req.iter().cloned());
            }
        }
        Self { own, imported }
    }

    /// Finds the providers visible to the module under `token`, searching
    /// own per-module, own per-request, then imported lists.
    fn lookup(&self, token: &Token) -> Option<(ProviderScope, Vec<&Provider>)> {
        let sources = [
            (ProviderScope::Module, &self.own.per_mod),
            (ProviderScope::Request, &self.own.per_req),
            (ProviderScope::Module, &self.imported.per_mod),
            (ProviderScope::Request, &self.imported.per_req),
        ];
        sources.into_iter().find_map(|(scope, list)| {
            let found: Vec<&Provider> = list.iter().filter(|p| p.token() == token).collect();
            (!found.is_empty()).then_some((scope, found))
        })
    }

    fn exports(&self, node: &ModuleNode, exports: &HashMap<NodeId, Exports>) -> Result<Exports, ModuleError> {
        let mut out = Exports::default();
        for child in &node.export_modules {
            if let Some(e) = exports.get(child) {
                out.per_mod.extend(e.per_mod.iter().cloned());
                out.per_req.extend(e.per_req.iter().cloned());
            }
        }

        for entry in &node.meta.export_entries {
            let Some((scope, found)) = self.lookup(entry.token()) else {
                return Err(ModuleError::Export {
                    module: node.name().to_string(),
                    token: entry.token().clone(),
                });
            };
            let target = match scope {
                ProviderScope::Request => &mut out.per_req,
                _ => &mut out.per_mod,
            };
            match entry {
                ExportEntry::Token(_) => target.extend(found.into_iter().cloned()),
                ExportEntry::Provider(p) => target.push(p.clone()),
            }
        }
        Ok(out)
    }

    fn check_collisions(
        &self,
        module: &str,
        app_tokens: &HashSet<Token>,
        reserved_per_req: &HashSet<Token>,
    ) -> Result<(), ModuleError> {
        let own_mod: HashSet<&Token> = self.own.per_mod.iter().map(Provider::token).collect();
        let own_req: HashSet<&Token> = self.own.per_req.iter().map(Provider::token).collect();
        let imported_mod: HashSet<&Token> = self.imported.per_mod.iter().map(Provider::token).collect();

        let mut found: Vec<(ProviderScope, Token)> = Vec::new();

        for t in duplicated_tokens(&self.imported.per_mod, |t| !own_mod.contains(t)) {
            found.push((ProviderScope::Module, t));
        }
        for p in &self.imported.per_mod {
            let t = p.token();
            if app_tokens.contains(t) && !own_mod.contains(t) {
                found.push((ProviderScope::Module, t.clone()));
            }
        }

        for t in duplicated_tokens(&self.imported.per_req, |t| !own_req.contains(t)) {
            found.push((ProviderScope::Request, t));
        }
        for p in &self.imported.per_req {
            let t = p.token();
            let shadows = app_tokens.contains(t)
                || own_mod.contains(t)
                || imported_mod.contains(t)
                || reserved_per_req.contains(t);
            if shadows && !own_req.contains(t) {
                found.push((ProviderScope::Request, t.clone()));
            }
        }

        let Some(scope) = found.first().map(|(s, _)| *s) else {
            return Ok(());
        };
        let mut seen = HashSet::new();
        let tokens: Vec<Token> = found
            .into_iter()
            .filter_map(|(_, t)| seen.insert(t.clone()).then_some(t))
            .collect();
        Err(ModuleError::ProviderCollision {
            module: module.to_string(),
            scope,
            tokens,
        })
    }
}
