//! Module metadata normalization.
//!
//! Turns a [`ModuleRef`] into a [`NormalizedModule`]: forward references are
//! resolved, nested import/export lists are flattened, import parameters are
//! merged into the module's own declarations and the declaration is checked
//! for obvious configuration mistakes.

use std::sync::Arc;

use crate::errors::ModuleError;
use crate::extension::ExtensionDecl;
use crate::module::{ControllerDef, ExportItem, ImportItem, ModuleDef, ModuleRef, ModuleWithParams, RootOptions, RouteNode};
use crate::provider::Provider;
use crate::token::Token;
use crate::web::GuardItem;

const MAX_FORWARD_DEPTH: usize = 32;

/// Identity of a module reference: the address of its declaration (or of
/// its import wrapper).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleKey(usize);

/// A token-based export entry.
#[derive(Debug, Clone)]
pub enum ExportEntry {
    Token(Token),
    Provider(Provider),
}

impl ExportEntry {
    pub fn token(&self) -> &Token {
        match self {
            ExportEntry::Token(t) => t,
            ExportEntry::Provider(p) => p.token(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedModule {
    pub key: ModuleKey,
    pub name: String,
    pub root: Option<RootOptions>,
    pub imports: Vec<ModuleRef>,
    pub export_modules: Vec<ModuleRef>,
    pub export_entries: Vec<ExportEntry>,
    pub providers_per_app: Vec<Provider>,
    pub providers_per_mod: Vec<Provider>,
    pub providers_per_req: Vec<Provider>,
    pub controllers: Vec<ControllerDef>,
    pub routes: Vec<RouteNode>,
    pub extensions: Vec<ExtensionDecl>,
    /// Prefix and guards given by the import wrapper, if any.
    pub prefix: String,
    pub guards: Vec<GuardItem>,
}

impl NormalizedModule {
    pub fn is_root(&self) -> bool {
        self.root.is_some()
    }
}

/// Follows forward references until a concrete module reference is found.
pub fn resolve_forward(r: &ModuleRef) -> Result<ModuleRef, ModuleError> {
    let mut current = r.clone();
    for _ in 0..MAX_FORWARD_DEPTH {
        match current {
            ModuleRef::Forward(f) => current = (f.0)(),
            other => return Ok(other),
        }
    }
    Err(ModuleError::configuration(
        r.name(),
        format!("forward reference did not resolve to a module after {MAX_FORWARD_DEPTH} steps"),
    ))
}

pub fn module_key(r: &ModuleRef) -> Result<ModuleKey, ModuleError> {
    Ok(match resolve_forward(r)? {
        ModuleRef::Module(def) => ModuleKey(Arc::as_ptr(&def) as *const () as usize),
        ModuleRef::WithParams(p) => ModuleKey(Arc::as_ptr(&p) as *const () as usize),
        ModuleRef::Forward(f) => ModuleKey(Arc::as_ptr(&f.0) as *const () as usize),
    })
}

fn unwrap_params(r: &ModuleRef) -> Result<(Arc<ModuleDef>, Option<Arc<ModuleWithParams>>), ModuleError> {
    match resolve_forward(r)? {
        ModuleRef::Module(def) => Ok((def, None)),
        ModuleRef::WithParams(params) => match resolve_forward(&params.module)? {
            ModuleRef::Module(def) => Ok((def, Some(params))),
            inner => Err(ModuleError::configuration(
                inner.name(),
                "a module with params cannot wrap another module with params",
            )),
        },
        forward @ ModuleRef::Forward(_) => Err(ModuleError::configuration(
            forward.name(),
            "forward reference did not resolve to a module",
        )),
    }
}

pub fn normalize(r: &ModuleRef) -> Result<NormalizedModule, ModuleError> {
    let key = module_key(r)?;
    let (def, params) = unwrap_params(r)?;

    if def.name.trim().is_empty() {
        return Err(ModuleError::configuration("<unnamed>", "module name must not be empty"));
    }
    if !def.errors.is_empty() {
        return Err(ModuleError::configuration(&def.name, def.errors.join("; ")));
    }

    let mut imports = Vec::new();
    flatten_imports(&def.imports, &mut imports)?;

    let mut export_modules = Vec::new();
    let mut export_entries = Vec::new();
    flatten_exports(&def.exports, &mut export_modules, &mut export_entries)?;

    let mut providers_per_app = def.providers_per_app.clone();
    let mut providers_per_mod = def.providers_per_mod.clone();
    let mut providers_per_req = def.providers_per_req.clone();
    let (prefix, guards) = match &params {
        Some(p) => {
            providers_per_app.extend(p.providers_per_app.iter().cloned());
            providers_per_mod.extend(p.providers_per_mod.iter().cloned());
            providers_per_req.extend(p.providers_per_req.iter().cloned());
            (p.prefix.clone(), p.guards.clone())
        }
        None => (String::new(), Vec::new()),
    };

    if prefix.starts_with('/') {
        return Err(ModuleError::configuration(
            &def.name,
            format!("prefix '{prefix}' cannot start with a slash"),
        ));
    }

    Ok(NormalizedModule {
        key,
        name: def.name.clone(),
        root: def.root.clone(),
        imports,
        export_modules,
        export_entries,
        providers_per_app,
        providers_per_mod,
        providers_per_req,
        controllers: def.controllers.clone(),
        routes: def.routes.clone(),
        extensions: def.extensions.clone(),
        prefix,
        guards,
    })
}

fn flatten_imports(items: &[ImportItem], out: &mut Vec<ModuleRef>) -> Result<(), ModuleError> {
    for item in items {
        match item {
            ImportItem::Module(m) => out.push(resolve_forward(m)?),
            ImportItem::Nested(list) => flatten_imports(list, out)?,
        }
    }
    Ok(())
}

fn flatten_exports(
    items: &[ExportItem],
    modules: &mut Vec<ModuleRef>,
    entries: &mut Vec<ExportEntry>,
) -> Result<(), ModuleError> {
    for item in items {
        match item {
            ExportItem::Module(m) => modules.push(resolve_forward(m)?),
            ExportItem::Token(t) => entries.push(ExportEntry::Token(t.clone())),
            ExportItem::Provider(p) => entries.push(ExportEntry::Provider(p.clone())),
            ExportItem::Nested(list) => flatten_exports(list, modules, entries)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use super::*;
    use crate::module::ModuleDef;

    static LEAF: LazyLock<ModuleRef> = LazyLock::new(|| ModuleDef::builder("Leaf").build());

    #[test]
    fn forward_refs_resolve_to_the_same_identity() {
        let fwd = ModuleRef::forward(|| LEAF.clone());
        assert_eq!(module_key(&fwd).unwrap(), module_key(&LEAF).unwrap());
    }

    #[test]
    fn nested_lists_are_flattened() {
        let a = ModuleDef::builder("A").build();
        let b = ModuleDef::builder("B").build();
        let m = ModuleDef::builder("M")
            .import(vec![ImportItem::from(&a), vec![ImportItem::from(&b)].into()])
            .export(vec![ExportItem::from(&a), ExportItem::of::<String>()])
            .build();

        let n = normalize(&m).unwrap();
        let names: Vec<String> = n.imports.iter().map(ModuleRef::name).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(n.export_modules.len(), 1);
        assert_eq!(n.export_entries.len(), 1);
    }

    #[test]
    fn params_contribute_prefix_guards_and_providers() {
        let base = ModuleDef::builder("Base")
            .providers_per_mod([Provider::use_value("A", 1u8)])
            .build();
        let wrapped = base
            .with_params()
            .prefix("one")
            .providers_per_mod([Provider::use_value("B", 2u8)])
            .build();

        let n = normalize(&wrapped).unwrap();
        assert_eq!(n.prefix, "one");
        assert_eq!(n.providers_per_mod.len(), 2);
        assert_ne!(n.key, module_key(&base).unwrap());
    }

    #[test]
    fn params_cannot_wrap_params() {
        let base = ModuleDef::builder("Base").build();
        let twice = base.with_params().build().with_params().build();
        assert!(matches!(normalize(&twice), Err(ModuleError::Configuration { .. })));
    }

    #[test]
    fn prefix_with_leading_slash_is_rejected() {
        let base = ModuleDef::builder("Base").build();
        let wrapped = base.with_params().prefix("/one").build();
        let err = normalize(&wrapped).unwrap_err();
        assert!(err.to_string().contains("cannot start with a slash"));
    }

    #[test]
    fn runaway_forward_refs_are_reported() {
        fn again() -> ModuleRef {
            ModuleRef::forward(again)
        }
        assert!(matches!(normalize(&again()), Err(ModuleError::Configuration { .. })));
    }
}
