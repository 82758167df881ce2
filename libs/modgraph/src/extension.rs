//! Bootstrap-time extensions.
//!
//! Modules contribute extensions to named groups (multi providers per app).
//! Once every module is resolved, the [`ExtensionsManager`] initializes each
//! declared group in turn. An extension may await another group through the
//! manager; a group is initialized at most once and its aggregate result is
//! cached for later awaits.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::defaults::AppMetadata;
use crate::injector::{Injector, ProviderTable};
use crate::provider::{Injectable, Provider};
use crate::resolver::ResolvedModule;
use crate::token::{InjectionToken, Token};

#[async_trait]
pub trait Extension<T>: Send + Sync {
    /// Must be idempotent: a second call returns the first result without
    /// redoing the work (see [`InitOnce`]).
    async fn init(&self, ext: &ExtensionsManager) -> anyhow::Result<T>;
}

/// Named extension group producing one `T` per registered extension.
pub struct ExtensionGroup<T> {
    token: InjectionToken<dyn Extension<T>>,
}

impl<T: Send + Sync + 'static> ExtensionGroup<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            token: InjectionToken::new(name),
        }
    }

    pub fn token(&self) -> Token {
        self.token.token()
    }

    pub fn name(&self) -> &'static str {
        self.token.name()
    }

    /// Declares extension `E` as a member of this group.
    pub fn provider<E>(&'static self) -> ExtensionDecl
    where
        E: Extension<T> + Injectable,
    {
        let provider = Provider::use_class_as::<dyn Extension<T>, E>(self.token(), |e| e).multi();
        ExtensionDecl {
            group: ExtensionGroupRef(Arc::new(TypedGroup(self))),
            provider,
        }
    }
}

impl<T> fmt::Debug for ExtensionGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtensionGroup({})", self.token.name())
    }
}

/// Module-level extension declaration: the group to initialize and the
/// per-app multi provider registering the extension.
#[derive(Clone, Debug)]
pub struct ExtensionDecl {
    pub(crate) group: ExtensionGroupRef,
    pub(crate) provider: Provider,
}

impl ExtensionDecl {
    pub fn group(&self) -> &ExtensionGroupRef {
        &self.group
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }
}

impl From<ExtensionDecl> for Provider {
    fn from(value: ExtensionDecl) -> Self {
        value.provider
    }
}

trait GroupRunner: Send + Sync {
    fn token(&self) -> Token;
    fn name(&self) -> &'static str;
    fn run<'a>(&'a self, ext: &'a ExtensionsManager) -> BoxFuture<'a, anyhow::Result<()>>;
}

struct TypedGroup<T: 'static>(&'static ExtensionGroup<T>);

impl<T: Send + Sync + 'static> GroupRunner for TypedGroup<T> {
    fn token(&self) -> Token {
        self.0.token()
    }

    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn run<'a>(&'a self, ext: &'a ExtensionsManager) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move { ext.init(self.0).await.map(|_| ()) })
    }
}

/// Type-erased handle to a declared group.
#[derive(Clone)]
pub struct ExtensionGroupRef(Arc<dyn GroupRunner>);

impl ExtensionGroupRef {
    pub fn token(&self) -> Token {
        self.0.token()
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub(crate) async fn run(&self, ext: &ExtensionsManager) -> anyhow::Result<()> {
        self.0.run(ext).await
    }
}

impl fmt::Debug for ExtensionGroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtensionGroupRef({})", self.name())
    }
}

/// A resolved module with its injectors, as seen by extensions and the
/// request pipeline.
pub struct ModuleScope {
    pub resolved: Arc<ResolvedModule>,
    pub injector: Arc<Injector>,
    pub per_req: Arc<ProviderTable>,
}

impl ModuleScope {
    pub fn name(&self) -> &str {
        &self.resolved.name
    }
}

impl fmt::Debug for ModuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleScope")
            .field("name", &self.resolved.name)
            .field("prefix", &self.resolved.prefix)
            .finish_non_exhaustive()
    }
}

/// Runs extension groups against the collected module map.
pub struct ExtensionsManager {
    injector: Arc<Injector>,
    app: Arc<AppMetadata>,
    modules: Vec<Arc<ModuleScope>>,
    results: Mutex<HashMap<Token, Arc<dyn Any + Send + Sync>>>,
    in_progress: Mutex<Vec<(Token, &'static str)>>,
}

impl ExtensionsManager {
    pub fn new(injector: Arc<Injector>, app: Arc<AppMetadata>, modules: Vec<Arc<ModuleScope>>) -> Self {
        Self {
            injector,
            app,
            modules,
            results: Mutex::new(HashMap::new()),
            in_progress: Mutex::new(Vec::new()),
        }
    }

    pub fn injector(&self) -> &Arc<Injector> {
        &self.injector
    }

    pub fn app_metadata(&self) -> &AppMetadata {
        &self.app
    }

    /// Every resolved module, children before parents.
    pub fn modules(&self) -> &[Arc<ModuleScope>] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&Arc<ModuleScope>> {
        self.modules.iter().find(|m| m.name() == name)
    }

    /// Initializes `group` (once) and returns the results of its extensions
    /// in registration order.
    pub async fn init<T: Send + Sync + 'static>(&self, group: &ExtensionGroup<T>) -> anyhow::Result<Arc<Vec<T>>> {
        let token = group.token();
        if let Some(done) = self.cached::<T>(&token) {
            return Ok(done);
        }

        {
            let mut busy = self.in_progress.lock();
            if busy.iter().any(|(t, _)| *t == token) {
                let chain: Vec<&str> = busy.iter().map(|(_, n)| *n).chain([group.name()]).collect();
                anyhow::bail!("extension group awaits itself: {}", chain.join(" -> "));
            }
            busy.push((token.clone(), group.name()));
        }

        let outcome = self.run_group(group).await;
        self.in_progress.lock().retain(|(t, _)| *t != token);

        let values = Arc::new(outcome?);
        self.results
            .lock()
            .insert(token, Arc::clone(&values) as Arc<dyn Any + Send + Sync>);
        Ok(values)
    }

    fn cached<T: Send + Sync + 'static>(&self, token: &Token) -> Option<Arc<Vec<T>>> {
        let hit = self.results.lock().get(token).cloned()?;
        hit.downcast::<Vec<T>>().ok()
    }

    async fn run_group<T: Send + Sync + 'static>(&self, group: &ExtensionGroup<T>) -> anyhow::Result<Vec<T>> {
        let extensions = self.injector.get_all::<dyn Extension<T>>(&group.token())?;
        tracing::debug!(group = group.name(), count = extensions.len(), "initializing extension group");

        let mut out = Vec::with_capacity(extensions.len());
        for ext in extensions {
            out.push(ext.init(self).await?);
        }
        Ok(out)
    }
}

/// "Already initialized" guard for [`Extension::init`] implementations.
pub struct InitOnce<T> {
    cell: OnceCell<T>,
}

impl<T> Default for InitOnce<T> {
    fn default() -> Self {
        Self { cell: OnceCell::new() }
    }
}

impl<T: Clone> InitOnce<T> {
    pub async fn get_or_try_init<F, Fut>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.cell.get_or_try_init(f).await.cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::LazyLock;

    use super::*;
    use crate::errors::DiResult;
    use crate::injector::Resolver;

    static CALLS: AtomicUsize = AtomicUsize::new(0);
    static NUMBERS: LazyLock<ExtensionGroup<u32>> = LazyLock::new(|| ExtensionGroup::new("NUMBERS"));
    static DOUBLED: LazyLock<ExtensionGroup<u32>> = LazyLock::new(|| ExtensionGroup::new("DOUBLED"));
    static SELFISH: LazyLock<ExtensionGroup<u32>> = LazyLock::new(|| ExtensionGroup::new("SELFISH"));

    #[derive(Default)]
    struct Seven {
        once: InitOnce<u32>,
    }

    impl Injectable for Seven {
        fn construct(_: &mut Resolver<'_>) -> DiResult<Self> {
            Ok(Self::default())
        }
    }

    #[async_trait]
    impl Extension<u32> for Seven {
        async fn init(&self, _: &ExtensionsManager) -> anyhow::Result<u32> {
            self.once
                .get_or_try_init(|| async {
                    CALLS.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
        }
    }

    struct Doubler;

    impl Injectable for Doubler {
        fn construct(_: &mut Resolver<'_>) -> DiResult<Self> {
            Ok(Doubler)
        }
    }

    #[async_trait]
    impl Extension<u32> for Doubler {
        async fn init(&self, ext: &ExtensionsManager) -> anyhow::Result<u32> {
            let numbers = ext.init(&*NUMBERS).await?;
            Ok(numbers.iter().sum::<u32>() * 2)
        }
    }

    struct Selfish;

    impl Injectable for Selfish {
        fn construct(_: &mut Resolver<'_>) -> DiResult<Self> {
            Ok(Selfish)
        }
    }

    #[async_trait]
    impl Extension<u32> for Selfish {
        async fn init(&self, ext: &ExtensionsManager) -> anyhow::Result<u32> {
            Ok(ext.init(&*SELFISH).await?.len() as u32)
        }
    }

    fn manager(decls: &[ExtensionDecl]) -> ExtensionsManager {
        let providers: Vec<Provider> = decls.iter().map(|d| d.provider().clone()).collect();
        let injector = Injector::root("test", &providers).unwrap();
        ExtensionsManager::new(injector, Arc::new(AppMetadata::default()), Vec::new())
    }

    #[tokio::test]
    async fn dependent_group_awaits_the_other_and_results_are_cached() {
        let mgr = manager(&[NUMBERS.provider::<Seven>(), DOUBLED.provider::<Doubler>()]);

        let doubled = mgr.init(&*DOUBLED).await.unwrap();
        assert_eq!(*doubled, vec![14]);

        let before = CALLS.load(Ordering::SeqCst);
        let numbers = mgr.init(&*NUMBERS).await.unwrap();
        assert_eq!(*numbers, vec![7]);
        assert_eq!(CALLS.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn group_awaiting_itself_fails() {
        let mgr = manager(&[SELFISH.provider::<Selfish>()]);
        let err = mgr.init(&*SELFISH).await.unwrap_err();
        assert!(err.to_string().contains("SELFISH -> SELFISH"), "{err}");
    }

    #[tokio::test]
    async fn group_without_members_yields_empty_results() {
        let mgr = manager(&[]);
        assert!(mgr.init(&*NUMBERS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn init_once_runs_the_initializer_a_single_time() {
        let once = InitOnce::<u32>::default();
        let a = once.get_or_try_init(|| async { Ok(1) }).await.unwrap();
        let b = once.get_or_try_init(|| async { Ok(2) }).await.unwrap();
        assert_eq!((a, b), (1, 1));
        assert!(once.is_initialized());
    }
}
