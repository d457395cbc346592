//! # Store
//!
//! The [`Store`] is the single entry point for reading and writing tiddlers.
//! It owns two tiers of local state and talks to a [`Remote`] for everything
//! else.
//!
//! ## Tiers
//!
//! | Tier       | Holds                               | `last_sync` |
//! |------------|-------------------------------------|-------------|
//! | `synced`   | the last copy confirmed by the server | always set |
//! | `modified` | local edits not yet saved            | never set   |
//!
//! Reads prefer `modified`, then `synced`. Only `modified` is mirrored to the
//! [`cache::DurableCache`], so pending edits survive a restart
//! ([`Store::retrieve_cached`]).
//!
//! ## Saving
//!
//! A save sends the pending copy and then looks at `modified` again when the
//! server answers, since other edits may have landed in the meantime:
//!
//! - success, and the pending copy is unchanged: it is dropped from
//!   `modified`; the server's copy always goes to `synced`
//! - failure: the attempted copy goes back into `modified` only if nothing
//!   newer has replaced it
//!
//! A failed save never clobbers a concurrent edit and never loses one.
//!
//! ## Concurrency
//!
//! The store is single-threaded. `Store` is a cheap `Rc` handle, and async
//! operations only suspend on remote calls. Tasks that hold a store must run
//! on a `tokio::task::LocalSet`.

pub mod cache;
pub mod local;
pub mod reconcile;

use std::cell::RefCell;
use std::ops::ControlFlow;
use std::rc::Rc;
use tracing::{debug, warn};

use crate::collection::Collection;
use crate::config::StoreConfig;
use crate::defaults::{Defaults, Resolver};
use crate::error::{ParseError, Result, StoreError};
use crate::events::{Change, EventHub, EventKind, Listener};
use crate::filter::Predicate;
use crate::model::{Container, Tiddler, TiddlerRef};
use crate::refresh::{RefreshController, Source};
use crate::remote::Remote;
use cache::{DurableCache, FileCache, NoCache};
use local::{LocalStore, Tier};

/// Options for [`Store::get`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Ask the server for a rendered copy (`render=1`).
    pub render: bool,
    /// Skip a pending local edit and go to the server.
    pub from_server: bool,
}

impl GetOptions {
    pub fn fresh() -> Self {
        Self {
            from_server: true,
            ..Self::default()
        }
    }

    pub fn rendered(mut self) -> Self {
        self.render = true;
        self
    }
}

struct StoreInner {
    config: StoreConfig,
    remote: Rc<dyn Remote>,
    synced: LocalStore,
    modified: LocalStore,
    cache: Rc<dyn DurableCache>,
    events: EventHub,
    defaults: Resolver,
    containers: RefreshController,
    current_location: RefCell<Option<Container>>,
}

/// What the tiers know about one reference.
struct Lookup {
    title: String,
    raw: Option<Tiddler>,
    modified: Option<Tiddler>,
    synced: Option<Tiddler>,
}

impl Lookup {
    fn best(&self) -> Option<Tiddler> {
        self.modified
            .clone()
            .or_else(|| self.synced.clone())
            .or_else(|| self.raw.clone())
    }
}

pub struct StoreBuilder {
    remote: Rc<dyn Remote>,
    config: StoreConfig,
    cache: Option<Rc<dyn DurableCache>>,
    defaults: Option<Defaults>,
}

impl StoreBuilder {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Mirror pending edits into `cache` instead of the configured one.
    pub fn cache(mut self, cache: Rc<dyn DurableCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fix the default containers, skipping discovery.
    pub fn defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Build the store, loading cached pending edits if configured. Like
    /// [`Store::new`], this does not start discovery.
    pub fn build(self) -> Result<Store> {
        let defaults = match self.defaults {
            Some(defaults) => Some(defaults),
            None => self.config.explicit_defaults()?,
        };
        let resolver = match defaults {
            Some(defaults) => Resolver::fixed(defaults),
            None => Resolver::new(self.config.host.clone()),
        };
        let cache: Rc<dyn DurableCache> = match (self.cache, &self.config.cache_dir) {
            (Some(cache), _) => cache,
            (None, Some(dir)) => Rc::new(FileCache::new(dir)),
            (None, None) => Rc::new(NoCache),
        };

        let store = Store {
            inner: Rc::new(StoreInner {
                remote: self.remote,
                synced: LocalStore::new(Tier::Synced),
                modified: LocalStore::new(Tier::Modified).with_cache(Rc::clone(&cache)),
                cache,
                events: EventHub::new(),
                defaults: resolver,
                containers: RefreshController::new(),
                current_location: RefCell::new(None),
                config: self.config,
            }),
        };
        if store.inner.config.load_cached {
            store.retrieve_cached();
        }
        Ok(store)
    }
}

/// Handle to a tiddler store. Clones share the same state.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Store {
    pub fn builder(remote: Rc<dyn Remote>) -> StoreBuilder {
        StoreBuilder {
            remote,
            config: StoreConfig::default(),
            cache: None,
            defaults: None,
        }
    }

    /// A store with default configuration and no cache.
    ///
    /// Construction does not start discovery of the default containers: it
    /// runs on first need, or call [`Store::spawn_discovery`] from inside a
    /// `LocalSet` to start it straight away.
    pub fn new(remote: Rc<dyn Remote>) -> Self {
        Store {
            inner: Rc::new(StoreInner {
                remote,
                synced: LocalStore::new(Tier::Synced),
                modified: LocalStore::new(Tier::Modified),
                cache: Rc::new(NoCache),
                events: EventHub::new(),
                defaults: Resolver::new("/"),
                containers: RefreshController::new(),
                current_location: RefCell::new(None),
                config: StoreConfig::default(),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Start resolving the default containers in the background.
    ///
    /// Must be called from within a `LocalSet`.
    pub fn spawn_discovery(&self) -> tokio::task::JoinHandle<Result<Defaults>> {
        let store = self.clone();
        tokio::task::spawn_local(async move { store.get_defaults().await })
    }

    // --- Queries ---

    /// Every tiddler, pending edits first. A title present in both tiers
    /// appears twice; see [`Collection::unique`].
    pub fn all(&self) -> Collection {
        let mut tiddlers = Vec::new();
        let _ = self.each(|t| {
            tiddlers.push(t);
            ControlFlow::Continue(())
        });
        self.collection(tiddlers)
    }

    /// Every tiddler matching a filter expression.
    pub fn query(&self, filter: &str) -> std::result::Result<Collection, ParseError> {
        self.all().find(filter)
    }

    /// Every tiddler narrowed by a named collection operation.
    pub fn find_by(&self, name: &str, arg: Option<&str>) -> Collection {
        self.all().find_by(name, arg)
    }

    pub fn collection(&self, tiddlers: Vec<Tiddler>) -> Collection {
        Collection::new(self.clone(), tiddlers)
    }

    /// Visit the modified tier, then the synced tier.
    pub fn each<F>(&self, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(Tiddler) -> ControlFlow<()>,
    {
        self.inner.modified.each(&mut visit)?;
        self.inner.synced.each(&mut visit)
    }

    /// Pending local edits.
    pub fn pending(&self) -> Vec<Tiddler> {
        self.inner.modified.snapshot()
    }

    fn lookup(&self, target: &TiddlerRef) -> Lookup {
        let wanted = target.as_tiddler();
        Lookup {
            title: target.title().to_string(),
            raw: target.document().cloned(),
            modified: self.inner.modified.get(&wanted),
            synced: self.inner.synced.get(&wanted),
        }
    }

    /// The pending copy of `tiddler`, found by key or else by title.
    fn modified_copy(&self, tiddler: &Tiddler) -> Option<Tiddler> {
        self.inner
            .modified
            .get(tiddler)
            .or_else(|| self.inner.modified.get(&Tiddler::new(tiddler.title.clone())))
    }

    // --- Reading ---

    /// The best local copy: pending edit, then synced copy, then the
    /// document passed in.
    pub fn get_local(&self, target: impl Into<TiddlerRef>) -> Option<Tiddler> {
        self.lookup(&target.into()).best()
    }

    /// Fetch a tiddler from the server and reconcile it into the synced tier.
    ///
    /// A pending edit is returned as is unless `from_server` is set.
    pub async fn get(&self, target: impl Into<TiddlerRef>, options: GetOptions) -> Result<Tiddler> {
        let found = self.lookup(&target.into());
        if !options.from_server {
            if let Some(pending) = found.modified.clone() {
                return Ok(pending);
            }
        }

        let known = if options.from_server && found.modified.is_none() {
            found.synced.clone()
        } else {
            found.best()
        };
        let wanted = match known {
            Some(tiddler) if tiddler.has_container() => tiddler,
            _ => {
                let defaults = self.get_defaults().await?;
                Tiddler::in_container(found.title.clone(), defaults.pull_from)
            }
        };

        let fetched = self
            .inner
            .remote
            .get_tiddler(&wanted, options.render)
            .await
            .map_err(|source| {
                warn!(title = %found.title, error = %source, "fetch failed");
                StoreError::GetTiddler {
                    title: found.title.clone(),
                    source,
                }
            })?;
        Ok(reconcile::replace(&self.inner.synced, &self.inner.events, &fetched).stored)
    }

    // --- Writing ---

    /// Record a local edit.
    ///
    /// A tiddler without a bag is stored as is, then placed in the default
    /// push container once that is known.
    pub async fn add(&self, tiddler: Tiddler) -> Result<Tiddler> {
        let stored = self.replace_modified(&tiddler);
        if tiddler.bag.is_some() {
            return Ok(stored);
        }

        let defaults = self.get_defaults().await?;
        let mut placed = tiddler;
        placed.place_in(defaults.push_to);
        Ok(self.replace_modified(&placed))
    }

    fn replace_modified(&self, tiddler: &Tiddler) -> Tiddler {
        reconcile::replace(&self.inner.modified, &self.inner.events, tiddler).stored
    }

    /// Save one tiddler to the server.
    ///
    /// Fails with `Empty` when the title is only known as a synced copy
    /// and `NotFound` when it is not known at all.
    pub async fn save(&self, target: impl Into<TiddlerRef>) -> Result<Tiddler> {
        let found = self.lookup(&target.into());
        match (found.raw, found.modified) {
            (Some(tiddler), _) | (None, Some(tiddler)) => self.save_tiddler(tiddler).await,
            (None, None) if found.synced.is_some() => Err(StoreError::Empty),
            (None, None) => Err(StoreError::NotFound(found.title)),
        }
    }

    /// Save every pending edit, one after another.
    ///
    /// Each tiddler gets its own result. `Empty` means nothing was pending.
    pub async fn save_all(&self) -> Result<Vec<Result<Tiddler>>> {
        let pending = self.inner.modified.snapshot();
        if pending.is_empty() {
            return Err(StoreError::Empty);
        }
        let mut results = Vec::with_capacity(pending.len());
        for tiddler in pending {
            results.push(self.save_tiddler(tiddler).await);
        }
        Ok(results)
    }

    async fn save_tiddler(&self, mut tiddler: Tiddler) -> Result<Tiddler> {
        if !tiddler.has_container() {
            let defaults = self.get_defaults().await?;
            tiddler.place_in(defaults.push_to);
        }
        let pre_save = self.modified_copy(&tiddler);

        match self.inner.remote.put_tiddler(&tiddler).await {
            Ok(response) => {
                let current = self.modified_copy(&tiddler);
                if let Some(current) = current.filter(|c| Some(c) == pre_save.as_ref()) {
                    self.inner.modified.remove(&current);
                }
                debug!(title = %response.title, revision = ?response.revision, "saved");
                Ok(reconcile::replace(&self.inner.synced, &self.inner.events, &response).stored)
            }
            Err(source) => {
                warn!(title = %tiddler.title, error = %source, "save failed");
                let current = self.modified_copy(&tiddler);
                let restore = match &current {
                    None => true,
                    Some(current) => {
                        pre_save.as_ref() != Some(&tiddler) && pre_save.as_ref() == Some(current)
                    }
                };
                if restore {
                    self.replace_modified(&tiddler);
                }
                Err(StoreError::Save {
                    title: tiddler.title,
                    source,
                })
            }
        }
    }

    /// Drop a pending edit. The synced copy, if any, is untouched.
    pub fn remove(&self, target: impl Into<TiddlerRef>) -> Option<Tiddler> {
        let pending = self.lookup(&target.into()).modified?;
        self.inner.modified.remove(&pending);
        self.inner.events.trigger(
            EventKind::Tiddler,
            Some(&pending.title),
            &Change::Deleted(pending.clone()),
        );
        Some(pending)
    }

    /// Delete a tiddler on the server and forget it locally.
    ///
    /// A tiddler that only exists as a pending edit is just forgotten.
    pub async fn destroy(&self, target: impl Into<TiddlerRef>) -> Result<Tiddler> {
        let found = self.lookup(&target.into());
        let doomed = match (found.synced, found.modified) {
            (Some(synced), _) if synced.has_container() => {
                self.inner
                    .remote
                    .delete_tiddler(&synced)
                    .await
                    .map_err(|source| {
                        warn!(title = %synced.title, error = %source, "delete failed");
                        StoreError::Delete {
                            title: synced.title.clone(),
                            source,
                        }
                    })?;
                synced
            }
            (_, Some(pending)) => pending,
            (Some(_), None) | (None, None) => return Err(StoreError::NotFound(found.title)),
        };

        self.inner.synced.remove(&doomed);
        if let Some(pending) = self.modified_copy(&doomed) {
            self.inner.modified.remove(&pending);
        }
        self.inner.events.trigger(
            EventKind::Tiddler,
            Some(&doomed.title),
            &Change::Deleted(doomed.clone()),
        );
        Ok(doomed)
    }

    /// Re-import cached pending edits into the modified tier.
    pub fn retrieve_cached(&self) -> usize {
        let cached = self.inner.cache.list();
        for tiddler in &cached {
            self.replace_modified(tiddler);
        }
        if !cached.is_empty() {
            debug!(count = cached.len(), "restored pending edits from cache");
        }
        cached.len()
    }

    // --- Server state ---

    /// Resolve the default containers, discovering them if needed.
    ///
    /// The first resolution also makes `pull_from` the current location and
    /// registers it for [`Store::refresh`].
    pub async fn get_defaults(&self) -> Result<Defaults> {
        let defaults = self.inner.defaults.resolve(self.inner.remote.as_ref()).await?;
        let moved = {
            let mut location = self.inner.current_location.borrow_mut();
            if location.as_ref() == Some(&defaults.pull_from) {
                false
            } else {
                *location = Some(defaults.pull_from.clone());
                true
            }
        };
        if moved {
            let pull_from = &defaults.pull_from;
            self.inner.containers.register(Source::Container(pull_from.clone()));
            let kind = if pull_from.is_recipe() {
                EventKind::Recipe
            } else {
                EventKind::Bag
            };
            self.inner
                .events
                .trigger(kind, Some(&pull_from.name), &Change::Container(pull_from.clone()));
        }
        Ok(defaults)
    }

    /// The default containers, if already resolved.
    pub fn defaults(&self) -> Option<Defaults> {
        self.inner.defaults.resolved()
    }

    /// The container the store reads from, once known.
    pub fn current_location(&self) -> Option<Container> {
        self.inner.current_location.borrow().clone()
    }

    /// Re-fetch every registered listing into the synced tier.
    pub async fn refresh(&self) -> Result<Collection> {
        self.get_defaults().await?;
        let tiddlers = self
            .inner
            .containers
            .refresh_all(self.inner.remote.as_ref(), &self.inner.synced, &self.inner.events)
            .await?;
        Ok(self.collection(tiddlers))
    }

    /// Search the server. The search is remembered and re-run by later
    /// refreshes.
    pub async fn search(&self, query: &str) -> Result<Collection> {
        let defaults = self.get_defaults().await?;
        let source = Source::search(query, defaults.pull_from.host.clone());
        self.inner.containers.register(source.clone());
        let tiddlers = self
            .inner
            .containers
            .refresh_source(
                &source,
                self.inner.remote.as_ref(),
                &self.inner.synced,
                &self.inner.events,
            )
            .await?;
        Ok(self.collection(tiddlers))
    }

    // --- Events ---

    pub fn bind(&self, kind: EventKind, name: Option<&str>, listener: Listener) {
        self.inner.events.bind(kind, name, listener);
    }

    pub fn bind_filter(&self, predicate: Predicate, listener: Listener) {
        self.inner.events.bind_filter(predicate, listener);
    }

    pub fn unbind(&self, kind: EventKind, name: Option<&str>, listener: Option<&Listener>) {
        self.inner.events.unbind(kind, name, listener);
    }

    pub fn unbind_filter(&self, predicate: &Predicate) {
        self.inner.events.unbind_filter(predicate);
    }

    pub fn trigger(&self, kind: EventKind, name: Option<&str>, change: &Change) {
        self.inner.events.trigger(kind, name, change);
    }
}
