//! # Refresh
//!
//! Keeps the synced tier in step with the server. Each registered [`Source`]
//! (a container listing, or a search) is fetched and every returned tiddler
//! reconciled into the synced tier.
//!
//! For container sources the controller then looks for tiddlers that have
//! gone away: synced entries missing from the fresh listing. For a bag only
//! that bag's entries are considered, and a miss is conclusive. A recipe can
//! reach any bag, including ones a saved or directly fetched tiddler never
//! recorded the recipe for, so every synced entry is a candidate. A recipe
//! listing can also omit tiddlers the client may still read (per-bag
//! permissions), so each candidate is fetched directly and only removed if
//! that fetch fails too.
//!
//! Search listings are partial by nature and never remove anything.

use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashSet;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::events::{Change, EventHub, EventKind};
use crate::model::{Container, Tiddler};
use crate::remote::Remote;
use crate::store::local::LocalStore;
use crate::store::reconcile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Container(Container),
    Search { query: String, host: String },
}

impl Source {
    pub fn search(query: impl Into<String>, host: impl Into<String>) -> Self {
        Source::Search {
            query: query.into(),
            host: host.into(),
        }
    }

    /// Stable key identifying this listing.
    pub fn route(&self) -> String {
        match self {
            Source::Container(container) => container.route(),
            Source::Search { query, host } => {
                format!("{}/search?q={}", host.trim_end_matches('/'), query)
            }
        }
    }
}

impl From<Container> for Source {
    fn from(container: Container) -> Self {
        Source::Container(container)
    }
}

/// Whether a synced tiddler missing from `container`'s listing may have been
/// deleted on the server.
fn may_be_deleted(container: &Container, tiddler: &Tiddler) -> bool {
    container.is_recipe() || tiddler.bag_name() == Some(container.name.as_str())
}

#[derive(Default)]
pub struct RefreshController {
    sources: RefCell<IndexMap<String, Source>>,
}

impl RefreshController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a source for later refreshes. Re-registering is a no-op.
    pub fn register(&self, source: Source) {
        self.sources.borrow_mut().insert(source.route(), source);
    }

    pub fn sources(&self) -> Vec<Source> {
        self.sources.borrow().values().cloned().collect()
    }

    /// Refresh every registered source in registration order, stopping at
    /// the first failure.
    pub async fn refresh_all(
        &self,
        remote: &dyn Remote,
        synced: &LocalStore,
        events: &EventHub,
    ) -> Result<Vec<Tiddler>> {
        let mut refreshed = Vec::new();
        for source in self.sources() {
            refreshed.extend(self.refresh_source(&source, remote, synced, events).await?);
        }
        Ok(refreshed)
    }

    /// Fetch one listing and reconcile it into `synced`, returning the
    /// tiddlers as stored.
    pub async fn refresh_source(
        &self,
        source: &Source,
        remote: &dyn Remote,
        synced: &LocalStore,
        events: &EventHub,
    ) -> Result<Vec<Tiddler>> {
        let listed = match source {
            Source::Container(container) => remote
                .list_tiddlers(container)
                .await
                .map_err(|source| StoreError::RetrieveTiddlers { source })?,
            Source::Search { query, .. } => remote
                .search(query)
                .await
                .map_err(|source| StoreError::Search { source })?,
        };

        let stored: Vec<Tiddler> = listed
            .iter()
            .map(|tiddler| reconcile::replace(synced, events, tiddler).stored)
            .collect();
        debug!(route = %source.route(), count = stored.len(), "refreshed");

        if let Source::Container(container) = source {
            remove_deleted(container, &listed, remote, synced, events).await;
        }
        Ok(stored)
    }
}

async fn remove_deleted(
    container: &Container,
    listed: &[Tiddler],
    remote: &dyn Remote,
    synced: &LocalStore,
    events: &EventHub,
) {
    let present: HashSet<(Option<&str>, &str)> = listed
        .iter()
        .map(|t| (t.bag_name(), t.title.as_str()))
        .collect();
    let candidates: Vec<Tiddler> = synced
        .snapshot()
        .into_iter()
        .filter(|t| may_be_deleted(container, t))
        .filter(|t| !present.contains(&(t.bag_name(), t.title.as_str())))
        .collect();

    for candidate in candidates {
        if container.is_recipe() && remote.get_tiddler(&candidate, false).await.is_ok() {
            continue;
        }
        if synced.remove(&candidate).is_some() {
            debug!(title = %candidate.title, container = %container, "deleted on server");
            events.trigger(
                EventKind::Tiddler,
                Some(&candidate.title),
                &Change::Deleted(candidate.clone()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemRemote, Op};
    use crate::store::local::Tier;

    #[test]
    fn routes() {
        assert_eq!(Source::from(Container::bag("b")).route(), "/bags/b");
        assert_eq!(Source::search("cats", "/").route(), "/search?q=cats");
    }

    #[test]
    fn registering_twice_keeps_one_entry() {
        let controller = RefreshController::new();
        controller.register(Container::recipe("r").into());
        controller.register(Source::search("q", "/"));
        controller.register(Container::recipe("r").into());
        assert_eq!(controller.sources().len(), 2);
    }

    #[test]
    fn deletion_candidates() {
        let recipe = Container::recipe("foo_public");
        assert!(may_be_deleted(&recipe, &Tiddler::new("B").with_bag("system")));
        assert!(may_be_deleted(&recipe, &Tiddler::new("C").with_bag("other")));
        assert!(may_be_deleted(&Container::bag("other"), &Tiddler::new("C").with_bag("other")));
        assert!(!may_be_deleted(&Container::bag("other"), &Tiddler::new("C").with_bag("mine")));
        assert!(!may_be_deleted(&Container::bag("other"), &Tiddler::new("C")));
    }

    #[tokio::test]
    async fn recipe_refresh_drops_tiddler_known_only_by_bag() {
        let remote = MemRemote::new().with_recipe("foo_public", ["system", "foo_public"]);
        remote.seed(Tiddler::new("Core").with_bag("system"));
        let synced = LocalStore::new(Tier::Synced);
        let events = EventHub::new();
        let controller = RefreshController::new();
        let source = Source::from(Container::recipe("foo_public"));

        // Synced through a bag, so it never learned the recipe.
        remote.seed(Tiddler::new("Saved").with_bag("foo_public"));
        let saved = remote
            .get_tiddler(&Tiddler::new("Saved").with_bag("foo_public"), false)
            .await
            .unwrap();
        synced.set(&saved);
        assert!(synced.get(&saved).unwrap().recipe.is_none());

        remote.remove_server_side("foo_public", "Saved");
        controller.refresh_source(&source, &remote, &synced, &events).await.unwrap();
        assert_eq!(synced.len(), 1);
        assert!(synced.get(&saved).is_none());
    }

    #[tokio::test]
    async fn bag_refresh_removes_missing() {
        let remote = MemRemote::new();
        remote.seed(Tiddler::new("Keep").with_bag("b"));
        remote.seed(Tiddler::new("Gone").with_bag("b"));
        let synced = LocalStore::new(Tier::Synced);
        let events = EventHub::new();
        let controller = RefreshController::new();
        let source = Source::from(Container::bag("b"));

        controller.refresh_source(&source, &remote, &synced, &events).await.unwrap();
        assert_eq!(synced.len(), 2);

        remote.remove_server_side("b", "Gone");
        let refreshed = controller.refresh_source(&source, &remote, &synced, &events).await.unwrap();
        assert_eq!(refreshed.len(), 1);
        assert_eq!(synced.len(), 1);
        assert!(synced.get(&Tiddler::new("Gone")).is_none());
    }

    #[tokio::test]
    async fn recipe_refresh_double_checks() {
        let remote = MemRemote::new().with_recipe("foo_public", ["system", "foo_public"]);
        remote.seed(Tiddler::new("Core").with_bag("system"));
        remote.seed(Tiddler::new("Mine").with_bag("foo_public"));
        let synced = LocalStore::new(Tier::Synced);
        let events = EventHub::new();
        let controller = RefreshController::new();
        let source = Source::from(Container::recipe("foo_public"));

        controller.refresh_source(&source, &remote, &synced, &events).await.unwrap();
        assert_eq!(synced.len(), 2);

        // Hidden from the listing but still readable: kept.
        remote.unlist_bag("system");
        controller.refresh_source(&source, &remote, &synced, &events).await.unwrap();
        assert_eq!(synced.len(), 2);

        // Really gone: removed.
        remote.remove_server_side("foo_public", "Mine");
        controller.refresh_source(&source, &remote, &synced, &events).await.unwrap();
        assert_eq!(synced.len(), 1);
        assert!(synced.get(&Tiddler::new("Core")).is_some());
    }

    #[tokio::test]
    async fn search_never_removes() {
        let remote = MemRemote::new();
        remote.seed(Tiddler::new("Cats").with_bag("b"));
        remote.seed(Tiddler::new("Dogs").with_bag("b"));
        let synced = LocalStore::new(Tier::Synced);
        let events = EventHub::new();
        let controller = RefreshController::new();

        controller
            .refresh_source(&Container::bag("b").into(), &remote, &synced, &events)
            .await
            .unwrap();
        let found = controller
            .refresh_source(&Source::search("Cats", "/"), &remote, &synced, &events)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(synced.len(), 2);
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let remote = MemRemote::new();
        remote.fail(Op::List);
        let synced = LocalStore::new(Tier::Synced);
        let controller = RefreshController::new();
        controller.register(Container::bag("b").into());
        let err = controller
            .refresh_all(&remote, &synced, &EventHub::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RetrieveTiddlers { .. }));
    }
}
