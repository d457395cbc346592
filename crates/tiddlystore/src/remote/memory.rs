use async_trait::async_trait;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tokio::sync::Notify;
use tracing::debug;

use super::{Discovery, Remote, RemoteError};
use crate::model::{Container, Tiddler};

/// Remote operations, used to script failures and interleavings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Discover,
    Get,
    Put,
    Delete,
    List,
    Search,
}

/// A one-shot barrier. Calls for a held operation park here until released.
#[derive(Default)]
struct Gate {
    open: Cell<bool>,
    notify: Notify,
}

impl Gate {
    async fn wait(&self) {
        while !self.open.get() {
            self.notify.notified().await;
        }
    }

    fn open(&self) {
        self.open.set(true);
        self.notify.notify_waiters();
    }
}

/// In-process remote service.
///
/// Uses `RefCell` for interior mutability since the store is single-threaded.
/// Bags hold tiddlers in insertion order; recipes are ordered bag stacks.
/// Every successful put assigns a fresh revision.
pub struct MemRemote {
    bags: RefCell<IndexMap<String, IndexMap<String, Tiddler>>>,
    recipes: RefCell<IndexMap<String, Vec<String>>>,
    unlisted: RefCell<HashSet<String>>,
    discovery: RefCell<Discovery>,
    failures: RefCell<HashSet<Op>>,
    calls: RefCell<HashMap<Op, usize>>,
    gates: RefCell<HashMap<Op, Rc<Gate>>>,
    next_revision: Cell<u64>,
}

impl Default for MemRemote {
    fn default() -> Self {
        Self {
            bags: RefCell::new(IndexMap::new()),
            recipes: RefCell::new(IndexMap::new()),
            unlisted: RefCell::new(HashSet::new()),
            discovery: RefCell::new(Discovery::default()),
            failures: RefCell::new(HashSet::new()),
            calls: RefCell::new(HashMap::new()),
            gates: RefCell::new(HashMap::new()),
            next_revision: Cell::new(1),
        }
    }
}

impl MemRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set what `discover` reports.
    pub fn with_discovery(self, discovery: Discovery) -> Self {
        *self.discovery.borrow_mut() = discovery;
        self
    }

    /// Define a recipe over `bags`, lowest precedence first. Missing bags are created.
    pub fn with_recipe<I, S>(self, name: &str, bags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bags: Vec<String> = bags.into_iter().map(Into::into).collect();
        {
            let mut stored = self.bags.borrow_mut();
            for bag in &bags {
                stored.entry(bag.clone()).or_default();
            }
        }
        self.recipes.borrow_mut().insert(name.to_string(), bags);
        self
    }

    /// Place a tiddler server-side without counting a call. The tiddler must have a bag.
    pub fn seed(&self, tiddler: Tiddler) -> Tiddler {
        let stored = self.stamp(tiddler);
        if let Some(bag) = stored.bag_name() {
            self.bags
                .borrow_mut()
                .entry(bag.to_string())
                .or_default()
                .insert(stored.title.clone(), stored.clone());
        }
        stored
    }

    /// Delete a tiddler behind the client's back.
    pub fn remove_server_side(&self, bag: &str, title: &str) -> Option<Tiddler> {
        self.bags
            .borrow_mut()
            .get_mut(bag)
            .and_then(|tiddlers| tiddlers.shift_remove(title))
    }

    /// Exclude a bag from recipe listings while keeping direct fetches working,
    /// as a server does for bags the client may read but not enumerate.
    pub fn unlist_bag(&self, bag: &str) {
        self.unlisted.borrow_mut().insert(bag.to_string());
    }

    /// The server's copy of a tiddler.
    pub fn stored(&self, bag: &str, title: &str) -> Option<Tiddler> {
        self.bags
            .borrow()
            .get(bag)
            .and_then(|tiddlers| tiddlers.get(title).cloned())
    }

    /// Make every subsequent call of `op` fail.
    pub fn fail(&self, op: Op) {
        self.failures.borrow_mut().insert(op);
    }

    pub fn recover(&self, op: Op) {
        self.failures.borrow_mut().remove(&op);
    }

    /// Number of calls made for `op`, including held and failed ones.
    pub fn calls(&self, op: Op) -> usize {
        self.calls.borrow().get(&op).copied().unwrap_or(0)
    }

    /// Park every subsequent call of `op` until [`MemRemote::release`].
    pub fn hold(&self, op: Op) {
        self.gates
            .borrow_mut()
            .insert(op, Rc::new(Gate::default()));
    }

    /// Let held calls of `op` proceed. New calls are no longer held.
    pub fn release(&self, op: Op) {
        let gate = self.gates.borrow_mut().remove(&op);
        if let Some(gate) = gate {
            gate.open();
        }
    }

    async fn enter(&self, op: Op) -> Result<(), RemoteError> {
        *self.calls.borrow_mut().entry(op).or_insert(0) += 1;
        let gate = self.gates.borrow().get(&op).cloned();
        if let Some(gate) = gate {
            gate.wait().await;
        }
        if self.failures.borrow().contains(&op) {
            return Err(RemoteError::new(
                Some(500),
                "Internal Server Error",
                format!("{op:?} failed"),
            ));
        }
        Ok(())
    }

    fn stamp(&self, mut tiddler: Tiddler) -> Tiddler {
        let revision = self.next_revision.get();
        self.next_revision.set(revision + 1);
        tiddler.revision = Some(revision);
        tiddler.last_sync = None;
        tiddler
    }

    fn recipe_container(&self, name: &str) -> Option<Container> {
        self.recipes
            .borrow()
            .get(name)
            .map(|bags| Container::recipe(name).with_bags(bags.iter().cloned()))
    }

    /// Which bag a write lands in: its own, or the top of its recipe.
    fn target_bag(&self, tiddler: &Tiddler) -> Result<String, RemoteError> {
        if let Some(bag) = tiddler.bag_name() {
            return Ok(bag.to_string());
        }
        let recipe = tiddler
            .recipe
            .as_ref()
            .ok_or_else(|| RemoteError::new(Some(400), "Bad Request", "tiddler has no container"))?;
        self.recipes
            .borrow()
            .get(&recipe.name)
            .and_then(|bags| bags.last().cloned())
            .ok_or_else(|| RemoteError::not_found(format!("recipe {} not found", recipe.name)))
    }
}

#[async_trait(?Send)]
impl Remote for MemRemote {
    async fn discover(&self) -> Result<Discovery, RemoteError> {
        self.enter(Op::Discover).await?;
        Ok(self.discovery.borrow().clone())
    }

    async fn get_tiddler(&self, tiddler: &Tiddler, render: bool) -> Result<Tiddler, RemoteError> {
        self.enter(Op::Get).await?;
        let missing = || RemoteError::not_found(format!("{} not found", tiddler.title));

        let mut found = if let Some(bag) = tiddler.bag_name() {
            self.stored(bag, &tiddler.title).ok_or_else(missing)?
        } else if let Some(recipe) = &tiddler.recipe {
            let container = self.recipe_container(&recipe.name).ok_or_else(missing)?;
            let mut hit = container
                .bags
                .iter()
                .rev()
                .find_map(|bag| self.stored(bag, &tiddler.title))
                .ok_or_else(missing)?;
            hit.recipe = Some(container);
            hit
        } else {
            return Err(missing());
        };

        if render {
            found.fields.insert("render".to_string(), found.text.clone());
        }
        Ok(found)
    }

    async fn put_tiddler(&self, tiddler: &Tiddler) -> Result<Tiddler, RemoteError> {
        self.enter(Op::Put).await?;
        let bag = self.target_bag(tiddler)?;
        let mut stored = self.stamp(tiddler.clone());
        stored.bag = Some(Container::bag(bag.clone()));
        self.bags
            .borrow_mut()
            .entry(bag)
            .or_default()
            .insert(stored.title.clone(), stored.clone());
        debug!(title = %stored.title, revision = ?stored.revision, "stored tiddler");
        Ok(stored)
    }

    async fn delete_tiddler(&self, tiddler: &Tiddler) -> Result<(), RemoteError> {
        self.enter(Op::Delete).await?;
        let bag = self.target_bag(tiddler)?;
        self.remove_server_side(&bag, &tiddler.title)
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(format!("{} not found", tiddler.title)))
    }

    async fn list_tiddlers(&self, container: &Container) -> Result<Vec<Tiddler>, RemoteError> {
        self.enter(Op::List).await?;
        if container.is_bag() {
            return self
                .bags
                .borrow()
                .get(&container.name)
                .map(|tiddlers| tiddlers.values().cloned().collect())
                .ok_or_else(|| RemoteError::not_found(format!("bag {} not found", container.name)));
        }

        let recipe = self
            .recipe_container(&container.name)
            .ok_or_else(|| RemoteError::not_found(format!("recipe {} not found", container.name)))?;
        let unlisted = self.unlisted.borrow();
        let bags = self.bags.borrow();
        let mut merged: IndexMap<String, Tiddler> = IndexMap::new();
        for name in recipe.bags.iter().filter(|b| !unlisted.contains(*b)) {
            for tiddler in bags.get(name).into_iter().flat_map(|t| t.values()) {
                let mut listed = tiddler.clone();
                listed.recipe = Some(recipe.clone());
                merged.insert(listed.title.clone(), listed);
            }
        }
        Ok(merged.into_values().collect())
    }

    async fn search(&self, query: &str) -> Result<Vec<Tiddler>, RemoteError> {
        self.enter(Op::Search).await?;
        let bags = self.bags.borrow();
        Ok(bags
            .values()
            .flat_map(|tiddlers| tiddlers.values())
            .filter(|t| t.title.contains(query) || t.text.contains(query))
            .cloned()
            .collect())
    }
}
