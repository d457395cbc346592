use chrono::Utc;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::ops::ControlFlow;
use std::rc::Rc;

use super::cache::DurableCache;
use crate::model::{Container, Tiddler};

/// Which side of the store a [`LocalStore`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Server-confirmed state. Entries always carry `last_sync`.
    Synced,
    /// Pending local edits. Entries never carry `last_sync`.
    Modified,
}

/// Escape `%` and `/` so the `bag/title` key split is unambiguous.
pub(crate) fn escape_key(part: &str) -> String {
    part.replace('%', "%25").replace('/', "%2F")
}

fn key_for(bag: Option<&str>, title: &str) -> String {
    format!("{}/{}", escape_key(bag.unwrap_or("")), escape_key(title))
}

fn key(tiddler: &Tiddler) -> String {
    key_for(tiddler.bag_name(), &tiddler.title)
}

/// One tier of local tiddler state, keyed by `bag/title`.
///
/// Every value handed in or out is a copy; nothing outside the tier can
/// observe or cause mutation of a stored entry. Iteration follows insertion
/// order, and overwriting an entry keeps its position.
pub struct LocalStore {
    tier: Tier,
    entries: RefCell<IndexMap<String, Tiddler>>,
    bag_list: RefCell<Vec<Container>>,
    cache: Option<Rc<dyn DurableCache>>,
}

impl LocalStore {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            entries: RefCell::new(IndexMap::new()),
            bag_list: RefCell::new(Vec::new()),
            cache: None,
        }
    }

    /// Mirror writes and removals into `cache`.
    pub fn with_cache(mut self, cache: Rc<dyn DurableCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Look a tiddler up by its bag and title.
    ///
    /// A key without a bag is tried as a bagless entry first, then against
    /// every bag this tier has seen, in the order they were seen.
    pub fn get(&self, wanted: &Tiddler) -> Option<Tiddler> {
        let entries = self.entries.borrow();
        if let Some(found) = entries.get(&key(wanted)) {
            return Some(found.clone());
        }
        if wanted.bag.is_some() {
            return None;
        }
        let bags = self.bag_list.borrow();
        let found = bags
            .iter()
            .find_map(|bag| entries.get(&key_for(Some(&bag.name), &wanted.title)))
            .cloned();
        found
    }

    /// Store a copy of `tiddler`, returning the copy as stored.
    ///
    /// Any bagless entry with the same title is evicted first, and the
    /// sync stamp is set or cleared according to the tier.
    pub fn set(&self, tiddler: &Tiddler) -> Tiddler {
        let mut stored = tiddler.clone();
        stored.last_sync = match self.tier {
            Tier::Synced => Some(Utc::now()),
            Tier::Modified => None,
        };

        if let Some(bag) = &stored.bag {
            self.entries
                .borrow_mut()
                .shift_remove(&key_for(None, &stored.title));
            let mut bags = self.bag_list.borrow_mut();
            if !bags.contains(bag) {
                bags.push(bag.clone());
            }
        }

        self.entries.borrow_mut().insert(key(&stored), stored.clone());
        if let Some(cache) = &self.cache {
            cache.set(&stored);
        }
        stored
    }

    /// Remove the entry stored under exactly this tiddler's key.
    pub fn remove(&self, tiddler: &Tiddler) -> Option<Tiddler> {
        let removed = self.entries.borrow_mut().shift_remove(&key(tiddler));
        if let Some(cache) = &self.cache {
            cache.remove(tiddler);
        }
        removed
    }

    /// Visit a snapshot of every entry. The visitor may stop early.
    pub fn each<F>(&self, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(Tiddler) -> ControlFlow<()>,
    {
        for tiddler in self.snapshot() {
            visit(tiddler)?;
        }
        ControlFlow::Continue(())
    }

    pub fn snapshot(&self) -> Vec<Tiddler> {
        self.entries.borrow().values().cloned().collect()
    }

    /// Bags seen so far, in first-seen order.
    pub fn bags(&self) -> Vec<Container> {
        self.bag_list.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
