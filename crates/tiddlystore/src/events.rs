//! # Event Hub
//!
//! Subscribers register against an [`EventKind`], optionally narrowed to one
//! instance name (a tiddler title, a bag name). Predicate subscriptions hold a
//! compiled filter instead of a name and hear about every tiddler change the
//! filter accepts.
//!
//! Dispatch order for one [`EventHub::trigger`] call:
//!
//! 1. kind-wide subscribers, in registration order
//! 2. subscribers for the given name
//! 3. for [`EventKind::Tiddler`] only, predicate subscribers whose predicate
//!    accepts the changed tiddler
//!
//! The subscriber lists are snapshotted before dispatch, so a listener may
//! bind, unbind or trigger again without truncating the dispatch in progress.
//! Listeners are identified by `Rc` identity when unbinding.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::filter::Predicate;
use crate::model::{Container, Tiddler};

/// A subscriber callback.
pub type Listener = Rc<dyn Fn(&Change)>;

/// Wrap a closure as a [`Listener`].
pub fn listener(f: impl Fn(&Change) + 'static) -> Listener {
    Rc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Recipe,
    Bag,
    Tiddler,
}

/// What a listener is told.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// A tiddler was added or changed.
    Tiddler(Tiddler),
    /// A tiddler was removed locally or deleted on the server.
    Deleted(Tiddler),
    Container(Container),
}

impl Change {
    pub fn tiddler(&self) -> Option<&Tiddler> {
        match self {
            Change::Tiddler(t) | Change::Deleted(t) => Some(t),
            Change::Container(_) => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Change::Deleted(_))
    }
}

#[derive(Default)]
struct Bindings {
    all: Vec<Listener>,
    named: HashMap<String, Vec<Listener>>,
}

struct FilterBinding {
    predicate: Predicate,
    listener: Listener,
}

#[derive(Default)]
pub struct EventHub {
    bindings: RefCell<HashMap<EventKind, Bindings>>,
    filters: RefCell<Vec<FilterBinding>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event of `kind`, or only those for `name`.
    pub fn bind(&self, kind: EventKind, name: Option<&str>, listener: Listener) {
        let mut bindings = self.bindings.borrow_mut();
        let entry = bindings.entry(kind).or_default();
        match name {
            Some(name) => entry
                .named
                .entry(name.to_string())
                .or_default()
                .push(listener),
            None => entry.all.push(listener),
        }
    }

    /// Subscribe to tiddler changes accepted by `predicate`.
    pub fn bind_filter(&self, predicate: Predicate, listener: Listener) {
        self.filters.borrow_mut().push(FilterBinding {
            predicate,
            listener,
        });
    }

    /// Remove subscriptions.
    ///
    /// Without a name, both kind-wide and per-name subscribers are affected.
    /// Without a listener, every matching subscriber is removed; with one,
    /// only entries that are that same `Rc`.
    pub fn unbind(&self, kind: EventKind, name: Option<&str>, listener: Option<&Listener>) {
        let mut bindings = self.bindings.borrow_mut();
        let Some(entry) = bindings.get_mut(&kind) else {
            return;
        };
        let strip = |list: &mut Vec<Listener>| match listener {
            Some(target) => list.retain(|l| !Rc::ptr_eq(l, target)),
            None => list.clear(),
        };
        match name {
            Some(name) => {
                if let Some(list) = entry.named.get_mut(name) {
                    strip(list);
                }
            }
            None => {
                strip(&mut entry.all);
                entry.named.values_mut().for_each(strip);
            }
        }
        entry.named.retain(|_, list| !list.is_empty());
    }

    /// Remove predicate subscriptions registered with this exact predicate.
    pub fn unbind_filter(&self, predicate: &Predicate) {
        self.filters
            .borrow_mut()
            .retain(|binding| !Rc::ptr_eq(&binding.predicate, predicate));
    }

    pub fn trigger(&self, kind: EventKind, name: Option<&str>, change: &Change) {
        let (all, named) = {
            let bindings = self.bindings.borrow();
            match bindings.get(&kind) {
                Some(entry) => (
                    entry.all.clone(),
                    name.and_then(|n| entry.named.get(n))
                        .cloned()
                        .unwrap_or_default(),
                ),
                None => (Vec::new(), Vec::new()),
            }
        };
        let filters: Vec<(Predicate, Listener)> = if kind == EventKind::Tiddler {
            self.filters
                .borrow()
                .iter()
                .map(|b| (Rc::clone(&b.predicate), Rc::clone(&b.listener)))
                .collect()
        } else {
            Vec::new()
        };

        for listener in all.iter().chain(named.iter()) {
            listener(change);
        }
        if let Some(tiddler) = change.tiddler() {
            for (predicate, listener) in &filters {
                if predicate(tiddler) {
                    listener(change);
                }
            }
        }
    }

    /// Number of subscriptions currently registered, predicate ones included.
    pub fn len(&self) -> usize {
        let bound: usize = self
            .bindings
            .borrow()
            .values()
            .map(|b| b.all.len() + b.named.values().map(Vec::len).sum::<usize>())
            .sum();
        bound + self.filters.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
