//! Replace-and-notify for a single tier.
//!
//! A write counts as a change worth announcing when the tiddler has a bag
//! and one of these holds:
//!
//! - nothing was stored under its key before
//! - the previous entry was synced and the revision differs
//! - the previous entry was unsynced and any field differs
//!
//! Unsynced entries have no trustworthy revision, so content equality stands
//! in for it. Everything else is stored silently.

use tracing::debug;

use super::local::{LocalStore, Tier};
use crate::events::{Change, EventHub, EventKind};
use crate::model::Tiddler;

/// Outcome of [`replace`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// The copy now held by the tier.
    pub stored: Tiddler,
    /// Whether a tiddler event was raised.
    pub notified: bool,
}

pub fn replace(tier: &LocalStore, events: &EventHub, tiddler: &Tiddler) -> Reconciled {
    let old = tier.get(tiddler);
    let new_bag = tiddler
        .bag
        .as_ref()
        .filter(|bag| tier.tier() == Tier::Synced && !tier.bags().contains(bag))
        .cloned();

    let stored = tier.set(tiddler);

    if let Some(bag) = new_bag {
        events.trigger(EventKind::Bag, Some(&bag.name), &Change::Container(bag.clone()));
    }

    let changed = match &old {
        None => true,
        Some(old) if old.is_synced() => old.revision != stored.revision,
        Some(old) => *old != stored,
    };
    let notified = stored.bag.is_some() && changed;
    if notified {
        debug!(title = %stored.title, tier = ?tier.tier(), "tiddler changed");
        events.trigger(
            EventKind::Tiddler,
            Some(&stored.title),
            &Change::Tiddler(stored.clone()),
        );
    }

    Reconciled { stored, notified }
}
