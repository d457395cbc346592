//! # Default Containers
//!
//! Every store has a place it reads from (`pull_from`) and a place new
//! tiddlers go (`push_to`). They are either supplied up front or discovered
//! from the server once, on first need.
//!
//! ## Discovery
//!
//! The server reports the recipe and/or bag of the current context:
//!
//! | Reported                    | `pull_from`       | `push_to`               |
//! |-----------------------------|-------------------|-------------------------|
//! | recipe `foo_public`         | recipe `foo_public` | bag `foo_public`      |
//! | recipe `foo_private`        | recipe `foo_private` | bag `foo_public`     |
//! | recipe `plain` (no `_`)     | recipe `plain`    | recipe `plain`          |
//! | bag `b` only                | bag `b`           | bag `b`                 |
//! | neither                     | `NoSpaceMatch` error                        |
//!
//! ## Single Flight
//!
//! Only one discovery request is ever outstanding. Callers arriving while it
//! is in flight queue up and are released in arrival order with the same
//! result. A success is kept for the life of the resolver; a failure is
//! handed to everyone waiting and then forgotten, so the next call retries.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cell::RefCell;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::model::Container;
use crate::remote::{Discovery, Remote};

static SPACE_RECIPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+)_[^_]+$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub pull_from: Container,
    pub push_to: Container,
}

impl Defaults {
    /// Read from and write to the same container.
    pub fn single(container: Container) -> Self {
        Self {
            pull_from: container.clone(),
            push_to: container,
        }
    }

    pub fn pair(pull_from: Container, push_to: Container) -> Self {
        Self { pull_from, push_to }
    }

    /// Apply the discovery rule to what the server reported.
    pub fn from_discovery(discovery: &Discovery, host: &str) -> Result<Self> {
        let recipe = discovery.recipe.as_deref().filter(|r| !r.is_empty());
        let bag = discovery.bag.as_deref().filter(|b| !b.is_empty());

        let defaults = match (recipe, bag) {
            (Some(recipe), _) => {
                let pull_from = Container::recipe(recipe).with_host(host);
                match SPACE_RECIPE.captures(recipe) {
                    Some(caps) => {
                        let push_to = Container::bag(format!("{}_public", &caps[1])).with_host(host);
                        Defaults::pair(pull_from, push_to)
                    }
                    None => Defaults::single(pull_from),
                }
            }
            (None, Some(bag)) => Defaults::single(Container::bag(bag).with_host(host)),
            (None, None) => {
                return Err(StoreError::NoSpaceMatch(
                    "server reported neither a recipe nor a bag".to_string(),
                ))
            }
        };
        Ok(defaults)
    }
}

enum State {
    Unresolved,
    Discovering(Vec<oneshot::Sender<Result<Defaults>>>),
    Resolved(Defaults),
}

/// Resets an in-flight discovery if the caller driving it goes away, so the
/// queue is not left waiting forever.
struct InFlight<'a> {
    state: &'a RefCell<State>,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            // Dropping the queued senders wakes the waiters, who retry.
            *self.state.borrow_mut() = State::Unresolved;
        }
    }
}

pub struct Resolver {
    state: RefCell<State>,
    host: String,
}

impl Resolver {
    /// A resolver that discovers on first use.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            state: RefCell::new(State::Unresolved),
            host: host.into(),
        }
    }

    /// A resolver with defaults fixed up front. It never contacts the server.
    pub fn fixed(defaults: Defaults) -> Self {
        Self {
            state: RefCell::new(State::Resolved(defaults)),
            host: "/".to_string(),
        }
    }

    /// The defaults, if already known.
    pub fn resolved(&self) -> Option<Defaults> {
        match &*self.state.borrow() {
            State::Resolved(defaults) => Some(defaults.clone()),
            _ => None,
        }
    }

    pub fn is_discovering(&self) -> bool {
        matches!(&*self.state.borrow(), State::Discovering(_))
    }

    pub async fn resolve(&self, remote: &dyn Remote) -> Result<Defaults> {
        loop {
            let waiter = {
                let mut state = self.state.borrow_mut();
                match &mut *state {
                    State::Resolved(defaults) => return Ok(defaults.clone()),
                    State::Discovering(queue) => {
                        let (tx, rx) = oneshot::channel();
                        queue.push(tx);
                        Some(rx)
                    }
                    State::Unresolved => {
                        *state = State::Discovering(Vec::new());
                        None
                    }
                }
            };

            match waiter {
                Some(rx) => match rx.await {
                    Ok(result) => return result,
                    // The discovering caller was dropped; try again.
                    Err(_) => continue,
                },
                None => return self.discover(remote).await,
            }
        }
    }

    async fn discover(&self, remote: &dyn Remote) -> Result<Defaults> {
        let mut in_flight = InFlight {
            state: &self.state,
            armed: true,
        };
        let result = match remote.discover().await {
            Ok(discovery) => Defaults::from_discovery(&discovery, &self.host),
            Err(source) => Err(StoreError::Discovery { source }),
        };
        in_flight.armed = false;

        let next = match &result {
            Ok(defaults) => {
                debug!(pull_from = %defaults.pull_from, push_to = %defaults.push_to, "discovered default containers");
                State::Resolved(defaults.clone())
            }
            Err(e) => {
                warn!(error = %e, "discovery failed");
                State::Unresolved
            }
        };
        let queue = match std::mem::replace(&mut *self.state.borrow_mut(), next) {
            State::Discovering(queue) => queue,
            _ => Vec::new(),
        };
        for waiter in queue {
            let _ = waiter.send(result.clone());
        }
        result
    }
}
