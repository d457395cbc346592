//! # tiddlystore
//!
//! A client-side store for tiddlers: small titled documents kept in bags and
//! read through recipes on a TiddlyWeb-style server.
//!
//! ## Architecture
//!
//! ```text
//!            Store (facade)
//!   ┌──────────┼───────────┬─────────────┐
//!   │          │           │             │
//! tiers     events     defaults       refresh
//! synced    EventHub   Resolver       RefreshController
//! modified     ▲           │             │
//!   │          │           └──── Remote ─┘
//!   └── reconcile ───┘
//! ```
//!
//! - [`store`]: the [`Store`] facade, the two local tiers, reconciliation and
//!   the durable cache of pending edits
//! - [`filter`]: the filter language, parsed to an [`Ast`] and compiled to a
//!   [`Tester`]
//! - [`collection`]: filterable, sortable snapshots that remember their filter
//! - [`events`]: subscriptions by kind, by name, or by filter
//! - [`defaults`]: where the store reads from and writes to
//! - [`refresh`]: keeps the synced tier in step with the server
//! - [`remote`]: the server interface, plus an in-memory implementation
//!
//! ## Usage
//!
//! ```no_run
//! use std::rc::Rc;
//! use tiddlystore::{GetOptions, MemRemote, Store, Tiddler};
//!
//! # async fn demo() -> tiddlystore::Result<()> {
//! let store = Store::new(Rc::new(MemRemote::new()));
//! store.add(Tiddler::new("Shopping").with_tags(["todo"])).await?;
//! let todo = store.query("#todo")?;
//! store.save_all().await?;
//! let fresh = store.get("Shopping", GetOptions::fresh()).await?;
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod filter;
pub mod logging;
pub mod model;
pub mod refresh;
pub mod remote;
pub mod store;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use collection::{Collection, SpaceFilter};
pub use config::StoreConfig;
pub use defaults::Defaults;
pub use error::{ParseError, Result, StoreError};
pub use events::{listener, Change, EventKind, Listener};
pub use filter::{Ast, Predicate, Tester};
pub use model::{Container, ContainerKind, Tiddler, TiddlerRef};
pub use remote::{Discovery, MemRemote, Remote, RemoteError};
pub use store::{GetOptions, Store, StoreBuilder};
