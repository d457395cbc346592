//! # Remote Service Interface
//!
//! The store never speaks HTTP itself. Everything it needs from the server
//! goes through the [`Remote`] trait, which covers discovery of the current
//! space, single-tiddler CRUD, container listings and search.
//!
//! Implementations are expected to fill in `bag` (and, where known, `recipe`)
//! and a fresh `revision` on every tiddler they return. Failures surface as a
//! [`RemoteError`] carrying whatever status information the transport has.
//!
//! The trait is `?Send`: the store runs on a single-threaded executor and
//! shares its state through `Rc`, so futures never cross threads.
//!
//! [`memory::MemRemote`] is an in-process implementation used by the tests
//! and by anyone embedding the store without a server.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Container, Tiddler};

pub use memory::{MemRemote, Op};

/// A failed exchange with the remote service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{status_text} ({}): {message}", .status.map(|s| s.to_string()).unwrap_or_else(|| "no status".into()))]
pub struct RemoteError {
    pub status: Option<u16>,
    pub status_text: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(
        status: Option<u16>,
        status_text: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Some(404), "Not Found", message)
    }

    /// A failure with no HTTP status, e.g. a dropped connection.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, "Transport Error", message)
    }
}

/// What the server reports about the current context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub recipe: Option<String>,
    pub bag: Option<String>,
}

impl Discovery {
    pub fn recipe(name: impl Into<String>) -> Self {
        Self {
            recipe: Some(name.into()),
            bag: None,
        }
    }

    pub fn bag(name: impl Into<String>) -> Self {
        Self {
            recipe: None,
            bag: Some(name.into()),
        }
    }
}

#[async_trait(?Send)]
pub trait Remote {
    /// Report the recipe and/or bag the client is currently working in.
    async fn discover(&self) -> Result<Discovery, RemoteError>;

    /// Fetch one tiddler. The argument names the title and the container to
    /// read through (its `bag`, or failing that its `recipe`).
    async fn get_tiddler(&self, tiddler: &Tiddler, render: bool) -> Result<Tiddler, RemoteError>;

    /// Store a tiddler and return the server's copy with its new revision.
    async fn put_tiddler(&self, tiddler: &Tiddler) -> Result<Tiddler, RemoteError>;

    async fn delete_tiddler(&self, tiddler: &Tiddler) -> Result<(), RemoteError>;

    /// Full listing of a bag, or the merged view of a recipe.
    async fn list_tiddlers(&self, container: &Container) -> Result<Vec<Tiddler>, RemoteError>;

    async fn search(&self, query: &str) -> Result<Vec<Tiddler>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status() {
        let err = RemoteError::new(Some(409), "Conflict", "revision mismatch");
        assert_eq!(err.to_string(), "Conflict (409): revision mismatch");
        let err = RemoteError::transport("connection reset");
        assert_eq!(err.to_string(), "Transport Error (no status): connection reset");
    }

    #[test]
    fn discovery_constructors() {
        assert_eq!(Discovery::recipe("foo_public").recipe.as_deref(), Some("foo_public"));
        assert!(Discovery::bag("b").recipe.is_none());
    }
}
