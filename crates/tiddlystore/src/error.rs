use thiserror::Error;

use crate::remote::RemoteError;

/// Errors raised while turning a filter string into an AST.
///
/// Parsing is synchronous and pure, so these are returned directly rather
/// than routed through a store operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Brackets don't match")]
    UnmatchedBrackets,

    #[error("No filter found")]
    EmptyFilter,

    #[error("Negation at '{0}' has nothing to negate")]
    MissingOperand(String),
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Could not determine default containers: {source}")]
    Discovery {
        #[source]
        source: RemoteError,
    },

    #[error("{0} is not a valid space")]
    NoSpaceMatch(String),

    #[error("Error getting tiddlers: {source}")]
    RetrieveTiddlers {
        #[source]
        source: RemoteError,
    },

    #[error("Error getting tiddler {title}: {source}")]
    GetTiddler {
        title: String,
        #[source]
        source: RemoteError,
    },

    #[error("Error saving {title}: {source}")]
    Save {
        title: String,
        #[source]
        source: RemoteError,
    },

    #[error("Error deleting {title}: {source}")]
    Delete {
        title: String,
        #[source]
        source: RemoteError,
    },

    #[error("Error retrieving tiddlers from search: {source}")]
    Search {
        #[source]
        source: RemoteError,
    },

    #[error("Nothing to save")]
    Empty,

    #[error("Tiddler not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl StoreError {
    /// The transport-level failure behind this error, if it came from the remote.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            StoreError::Discovery { source }
            | StoreError::RetrieveTiddlers { source }
            | StoreError::GetTiddler { source, .. }
            | StoreError::Save { source, .. }
            | StoreError::Delete { source, .. }
            | StoreError::Search { source } => Some(source),
            _ => None,
        }
    }

    /// `Empty` is an expected outcome of `save_all`, not a fault.
    pub fn is_benign(&self) -> bool {
        matches!(self, StoreError::Empty)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
