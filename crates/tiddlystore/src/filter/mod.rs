//! # Filter Language
//!
//! A small query language over tiddlers, parsed into an [`Ast`] and compiled
//! into a [`Tester`]:
//!
//! ```text
//! #cat [[Foo]], +bengillies !@bar ([cake=lie], "woof")
//! ```
//!
//! reads as `(cat AND title=Foo) OR (modifier=bengillies AND NOT space=bar
//! AND (cake=lie OR text contains "woof"))`. See [`syntax`] for the token
//! table.
//!
//! The AST is kept alongside collections so a narrowed result can later be
//! turned back into a live predicate for subscriptions.

pub mod ast;
pub mod compile;
pub mod syntax;

pub use ast::{Ast, Leaf, Predicate};
pub use compile::{compile, Tester};
pub use syntax::parse;

use crate::error::ParseError;

/// Parse and compile in one step.
pub fn tester(filter: &str) -> Result<Tester, ParseError> {
    parse(filter).map(|ast| compile(&ast))
}
