use std::fmt;
use std::rc::Rc;

use crate::model::Tiddler;

/// A boolean test over a tiddler. Identity (`Rc::ptr_eq`) is what
/// subscriptions use to find a predicate again.
pub type Predicate = Rc<dyn Fn(&Tiddler) -> bool>;

/// A single match against one aspect of a tiddler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leaf {
    /// `[[Title]]`
    Title(String),
    /// `#tag`
    Tag(String),
    /// `[field=value]`, or `[field!=value]` when negated.
    Field {
        field: String,
        value: String,
        negated: bool,
    },
    /// `@space`
    Space(String),
    /// `+modifier`
    Modifier(String),
    /// `"substring"`
    Text(String),
}

/// Parsed form of a filter.
///
/// The parser emits an `Or` of `And` blocks, collapsing single-child blocks.
/// Collections extend the tree with `Function` nodes as they narrow.
#[derive(Clone)]
pub enum Ast {
    And(Vec<Ast>),
    Or(Vec<Ast>),
    Not(Box<Ast>),
    Function(Predicate),
    Match(Leaf),
}

impl Ast {
    /// The empty conjunction, which matches everything.
    pub fn everything() -> Self {
        Ast::And(Vec::new())
    }

    pub fn is_everything(&self) -> bool {
        matches!(self, Ast::And(children) if children.is_empty())
    }

    pub fn function(predicate: Predicate) -> Self {
        Ast::Function(predicate)
    }

    /// Narrow this tree by `node`, flattening into an existing conjunction.
    pub fn and_then(self, node: Ast) -> Self {
        match self {
            Ast::And(mut children) => {
                children.push(node);
                Ast::And(children)
            }
            other => Ast::And(vec![other, node]),
        }
    }

    pub fn negate(self) -> Self {
        Ast::Not(Box::new(self))
    }
}

impl PartialEq for Ast {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Ast::And(a), Ast::And(b)) | (Ast::Or(a), Ast::Or(b)) => a == b,
            (Ast::Not(a), Ast::Not(b)) => a == b,
            (Ast::Function(a), Ast::Function(b)) => Rc::ptr_eq(a, b),
            (Ast::Match(a), Ast::Match(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ast::And(children) => f.debug_tuple("And").field(children).finish(),
            Ast::Or(children) => f.debug_tuple("Or").field(children).finish(),
            Ast::Not(child) => f.debug_tuple("Not").field(child).finish(),
            Ast::Function(_) => f.write_str("Function(..)"),
            Ast::Match(leaf) => f.debug_tuple("Match").field(leaf).finish(),
        }
    }
}
