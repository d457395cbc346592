use std::fmt;
use std::rc::Rc;

use super::ast::{Ast, Leaf, Predicate};
use crate::model::Tiddler;

/// A compiled filter.
///
/// Testing takes `&Tiddler`, so a predicate can never modify the document it
/// is asked about.
#[derive(Clone)]
pub struct Tester {
    predicate: Predicate,
}

impl Tester {
    pub fn test(&self, tiddler: &Tiddler) -> bool {
        (self.predicate)(tiddler)
    }

    /// The underlying predicate, shared rather than rebuilt.
    pub fn predicate(&self) -> Predicate {
        Rc::clone(&self.predicate)
    }
}

impl fmt::Debug for Tester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Tester(..)")
    }
}

/// Lower an AST into a single predicate. Compiling is pure.
pub fn compile(ast: &Ast) -> Tester {
    Tester {
        predicate: lower(ast),
    }
}

fn lower(ast: &Ast) -> Predicate {
    match ast {
        Ast::And(children) => {
            let tests: Vec<Predicate> = children.iter().map(lower).collect();
            Rc::new(move |t: &Tiddler| tests.iter().all(|test| test(t)))
        }
        Ast::Or(children) => {
            let tests: Vec<Predicate> = children.iter().map(lower).collect();
            Rc::new(move |t: &Tiddler| tests.iter().any(|test| test(t)))
        }
        Ast::Not(child) => {
            let test = lower(child);
            Rc::new(move |t: &Tiddler| !test(t))
        }
        Ast::Function(predicate) => Rc::clone(predicate),
        Ast::Match(leaf) => match_leaf(leaf.clone()),
    }
}

fn match_leaf(leaf: Leaf) -> Predicate {
    match leaf {
        Leaf::Title(title) => Rc::new(move |t: &Tiddler| t.title == title),
        Leaf::Tag(tag) => Rc::new(move |t: &Tiddler| t.tags.contains(&tag)),
        Leaf::Field {
            field,
            value,
            negated,
        } => Rc::new(move |t: &Tiddler| {
            let matches = t.attr(&field).is_some_and(|v| v.matches_str(&value));
            matches != negated
        }),
        Leaf::Space(space) => Rc::new(move |t: &Tiddler| t.space() == Some(space.as_str())),
        Leaf::Modifier(modifier) => {
            Rc::new(move |t: &Tiddler| t.modifier.as_deref() == Some(modifier.as_str()))
        }
        Leaf::Text(text) => Rc::new(move |t: &Tiddler| t.text.contains(&text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;

    fn docs() -> Vec<Tiddler> {
        vec![
            Tiddler::new("Foo")
                .with_tags(["cat", "dog"])
                .with_field("cake", "lie")
                .with_modifier("bengillies")
                .with_bag("foo_public")
                .with_text("Hello there"),
            Tiddler::new("Bar")
                .with_tags(["cat", "rabbit"])
                .with_bag("bar_private"),
            Tiddler::new("Baz").with_tags(["dog"]).with_bag("baz_archive"),
            Tiddler::new("Loose"),
        ]
    }

    fn matching(filter: &str) -> Vec<String> {
        let tester = compile(&parse(filter).unwrap());
        docs()
            .into_iter()
            .filter(|t| tester.test(t))
            .map(|t| t.title)
            .collect()
    }

    #[test]
    fn leaf_matchers() {
        assert_eq!(matching("#cat"), vec!["Foo", "Bar"]);
        assert_eq!(matching("[[Baz]]"), vec!["Baz"]);
        assert_eq!(matching("[cake=lie]"), vec!["Foo"]);
        assert_eq!(matching("+bengillies"), vec!["Foo"]);
        assert_eq!(matching(r#""there""#), vec!["Foo"]);
        assert!(matching(r#""There""#).is_empty());
    }

    #[test]
    fn space_strips_every_suffix() {
        assert_eq!(matching("@foo"), vec!["Foo"]);
        assert_eq!(matching("@bar"), vec!["Bar"]);
        assert_eq!(matching("@baz"), vec!["Baz"]);
        assert_eq!(matching("!@foo"), vec!["Bar", "Baz", "Loose"]);
    }

    #[test]
    fn and_or_precedence() {
        // (dog AND Foo) OR cat
        assert_eq!(matching("#dog [[Foo]], #cat"), vec!["Foo", "Bar"]);
        assert_eq!(matching("#dog [[Bar]], #rabbit"), vec!["Bar"]);
    }

    #[test]
    fn negation() {
        assert_eq!(matching("!#cat"), vec!["Baz", "Loose"]);
        assert_eq!(matching("[cake!=lie]"), vec!["Bar", "Baz", "Loose"]);
        assert_eq!(matching("!(#cat, #dog)"), vec!["Loose"]);
    }

    #[test]
    fn empty_conjunction_matches_everything() {
        let tester = compile(&Ast::everything());
        assert!(docs().iter().all(|t| tester.test(t)));
    }

    #[test]
    fn function_nodes_are_used_as_is() {
        let long: Predicate = Rc::new(|t: &Tiddler| t.title.len() > 3);
        let tester = compile(&Ast::everything().and_then(Ast::Function(long)));
        let hits: Vec<_> = docs().into_iter().filter(|t| tester.test(t)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Loose");
    }
}
