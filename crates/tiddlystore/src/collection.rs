//! # Collections
//!
//! A [`Collection`] is a snapshot list of tiddlers plus the filter tree that
//! produced it. Every narrowing operation returns a new collection whose
//! tree is the old one with the new condition appended, so
//!
//! ```text
//! store.query("#cat")?.find_by("modifier", Some("bengillies")).bind(listener)
//! ```
//!
//! subscribes `listener` to every future tiddler change that is tagged `cat`
//! *and* modified by `bengillies`, not just to the tiddlers in hand.
//!
//! Reordering and truncating (`sort`, `limit`, `unique`) keep the tree as is.
//! `map` starts a fresh one, since the mapped tiddlers are new values.
//!
//! ## Named Operations
//!
//! | Name     | Argument                | Keeps tiddlers that...                       |
//! |----------|-------------------------|----------------------------------------------|
//! | `tag`    | tag                     | carry the tag                                |
//! | `title`  | title                   | have exactly this title                      |
//! | `text`   | substring               | contain it in their text                     |
//! | `bag`    | bag name                | live in the bag                              |
//! | `space`  | space name, or none     | come from the space (current space if none)  |
//! | `recipe` | recipe name, or none    | were read through the recipe                 |
//! | `dirty`  | RFC 3339 time, or none  | are unsynced, or synced before the time      |
//! | `sort`   | `title, -modified`      | (reorders)                                   |
//! | `limit`  | count                   | (truncates)                                  |
//! | `attr`   | `name` or `name=value`  | have the attribute (equal to value if given) |
//! | `not`    | `name` or `name=value`  | lack the attribute (or differ from value)    |
//! | other    | value, or none          | have the attribute (equal to value if given) |
//!
//! A `dirty` time or `limit` count that does not parse is logged and ignored,
//! as if no argument had been given.

use chrono::{DateTime, Utc};
use indexmap::map::Entry;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use tracing::warn;

use crate::error::{ParseError, Result};
use crate::events::Listener;
use crate::filter::{compile, parse, Ast, Leaf, Predicate, Tester};
use crate::model::{compare_attrs, AttrValue, Tiddler};
use crate::store::Store;

/// Which space [`Collection::space`] keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceFilter {
    /// The space of the store's current location.
    Current,
    /// Anything outside the current space.
    NotCurrent,
    Named(String),
}

#[derive(Clone)]
pub struct Collection {
    store: Store,
    tiddlers: Vec<Tiddler>,
    ast: Ast,
}

impl Collection {
    pub(crate) fn new(store: Store, tiddlers: Vec<Tiddler>) -> Self {
        Self {
            store,
            tiddlers,
            ast: Ast::everything(),
        }
    }

    fn with_tiddlers(&self, tiddlers: Vec<Tiddler>, ast: Ast) -> Self {
        Self {
            store: self.store.clone(),
            tiddlers,
            ast,
        }
    }

    fn narrow(&self, node: Ast) -> Self {
        let tester = compile(&node);
        let kept = self
            .tiddlers
            .iter()
            .filter(|t| tester.test(t))
            .cloned()
            .collect();
        self.with_tiddlers(kept, self.ast.clone().and_then(node))
    }

    fn narrow_with(&self, predicate: impl Fn(&Tiddler) -> bool + 'static) -> Self {
        self.narrow(Ast::Function(Rc::new(predicate)))
    }

    /// Narrow by a filter expression.
    pub fn find(&self, filter: &str) -> std::result::Result<Self, ParseError> {
        Ok(self.narrow(parse(filter)?))
    }

    /// Narrow by a named operation. Unknown names are attribute lookups.
    pub fn find_by(&self, name: &str, arg: Option<&str>) -> Self {
        let value = arg.unwrap_or_default();
        match name {
            "tag" => self.tag(value),
            "title" => self.title(value),
            "text" => self.text(value),
            "bag" => self.bag(value),
            "space" => self.space(match arg {
                Some(space) => SpaceFilter::Named(space.to_string()),
                None => SpaceFilter::Current,
            }),
            "recipe" => self.recipe(arg),
            "dirty" => self.dirty(arg.and_then(|s| match DateTime::parse_from_rfc3339(s) {
                Ok(time) => Some(time.with_timezone(&Utc)),
                Err(error) => {
                    warn!(arg = s, %error, "ignoring bad dirty timestamp");
                    None
                }
            })),
            "sort" => self.sort(value),
            "limit" => {
                let count = arg.and_then(|s| match s.trim().parse::<usize>() {
                    Ok(count) => Some(count),
                    Err(error) => {
                        warn!(arg = s, %error, "ignoring bad limit");
                        None
                    }
                });
                self.limit(count.unwrap_or(usize::MAX))
            }
            "attr" => {
                let (name, value) = split_attr(value);
                self.attr(name, value)
            }
            "not" => {
                let (name, value) = split_attr(value);
                self.not(name, value)
            }
            attr => self.attr(attr, arg),
        }
    }

    /// Narrow by an arbitrary predicate.
    pub fn filter(&self, predicate: impl Fn(&Tiddler) -> bool + 'static) -> Self {
        self.narrow_with(predicate)
    }

    pub fn tag(&self, tag: &str) -> Self {
        self.narrow(Ast::Match(Leaf::Tag(tag.to_string())))
    }

    pub fn title(&self, title: &str) -> Self {
        self.narrow(Ast::Match(Leaf::Title(title.to_string())))
    }

    pub fn text(&self, substring: &str) -> Self {
        self.narrow(Ast::Match(Leaf::Text(substring.to_string())))
    }

    /// Tiddlers with the attribute set, or set to `value`.
    pub fn attr(&self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.narrow(Ast::Match(Leaf::Field {
                field: name.to_string(),
                value: value.to_string(),
                negated: false,
            })),
            None => {
                let name = name.to_string();
                self.narrow_with(move |t: &Tiddler| has_attr(t, &name))
            }
        }
    }

    /// The complement of [`Collection::attr`].
    pub fn not(&self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.narrow(Ast::Match(Leaf::Field {
                field: name.to_string(),
                value: value.to_string(),
                negated: true,
            })),
            None => {
                let name = name.to_string();
                self.narrow_with(move |t: &Tiddler| !has_attr(t, &name))
            }
        }
    }

    pub fn bag(&self, name: &str) -> Self {
        let name = name.to_string();
        self.narrow_with(move |t: &Tiddler| t.bag_name() == Some(name.as_str()))
    }

    /// Filter by originating space.
    ///
    /// With no current location yet, nothing is in the current space.
    pub fn space(&self, which: SpaceFilter) -> Self {
        let current = self
            .store
            .current_location()
            .map(|location| location.space_name().to_string());
        let node = match (which, current) {
            (SpaceFilter::Named(space), _) => Ast::Match(Leaf::Space(space)),
            (SpaceFilter::Current, Some(space)) => Ast::Match(Leaf::Space(space)),
            (SpaceFilter::NotCurrent, Some(space)) => Ast::Match(Leaf::Space(space)).negate(),
            (SpaceFilter::Current, None) => Ast::function(Rc::new(|_: &Tiddler| false)),
            (SpaceFilter::NotCurrent, None) => Ast::everything(),
        };
        self.narrow(node)
    }

    /// Tiddlers read through a recipe, by default the current location's.
    pub fn recipe(&self, name: Option<&str>) -> Self {
        let wanted = match name {
            Some(name) => Some(name.to_string()),
            None => self
                .store
                .current_location()
                .filter(|location| location.is_recipe())
                .map(|location| location.name),
        };
        self.narrow_with(move |t: &Tiddler| match (&wanted, &t.recipe) {
            (Some(wanted), Some(recipe)) => recipe.name == *wanted,
            _ => false,
        })
    }

    /// Tiddlers never synced, or, given a time, last synced before it.
    pub fn dirty(&self, since: Option<DateTime<Utc>>) -> Self {
        self.narrow_with(move |t: &Tiddler| match t.last_sync {
            None => true,
            Some(synced) => since.is_some_and(|since| synced < since),
        })
    }

    /// Stable sort by a comma-separated list of attributes. A leading `-`
    /// sorts that attribute descending. Missing values sort first.
    pub fn sort(&self, order: &str) -> Self {
        let keys: Vec<(String, bool)> = order
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| match key.strip_prefix('-') {
                Some(name) => (name.to_string(), true),
                None => (key.to_string(), false),
            })
            .collect();

        self.sort_by(|left, right| {
            for (name, descending) in &keys {
                let ordering = compare_attrs(
                    sort_value(left, name).as_ref(),
                    sort_value(right, name).as_ref(),
                );
                let ordering = if *descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        })
    }

    pub fn sort_by(&self, compare: impl FnMut(&Tiddler, &Tiddler) -> Ordering) -> Self {
        let mut sorted = self.tiddlers.clone();
        sorted.sort_by(compare);
        self.with_tiddlers(sorted, self.ast.clone())
    }

    pub fn limit(&self, count: usize) -> Self {
        let kept = self.tiddlers.iter().take(count).cloned().collect();
        self.with_tiddlers(kept, self.ast.clone())
    }

    /// One tiddler per title, in first-seen order. An unsynced copy wins
    /// over a synced one.
    pub fn unique(&self) -> Self {
        let mut by_title: IndexMap<&str, &Tiddler> = IndexMap::new();
        for tiddler in &self.tiddlers {
            match by_title.entry(tiddler.title.as_str()) {
                Entry::Vacant(slot) => {
                    slot.insert(tiddler);
                }
                Entry::Occupied(mut slot) => {
                    if slot.get().is_synced() && !tiddler.is_synced() {
                        slot.insert(tiddler);
                    }
                }
            }
        }
        let kept = by_title.into_values().cloned().collect();
        self.with_tiddlers(kept, self.ast.clone())
    }

    /// Transform every tiddler. The result has no filter history.
    pub fn map(&self, f: impl FnMut(&Tiddler) -> Tiddler) -> Self {
        let mapped = self.tiddlers.iter().map(f).collect();
        self.with_tiddlers(mapped, Ast::everything())
    }

    pub fn reduce<A>(&self, init: A, f: impl FnMut(A, &Tiddler) -> A) -> A {
        self.tiddlers.iter().fold(init, f)
    }

    pub fn each(&self, mut f: impl FnMut(&Tiddler, usize)) -> &Self {
        for (index, tiddler) in self.tiddlers.iter().enumerate() {
            f(tiddler, index);
        }
        self
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// The filter history compiled into a test.
    pub fn tester(&self) -> Tester {
        compile(&self.ast)
    }

    /// Subscribe to future changes of tiddlers this collection's filter
    /// accepts. The returned predicate unbinds it again.
    pub fn bind(&self, listener: Listener) -> Predicate {
        let predicate = self.tester().predicate();
        self.store.bind_filter(Rc::clone(&predicate), listener);
        predicate
    }

    /// Save every tiddler in the collection, in order.
    pub async fn save(&self) -> Vec<Result<Tiddler>> {
        let mut results = Vec::with_capacity(self.tiddlers.len());
        for tiddler in &self.tiddlers {
            results.push(self.store.save(tiddler).await);
        }
        results
    }

    /// Add a tiddler to the store and to this collection.
    pub async fn add(&mut self, tiddler: Tiddler) -> Result<Tiddler> {
        self.tiddlers.push(tiddler.clone());
        self.store.add(tiddler).await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.tiddlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiddlers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tiddler> {
        self.tiddlers.iter()
    }

    pub fn first(&self) -> Option<&Tiddler> {
        self.tiddlers.first()
    }

    pub fn titles(&self) -> Vec<&str> {
        self.tiddlers.iter().map(|t| t.title.as_str()).collect()
    }

    pub fn into_vec(self) -> Vec<Tiddler> {
        self.tiddlers
    }
}

fn has_attr(tiddler: &Tiddler, name: &str) -> bool {
    tiddler.attr(name).is_some_and(|value| value.is_truthy())
}

fn sort_value(tiddler: &Tiddler, name: &str) -> Option<AttrValue> {
    tiddler.attr(name).filter(AttrValue::is_truthy)
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("titles", &self.titles())
            .field("ast", &self.ast)
            .finish()
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Tiddler;
    type IntoIter = std::slice::Iter<'a, Tiddler>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiddlers.iter()
    }
}

impl IntoIterator for Collection {
    type Item = Tiddler;
    type IntoIter = std::vec::IntoIter<Tiddler>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiddlers.into_iter()
    }
}

/// Split an `attr`/`not` argument into the attribute name and optional value.
fn split_attr(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once('=') {
        Some((name, value)) => (name.trim(), Some(value.trim())),
        None => (arg.trim(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Container;
    use crate::remote::MemRemote;
    use chrono::Duration;

    fn collection(tiddlers: Vec<Tiddler>) -> Collection {
        Store::new(Rc::new(MemRemote::new())).collection(tiddlers)
    }

    fn synced(mut tiddler: Tiddler) -> Tiddler {
        tiddler.last_sync = Some(Utc::now());
        tiddler
    }

    #[test]
    fn test_narrowing_extends_the_tree() {
        let c = collection(vec![
            Tiddler::new("A").with_tags(["cat"]),
            Tiddler::new("B").with_tags(["cat", "dog"]),
            Tiddler::new("C").with_tags(["dog"]),
        ]);
        let narrowed = c.find("#cat").unwrap().tag("dog");
        assert_eq!(narrowed.titles(), vec!["B"]);

        let tester = narrowed.tester();
        assert!(tester.test(&Tiddler::new("Z").with_tags(["dog", "cat"])));
        assert!(!tester.test(&Tiddler::new("Z").with_tags(["dog"])));
    }

    #[test]
    fn test_parse_errors_surface() {
        let c = collection(vec![]);
        assert_eq!(c.find("(#cat").unwrap_err(), ParseError::UnmatchedBrackets);
    }

    #[test]
    fn test_find_by_attr_and_not_names() {
        let c = collection(vec![
            Tiddler::new("A").with_field("cake", "lie"),
            Tiddler::new("B").with_field("cake", "truth"),
            Tiddler::new("C"),
        ]);
        assert_eq!(c.find_by("attr", Some("cake")).titles(), vec!["A", "B"]);
        assert_eq!(c.find_by("attr", Some("cake=lie")).titles(), vec!["A"]);
        assert_eq!(c.find_by("not", Some("cake")).titles(), vec!["C"]);
        assert_eq!(c.find_by("not", Some("cake=lie")).titles(), vec!["B", "C"]);
    }

    #[test]
    fn test_find_by_ignores_bad_arguments() {
        let c = collection(vec![Tiddler::new("A"), Tiddler::new("B")]);
        assert_eq!(c.find_by("limit", Some("lots")).len(), 2);
        assert_eq!(c.find_by("limit", Some("1")).len(), 1);
        assert_eq!(c.find_by("dirty", Some("yesterday")).len(), 2);
    }

    #[test]
    fn test_attr_and_not() {
        let c = collection(vec![
            Tiddler::new("A").with_field("cake", "lie"),
            Tiddler::new("B").with_field("cake", "truth"),
            Tiddler::new("C"),
        ]);
        assert_eq!(c.attr("cake", None).len(), 2);
        assert_eq!(c.attr("cake", Some("lie")).titles(), vec!["A"]);
        assert_eq!(c.not("cake", Some("lie")).titles(), vec!["B", "C"]);
        assert_eq!(c.not("cake", None).titles(), vec!["C"]);
        assert_eq!(c.find_by("cake", Some("truth")).titles(), vec!["B"]);
    }

    #[test]
    fn test_space_without_location() {
        let c = collection(vec![Tiddler::new("A").with_bag("foo_public")]);
        assert!(c.space(SpaceFilter::Current).is_empty());
        assert_eq!(c.space(SpaceFilter::NotCurrent).len(), 1);
        assert_eq!(c.space(SpaceFilter::Named("foo".into())).len(), 1);
    }

    #[test]
    fn test_recipe_and_bag() {
        let mut via_recipe = Tiddler::new("A").with_bag("foo_public");
        via_recipe.recipe = Some(Container::recipe("foo_public"));
        let c = collection(vec![via_recipe, Tiddler::new("B").with_bag("bar_public")]);
        assert_eq!(c.recipe(Some("foo_public")).titles(), vec!["A"]);
        assert!(c.recipe(None).is_empty());
        assert_eq!(c.bag("bar_public").titles(), vec!["B"]);
    }

    #[test]
    fn test_dirty() {
        let mut stale = synced(Tiddler::new("Stale"));
        stale.last_sync = Some(Utc::now() - Duration::hours(2));
        let c = collection(vec![Tiddler::new("Draft"), synced(Tiddler::new("Fresh")), stale]);
        assert_eq!(c.dirty(None).titles(), vec!["Draft"]);
        let an_hour_ago = Utc::now() - Duration::hours(1);
        assert_eq!(c.dirty(Some(an_hour_ago)).titles(), vec!["Draft", "Stale"]);
    }

    #[test]
    fn test_sort_keys_and_direction() {
        let c = collection(vec![
            Tiddler::new("foo").with_modifier("zzz"),
            Tiddler::new("Bar"),
            Tiddler::new("Foo").with_modifier("bengillies"),
            Tiddler::new("Fluffy"),
        ]);
        let sorted = c.sort("title, -modifier");
        assert_eq!(sorted.titles(), vec!["Bar", "Fluffy", "foo", "Foo"]);

        let by_modifier = c.sort("modifier");
        assert_eq!(by_modifier.titles(), vec!["Bar", "Fluffy", "Foo", "foo"]);
    }

    #[test]
    fn test_sort_and_limit_keep_the_tree() {
        let c = collection(vec![Tiddler::new("B").with_tags(["x"]), Tiddler::new("A").with_tags(["x"])]);
        let narrowed = c.tag("x");
        assert_eq!(narrowed.sort("title").ast(), narrowed.ast());
        assert_eq!(narrowed.limit(1).ast(), narrowed.ast());
        assert_eq!(narrowed.limit(1).len(), 1);
        assert!(narrowed.map(|t| t.clone()).ast().is_everything());
    }

    #[test]
    fn test_unique_prefers_unsynced() {
        let c = collection(vec![
            synced(Tiddler::new("Foo").with_text("server")),
            Tiddler::new("Bar"),
            Tiddler::new("Foo").with_text("local"),
        ]);
        let unique = c.unique();
        assert_eq!(unique.titles(), vec!["Foo", "Bar"]);
        assert_eq!(unique.first().unwrap().text, "local");
    }

    #[test]
    fn test_reduce_map_each() {
        let c = collection(vec![Tiddler::new("A").with_text("12"), Tiddler::new("B").with_text("345")]);
        assert_eq!(c.reduce(0, |n, t| n + t.text.len()), 5);
        let shouted = c.map(|t| Tiddler::new(t.title.to_uppercase()));
        assert_eq!(shouted.titles(), vec!["A", "B"]);

        let mut seen = Vec::new();
        c.each(|t, i| seen.push(format!("{i}:{}", t.title)));
        assert_eq!(seen, vec!["0:A", "1:B"]);
    }
}
