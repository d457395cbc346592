//! # Domain Model: Tiddlers and Containers
//!
//! This module defines the data the store moves around: [`Tiddler`] (a single
//! document), [`Container`] (where a tiddler lives) and [`TiddlerRef`] (how
//! callers point at a tiddler).
//!
//! ## Containers
//!
//! A container is either a **bag** (one physical collection of tiddlers) or a
//! **recipe** (an ordered stack of bags read as one merged view, later bags
//! overriding earlier ones). The kind is fixed at construction through
//! [`ContainerKind`]; nothing downstream inspects a container to guess what it
//! is. Containers compare equal by name.
//!
//! ## Sync State
//!
//! `last_sync` is `None` exactly when a tiddler is unsynced: a pending local
//! edit, or something built offline. The synced tier stamps it on insert and
//! the modified tier clears it.
//!
//! ## Attribute Access
//!
//! Filters and sorting look attributes up by name through [`Tiddler::attr`]:
//! top-level attributes first, then the free-form `fields` map. An empty
//! top-level attribute falls through to `fields`, so a custom field can
//! shadow an unset built-in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::StoreError;

/// Suffixes that mark a bag or recipe as one facet of a space.
pub const SPACE_SUFFIXES: [&str; 3] = ["_public", "_private", "_archive"];

/// Strip a trailing `_public`, `_private` or `_archive` from a container name.
pub fn strip_space_suffix(name: &str) -> &str {
    SPACE_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(name)
}

fn default_host() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Bag,
    Recipe,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Bag => write!(f, "bag"),
            ContainerKind::Recipe => write!(f, "recipe"),
        }
    }
}

/// A bag or recipe on the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub kind: ContainerKind,
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    /// Bags making up a recipe, lowest precedence first. Empty for bags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bags: Vec<String>,
}

impl Container {
    pub fn bag(name: impl Into<String>) -> Self {
        Self {
            kind: ContainerKind::Bag,
            name: name.into(),
            host: default_host(),
            bags: Vec::new(),
        }
    }

    pub fn recipe(name: impl Into<String>) -> Self {
        Self {
            kind: ContainerKind::Recipe,
            name: name.into(),
            host: default_host(),
            bags: Vec::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bag stack of a recipe.
    pub fn with_bags<I, S>(mut self, bags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bags = bags.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_bag(&self) -> bool {
        self.kind == ContainerKind::Bag
    }

    pub fn is_recipe(&self) -> bool {
        self.kind == ContainerKind::Recipe
    }

    /// Stable key for this container's listing, e.g. `/bags/foo_public`.
    pub fn route(&self) -> String {
        format!(
            "{}/{}s/{}",
            self.host.trim_end_matches('/'),
            self.kind,
            self.name
        )
    }

    /// The space this container belongs to (name without its facet suffix).
    pub fn space_name(&self) -> &str {
        strip_space_suffix(&self.name)
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Container {}

impl Hash for Container {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Parses `bag:NAME` or `recipe:NAME`, the form used in configuration.
impl FromStr for Container {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once(':')
            .ok_or_else(|| StoreError::Config(format!("expected bag:NAME or recipe:NAME, got {s}")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Config(format!("container name missing in {s}")));
        }
        match kind.trim() {
            "bag" => Ok(Container::bag(name)),
            "recipe" => Ok(Container::recipe(name)),
            other => Err(StoreError::Config(format!("unknown container kind: {other}"))),
        }
    }
}

/// A single document.
///
/// `Clone` is the explicit, field-by-field deep copy every tier relies on:
/// stored values never share state with what callers hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tiddler {
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Opaque revision marker, only ever compared for equality.
    #[serde(default)]
    pub revision: Option<u64>,
    #[serde(default)]
    pub modifier: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub bag: Option<Container>,
    #[serde(default)]
    pub recipe: Option<Container>,
    #[serde(default, rename = "lastSync")]
    pub last_sync: Option<DateTime<Utc>>,
}

impl Tiddler {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// A tiddler addressed through `container`: bags set `bag`, recipes set `recipe`.
    pub fn in_container(title: impl Into<String>, container: Container) -> Self {
        let mut tiddler = Self::new(title);
        tiddler.place_in(container);
        tiddler
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_bag(mut self, name: impl Into<String>) -> Self {
        self.bag = Some(Container::bag(name));
        self
    }

    pub fn with_modifier(mut self, modifier: impl Into<String>) -> Self {
        self.modifier = Some(modifier.into());
        self
    }

    /// Attach the tiddler to a container according to the container's kind.
    pub fn place_in(&mut self, container: Container) {
        match container.kind {
            ContainerKind::Bag => self.bag = Some(container),
            ContainerKind::Recipe => self.recipe = Some(container),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.last_sync.is_some()
    }

    /// Whether the tiddler knows where it lives on the remote.
    pub fn has_container(&self) -> bool {
        self.bag.is_some() || self.recipe.is_some()
    }

    pub fn bag_name(&self) -> Option<&str> {
        self.bag.as_ref().map(|b| b.name.as_str())
    }

    /// The space the tiddler originates from, derived from its bag.
    pub fn space(&self) -> Option<&str> {
        self.bag.as_ref().map(Container::space_name)
    }

    /// Look up an attribute by name: top-level first, then `fields`.
    pub fn attr(&self, name: &str) -> Option<AttrValue> {
        let top = match name {
            "title" => Some(AttrValue::Text(self.title.clone())),
            "text" => Some(AttrValue::Text(self.text.clone())),
            "tags" => Some(AttrValue::List(self.tags.clone())),
            "permissions" => Some(AttrValue::List(self.permissions.clone())),
            "revision" => self.revision.map(AttrValue::Number),
            "modifier" => self.modifier.clone().map(AttrValue::Text),
            "creator" => self.creator.clone().map(AttrValue::Text),
            "modified" => self.modified.clone().map(AttrValue::Text),
            "created" => self.created.clone().map(AttrValue::Text),
            "type" => self.content_type.clone().map(AttrValue::Text),
            "bag" => self.bag.as_ref().map(|b| AttrValue::Text(b.name.clone())),
            "recipe" => self.recipe.as_ref().map(|r| AttrValue::Text(r.name.clone())),
            _ => None,
        };
        match top {
            Some(value) if value.is_truthy() => Some(value),
            _ => self
                .fields
                .get(name)
                .map(|v| AttrValue::Text(v.clone()))
                .or(top),
        }
    }
}

/// Runtime value of a tiddler attribute, as seen by filters and sorting.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum AttrValue {
    Number(u64),
    Text(String),
    List(Vec<String>),
}

impl AttrValue {
    /// Empty strings and lists count as absent.
    pub fn is_truthy(&self) -> bool {
        match self {
            AttrValue::Number(_) => true,
            AttrValue::Text(s) => !s.is_empty(),
            AttrValue::List(v) => !v.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Exact equality against a filter operand. Lists never equal a scalar.
    pub fn matches_str(&self, value: &str) -> bool {
        match self {
            AttrValue::Text(s) => s == value,
            AttrValue::Number(n) => n.to_string() == value,
            AttrValue::List(_) => false,
        }
    }

    /// Lowercased copy used for case-insensitive ordering.
    fn folded(&self) -> AttrValue {
        match self {
            AttrValue::Text(s) => AttrValue::Text(s.to_lowercase()),
            AttrValue::List(v) => AttrValue::List(v.iter().map(|s| s.to_lowercase()).collect()),
            AttrValue::Number(n) => AttrValue::Number(*n),
        }
    }
}

/// Order two optional attribute values: missing sorts before anything present,
/// strings compare case-insensitively.
pub fn compare_attrs(left: Option<&AttrValue>, right: Option<&AttrValue>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(l), Some(r)) => l
            .folded()
            .partial_cmp(&r.folded())
            .unwrap_or(Ordering::Equal),
    }
}

/// How a caller points at a tiddler: by title alone, or with a full document.
#[derive(Debug, Clone, PartialEq)]
pub enum TiddlerRef {
    Title(String),
    Tiddler(Tiddler),
}

impl TiddlerRef {
    pub fn title(&self) -> &str {
        match self {
            TiddlerRef::Title(title) => title,
            TiddlerRef::Tiddler(tiddler) => &tiddler.title,
        }
    }

    /// The document passed in by the caller, if one was.
    pub fn document(&self) -> Option<&Tiddler> {
        match self {
            TiddlerRef::Title(_) => None,
            TiddlerRef::Tiddler(tiddler) => Some(tiddler),
        }
    }

    /// A tiddler usable as a lookup key in a tier.
    pub fn as_tiddler(&self) -> Tiddler {
        match self {
            TiddlerRef::Title(title) => Tiddler::new(title.clone()),
            TiddlerRef::Tiddler(tiddler) => tiddler.clone(),
        }
    }
}

impl From<&str> for TiddlerRef {
    fn from(title: &str) -> Self {
        TiddlerRef::Title(title.to_string())
    }
}

impl From<String> for TiddlerRef {
    fn from(title: String) -> Self {
        TiddlerRef::Title(title)
    }
}

impl From<Tiddler> for TiddlerRef {
    fn from(tiddler: Tiddler) -> Self {
        TiddlerRef::Tiddler(tiddler)
    }
}

impl From<&Tiddler> for TiddlerRef {
    fn from(tiddler: &Tiddler) -> Self {
        TiddlerRef::Tiddler(tiddler.clone())
    }
}
