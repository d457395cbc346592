use std::rc::Rc;

use crate::defaults::Defaults;
use crate::model::{Container, Tiddler};
use crate::remote::{Discovery, MemRemote};
use crate::store::Store;

/// The recipe the fixture server reports as the current context.
pub const CURRENT_RECIPE: &str = "foo_public";

/// Every bag the fixtures live in, in recipe order.
pub const FIXTURE_BAGS: [&str; 6] = [
    "dogs_public",
    "bunnies_public",
    "hello_public",
    "cats_public",
    "bar_public",
    "foo_public",
];

/// Six tiddlers spread over six spaces.
pub fn fixture_tiddlers() -> Vec<Tiddler> {
    let mut bar = Tiddler::new("Bar")
        .with_tags(["cat", "rabbit"])
        .with_text("Bar was here")
        .with_bag("bar_public");
    bar.content_type = Some("text/x-tiddler".to_string());

    let mut woof = Tiddler::new("Woof")
        .with_text("Woof woof, I'm a dog, woof woof")
        .with_bag("dogs_public");
    woof.recipe = Some(Container::recipe("foo"));

    vec![
        Tiddler::new("Foo")
            .with_tags(["cat", "dog"])
            .with_field("cake", "lie")
            .with_modifier("bengillies")
            .with_text("Foo was 'ere")
            .with_bag("foo_public"),
        bar,
        Tiddler::new("Fluffy")
            .with_tags(["cat"])
            .with_field("cake", "lie")
            .with_text("Meow meow")
            .with_bag("cats_public"),
        Tiddler::new("HelloThere")
            .with_tags(["introduction"])
            .with_field("cake", "lie")
            .with_modifier("bengillies")
            .with_text("Welcome")
            .with_bag("hello_public"),
        Tiddler::new("bunnywunny")
            .with_tags(["dog", "rabbit"])
            .with_field("cake", "lie")
            .with_modifier("bengillies")
            .with_bag("bunnies_public"),
        woof,
    ]
}

/// A server whose current context is the `foo_public` recipe over every
/// fixture bag. Nothing is seeded.
pub fn fixture_remote() -> MemRemote {
    MemRemote::new()
        .with_discovery(Discovery::recipe(CURRENT_RECIPE))
        .with_recipe(CURRENT_RECIPE, FIXTURE_BAGS)
}

pub struct TestEnv {
    pub remote: Rc<MemRemote>,
    pub store: Store,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    /// An empty store that discovers its defaults from [`fixture_remote`].
    pub fn new() -> Self {
        let remote = Rc::new(fixture_remote());
        let store = Store::new(remote.clone());
        Self { remote, store }
    }

    /// A store with the defaults fixed to `foo_public`; discovery never runs.
    pub fn with_fixed_defaults() -> Self {
        let remote = Rc::new(fixture_remote());
        let defaults = Defaults::pair(
            Container::recipe(CURRENT_RECIPE),
            Container::bag(CURRENT_RECIPE),
        );
        let store = Store::builder(remote.clone())
            .defaults(defaults)
            .build()
            .expect("fixed defaults need no configuration");
        Self { remote, store }
    }

    /// Seed the fixtures server-side and refresh them into the synced tier.
    pub async fn with_fixtures() -> Self {
        let env = Self::new();
        for tiddler in fixture_tiddlers() {
            env.remote.seed(tiddler);
        }
        env.store
            .refresh()
            .await
            .expect("fixture refresh should succeed");
        env
    }
}
