use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tempfile::TempDir;
use tiddlystore::remote::Op;
use tiddlystore::store::cache::FileCache;
use tiddlystore::test_utils::{fixture_tiddlers, TestEnv, CURRENT_RECIPE};
use tiddlystore::{listener, EventKind, GetOptions, Store, StoreConfig, StoreError, Tiddler};

fn counter(store: &Store, kind: EventKind, name: Option<&str>) -> Rc<Cell<usize>> {
    let count = Rc::new(Cell::new(0));
    let seen = Rc::clone(&count);
    store.bind(kind, name, listener(move |_| seen.set(seen.get() + 1)));
    count
}

#[tokio::test]
async fn test_concurrent_discovery_is_single_flight() {
    let env = TestEnv::new();
    env.remote.hold(Op::Discover);

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let handles: Vec<_> = (0..3).map(|_| env.store.spawn_discovery()).collect();
            tokio::task::yield_now().await;
            env.remote.release(Op::Discover);

            let mut results = Vec::new();
            for handle in handles {
                results.push(handle.await.unwrap().unwrap());
            }
            assert_eq!(env.remote.calls(Op::Discover), 1);
            assert!(results.iter().all(|d| *d == results[0]));
            assert_eq!(results[0].pull_from.name, CURRENT_RECIPE);
        })
        .await;
}

#[tokio::test]
async fn test_resolving_defaults_announces_location_once() {
    let env = TestEnv::new();
    let recipes = counter(&env.store, EventKind::Recipe, Some(CURRENT_RECIPE));

    env.store.get_defaults().await.unwrap();
    env.store.get_defaults().await.unwrap();
    assert_eq!(recipes.get(), 1);
    assert!(env.store.current_location().unwrap().is_recipe());
}

#[tokio::test]
async fn test_refresh_announces_each_bag_and_tiddler_once() {
    let env = TestEnv::new();
    for tiddler in fixture_tiddlers() {
        env.remote.seed(tiddler);
    }
    let bags = counter(&env.store, EventKind::Bag, None);
    let tiddlers = counter(&env.store, EventKind::Tiddler, None);

    env.store.refresh().await.unwrap();
    env.store.refresh().await.unwrap();
    assert_eq!(bags.get(), 6);
    assert_eq!(tiddlers.get(), 6);
}

#[tokio::test]
async fn test_refresh_drops_tiddlers_deleted_on_server() {
    let env = TestEnv::with_fixtures().await;
    let deleted = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&deleted);
    env.store.bind(
        EventKind::Tiddler,
        None,
        listener(move |change| {
            if change.is_deleted() {
                log.borrow_mut().push(change.tiddler().unwrap().title.clone());
            }
        }),
    );

    env.remote.remove_server_side("cats_public", "Fluffy");
    let refreshed = env.store.refresh().await.unwrap();
    assert_eq!(refreshed.len(), 5);
    assert_eq!(env.store.all().len(), 5);
    assert!(env.store.get_local("Fluffy").is_none());
    assert_eq!(*deleted.borrow(), vec!["Fluffy"]);
}

#[tokio::test]
async fn test_refresh_drops_saved_tiddler_deleted_on_server() {
    let env = TestEnv::with_fixtures().await;
    env.store.add(Tiddler::new("Draft")).await.unwrap();
    let saved = env.store.save("Draft").await.unwrap();
    assert_eq!(saved.bag_name(), Some("foo_public"));
    assert!(saved.recipe.is_none());
    let deletions = counter(&env.store, EventKind::Tiddler, Some("Draft"));

    env.remote.remove_server_side("foo_public", "Draft");
    env.store.refresh().await.unwrap();
    assert!(env.store.get_local("Draft").is_none());
    assert_eq!(env.store.all().len(), 6);
    assert_eq!(deletions.get(), 1);
}

#[tokio::test]
async fn test_save_race_keeps_newer_edit_on_failure() {
    let env = TestEnv::with_fixed_defaults();
    let store = env.store.clone();
    store
        .add(Tiddler::new("Draft").with_bag("foo_public").with_text("v1"))
        .await
        .unwrap();
    env.remote.hold(Op::Put);
    env.remote.fail(Op::Put);

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let saving = tokio::task::spawn_local({
                let store = store.clone();
                async move { store.save("Draft").await }
            });
            tokio::task::yield_now().await;

            store
                .add(Tiddler::new("Draft").with_bag("foo_public").with_text("v2"))
                .await
                .unwrap();
            env.remote.release(Op::Put);

            let result = saving.await.unwrap();
            assert!(matches!(result, Err(StoreError::Save { .. })));
        })
        .await;

    let pending = store.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].text, "v2");
}

#[tokio::test]
async fn test_save_race_keeps_newer_edit_on_success() {
    let env = TestEnv::with_fixed_defaults();
    let store = env.store.clone();
    store
        .add(Tiddler::new("Draft").with_bag("foo_public").with_text("v1"))
        .await
        .unwrap();
    env.remote.hold(Op::Put);

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let saving = tokio::task::spawn_local({
                let store = store.clone();
                async move { store.save("Draft").await }
            });
            tokio::task::yield_now().await;

            store
                .add(Tiddler::new("Draft").with_bag("foo_public").with_text("v2"))
                .await
                .unwrap();
            env.remote.release(Op::Put);

            let saved = saving.await.unwrap().unwrap();
            assert_eq!(saved.text, "v1");
        })
        .await;

    assert_eq!(store.get_local("Draft").unwrap().text, "v2");
    assert_eq!(store.pending().len(), 1);
    assert_eq!(
        env.remote.stored("foo_public", "Draft").unwrap().text,
        "v1"
    );
}

#[tokio::test]
async fn test_failed_save_of_unpending_document_is_kept() {
    let env = TestEnv::with_fixed_defaults();
    env.remote.fail(Op::Put);

    let doc = Tiddler::new("Loose").with_bag("foo_public").with_text("unsaved");
    let err = env.store.save(&doc).await.unwrap_err();
    assert!(matches!(err, StoreError::Save { .. }));
    assert_eq!(env.store.pending(), vec![doc]);
}

#[tokio::test]
async fn test_save_all() {
    let env = TestEnv::with_fixed_defaults();
    assert!(matches!(env.store.save_all().await, Err(StoreError::Empty)));

    env.store.add(Tiddler::new("One")).await.unwrap();
    env.store.add(Tiddler::new("Two")).await.unwrap();
    let results = env.store.save_all().await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(Result::is_ok));
    assert!(env.store.pending().is_empty());
    assert!(env.remote.stored(CURRENT_RECIPE, "Two").is_some());

    assert!(env.store.save_all().await.unwrap_err().is_benign());
}

#[tokio::test]
async fn test_destroy_raises_one_deleted_event() {
    let env = TestEnv::with_fixtures().await;
    env.store
        .add(
            Tiddler::new("Foo")
                .with_bag("foo_public")
                .with_text("local edit"),
        )
        .await
        .unwrap();
    let events = counter(&env.store, EventKind::Tiddler, Some("Foo"));

    let destroyed = env.store.destroy("Foo").await.unwrap();
    assert_eq!(destroyed.title, "Foo");
    assert_eq!(events.get(), 1);
    assert!(env.store.get_local("Foo").is_none());
    assert!(env.remote.stored("foo_public", "Foo").is_none());
    assert!(matches!(
        env.store.destroy("Foo").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_failed_destroy_keeps_local_state() {
    let env = TestEnv::with_fixtures().await;
    env.remote.fail(Op::Delete);
    let err = env.store.destroy("Woof").await.unwrap_err();
    assert!(matches!(err, StoreError::Delete { .. }));
    assert!(env.store.get_local("Woof").is_some());
}

#[tokio::test]
async fn test_destroy_pending_only_never_calls_server() {
    let env = TestEnv::with_fixed_defaults();
    env.store.add(Tiddler::new("Scratch")).await.unwrap();
    env.store.destroy("Scratch").await.unwrap();
    assert_eq!(env.remote.calls(Op::Delete), 0);
    assert!(env.store.pending().is_empty());
}

#[tokio::test]
async fn test_search_results_are_synced_and_rerun() {
    let env = TestEnv::with_fixtures().await;
    let found = env.store.search("woof").await.unwrap();
    assert_eq!(found.titles(), vec!["Woof"]);
    assert!(found.first().unwrap().is_synced());

    let lists = env.remote.calls(Op::List);
    env.store.refresh().await.unwrap();
    assert_eq!(env.remote.calls(Op::Search), 2);
    assert_eq!(env.remote.calls(Op::List), lists + 1);
}

#[tokio::test]
async fn test_refresh_failure_is_reported() {
    let env = TestEnv::new();
    env.remote.fail(Op::List);
    let err = env.store.refresh().await.unwrap_err();
    assert!(matches!(err, StoreError::RetrieveTiddlers { .. }));
    assert_eq!(err.remote().unwrap().status, Some(500));
}

#[tokio::test]
async fn test_discovery_failure_reaches_writers() {
    let env = TestEnv::new();
    env.remote.fail(Op::Discover);
    let err = env.store.add(Tiddler::new("Orphan")).await.unwrap_err();
    assert!(matches!(err, StoreError::Discovery { .. }));
    // The bagless copy is kept locally.
    assert_eq!(env.store.pending().len(), 1);

    env.remote.recover(Op::Discover);
    let placed = env.store.add(Tiddler::new("Orphan")).await.unwrap();
    assert_eq!(placed.bag_name(), Some("foo_public"));
    assert_eq!(env.store.pending().len(), 1);
}

#[tokio::test]
async fn test_pending_edits_survive_restart() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        cache_dir: Some(dir.path().to_path_buf()),
        pull_from: Some(format!("bag:{CURRENT_RECIPE}")),
        ..Default::default()
    };

    {
        let env = TestEnv::new();
        let store = Store::builder(env.remote.clone())
            .config(config.clone())
            .build()
            .unwrap();
        store.add(Tiddler::new("Kept").with_text("draft")).await.unwrap();
        store.add(Tiddler::new("Gone").with_text("draft")).await.unwrap();
        store.remove("Gone");
    }

    let env = TestEnv::new();
    let store = Store::builder(env.remote.clone())
        .config(config)
        .build()
        .unwrap();
    let pending = store.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].title, "Kept");
    assert_eq!(pending[0].bag_name(), Some(CURRENT_RECIPE));
    assert_eq!(FileCache::new(dir.path()).root(), dir.path());
}

#[tokio::test]
async fn test_get_from_server_refreshes_synced_copy() {
    let env = TestEnv::with_fixtures().await;
    let mut edited = env.remote.stored("hello_public", "HelloThere").unwrap();
    edited.text = "Updated on the server".to_string();
    env.remote.seed(edited);

    assert_eq!(env.store.get_local("HelloThere").unwrap().text, "Welcome");
    let fresh = env.store.get("HelloThere", GetOptions::fresh()).await.unwrap();
    assert_eq!(fresh.text, "Updated on the server");
    assert_eq!(
        env.store.get_local("HelloThere").unwrap().text,
        "Updated on the server"
    );
}
