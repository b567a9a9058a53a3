//! Live execution against the in-memory store.

use lgql_runtime::{
    Context, DataMessage, Document, ExecutableSchema, Executor, LiveScope, MemoryStore,
    Publication, PublicationSink, Request, ResolverMap, Response,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const ENTRIES: &str = r#"
    type User { _id: ID! name: String email: String }
    type Entry { _id: ID! content: String author: User @cursor }
    type Query { allEntries: [Entry] @cursor }
"#;

fn fields(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn added(collection: &str, id: &str, value: Value) -> DataMessage {
    DataMessage::Added {
        collection: collection.into(),
        id: id.into(),
        fields: fields(value),
    }
}

fn removed(collection: &str, id: &str) -> DataMessage {
    DataMessage::Removed {
        collection: collection.into(),
        id: id.into(),
    }
}

fn changed(collection: &str, id: &str, value: Value) -> DataMessage {
    DataMessage::Changed {
        collection: collection.into(),
        id: id.into(),
        fields: fields(value),
        cleared: Vec::new(),
    }
}

fn seeded() -> (MemoryStore, Executor) {
    let store = MemoryStore::new();
    let users = store.collection("users");
    users
        .insert(json!({"_id": "u1", "name": "Ada", "email": "ada@example.com"}))
        .unwrap();
    users
        .insert(json!({"_id": "u2", "name": "Grace", "email": "grace@example.com"}))
        .unwrap();
    let entries = store.collection("entries");
    entries
        .insert(json!({"_id": "e1", "content": "hello", "author": "u1"}))
        .unwrap();
    entries
        .insert(json!({"_id": "e2", "content": "world", "author": "u1"}))
        .unwrap();

    let mut resolvers = ResolverMap::new();
    let all = store.collection("entries");
    resolvers.register_fn("Query", "allEntries", move |_, _, _, _| Ok(all.find(json!({}))));
    let users = store.collection("users");
    resolvers.register_fn("Entry", "author", move |parent, _, _, _| {
        Ok(users.find(json!({"_id": parent["author"].clone()})))
    });

    let schema = ExecutableSchema::builder()
        .type_defs(ENTRIES)
        .resolvers(resolvers)
        .build()
        .unwrap();
    (store, Executor::new(Arc::new(schema)))
}

async fn open(
    executor: &Executor,
    query: &str,
) -> (Response, Publication, UnboundedReceiver<Vec<DataMessage>>) {
    let (publication, frames) = Publication::new();
    let scope = LiveScope::new(Arc::new(publication.clone()));
    let ctx = Context::new().with_live(scope.clone());
    let response = {
        let _gate = scope.gate().await;
        let response = executor.execute(&Request::new(query), &ctx).await;
        publication.ready();
        response
    };
    (response, publication, frames)
}

async fn next_frame(frames: &mut UnboundedReceiver<Vec<DataMessage>>) -> Vec<DataMessage> {
    tokio::time::timeout(Duration::from_secs(1), frames.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("publication closed")
}

const QUERY: &str = "{ allEntries { content author { name } } }";

#[tokio::test]
async fn test_initial_frame_publishes_selected_fields_once() {
    let (_store, executor) = seeded();
    let (response, _publication, mut frames) = open(&executor, QUERY).await;

    assert_eq!(
        response,
        Response::data(json!({"allEntries": [
            {"content": "hello", "author": {"name": "Ada"}},
            {"content": "world", "author": {"name": "Ada"}}
        ]}))
    );
    assert_eq!(
        next_frame(&mut frames).await,
        vec![
            added("entries", "e1", json!({"content": "hello", "author": "u1"})),
            added("users", "u1", json!({"name": "Ada"})),
            added("entries", "e2", json!({"content": "world", "author": "u1"})),
            DataMessage::Ready,
        ]
    );
}

#[tokio::test]
async fn test_store_writes_become_deltas() {
    let (store, executor) = seeded();
    let (_response, _publication, mut frames) = open(&executor, QUERY).await;
    next_frame(&mut frames).await;

    let entries = store.collection("entries");
    entries
        .insert(json!({"_id": "e3", "content": "new", "author": "u2"}))
        .unwrap();
    assert_eq!(
        next_frame(&mut frames).await,
        vec![
            added("entries", "e3", json!({"content": "new", "author": "u2"})),
            added("users", "u2", json!({"name": "Grace"})),
        ]
    );

    entries.remove("e2");
    assert_eq!(next_frame(&mut frames).await, vec![removed("entries", "e2")]);

    entries.remove("e1");
    assert_eq!(
        next_frame(&mut frames).await,
        vec![removed("entries", "e1"), removed("users", "u1")]
    );
}

#[tokio::test]
async fn test_unselected_changes_are_not_published() {
    let (store, executor) = seeded();
    let (_response, _publication, mut frames) = open(&executor, QUERY).await;
    next_frame(&mut frames).await;

    let users = store.collection("users");
    users.update("u1", json!({"email": "ada@lovelace.dev"})).unwrap();
    users.update("u1", json!({"name": "Ada L."})).unwrap();
    assert_eq!(
        next_frame(&mut frames).await,
        vec![changed("users", "u1", json!({"name": "Ada L."}))]
    );
}

#[tokio::test]
async fn test_foreign_key_change_swaps_the_nested_document() {
    let (store, executor) = seeded();
    let (_response, _publication, mut frames) = open(&executor, QUERY).await;
    next_frame(&mut frames).await;

    let entries = store.collection("entries");
    entries.update("e1", json!({"author": "u2"})).unwrap();
    assert_eq!(
        next_frame(&mut frames).await,
        vec![
            changed("entries", "e1", json!({"author": "u2"})),
            added("users", "u2", json!({"name": "Grace"})),
        ]
    );

    entries.update("e2", json!({"author": "u2"})).unwrap();
    assert_eq!(
        next_frame(&mut frames).await,
        vec![
            changed("entries", "e2", json!({"author": "u2"})),
            removed("users", "u1"),
        ]
    );
}

#[tokio::test]
async fn test_stop_removes_everything_and_closes_observers() {
    let (store, executor) = seeded();
    let (_response, publication, mut frames) = open(&executor, QUERY).await;
    next_frame(&mut frames).await;
    assert_eq!(store.collection("entries").observer_count(), 1);
    assert_eq!(store.collection("users").observer_count(), 2);

    publication.stop();
    assert_eq!(
        next_frame(&mut frames).await,
        vec![
            removed("entries", "e1"),
            removed("entries", "e2"),
            removed("users", "u1"),
        ]
    );
    assert_eq!(store.collection("entries").observer_count(), 0);
    assert_eq!(store.collection("users").observer_count(), 0);

    store
        .collection("entries")
        .insert(json!({"content": "late"}))
        .unwrap();
    tokio::task::yield_now().await;
    assert!(frames.try_recv().is_err());
}

#[tokio::test]
async fn test_without_a_live_scope_cursors_are_read_once() {
    let (store, executor) = seeded();
    let response = executor
        .execute(&Request::new(QUERY), &Context::new())
        .await;
    assert!(!response.has_errors());
    assert_eq!(store.collection("entries").observer_count(), 0);
}
