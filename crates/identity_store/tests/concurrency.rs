use identity_store::db::{open_db, open_db_in_memory};
use identity_store::{
    gateway_store, CancellationToken, EntityStore, FieldMask, Gateway, GatewayIdentifiers,
    GatewayStore, RequestContext, StoreError, StoreResult,
};
use std::path::Path;
use std::thread;
use std::time::Duration;

fn counter(gateway: &Gateway) -> u32 {
    gateway
        .attributes
        .get("counter")
        .map(|value| value.parse().unwrap())
        .unwrap_or(0)
}

fn create_gateway(path: &Path, gateway_id: &str) -> Gateway {
    let conn = open_db(path).unwrap();
    let store = gateway_store(&conn).unwrap();
    store
        .create(&RequestContext::background(), &Gateway::new(gateway_id))
        .unwrap()
}

#[test]
fn stale_token_is_rejected_and_row_is_unchanged() {
    let conn = open_db_in_memory().unwrap();
    let store = gateway_store(&conn).unwrap();
    let ctx = RequestContext::background();
    let created = store.create(&ctx, &Gateway::new("gtw-occ")).unwrap();

    let mut first = created.clone();
    first.name = "first".to_string();
    let after_first = store
        .update(&ctx, &first, &FieldMask::new(["name"]))
        .unwrap();

    let mut second = created.clone();
    second.name = "second".to_string();
    let err = store
        .update(&ctx, &second, &FieldMask::new(["name"]))
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { kind: "gateway", ref id } if id == "gtw-occ"));

    let loaded = store
        .get(&ctx, &GatewayIdentifiers::new("gtw-occ"), &FieldMask::all())
        .unwrap();
    assert_eq!(loaded, after_first);
    assert_eq!(loaded.name, "first");
}

#[test]
fn missing_token_writes_unconditionally() {
    let conn = open_db_in_memory().unwrap();
    let store = gateway_store(&conn).unwrap();
    let ctx = RequestContext::background();
    let created = store.create(&ctx, &Gateway::new("gtw-lww")).unwrap();

    let mut bump = created.clone();
    bump.name = "bumped".to_string();
    store.update(&ctx, &bump, &FieldMask::new(["name"])).unwrap();

    let mut blind = created;
    blind.model.updated_at = None;
    blind.name = "blind".to_string();
    let updated = store
        .update(&ctx, &blind, &FieldMask::new(["name"]))
        .unwrap();
    assert_eq!(updated.name, "blind");
}

#[test]
fn updated_at_strictly_increases_across_rapid_updates() {
    let conn = open_db_in_memory().unwrap();
    let store = gateway_store(&conn).unwrap();
    let ctx = RequestContext::background();
    let mut current = store.create(&ctx, &Gateway::new("gtw-fast")).unwrap();

    for round in 0..20 {
        let mut desired = current.clone();
        desired.description = format!("round {round}");
        let updated = store
            .update(&ctx, &desired, &FieldMask::new(["description"]))
            .unwrap();
        assert!(updated.model.updated_at > current.model.updated_at);
        assert_eq!(updated.model.created_at, current.model.created_at);
        current = updated;
    }
}

#[test]
fn writer_on_another_connection_invalidates_token() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.db");
    let created = create_gateway(&path, "gtw-shared");

    let conn_a = open_db(&path).unwrap();
    let conn_b = open_db(&path).unwrap();
    let store_a = gateway_store(&conn_a).unwrap();
    let store_b = gateway_store(&conn_b).unwrap();
    let ctx = RequestContext::background();
    let ids = GatewayIdentifiers::new("gtw-shared");

    let seen_by_a = store_a.get(&ctx, &ids, &FieldMask::all()).unwrap();
    let seen_by_b = store_b.get(&ctx, &ids, &FieldMask::all()).unwrap();
    assert_eq!(seen_by_a, created);
    assert_eq!(seen_by_b, created);

    let mut from_b = seen_by_b;
    from_b.name = "from b".to_string();
    store_b
        .update(&ctx, &from_b, &FieldMask::new(["name"]))
        .unwrap();

    let mut from_a = seen_by_a;
    from_a.name = "from a".to_string();
    let err = store_a
        .update(&ctx, &from_a, &FieldMask::new(["name"]))
        .unwrap_err();
    assert!(err.is_conflict());

    let loaded = store_a.get(&ctx, &ids, &FieldMask::all()).unwrap();
    assert_eq!(loaded.name, "from b");
}

#[test]
fn store_joins_open_transaction_of_caller() {
    let conn = open_db_in_memory().unwrap();
    let ctx = RequestContext::background();

    {
        let tx = conn.unchecked_transaction().unwrap();
        let store = gateway_store(&tx).unwrap();
        let created = store.create(&ctx, &Gateway::new("gtw-tx")).unwrap();
        let mut desired = created.clone();
        desired.name = "inside".to_string();
        store
            .update(&ctx, &desired, &FieldMask::new(["name"]))
            .unwrap();
        tx.rollback().unwrap();
    }

    let store = gateway_store(&conn).unwrap();
    let err = store
        .get(&ctx, &GatewayIdentifiers::new("gtw-tx"), &FieldMask::all())
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn concurrent_read_modify_write_with_retries_loses_no_increment() {
    const THREADS: u32 = 4;
    const INCREMENTS: u32 = 5;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.db");
    create_gateway(&path, "gtw-counter");

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let store = gateway_store(&conn).unwrap();
                let ctx = RequestContext::background();
                let ids = GatewayIdentifiers::new("gtw-counter");
                let mut conflicts = 0_u32;

                for _ in 0..INCREMENTS {
                    loop {
                        let mut gateway = store.get(&ctx, &ids, &FieldMask::all()).unwrap();
                        let next = counter(&gateway) + 1;
                        gateway
                            .attributes
                            .insert("counter".to_string(), next.to_string());
                        match store.update(&ctx, &gateway, &FieldMask::new(["attributes"])) {
                            Ok(_) => break,
                            Err(err) if err.is_conflict() => conflicts += 1,
                            Err(err) => panic!("unexpected update error: {err}"),
                        }
                    }
                }
                conflicts
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let conn = open_db(&path).unwrap();
    let store = gateway_store(&conn).unwrap();
    let loaded = store
        .get(
            &RequestContext::background(),
            &GatewayIdentifiers::new("gtw-counter"),
            &FieldMask::all(),
        )
        .unwrap();
    assert_eq!(counter(&loaded), THREADS * INCREMENTS);
}

/// Runs `op` on a thread while another connection holds the write lock,
/// cancels the request while `op` waits for that lock, then releases it.
fn cancel_while_waiting_for_write_lock<T, F>(path: &Path, op: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&GatewayStore<'_>, &RequestContext) -> StoreResult<T> + Send + 'static,
{
    let holder = open_db(path).unwrap();
    let writer = open_db(path).unwrap();
    let token = CancellationToken::new();
    let ctx = RequestContext::background().with_cancellation(token.clone());

    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let worker = thread::spawn(move || {
        let store = gateway_store(&writer).unwrap();
        op(&store, &ctx)
    });

    thread::sleep(Duration::from_millis(300));
    token.cancel();
    holder.execute_batch("ROLLBACK;").unwrap();

    worker.join().unwrap()
}

#[test]
fn update_canceled_while_waiting_for_write_lock_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.db");
    let created = create_gateway(&path, "gtw-cancel-update");

    let mut desired = created.clone();
    desired.name = "never written".to_string();
    let result = cancel_while_waiting_for_write_lock(&path, move |store, ctx| {
        store.update(ctx, &desired, &FieldMask::new(["name"]))
    });
    assert!(matches!(result, Err(StoreError::Canceled)));

    let conn = open_db(&path).unwrap();
    let store = gateway_store(&conn).unwrap();
    let loaded = store
        .get(
            &RequestContext::background(),
            &GatewayIdentifiers::new("gtw-cancel-update"),
            &FieldMask::all(),
        )
        .unwrap();
    assert_eq!(loaded, created);
}

#[test]
fn delete_canceled_while_waiting_for_write_lock_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.db");
    let created = create_gateway(&path, "gtw-cancel-delete");

    let result = cancel_while_waiting_for_write_lock(&path, |store, ctx| {
        store.delete(ctx, &GatewayIdentifiers::new("gtw-cancel-delete"))
    });
    assert!(matches!(result, Err(StoreError::Canceled)));

    let conn = open_db(&path).unwrap();
    let deleted_at: Option<i64> = conn
        .query_row(
            "SELECT deleted_at FROM gateways WHERE gateway_id = 'gtw-cancel-delete';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(deleted_at, None);

    let store = gateway_store(&conn).unwrap();
    let loaded = store
        .get(
            &RequestContext::background(),
            &GatewayIdentifiers::new("gtw-cancel-delete"),
            &FieldMask::all(),
        )
        .unwrap();
    assert_eq!(loaded, created);
}
