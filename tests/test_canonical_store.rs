// Integration tests for the minterm and permission stores
//
// These tests verify:
// 1. Equal content always maps to the same id, whatever the input order
// 2. The reserved bypass-only permission is returned for empty input
// 3. Referenced rows cannot be deleted
// 4. Concurrent writers of the same content end up with one row

mod helpers;

use std::collections::BTreeSet;

use gatekeep::authz::errors::AuthzError;
use gatekeep::authz::minterm::{find_minterm, get_or_create_minterm, load_minterm};
use gatekeep::authz::permission::{
    bypass_only_permission, delete_permission, find_permission, get_or_create_permission,
    load_permission,
};
use gatekeep::authz::roles;
use gatekeep::authz::types::RoleSet;
use gatekeep::entities;
use gatekeep::storage;
use helpers::{authorizer, rule, seed_role, ResourceBuilder, TestDb};
use sea_orm::{EntityTrait, PaginatorTrait, TransactionTrait};

#[tokio::test]
async fn test_minterm_idempotent() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let a = seed_role(db, "a").await.id;
    let b = seed_role(db, "b").await.id;
    let c = seed_role(db, "c").await.id;

    let first = get_or_create_minterm(db, &RoleSet::from([a, b, c]))
        .await
        .expect("Failed to create minterm");
    let second = get_or_create_minterm(db, &RoleSet::from([c, a, b]))
        .await
        .expect("Failed to fetch minterm");
    assert_eq!(first, second);

    // Subsets and supersets are distinct minterms
    let ab = get_or_create_minterm(db, &RoleSet::from([a, b])).await.unwrap();
    assert_ne!(ab, first);

    assert_eq!(entities::minterm::Entity::find().count(db).await.unwrap(), 2);
    assert_eq!(load_minterm(db, first).await.unwrap(), RoleSet::from([a, b, c]));
    assert_eq!(find_minterm(db, &RoleSet::from([a, b])).await.unwrap(), Some(ab));
    assert_eq!(find_minterm(db, &RoleSet::from([a])).await.unwrap(), None);
}

#[tokio::test]
async fn test_empty_minterm_rejected() {
    let test_db = TestDb::new().await;
    let err = get_or_create_minterm(test_db.connection(), &RoleSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::EmptyMinterm));
}

#[tokio::test]
async fn test_minterm_with_unknown_role_rejected() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    assert!(get_or_create_minterm(db, &RoleSet::from([9999])).await.is_err());
    assert_eq!(entities::minterm::Entity::find().count(db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_permission_idempotent_under_reordering() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let a = seed_role(db, "a").await.id;
    let b = seed_role(db, "b").await.id;
    let c = seed_role(db, "c").await.id;

    let p1 = get_or_create_permission(db, [RoleSet::from([a, b]), RoleSet::from([c])])
        .await
        .expect("Failed to create permission");
    let p2 = get_or_create_permission(db, [RoleSet::from([c]), RoleSet::from([b, a])])
        .await
        .expect("Failed to fetch permission");
    assert_eq!(p1, p2);

    // Duplicate minterms collapse
    let p3 = get_or_create_permission(
        db,
        [RoleSet::from([c]), RoleSet::from([a, b]), RoleSet::from([c])],
    )
    .await
    .unwrap();
    assert_eq!(p1, p3);

    let value = load_permission(db, p1).await.unwrap();
    let minterms: BTreeSet<RoleSet> = value.minterms.into_iter().collect();
    assert_eq!(
        minterms,
        BTreeSet::from([RoleSet::from([a, b]), RoleSet::from([c])])
    );

    assert_eq!(
        find_permission(db, &[RoleSet::from([c]), RoleSet::from([a, b])])
            .await
            .unwrap(),
        Some(p1)
    );
    assert_eq!(find_permission(db, &[RoleSet::from([c])]).await.unwrap(), None);
}

#[tokio::test]
async fn test_empty_permission_is_bypass_only() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let reserved = bypass_only_permission(db).await.expect("reserved permission");
    let before = entities::permission::Entity::find().count(db).await.unwrap();

    let id = get_or_create_permission(db, Vec::<RoleSet>::new()).await.unwrap();
    assert_eq!(id, reserved);
    assert_eq!(
        entities::permission::Entity::find().count(db).await.unwrap(),
        before
    );

    let value = load_permission(db, id).await.unwrap();
    assert!(value.is_bypass_only());
}

#[tokio::test]
async fn test_load_missing_permission() {
    let test_db = TestDb::new().await;
    let err = load_permission(test_db.connection(), 4242).await.unwrap_err();
    assert!(matches!(err, AuthzError::PermissionNotFound(4242)));
}

#[tokio::test]
async fn test_delete_restricted_while_referenced() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let authz = authorizer(db);

    let editor = seed_role(db, "editor").await;
    ResourceBuilder::new("wiki").create(db).await;
    let updated =
        storage::set_resource_permissions(&authz, "wiki", None, Some(&rule(&[&["editor"]])))
            .await
            .expect("Failed to set permissions");
    let edit = updated.edit_permission_id.expect("edit permission");

    // Permission referenced by a resource
    let err = delete_permission(db, edit).await.unwrap_err();
    assert!(matches!(err, AuthzError::PermissionInUse(_)));

    // Reserved permission
    let reserved = bypass_only_permission(db).await.unwrap();
    assert!(matches!(
        delete_permission(db, reserved).await.unwrap_err(),
        AuthzError::PermissionInUse(_)
    ));

    // Role referenced by a minterm
    let err = roles::delete_role(db, &editor.key).await.unwrap_err();
    assert!(matches!(err, AuthzError::RoleInUse(_)));

    // Once the resource is gone the permission can go, but the role is
    // still held by the minterm
    storage::delete_resource(db, "wiki").await.unwrap();
    delete_permission(db, edit).await.expect("Failed to delete permission");
    assert!(roles::delete_role(db, "editor").await.is_err());

    let report = storage::reap_unreferenced(db).await.unwrap();
    assert_eq!(report.minterms, 1);
    roles::delete_role(db, "editor").await.expect("Failed to delete role");
}

#[tokio::test]
async fn test_concurrent_minterm_creation_yields_one_row() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let a = seed_role(db, "a").await.id;
    let b = seed_role(db, "b").await.id;
    let roles = RoleSet::from([a, b]);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let db = db.clone();
        let roles = roles.clone();
        handles.push(tokio::spawn(async move {
            let txn = db.begin().await?;
            let id = get_or_create_minterm(&txn, &roles).await?;
            txn.commit().await?;
            Ok::<_, AuthzError>(id)
        }));
    }

    let mut ids = BTreeSet::new();
    for handle in handles {
        let id = handle
            .await
            .expect("task panicked")
            .expect("Failed to create minterm");
        ids.insert(id);
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(entities::minterm::Entity::find().count(db).await.unwrap(), 1);
    assert_eq!(
        entities::minterm_mapping::Entity::find().count(db).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_concurrent_permission_creation_yields_one_row() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let a = seed_role(db, "a").await.id;
    let b = seed_role(db, "b").await.id;
    let before = entities::permission::Entity::find().count(db).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let db = db.clone();
        // Alternate the input order between tasks
        let minterms = if i % 2 == 0 {
            vec![RoleSet::from([a]), RoleSet::from([a, b])]
        } else {
            vec![RoleSet::from([b, a]), RoleSet::from([a])]
        };
        handles.push(tokio::spawn(async move {
            get_or_create_permission(&db, minterms).await
        }));
    }

    let mut ids = BTreeSet::new();
    for handle in handles {
        ids.insert(handle.await.expect("task panicked").expect("Failed to create"));
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(
        entities::permission::Entity::find().count(db).await.unwrap(),
        before + 1
    );
    assert_eq!(entities::minterm::Entity::find().count(db).await.unwrap(), 2);
}
