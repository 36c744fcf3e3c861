//! Integration tests for FerroSync
//!
//! These tests drive real clients over in-memory stores and check that
//! enumeration, application and correction work together.

use ferrosync_core::entity::from_sync_object;
use ferrosync_core::{
    ConverterSet, ExclusionCache, LocalSyncClient, MemoryProvider, ObjectConverter, SyncClient,
    SyncEntity,
};
use ferrosync_tests::test_utils::*;
use ferrosync_types::{
    CancellationContext, RepositoryFilter, SyncId, SyncIssueType, SyncObject, SyncOptions,
    SyncStatus, Timestamp,
};
use proptest::prelude::*;
use rstest::rstest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn keys(objects: &[SyncObject]) -> Vec<(SyncId, String)> {
    objects
        .iter()
        .map(|object| (object.sync_id(), object.type_name().to_string()))
        .collect()
}

fn seeded(parents: usize, children: usize, deleted: usize) -> MemoryProvider {
    let provider = store();
    let mut first = None;
    for index in 0..parents {
        let parent = provider.insert(parent(&format!("parent {}", index))).unwrap();
        first.get_or_insert(parent);
    }
    for index in 0..children {
        provider
            .insert(child(&format!("child {}", index), first.as_ref()))
            .unwrap();
    }
    for index in 0..deleted {
        let doomed = provider.insert(child(&format!("doomed {}", index), None)).unwrap();
        provider.delete::<Child>(doomed.sync_id).unwrap();
    }
    provider
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_pages_reconstruct_full_sequence(
        parents in 0usize..12,
        children in 0usize..12,
        deleted in 0usize..6,
        take in 1usize..9,
    ) {
        let provider = seeded(parents, children, deleted);
        let client = node("client", &provider, &CancellationContext::new()).unwrap();
        let options = SyncOptions::default();
        let window = everything();
        let total = parents + children + deleted;

        let full = client
            .enumerate(&options, &window.with_page(0, total + 1))
            .unwrap();
        prop_assert_eq!(full.collection.len(), total);

        let mut pages = Vec::new();
        let mut request = window.with_page(0, take);
        loop {
            let page = client.enumerate(&options, &request).unwrap();
            let expected = take.min(total.saturating_sub(request.skip));
            prop_assert_eq!(page.collection.len(), expected);
            pages.extend(page.collection);
            if request.skip + take >= total {
                break;
            }
            request = request.next_page();
        }

        prop_assert_eq!(keys(&pages), keys(&full.collection));
    }
}

#[rstest]
#[case::with_parent(true)]
#[case::orphan(false)]
fn test_entity_round_trip_keeps_shared_fields(#[case] with_parent: bool) {
    let cache = ExclusionCache::new();
    let mut owner = parent("Owner");
    owner.id = 12;
    let mut original = child("Round trip", with_parent.then_some(&owner));
    original.id = 34;

    let excluded = cache.outgoing::<Child>().unwrap();
    let object =
        ferrosync_core::entity::to_sync_object(&original, SyncStatus::Added, &excluded).unwrap();
    let decoded: Child = from_sync_object(&object).unwrap();

    let expected = Child {
        id: 0,
        parent_id: None,
        ..original.clone()
    };
    assert_eq!(decoded, expected);
    assert_eq!(object.type_name(), CHILD);
}

#[test]
fn test_added_twice_yields_one_entity() {
    let provider = store();
    let client = node("server", &provider, &CancellationContext::new()).unwrap();
    let session = open_session(&client).unwrap();
    let entity = parent("Once");
    let object = wire(&entity, SyncStatus::Added);

    let first = client.apply_changes(session, &[object.clone()]).unwrap();
    let second = client.apply_changes(session, &[object]).unwrap();

    assert!(first.collection.is_empty());
    assert!(second.collection.is_empty());
    assert_eq!(provider.count::<Parent>().unwrap(), 1);
    let stored = provider.get::<Parent>(entity.sync_id).unwrap().unwrap();
    assert_eq!(stored.name, "Once");
    let statistics = client.end_sync(session).unwrap();
    assert_eq!((statistics.applied, statistics.skipped), (1, 1));
}

#[test]
fn test_missing_parent_blocks_child() {
    let provider = store();
    let client = node("server", &provider, &CancellationContext::new()).unwrap();
    let session = open_session(&client).unwrap();
    let ghost = parent("Ghost");
    let orphan = child("Orphan", Some(&ghost));

    let result = client
        .apply_changes(session, &[wire(&orphan, SyncStatus::Added)])
        .unwrap();

    assert_eq!(result.collection.len(), 1);
    let issue = &result.collection[0];
    assert_eq!(issue.issue_type, SyncIssueType::RelationshipConstraint);
    assert_eq!(issue.id, orphan.sync_id);
    assert_eq!(provider.count::<Child>().unwrap(), 0);
}

#[test]
fn test_reversed_input_applies_in_dependency_order() {
    let provider = store();
    let client = node("server", &provider, &CancellationContext::new()).unwrap();
    let session = open_session(&client).unwrap();
    let owner = parent("Owner");
    let member = child("Member", Some(&owner));

    let result = client
        .apply_changes(
            session,
            &[
                wire(&member, SyncStatus::Added),
                wire(&owner, SyncStatus::Added),
            ],
        )
        .unwrap();

    assert!(result.collection.is_empty(), "{:?}", result.collection);
    let stored_owner = provider.get::<Parent>(owner.sync_id).unwrap().unwrap();
    let stored_member = provider.get::<Child>(member.sync_id).unwrap().unwrap();
    assert_eq!(stored_member.parent_id, Some(stored_owner.id));
}

#[test]
fn test_reversed_deletes_remove_children_first() {
    let provider = store();
    let owner = provider.insert(parent("Owner")).unwrap();
    let member = provider.insert(child("Member", Some(&owner))).unwrap();
    let client = node("server", &provider, &CancellationContext::new()).unwrap();
    let session = open_session(&client).unwrap();

    let result = client
        .apply_changes(
            session,
            &[
                SyncObject::deleted(owner.sync_id, PARENT, chrono::Utc::now()),
                SyncObject::deleted(member.sync_id, CHILD, chrono::Utc::now()),
            ],
        )
        .unwrap();

    assert!(result.collection.is_empty());
    assert_eq!(provider.count::<Parent>().unwrap(), 0);
    assert_eq!(provider.count::<Child>().unwrap(), 0);
    assert_eq!(provider.tombstones().unwrap().len(), 2);
}

#[test]
fn test_corrections_restore_tombstoned_parent() {
    let cancellation = CancellationContext::new();
    let server_store = store();
    let client_store = store();

    let owner = parent("Owner");
    server_store.insert(owner.clone()).unwrap();
    server_store.delete::<Parent>(owner.sync_id).unwrap();
    let local_owner = client_store.insert(owner.clone()).unwrap();
    let member = client_store
        .insert(child("Member", Some(&local_owner)))
        .unwrap();

    let server = node("server", &server_store, &cancellation).unwrap();
    let client = node("client", &client_store, &cancellation).unwrap();
    let server_session = open_session(&server).unwrap();
    let client_session = open_session(&client).unwrap();

    let changes = client.get_changes(client_session, &everything()).unwrap();
    let issues = server
        .apply_changes(server_session, &changes.collection)
        .unwrap()
        .collection;
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].issue_type, SyncIssueType::RelationshipConstraint);
    assert_eq!(server_store.count::<Child>().unwrap(), 0);

    let corrections = client.get_corrections(client_session, &issues).unwrap();
    assert_eq!(
        keys(&corrections.collection),
        vec![
            (owner.sync_id, PARENT.to_string()),
            (member.sync_id, CHILD.to_string()),
        ]
    );

    let remaining = server
        .apply_corrections(server_session, &corrections.collection)
        .unwrap();
    assert!(remaining.collection.is_empty(), "{:?}", remaining.collection);
    assert!(server_store.tombstones().unwrap().is_empty());
    assert!(server_store.get::<Parent>(owner.sync_id).unwrap().is_some());
    assert!(server_store.get::<Child>(member.sync_id).unwrap().is_some());
    assert_eq!(server.end_sync(server_session).unwrap().corrections, 2);
}

#[test]
fn test_failed_batch_isolates_bad_object() {
    let provider = store();
    provider.insert(parent("Taken")).unwrap();
    let client = node("server", &provider, &CancellationContext::new()).unwrap();
    let session = open_session(&client).unwrap();
    let duplicate = parent("Taken");
    let fine = parent("Free");

    let result = client
        .apply_changes(
            session,
            &[
                wire(&duplicate, SyncStatus::Added),
                wire(&fine, SyncStatus::Added),
            ],
        )
        .unwrap();

    assert_eq!(result.collection.len(), 1);
    assert_eq!(result.collection[0].id, duplicate.sync_id);
    assert_eq!(
        result.collection[0].issue_type,
        SyncIssueType::ConstraintException
    );
    assert!(provider.get::<Parent>(fine.sync_id).unwrap().is_some());
    assert_eq!(provider.count::<Parent>().unwrap(), 2);
}

#[test]
fn test_unknown_type_is_reported_not_thrown() {
    let provider = store();
    let client = node("server", &provider, &CancellationContext::new()).unwrap();
    let session = open_session(&client).unwrap();
    let object = SyncObject::new(
        SyncId::new_v4(),
        "Nobody.Knows",
        "{}",
        chrono::Utc::now(),
        SyncStatus::Added,
    );

    let result = client.apply_changes(session, &[object]).unwrap();

    assert_eq!(result.collection.len(), 1);
    assert_eq!(result.collection[0].issue_type, SyncIssueType::Unknown);
}

/// Parent shape used by an older node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct LegacyParent {
    id: i64,
    sync_id: SyncId,
    created_on: Timestamp,
    modified_on: Timestamp,
    is_deleted: bool,
    title: String,
}

impl SyncEntity for LegacyParent {
    const TYPE_NAME: &'static str = "Legacy.Parent";
    ferrosync_core::sync_entity_accessors!();
}

#[test]
fn test_incoming_converter_maps_legacy_shape() {
    let provider = store();
    let cache = ExclusionCache::shared();
    let converters = ConverterSet::new().with_incoming(
        ObjectConverter::<LegacyParent, Parent>::new(Arc::clone(&cache))
            .with_mapping(|legacy, parent| parent.name = legacy.title.clone()),
    );
    let client = LocalSyncClient::builder("server", provider.clone())
        .register::<Parent>()
        .register::<Child>()
        .with_exclusions(cache)
        .with_converters(converters)
        .build()
        .unwrap();
    let session = open_session(&client).unwrap();

    let now = chrono::Utc::now();
    let legacy = LegacyParent {
        id: 5,
        sync_id: SyncId::new_v4(),
        created_on: now,
        modified_on: now,
        is_deleted: false,
        title: "Converted".to_string(),
    };

    let result = client
        .apply_changes(session, &[wire(&legacy, SyncStatus::Added)])
        .unwrap();

    assert!(result.collection.is_empty(), "{:?}", result.collection);
    let stored = provider.get::<Parent>(legacy.sync_id).unwrap().unwrap();
    assert_eq!(stored.name, "Converted");
    assert_eq!(stored.created_on, legacy.created_on);
}

#[test]
fn test_modified_child_follows_new_parent() {
    let provider = store();
    let old_owner = provider.insert(parent("Old owner")).unwrap();
    let new_owner = provider.insert(parent("New owner")).unwrap();
    let member = provider.insert(child("Member", Some(&old_owner))).unwrap();
    let client = node("server", &provider, &CancellationContext::new()).unwrap();
    let session = open_session(&client).unwrap();

    let mut moved = member.clone();
    moved.parent_sync_id = Some(new_owner.sync_id);
    moved.modified_on = member.modified_on + chrono::Duration::seconds(1);
    let result = client
        .apply_changes(session, &[wire(&moved, SyncStatus::Modified)])
        .unwrap();

    assert!(result.collection.is_empty(), "{:?}", result.collection);
    let stored = provider.get::<Child>(member.sync_id).unwrap().unwrap();
    assert_eq!(stored.parent_id, Some(new_owner.id));
    assert_eq!(stored.parent_sync_id, Some(new_owner.sync_id));
    assert_eq!(stored.id, member.id);
}

#[test]
fn test_empty_order_applies_in_registration_order() {
    let provider = store();
    let client = LocalSyncClient::builder("server", provider.clone())
        .register::<Parent>()
        .register::<Child>()
        .with_sync_order(Vec::<String>::new())
        .build()
        .unwrap();
    let session = open_session(&client).unwrap();
    let owner = parent("Owner");
    let member = child("Member", Some(&owner));

    let result = client
        .apply_changes(
            session,
            &[
                wire(&member, SyncStatus::Added),
                wire(&owner, SyncStatus::Added),
            ],
        )
        .unwrap();

    assert!(result.collection.is_empty(), "{:?}", result.collection);
    let stored_owner = provider.get::<Parent>(owner.sync_id).unwrap().unwrap();
    let stored_member = provider.get::<Child>(member.sync_id).unwrap().unwrap();
    assert_eq!(stored_member.parent_id, Some(stored_owner.id));
}

#[test]
fn test_partial_order_puts_unlisted_types_last() {
    let provider = store();
    let client = LocalSyncClient::builder("server", provider.clone())
        .register::<Child>()
        .register::<Parent>()
        .with_sync_order([PARENT])
        .build()
        .unwrap();
    let session = open_session(&client).unwrap();
    let owner = parent("Owner");
    let member = child("Member", Some(&owner));

    let result = client
        .apply_changes(
            session,
            &[
                wire(&member, SyncStatus::Added),
                wire(&owner, SyncStatus::Added),
            ],
        )
        .unwrap();

    assert!(result.collection.is_empty(), "{:?}", result.collection);
    assert_eq!(provider.count::<Child>().unwrap(), 1);
}

#[test]
fn test_excluded_type_tombstones_stay_local() {
    let provider = seeded(3, 2, 4);
    let client = node("client", &provider, &CancellationContext::new()).unwrap();
    let options = SyncOptions::default().with_filter(RepositoryFilter::exclude(CHILD));

    let full = client
        .enumerate(&options, &everything().with_page(0, 50))
        .unwrap();

    assert_eq!(full.total_count, 3);
    assert_eq!(full.collection.len(), 3);
    assert!(full.collection.iter().all(|object| object.type_name() == PARENT));

    let second_page = client
        .enumerate(&options, &everything().with_page(2, 2))
        .unwrap();
    assert_eq!(second_page.total_count, 3);
    assert_eq!(keys(&second_page.collection), keys(&full.collection[2..]));
}
