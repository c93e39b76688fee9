//! Start-path integration tests: table contents and per-cell action streams
//! after starting mirrored transactions.

mod common;

use std::collections::BTreeMap;

use common::{actions_for, identity, nested, start_request, test_cell, top_level, LOCAL_CELL};
use cypress_coordinator::action::TransactionAction;
use cypress_coordinator::start_cypress_transaction;
use sequoia_client::{CellTag, ObjectKind, SequoiaError, TransactionId};

#[tokio::test]
async fn start_nested_under_existing_parent() {
    let cell = test_cell();
    let parent = top_level(&cell.store, LOCAL_CELL.0);
    cell.store.insert_transaction(parent.clone());

    let mut request = start_request();
    request.parent_id = Some(parent.transaction_id);
    request.title = Some("t".to_string());

    let response = start_cypress_transaction(&cell.bootstrap, request, identity())
        .await
        .unwrap();
    let id = response.transaction_id;

    assert_eq!(id.object_kind(), Some(ObjectKind::NestedTransaction));
    assert_eq!(id.cell_tag(), LOCAL_CELL);

    let record = cell.store.transaction(id).expect("created row");
    assert_eq!(record.ancestor_ids, vec![parent.transaction_id]);
    assert_eq!(
        record.attributes,
        BTreeMap::from([("title".to_string(), "t".to_string())])
    );

    assert_eq!(
        cell.store.descendant_rows().len(),
        1,
        "one descendant row for the single ancestor"
    );
    assert_eq!(cell.store.descendant_rows()[0].ancestor_id, parent.transaction_id);
    assert_eq!(cell.store.descendant_rows()[0].descendant_id, id);

    // The parent stays startable under but not finishable concurrently.
    assert_eq!(cell.store.locked_transactions(), vec![parent.transaction_id]);

    let actions = actions_for(&cell.store, LOCAL_CELL);
    assert_eq!(actions.len(), 1);
    match &actions[0] {
        TransactionAction::StartCypressTransaction(action) => {
            assert_eq!(action.hint_id, id);
            assert_eq!(action.parent_id, Some(parent.transaction_id));
            assert_eq!(action.title.as_deref(), Some("t"));
            assert_eq!(action.identity.user, "tester");
        }
        other => panic!("unexpected action: {other:?}"),
    }
}

#[tokio::test]
async fn start_top_level_with_replication() {
    let cell = test_cell();

    let mut request = start_request();
    // The local cell sneaks into replication lists under request routing and
    // must be filtered out.
    request.replicate_to_cell_tags = vec![CellTag(12), LOCAL_CELL, CellTag(11)];

    let response = start_cypress_transaction(&cell.bootstrap, request, identity())
        .await
        .unwrap();
    let id = response.transaction_id;

    assert_eq!(id.object_kind(), Some(ObjectKind::Transaction));
    assert!(cell.store.transaction(id).is_some());

    let mut replicas: Vec<(TransactionId, CellTag)> = cell
        .store
        .replica_rows()
        .iter()
        .map(|row| (row.transaction_id, row.cell_tag))
        .collect();
    replicas.sort();
    assert_eq!(replicas, vec![(id, CellTag(11)), (id, CellTag(12))]);

    for foreign in [CellTag(11), CellTag(12)] {
        let actions = actions_for(&cell.store, foreign);
        assert_eq!(actions.len(), 1, "exactly one materialize per destination");
        match &actions[0] {
            TransactionAction::MaterializeCypressTransactionReplicas { transactions } => {
                assert_eq!(transactions.len(), 1);
                assert_eq!(transactions[0].transaction_id, id);
                assert!(transactions[0].parent_id.is_nil());
                assert!(!transactions[0].upload);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    let local_actions = actions_for(&cell.store, LOCAL_CELL);
    assert_eq!(local_actions.len(), 1);
    assert!(matches!(
        local_actions[0],
        TransactionAction::StartCypressTransaction(_)
    ));
}

#[tokio::test]
async fn start_with_missing_prerequisite_fails() {
    let cell = test_cell();
    let ghost = TransactionId::sequoia(ObjectKind::Transaction, LOCAL_CELL, 999);

    let mut request = start_request();
    request.prerequisite_transaction_ids = vec![ghost];

    let err = start_cypress_transaction(&cell.bootstrap, request, identity())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SequoiaError::PrerequisiteCheckFailed(id) if id == ghost
    ));
    assert!(cell.store.tables_are_empty());
}

#[tokio::test]
async fn only_sequoia_prerequisites_are_mirrored() {
    let cell = test_cell();
    let sequoia_prerequisite = top_level(&cell.store, LOCAL_CELL.0);
    let system_prerequisite = sequoia_client::TransactionRecord {
        transaction_id: TransactionId::system(LOCAL_CELL, 1),
        ..Default::default()
    };
    cell.store.insert_transaction(sequoia_prerequisite.clone());
    cell.store.insert_transaction(system_prerequisite.clone());

    let mut request = start_request();
    request.prerequisite_transaction_ids = vec![
        system_prerequisite.transaction_id,
        sequoia_prerequisite.transaction_id,
    ];

    let response = start_cypress_transaction(&cell.bootstrap, request, identity())
        .await
        .unwrap();

    let dependents = cell.store.dependent_rows();
    assert_eq!(dependents.len(), 1, "system prerequisites are not mirrored");
    assert_eq!(dependents[0].prerequisite_id, sequoia_prerequisite.transaction_id);
    assert_eq!(dependents[0].dependent_id, response.transaction_id);
}

#[tokio::test]
async fn replication_only_to_the_local_cell_is_dropped() {
    let cell = test_cell();

    let mut request = start_request();
    request.replicate_to_cell_tags = vec![LOCAL_CELL];

    start_cypress_transaction(&cell.bootstrap, request, identity())
        .await
        .unwrap();

    assert!(cell.store.replica_rows().is_empty());
    let actions = actions_for(&cell.store, LOCAL_CELL);
    assert_eq!(actions.len(), 1, "only the start action itself");
}

#[tokio::test]
async fn start_under_replicated_parent_uses_the_hierarchy() {
    let cell = test_cell();
    let parent = top_level(&cell.store, LOCAL_CELL.0);
    cell.store.insert_transaction(parent.clone());
    // The parent already lives on cell 11; only the child must materialize.
    cell.store.insert_replica(parent.transaction_id, CellTag(11));

    let mut request = start_request();
    request.parent_id = Some(parent.transaction_id);
    request.replicate_to_cell_tags = vec![CellTag(11)];

    let response = start_cypress_transaction(&cell.bootstrap, request, identity())
        .await
        .unwrap();
    let id = response.transaction_id;

    let actions = actions_for(&cell.store, CellTag(11));
    assert_eq!(actions.len(), 1);
    match &actions[0] {
        TransactionAction::MaterializeCypressTransactionReplicas { transactions } => {
            assert_eq!(transactions.len(), 1, "parent replica already exists");
            assert_eq!(transactions[0].transaction_id, id);
            assert_eq!(transactions[0].parent_id, parent.transaction_id);
        }
        other => panic!("unexpected action: {other:?}"),
    }

    let mut replicas: Vec<(TransactionId, CellTag)> = cell
        .store
        .replica_rows()
        .iter()
        .map(|row| (row.transaction_id, row.cell_tag))
        .collect();
    replicas.sort();
    assert_eq!(
        replicas,
        vec![
            (parent.transaction_id, CellTag(11)),
            (id, CellTag(11)),
        ]
    );
}

#[tokio::test]
async fn missing_parent_fails_with_no_such_transaction() {
    let cell = test_cell();
    let store = &cell.store;
    let ghost_parent = nested(store, LOCAL_CELL.0, &[]).transaction_id;

    let mut request = start_request();
    request.parent_id = Some(ghost_parent);

    let err = start_cypress_transaction(&cell.bootstrap, request, identity())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SequoiaError::NoSuchTransaction(id) if id == ghost_parent
    ));
    assert!(cell.store.tables_are_empty());
}
