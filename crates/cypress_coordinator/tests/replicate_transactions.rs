//! Replicate-path integration tests: lazy materialization of foreign
//! transactions on the local cell.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{
    actions_for, init_tracing, nested, test_cell, test_cell_with_tag, top_level,
    RecordingLeaderSync, LOCAL_CELL,
};
use cypress_coordinator::action::TransactionAction;
use cypress_coordinator::{
    replicate_cypress_transactions, replicate_cypress_transactions_and_sync_with_leader, Bootstrap,
};
use sequoia_client::testing::InMemorySequoiaStore;
use sequoia_client::{CellId, CellTag, ObjectKind, TransactionId};

#[tokio::test]
async fn replication_to_the_native_cell_is_a_no_op() {
    let cell = test_cell();
    let target = top_level(&cell.store, LOCAL_CELL.0);
    cell.store.insert_transaction(target.clone());

    replicate_cypress_transactions(&cell.bootstrap, &[target.transaction_id])
        .await
        .unwrap();

    assert!(cell.store.replica_rows().is_empty());
    assert!(actions_for(&cell.store, LOCAL_CELL).is_empty());
    // The empty Sequoia transaction still commits.
    assert_eq!(cell.store.committed_coordinators().len(), 1);
}

#[tokio::test]
async fn replication_materializes_the_ancestor_chain() {
    let cell = test_cell_with_tag(CellTag(11));
    let store = &cell.store;

    let root = top_level(store, 10);
    let target = nested(store, 10, &[root.transaction_id]);
    store.insert_transaction(root.clone());
    store.insert_transaction(target.clone());

    replicate_cypress_transactions(&cell.bootstrap, &[target.transaction_id])
        .await
        .unwrap();

    let mut replicas: Vec<(TransactionId, CellTag)> = store
        .replica_rows()
        .iter()
        .map(|row| (row.transaction_id, row.cell_tag))
        .collect();
    replicas.sort();
    assert_eq!(
        replicas,
        vec![
            (root.transaction_id, CellTag(11)),
            (target.transaction_id, CellTag(11)),
        ]
    );

    // One materialize action on the destination, ancestors first.
    let local_actions = actions_for(store, CellTag(11));
    assert_eq!(local_actions.len(), 1);
    match &local_actions[0] {
        TransactionAction::MaterializeCypressTransactionReplicas { transactions } => {
            assert_eq!(transactions.len(), 2);
            assert_eq!(transactions[0].transaction_id, root.transaction_id);
            assert!(transactions[0].parent_id.is_nil());
            assert_eq!(transactions[1].transaction_id, target.transaction_id);
            assert_eq!(transactions[1].parent_id, root.transaction_id);
        }
        other => panic!("unexpected action: {other:?}"),
    }

    // The coordinator learns about the innermost transaction only; its
    // ancestors are implied.
    let coordinator_actions = actions_for(store, CellTag(10));
    assert_eq!(coordinator_actions.len(), 1);
    match &coordinator_actions[0] {
        TransactionAction::MarkCypressTransactionsReplicatedToCell {
            destination_cell_tag,
            transaction_ids,
        } => {
            assert_eq!(*destination_cell_tag, CellTag(11));
            assert_eq!(transaction_ids, &vec![target.transaction_id]);
        }
        other => panic!("unexpected action: {other:?}"),
    }

    // The replicated transaction is locked against a concurrent finish.
    assert_eq!(store.locked_transactions(), vec![target.transaction_id]);
}

#[tokio::test]
async fn replication_is_idempotent() {
    let cell = test_cell_with_tag(CellTag(11));
    let target = top_level(&cell.store, 10);
    cell.store.insert_transaction(target.clone());
    cell.store.insert_replica(target.transaction_id, CellTag(11));

    replicate_cypress_transactions(&cell.bootstrap, &[target.transaction_id])
        .await
        .unwrap();

    assert_eq!(cell.store.replica_rows().len(), 1);
    assert!(
        actions_for(&cell.store, CellTag(11)).is_empty(),
        "nothing to materialize, no action emitted"
    );
    // The coordinator is still told the replica exists here.
    assert_eq!(actions_for(&cell.store, CellTag(10)).len(), 1);
}

#[tokio::test]
async fn missing_transactions_are_dropped_silently() {
    let cell = test_cell_with_tag(CellTag(11));
    let ghost = TransactionId::sequoia(ObjectKind::Transaction, CellTag(10), 404);

    replicate_cypress_transactions(&cell.bootstrap, &[ghost])
        .await
        .unwrap();

    assert!(cell.store.tables_are_empty());
    assert!(actions_for(&cell.store, CellTag(10)).is_empty());
    assert!(actions_for(&cell.store, CellTag(11)).is_empty());
}

#[tokio::test]
async fn transactions_from_several_coordinators_are_grouped() {
    let cell = test_cell_with_tag(CellTag(13));
    let store = &cell.store;

    let from_cell10_a = top_level(store, 10);
    let from_cell10_b = top_level(store, 10);
    let from_cell12 = top_level(store, 12);
    for record in [&from_cell10_a, &from_cell10_b, &from_cell12] {
        store.insert_transaction((*record).clone());
    }

    replicate_cypress_transactions(
        &cell.bootstrap,
        &[
            from_cell12.transaction_id,
            from_cell10_a.transaction_id,
            from_cell10_b.transaction_id,
        ],
    )
    .await
    .unwrap();

    // One mark action per coordinator cell, covering that cell's whole group.
    let cell10_actions = actions_for(store, CellTag(10));
    assert_eq!(cell10_actions.len(), 1);
    match &cell10_actions[0] {
        TransactionAction::MarkCypressTransactionsReplicatedToCell {
            transaction_ids, ..
        } => {
            let mut ids = transaction_ids.clone();
            ids.sort();
            let mut expected = vec![
                from_cell10_a.transaction_id,
                from_cell10_b.transaction_id,
            ];
            expected.sort();
            assert_eq!(ids, expected);
        }
        other => panic!("unexpected action: {other:?}"),
    }
    assert_eq!(actions_for(store, CellTag(12)).len(), 1);

    assert_eq!(cell.store.replica_rows().len(), 3);
}

#[tokio::test]
async fn leader_sync_follows_replication() {
    init_tracing();
    let store = InMemorySequoiaStore::new();
    let leader_sync = Arc::new(RecordingLeaderSync::default());
    let bootstrap = Bootstrap::new(
        CellTag(11),
        CellId(11),
        LOCAL_CELL,
        Arc::new(store.clone()),
        leader_sync.clone(),
        tokio::runtime::Handle::current(),
    );

    let target = top_level(&store, 10);
    store.insert_transaction(target.clone());

    replicate_cypress_transactions_and_sync_with_leader(&bootstrap, &[target.transaction_id])
        .await
        .unwrap();

    assert_eq!(leader_sync.syncs.load(Ordering::SeqCst), 1);
    assert_eq!(store.replica_rows().len(), 1);
}
