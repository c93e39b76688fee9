//! Transitive collection of dependent and descendant transactions.
//!
//! Finishing a transaction aborts everything that depends on it, directly or
//! through nesting. `transaction_descendants` stores the transitive closure
//! of parent edges, but `dependent_transactions` stores direct edges only
//! (there is no sane bound on dependent fan-out), so the full set has to be
//! collected by breadth-first search over the union of both tables.

use std::collections::HashMap;

use sequoia_client::record::{
    require_all_present, validate_transaction_ancestors_all, TransactionRecord,
};
use sequoia_client::{SequoiaError, SequoiaTransaction, TransactionFilter, TransactionId};

/// Result of one collection run.
pub(crate) struct CollectedTransactions {
    /// Every transaction that must finish together with the target,
    /// the target included.
    pub transactions: HashMap<TransactionId, TransactionRecord>,
    /// Collected entries (target excluded) whose immediate parent is outside
    /// the collected set. Aborting a root aborts its whole subtree, so only
    /// roots need participant-action dispatch.
    pub subtree_roots: Vec<TransactionId>,
}

pub(crate) async fn collect_dependent_transactions(
    sequoia_transaction: &dyn SequoiaTransaction,
    target: &TransactionRecord,
) -> Result<CollectedTransactions, SequoiaError> {
    let mut collected = HashMap::from([(target.transaction_id, target.clone())]);
    let mut frontier = vec![target.transaction_id];

    while !frontier.is_empty() {
        let filter = TransactionFilter::from_ids(frontier.iter().copied());
        let (descendants, dependents) = tokio::try_join!(
            sequoia_transaction.select_descendants(filter.clone()),
            sequoia_transaction.select_dependents(filter),
        )?;

        let mut batch = Vec::with_capacity(descendants.len() + dependents.len());
        for id in dependents
            .iter()
            .map(|row| row.dependent_id)
            .chain(descendants.iter().map(|row| row.descendant_id))
        {
            if !collected.contains_key(&id) && !batch.contains(&id) {
                batch.push(id);
            }
        }
        if batch.is_empty() {
            break;
        }

        let records = sequoia_transaction.lookup_transactions(&batch).await?;
        // Every id came out of a metadata table, so each must resolve.
        let records = require_all_present(records)?;
        validate_transaction_ancestors_all(&records)?;

        frontier.clear();
        for record in records {
            let id = record.transaction_id;
            if collected.insert(id, record).is_none() {
                frontier.push(id);
            }
        }
    }

    let mut subtree_roots: Vec<TransactionId> = collected
        .iter()
        .filter(|(id, record)| {
            **id != target.transaction_id
                && record
                    .ancestor_ids
                    .last()
                    .map_or(true, |parent| !collected.contains_key(parent))
        })
        .map(|(id, _)| *id)
        .collect();
    // Checking the immediate parent is sufficient: if any ancestor of "T" is
    // collected then so are all of its descendants, including T's parent.
    subtree_roots.sort();

    Ok(CollectedTransactions {
        transactions: collected,
        subtree_roots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequoia_client::testing::InMemorySequoiaStore;
    use sequoia_client::{CellTag, ObjectKind, SequoiaClient};

    fn top_level(store: &InMemorySequoiaStore, cell: u16) -> TransactionRecord {
        TransactionRecord {
            transaction_id: store.mint_id(ObjectKind::Transaction, CellTag(cell)),
            ..Default::default()
        }
    }

    fn nested(
        store: &InMemorySequoiaStore,
        cell: u16,
        ancestors: &[TransactionId],
    ) -> TransactionRecord {
        TransactionRecord {
            transaction_id: store.mint_id(ObjectKind::NestedTransaction, CellTag(cell)),
            ancestor_ids: ancestors.to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn collects_through_dependency_and_nesting_edges() {
        let store = InMemorySequoiaStore::new();
        let target = top_level(&store, 10);
        let child = nested(&store, 10, &[target.transaction_id]);
        // `dependent` hangs off the nested child via a prerequisite edge, so
        // reaching it takes two rounds.
        let dependent = TransactionRecord {
            transaction_id: store.mint_id(ObjectKind::Transaction, CellTag(12)),
            prerequisite_transaction_ids: vec![child.transaction_id],
            ..Default::default()
        };
        store.insert_transaction(target.clone());
        store.insert_transaction(child.clone());
        store.insert_transaction(dependent.clone());

        let txn = store.start_transaction().await.unwrap();
        let collected = collect_dependent_transactions(&*txn, &target).await.unwrap();

        assert_eq!(collected.transactions.len(), 3);
        // `child`'s parent is collected, so only `dependent` is a root.
        assert_eq!(collected.subtree_roots, vec![dependent.transaction_id]);
    }

    #[tokio::test]
    async fn target_without_edges_collects_only_itself() {
        let store = InMemorySequoiaStore::new();
        let target = top_level(&store, 10);
        store.insert_transaction(target.clone());

        let txn = store.start_transaction().await.unwrap();
        let collected = collect_dependent_transactions(&*txn, &target).await.unwrap();

        assert_eq!(collected.transactions.len(), 1);
        assert!(collected.subtree_roots.is_empty());
    }
}
