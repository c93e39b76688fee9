//! Materialization of transaction replicas on foreign cells.
//!
//! Two layers. [`SimpleTransactionReplicator`] knows nothing about hierarchy:
//! for a batch of transactions and a set of destination cells it stages one
//! materialize action per cell and the matching `transaction_replicas` rows.
//! [`TransactionReplicator`] handles the general case where the requested
//! transactions may be related by ancestry: it computes the topologically
//! sorted ancestor closure, skips pairs that already have a replica row, and
//! drives a simple replicator per destination cell.

use std::collections::HashSet;
use std::sync::Arc;

use sequoia_client::record::{
    require_all_present, validate_transaction_ancestors_all, TransactionRecord,
};
use sequoia_client::{
    CellTag, SequoiaError, SequoiaTransaction, TransactionId, TransactionReplicaKey,
    TransactionReplicaRecord,
};

use crate::action::{TransactionAction, TransactionMaterialization};

/// Stages replica materialization for a fixed batch of transactions.
///
/// Used directly when the hierarchy is known to be trivial (explicit
/// replication on start of a top-level transaction) and as the per-cell
/// workhorse of [`TransactionReplicator`].
pub(crate) struct SimpleTransactionReplicator<'a> {
    sequoia_transaction: &'a dyn SequoiaTransaction,
    transaction_ids: Vec<TransactionId>,
    materializations: Vec<TransactionMaterialization>,
    cell_tags: Vec<CellTag>,
}

impl<'a> SimpleTransactionReplicator<'a> {
    pub(crate) fn new(sequoia_transaction: &'a dyn SequoiaTransaction) -> Self {
        Self {
            sequoia_transaction,
            transaction_ids: Vec::new(),
            materializations: Vec::new(),
            cell_tags: Vec::new(),
        }
    }

    pub(crate) fn add_transaction(&mut self, record: &TransactionRecord) -> &mut Self {
        self.materializations
            .push(TransactionMaterialization::from_record(record));
        self.transaction_ids.push(record.transaction_id);
        self
    }

    pub(crate) fn add_cell(&mut self, cell_tag: CellTag) -> &mut Self {
        self.cell_tags.push(cell_tag);
        self
    }

    pub(crate) fn add_cells(&mut self, cell_tags: impl IntoIterator<Item = CellTag>) -> &mut Self {
        self.cell_tags.extend(cell_tags);
        self
    }

    pub(crate) fn run(&self) -> Result<(), SequoiaError> {
        // Everything already replicated: stage neither action nor rows.
        if self.transaction_ids.is_empty() {
            return Ok(());
        }

        let action = TransactionAction::MaterializeCypressTransactionReplicas {
            transactions: self.materializations.clone(),
        }
        .encode()?;

        for &cell_tag in &self.cell_tags {
            self.sequoia_transaction
                .add_transaction_action(cell_tag, action.clone());

            for &transaction_id in &self.transaction_ids {
                self.sequoia_transaction
                    .write_replica(TransactionReplicaRecord {
                        transaction_id,
                        cell_tag,
                    });
            }
        }
        Ok(())
    }
}

/// Replicates a set of possibly-nested transactions to a set of cells.
pub(crate) struct TransactionReplicator {
    sequoia_transaction: Arc<dyn SequoiaTransaction>,
    cell_tags: Vec<CellTag>,
    /// Requested transactions that are not ancestors of other requested ones,
    /// sorted by native cell tag.
    innermost: Vec<TransactionRecord>,
    /// Ancestor closure of `innermost`, topologically sorted: every ancestor
    /// precedes anything nested under it.
    ancestor_ids: Vec<TransactionId>,
}

impl TransactionReplicator {
    pub(crate) fn new(
        sequoia_transaction: Arc<dyn SequoiaTransaction>,
        transactions: Vec<TransactionRecord>,
        cell_tags: Vec<CellTag>,
    ) -> Self {
        let (innermost, ancestor_ids) = collect_and_topologically_sort_ancestors(transactions);
        Self {
            sequoia_transaction,
            cell_tags,
            innermost,
            ancestor_ids,
        }
    }

    /// Visit the innermost transactions in runs of equal native cell tag.
    /// Relies on `innermost` being sorted by cell tag at construction.
    pub(crate) fn for_each_coordinator_group(
        &self,
        mut callback: impl FnMut(&[TransactionRecord]) -> Result<(), SequoiaError>,
    ) -> Result<(), SequoiaError> {
        let mut group_start = 0;
        for i in 1..self.innermost.len() {
            let previous = self.innermost[i - 1].transaction_id.cell_tag();
            let current = self.innermost[i].transaction_id.cell_tag();
            if previous != current {
                callback(&self.innermost[group_start..i])?;
                group_start = i;
            }
        }
        if group_start < self.innermost.len() {
            callback(&self.innermost[group_start..])?;
        }
        Ok(())
    }

    pub(crate) async fn run(&self) -> Result<(), SequoiaError> {
        let (ancestors, replicas) =
            tokio::try_join!(self.fetch_ancestors(), self.fetch_replicas())?;

        // Replica lookups are packed cell-major, ancestors before innermost,
        // so each destination's presence bits live in one contiguous slice.
        let per_cell = self.ancestor_ids.len() + self.innermost.len();
        for (cell_index, &cell_tag) in self.cell_tags.iter().enumerate() {
            let slice = &replicas[per_cell * cell_index..per_cell * (cell_index + 1)];
            let (ancestor_replicas, innermost_replicas) = slice.split_at(self.ancestor_ids.len());
            self.replicate_to_cell(&ancestors, ancestor_replicas, innermost_replicas, cell_tag)?;
        }
        Ok(())
    }

    fn replicate_to_cell(
        &self,
        ancestors: &[TransactionRecord],
        ancestor_replicas: &[Option<TransactionReplicaRecord>],
        innermost_replicas: &[Option<TransactionReplicaRecord>],
        cell_tag: CellTag,
    ) -> Result<(), SequoiaError> {
        let mut replicator = SimpleTransactionReplicator::new(&*self.sequoia_transaction);
        replicator.add_cell(cell_tag);

        for (record, replica) in ancestors.iter().zip(ancestor_replicas) {
            if replica.is_none() {
                replicator.add_transaction(record);
            }
        }
        for (record, replica) in self.innermost.iter().zip(innermost_replicas) {
            if replica.is_none() {
                replicator.add_transaction(record);
            }
        }

        replicator.run()
    }

    async fn fetch_ancestors(&self) -> Result<Vec<TransactionRecord>, SequoiaError> {
        // Fast path: nothing is nested.
        if self.ancestor_ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self
            .sequoia_transaction
            .lookup_transactions(&self.ancestor_ids)
            .await?;
        let records = require_all_present(records)?;
        validate_transaction_ancestors_all(&records)?;
        Ok(records)
    }

    async fn fetch_replicas(
        &self,
    ) -> Result<Vec<Option<TransactionReplicaRecord>>, SequoiaError> {
        let mut keys =
            Vec::with_capacity(self.cell_tags.len() * (self.ancestor_ids.len() + self.innermost.len()));
        for &cell_tag in &self.cell_tags {
            keys.extend(self.ancestor_ids.iter().map(|&transaction_id| {
                TransactionReplicaKey {
                    transaction_id,
                    cell_tag,
                }
            }));
            keys.extend(self.innermost.iter().map(|record| TransactionReplicaKey {
                transaction_id: record.transaction_id,
                cell_tag,
            }));
        }

        self.sequoia_transaction.lookup_replicas(&keys).await
    }
}

/// Split the requested transactions into innermost records and the
/// topologically sorted closure of their ancestors.
///
/// Transactions that are ancestors of other requested transactions are
/// dropped from the innermost set: replicating a descendant replicates every
/// ancestor anyway. The survivors are sorted by native cell tag so coordinator
/// grouping is a linear scan. Ancestor ordering comes from walking each
/// record's root-first ancestor list and keeping first sightings, which puts
/// every ancestor before any transaction nested under it.
fn collect_and_topologically_sort_ancestors(
    mut transactions: Vec<TransactionRecord>,
) -> (Vec<TransactionRecord>, Vec<TransactionId>) {
    let mut all_ancestors: HashSet<TransactionId> = transactions
        .iter()
        .flat_map(|record| record.ancestor_ids.iter().copied())
        .collect();

    transactions.retain(|record| !all_ancestors.contains(&record.transaction_id));
    transactions.sort_by_key(|record| record.transaction_id.cell_tag());

    let mut ancestor_ids = Vec::with_capacity(all_ancestors.len());
    for record in &transactions {
        for &ancestor_id in &record.ancestor_ids {
            if all_ancestors.remove(&ancestor_id) {
                ancestor_ids.push(ancestor_id);
            }
        }
    }

    (transactions, ancestor_ids)
}
