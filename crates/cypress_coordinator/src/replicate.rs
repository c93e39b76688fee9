//! Lazy replication of foreign transactions onto the local cell.
//!
//! Requests routed through this cell may reference transactions coordinated
//! elsewhere; this plan materializes them (and their ancestors) here. A
//! missing transaction is treated as replicated everywhere: the request that
//! triggered replication will find "no such transaction" on its own.

use std::sync::Arc;

use sequoia_client::record::validate_transaction_ancestors_all;
use sequoia_client::{
    LockMode, SequoiaError, SequoiaTransaction, TransactionId, TransactionRecord,
};

use crate::action::TransactionAction;
use crate::bootstrap::Bootstrap;
use crate::mutation;
use crate::replicator::TransactionReplicator;

pub(crate) struct ReplicatePlan {
    bootstrap: Arc<Bootstrap>,
    transaction_ids: Vec<TransactionId>,
}

impl ReplicatePlan {
    pub(crate) fn new(bootstrap: Arc<Bootstrap>, transaction_ids: &[TransactionId]) -> Self {
        let local_cell_tag = bootstrap.cell_tag();
        // Nobody needs a replica of a transaction on its own native cell;
        // such requests are common under request routing and drop out here.
        let transaction_ids = transaction_ids
            .iter()
            .copied()
            .filter(|id| id.cell_tag() != local_cell_tag)
            .collect();
        Self {
            bootstrap,
            transaction_ids,
        }
    }

    pub(crate) async fn apply_and_commit(
        self,
        sequoia_transaction: Arc<dyn SequoiaTransaction>,
    ) -> Result<(), SequoiaError> {
        // Fast path.
        if self.transaction_ids.is_empty() {
            return mutation::commit_sequoia_transaction(&self.bootstrap, &*sequoia_transaction)
                .await;
        }

        let records = sequoia_transaction
            .lookup_transactions(&self.transaction_ids)
            .await?;
        let records: Vec<TransactionRecord> = records.into_iter().flatten().collect();
        validate_transaction_ancestors_all(&records)?;

        if records.is_empty() {
            return mutation::commit_sequoia_transaction(&self.bootstrap, &*sequoia_transaction)
                .await;
        }

        let local_cell_tag = self.bootstrap.cell_tag();
        let replicator = TransactionReplicator::new(
            sequoia_transaction.clone(),
            records,
            vec![local_cell_tag],
        );

        // Replicating a transaction implicitly replicates its ancestors, so
        // only the innermost transactions are reported to their coordinators.
        replicator.for_each_coordinator_group(|group| {
            let coordinator_cell_tag = group[0].transaction_id.cell_tag();
            let mut group_ids = Vec::with_capacity(group.len());
            for record in group {
                // Blocks a concurrent finish of the transaction being copied.
                sequoia_transaction
                    .lock_transaction(record.transaction_id, LockMode::SharedStrong);
                group_ids.push(record.transaction_id);
            }

            sequoia_transaction.add_transaction_action(
                coordinator_cell_tag,
                TransactionAction::MarkCypressTransactionsReplicatedToCell {
                    destination_cell_tag: local_cell_tag,
                    transaction_ids: group_ids,
                }
                .encode()?,
            );
            Ok(())
        })?;

        replicator.run().await?;

        mutation::commit_sequoia_transaction(&self.bootstrap, &*sequoia_transaction).await
    }
}
