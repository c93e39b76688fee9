//! Finish (commit or abort) of a mirrored Cypress transaction.
//!
//! Commit and abort share all of the heavy lifting: fetch and check the
//! target, collect its dependent-and-descendant closure, propagate aborts of
//! the closure's subtree roots to every participant cell holding a replica,
//! and purge all four tables. They differ only in the target check, the
//! actions staged for the target itself, and the response.

use std::sync::Arc;

use sequoia_client::record::validate_transaction_ancestors;
use sequoia_client::{
    DependentTransactionRecord, SequoiaError, SequoiaTransaction, Timestamp,
    TransactionDescendantRecord, TransactionFilter, TransactionId, TransactionRecord,
    TransactionReplicaRecord,
};

use crate::action::TransactionAction;
use crate::bootstrap::Bootstrap;
use crate::collector::collect_dependent_transactions;
use crate::messages::AuthenticationIdentity;
use crate::mutation;

/// What finishing the target means on its coordinator cell.
pub(crate) enum FinishMode {
    Commit { commit_timestamp: Timestamp },
    Abort { force: bool },
}

pub(crate) struct FinishPlan {
    bootstrap: Arc<Bootstrap>,
    transaction_id: TransactionId,
    identity: AuthenticationIdentity,
    mode: FinishMode,
}

impl FinishPlan {
    pub(crate) fn new(
        bootstrap: Arc<Bootstrap>,
        transaction_id: TransactionId,
        identity: AuthenticationIdentity,
        mode: FinishMode,
    ) -> Self {
        Self {
            bootstrap,
            transaction_id,
            identity,
            mode,
        }
    }

    pub(crate) async fn apply_and_commit(
        self,
        sequoia_transaction: Arc<dyn SequoiaTransaction>,
    ) -> Result<(), SequoiaError> {
        let records = sequoia_transaction
            .lookup_transactions(&[self.transaction_id])
            .await?;
        let Some(target) = self.check_target_transaction(records.into_iter().next().flatten())?
        else {
            // Force-abort of a vanished target: nothing to do, but the empty
            // Sequoia transaction still commits so the caller gets an ack.
            return mutation::commit_sequoia_transaction(&self.bootstrap, &*sequoia_transaction)
                .await;
        };
        validate_transaction_ancestors(&target)?;

        let collected = collect_dependent_transactions(&*sequoia_transaction, &target).await?;

        let mut replicas = sequoia_transaction
            .select_replicas(TransactionFilter::from_ids(
                collected.transactions.keys().copied(),
            ))
            .await?;
        // The store orders rows by the string form of ids, which is not the
        // id order the range slicing below relies on.
        replicas.sort_by_key(|record| record.transaction_id);

        self.finish_target_transaction_on_master(
            &*sequoia_transaction,
            replicas_of(&replicas, self.transaction_id),
        )?;

        // The coordinator aborts descendants and dependents itself when it
        // processes the target's finish; only the other participant cells
        // need explicit aborts.
        for &root_id in &collected.subtree_roots {
            abort_transaction_on_participants(
                &*sequoia_transaction,
                replicas_of(&replicas, root_id),
            )?;
        }

        for replica in &replicas {
            sequoia_transaction.delete_replica(replica.key());
        }
        for (&transaction_id, record) in &collected.transactions {
            for &prerequisite_id in &record.prerequisite_transaction_ids {
                sequoia_transaction.delete_dependent(DependentTransactionRecord {
                    prerequisite_id,
                    dependent_id: transaction_id,
                });
            }
            for &ancestor_id in &record.ancestor_ids {
                sequoia_transaction.delete_descendant(TransactionDescendantRecord {
                    ancestor_id,
                    descendant_id: transaction_id,
                });
            }
            sequoia_transaction.delete_transaction(transaction_id);
        }

        mutation::commit_sequoia_transaction(&self.bootstrap, &*sequoia_transaction).await
    }

    /// `Ok(None)` means the plan should finish as a no-op; only force-abort
    /// of a missing target qualifies.
    fn check_target_transaction(
        &self,
        record: Option<TransactionRecord>,
    ) -> Result<Option<TransactionRecord>, SequoiaError> {
        match (&self.mode, record) {
            (_, Some(record)) => Ok(Some(record)),
            (FinishMode::Abort { force: true }, None) => Ok(None),
            (_, None) => Err(SequoiaError::NoSuchTransaction(self.transaction_id)),
        }
    }

    fn finish_target_transaction_on_master(
        &self,
        sequoia_transaction: &dyn SequoiaTransaction,
        target_replicas: &[TransactionReplicaRecord],
    ) -> Result<(), SequoiaError> {
        match &self.mode {
            FinishMode::Commit { commit_timestamp } => {
                sequoia_transaction.add_transaction_action(
                    self.bootstrap.cell_tag(),
                    TransactionAction::CommitCypressTransaction {
                        transaction_id: self.transaction_id,
                        commit_timestamp: *commit_timestamp,
                        prerequisite_transaction_ids: Vec::new(),
                        identity: self.identity.clone(),
                    }
                    .encode()?,
                );
                commit_transaction_on_participants(sequoia_transaction, target_replicas)
            }
            FinishMode::Abort { force } => {
                sequoia_transaction.add_transaction_action(
                    self.bootstrap.cell_tag(),
                    TransactionAction::AbortCypressTransaction {
                        transaction_id: self.transaction_id,
                        force: *force,
                        replicate_via_hive: false,
                        identity: self.identity.clone(),
                    }
                    .encode()?,
                );
                abort_transaction_on_participants(sequoia_transaction, target_replicas)
            }
        }
    }
}

/// Contiguous run of replica rows for one transaction. Requires `replicas`
/// sorted by transaction id.
fn replicas_of(
    replicas: &[TransactionReplicaRecord],
    transaction_id: TransactionId,
) -> &[TransactionReplicaRecord] {
    let start = replicas.partition_point(|record| record.transaction_id < transaction_id);
    let end = replicas.partition_point(|record| record.transaction_id <= transaction_id);
    &replicas[start..end]
}

fn abort_transaction_on_participants(
    sequoia_transaction: &dyn SequoiaTransaction,
    replicas: &[TransactionReplicaRecord],
) -> Result<(), SequoiaError> {
    let Some(first) = replicas.first() else {
        // Not replicated anywhere.
        return Ok(());
    };

    let action = TransactionAction::AbortTransaction {
        transaction_id: first.transaction_id,
        force: true,
    }
    .encode()?;
    for replica in replicas {
        sequoia_transaction.add_transaction_action(replica.cell_tag, action.clone());
    }
    Ok(())
}

fn commit_transaction_on_participants(
    sequoia_transaction: &dyn SequoiaTransaction,
    replicas: &[TransactionReplicaRecord],
) -> Result<(), SequoiaError> {
    let Some(first) = replicas.first() else {
        return Ok(());
    };

    let action = TransactionAction::CommitTransaction {
        transaction_id: first.transaction_id,
    }
    .encode()?;
    for replica in replicas {
        sequoia_transaction.add_transaction_action(replica.cell_tag, action.clone());
    }
    Ok(())
}
