//! Start of a mirrored Cypress transaction.
//!
//! One Sequoia transaction stages everything: the new `transactions` row, a
//! `transaction_descendants` row per ancestor, a `dependent_transactions` row
//! per Sequoia prerequisite, the start action for the coordinator cell, and
//! replica materialization for any requested destination cells.

use std::sync::Arc;

use sequoia_client::record::{
    validate_transaction_ancestors, validate_transaction_ancestors_all, TransactionRecord,
    ATTRIBUTE_OPERATION_ID, ATTRIBUTE_OPERATION_TITLE, ATTRIBUTE_OPERATION_TYPE, ATTRIBUTE_TITLE,
};
use sequoia_client::{
    CellTag, DependentTransactionRecord, LockMode, ObjectKind, SequoiaError, SequoiaTransaction,
    TransactionDescendantRecord, TransactionId,
};

use crate::action::{StartCypressTransactionAction, TransactionAction};
use crate::bootstrap::Bootstrap;
use crate::messages::{AuthenticationIdentity, StartTransactionRequest, StartTransactionResponse};
use crate::mutation;
use crate::replicator::{SimpleTransactionReplicator, TransactionReplicator};

pub(crate) struct StartPlan {
    bootstrap: Arc<Bootstrap>,
    request: StartTransactionRequest,
    identity: AuthenticationIdentity,
    parent_id: Option<TransactionId>,
    /// Destinations with the local cell removed, sorted and deduplicated.
    replicate_to_cell_tags: Vec<CellTag>,
    /// Sorted and deduplicated.
    prerequisite_transaction_ids: Vec<TransactionId>,
}

impl StartPlan {
    pub(crate) fn new(
        bootstrap: Arc<Bootstrap>,
        request: StartTransactionRequest,
        identity: AuthenticationIdentity,
    ) -> Self {
        let mut prerequisite_transaction_ids = request.prerequisite_transaction_ids.clone();
        prerequisite_transaction_ids.sort();
        prerequisite_transaction_ids.dedup();

        let local_cell_tag = bootstrap.cell_tag();
        let mut replicate_to_cell_tags = request.replicate_to_cell_tags.clone();
        replicate_to_cell_tags.retain(|&cell_tag| cell_tag != local_cell_tag);
        replicate_to_cell_tags.sort();
        replicate_to_cell_tags.dedup();

        let parent_id = request.parent_id;
        Self {
            bootstrap,
            request,
            identity,
            parent_id,
            replicate_to_cell_tags,
            prerequisite_transaction_ids,
        }
    }

    pub(crate) async fn apply_and_commit(
        self,
        sequoia_transaction: Arc<dyn SequoiaTransaction>,
    ) -> Result<StartTransactionResponse, SequoiaError> {
        let kind = if self.parent_id.is_some() {
            ObjectKind::NestedTransaction
        } else {
            ObjectKind::Transaction
        };
        let transaction_id =
            sequoia_transaction.generate_transaction_id(kind, self.bootstrap.cell_tag());
        let start_action = self.build_start_action(transaction_id);

        // Fast path: no hierarchy and no prerequisites means no reads at all.
        if self.parent_id.is_none() && self.prerequisite_transaction_ids.is_empty() {
            self.modify_tables_and_register_actions(
                &sequoia_transaction,
                Vec::new(),
                transaction_id,
                &start_action,
            )
            .await?;
            mutation::commit_sequoia_transaction(&self.bootstrap, &*sequoia_transaction).await?;
            return Ok(StartTransactionResponse { transaction_id });
        }

        self.handle_prerequisite_transactions(&*sequoia_transaction)
            .await?;
        let ancestor_ids = self
            .lock_parent_and_collect_ancestors(&*sequoia_transaction)
            .await?;
        self.modify_tables_and_register_actions(
            &sequoia_transaction,
            ancestor_ids,
            transaction_id,
            &start_action,
        )
        .await?;
        mutation::commit_sequoia_transaction(&self.bootstrap, &*sequoia_transaction).await?;

        Ok(StartTransactionResponse { transaction_id })
    }

    fn build_start_action(&self, hint_id: TransactionId) -> TransactionAction {
        TransactionAction::StartCypressTransaction(StartCypressTransactionAction {
            hint_id,
            timeout: self.request.timeout,
            deadline: self.request.deadline,
            title: self.request.title.clone(),
            parent_id: self.request.parent_id,
            attributes: self.request.attributes.clone(),
            prerequisite_transaction_ids: self.prerequisite_transaction_ids.clone(),
            replicate_to_cell_tags: self.replicate_to_cell_tags.clone(),
            identity: self.identity.clone(),
        })
    }

    async fn modify_tables_and_register_actions(
        &self,
        sequoia_transaction: &Arc<dyn SequoiaTransaction>,
        ancestor_ids: Vec<TransactionId>,
        transaction_id: TransactionId,
        start_action: &TransactionAction,
    ) -> Result<(), SequoiaError> {
        for &ancestor_id in &ancestor_ids {
            sequoia_transaction.write_descendant(TransactionDescendantRecord {
                ancestor_id,
                descendant_id: transaction_id,
            });
        }

        let mut attributes = self.request.attributes.clone();
        attributes.retain(|name, _| {
            name == ATTRIBUTE_OPERATION_TYPE
                || name == ATTRIBUTE_OPERATION_ID
                || name == ATTRIBUTE_OPERATION_TITLE
        });
        if let Some(title) = &self.request.title {
            attributes.insert(ATTRIBUTE_TITLE.to_string(), title.clone());
        }

        let created = TransactionRecord {
            transaction_id,
            ancestor_ids,
            attributes,
            prerequisite_transaction_ids: self.prerequisite_transaction_ids.clone(),
        };
        sequoia_transaction.write_transaction(created.clone());

        sequoia_transaction
            .add_transaction_action(self.bootstrap.cell_tag(), start_action.encode()?);

        for &prerequisite_id in &self.prerequisite_transaction_ids {
            if !prerequisite_id.is_sequoia() {
                // System transactions are not mirrored, so no dependency row;
                // their aborts reach dependents through inter-cell messaging.
                continue;
            }
            sequoia_transaction.write_dependent(DependentTransactionRecord {
                prerequisite_id,
                dependent_id: transaction_id,
            });
        }

        if self.replicate_to_cell_tags.is_empty() {
            return Ok(());
        }

        if self.parent_id.is_none() {
            // Trivial hierarchy: the coordinator already knows every replica,
            // so the simple replicator suffices.
            SimpleTransactionReplicator::new(&**sequoia_transaction)
                .add_transaction(&created)
                .add_cells(self.replicate_to_cell_tags.iter().copied())
                .run()?;
            return Ok(());
        }

        TransactionReplicator::new(
            sequoia_transaction.clone(),
            vec![created],
            self.replicate_to_cell_tags.clone(),
        )
        .run()
        .await
    }

    async fn handle_prerequisite_transactions(
        &self,
        sequoia_transaction: &dyn SequoiaTransaction,
    ) -> Result<(), SequoiaError> {
        if self.prerequisite_transaction_ids.is_empty() {
            return Ok(());
        }

        let records = sequoia_transaction
            .lookup_transactions(&self.prerequisite_transaction_ids)
            .await?;
        for (&id, record) in self.prerequisite_transaction_ids.iter().zip(&records) {
            if record.is_none() {
                return Err(SequoiaError::PrerequisiteCheckFailed(id));
            }
        }

        let records: Vec<TransactionRecord> = records.into_iter().flatten().collect();
        validate_transaction_ancestors_all(&records)?;

        for record in &records {
            sequoia_transaction.lock_transaction(record.transaction_id, LockMode::SharedStrong);
        }
        Ok(())
    }

    async fn lock_parent_and_collect_ancestors(
        &self,
        sequoia_transaction: &dyn SequoiaTransaction,
    ) -> Result<Vec<TransactionId>, SequoiaError> {
        let Some(parent_id) = self.parent_id else {
            return Ok(Vec::new());
        };

        // A shared lock blocks concurrent commit or abort of the parent while
        // still admitting other nested starts under it.
        sequoia_transaction.lock_transaction(parent_id, LockMode::SharedStrong);

        let records = sequoia_transaction.lookup_transactions(&[parent_id]).await?;
        let Some(parent) = records.into_iter().next().flatten() else {
            return Err(SequoiaError::NoSuchTransaction(parent_id));
        };
        validate_transaction_ancestors(&parent)?;

        let mut ancestor_ids = parent.ancestor_ids;
        ancestor_ids.push(parent_id);
        Ok(ancestor_ids)
    }
}
