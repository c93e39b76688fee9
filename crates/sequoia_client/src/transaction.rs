//! The transactional staging contract against the Sequoia store.
//!
//! A `SequoiaTransaction` is a single staging buffer: row mutations and
//! participant actions accumulate locally and are applied atomically by
//! `commit`, which also delivers every staged action to the master state
//! machine of its target cell. Reads (`lookup_*`, `select_*`) observe the
//! committed store, not the staging buffer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SequoiaError;
use crate::filter::TransactionFilter;
use crate::id::{CellId, CellTag, ObjectKind, TransactionId};
use crate::record::{
    DependentTransactionRecord, TransactionDescendantRecord, TransactionRecord,
    TransactionReplicaKey, TransactionReplicaRecord,
};

/// Intent-lock modes on a `transactions` row.
///
/// `SharedStrong` blocks a concurrent commit or abort of the row but stays
/// compatible with other shared holders, so nested starts under the same
/// parent can proceed concurrently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    SharedStrong,
}

/// When the coordinator cell prepares relative to the participants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrepareMode {
    Early,
    #[default]
    Late,
}

#[derive(Clone, Copy, Debug)]
pub struct CommitOptions {
    pub coordinator_cell_id: CellId,
    pub prepare_mode: PrepareMode,
}

/// Serialized participant action, dispatched to a cell's master state
/// machine when the Sequoia transaction commits. `kind` names the action for
/// logging; `payload` is opaque to the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionActionData {
    pub kind: String,
    pub payload: Vec<u8>,
}

/// One open transaction against the Sequoia store.
#[async_trait]
pub trait SequoiaTransaction: Send + Sync {
    /// Mint a fresh id attributed to `cell_tag`. Collision-free within the
    /// store; pure with respect to the transaction.
    fn generate_transaction_id(&self, kind: ObjectKind, cell_tag: CellTag) -> TransactionId;

    /// Point lookups in `transactions`; one `Option` per requested key.
    async fn lookup_transactions(
        &self,
        keys: &[TransactionId],
    ) -> Result<Vec<Option<TransactionRecord>>, SequoiaError>;

    /// Point lookups in `transaction_replicas`; one `Option` per key.
    async fn lookup_replicas(
        &self,
        keys: &[TransactionReplicaKey],
    ) -> Result<Vec<Option<TransactionReplicaRecord>>, SequoiaError>;

    async fn select_descendants(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<TransactionDescendantRecord>, SequoiaError>;

    async fn select_dependents(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<DependentTransactionRecord>, SequoiaError>;

    async fn select_replicas(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<TransactionReplicaRecord>, SequoiaError>;

    /// Record an intent lock on a `transactions` row, checked at commit.
    fn lock_transaction(&self, id: TransactionId, mode: LockMode);

    fn write_transaction(&self, record: TransactionRecord);
    fn write_descendant(&self, record: TransactionDescendantRecord);
    fn write_dependent(&self, record: DependentTransactionRecord);
    fn write_replica(&self, record: TransactionReplicaRecord);

    fn delete_transaction(&self, key: TransactionId);
    fn delete_descendant(&self, key: TransactionDescendantRecord);
    fn delete_dependent(&self, key: DependentTransactionRecord);
    fn delete_replica(&self, key: TransactionReplicaKey);

    /// Stage a participant action for delivery to `cell_tag` at commit.
    fn add_transaction_action(&self, cell_tag: CellTag, data: TransactionActionData);

    /// Prepare and commit all staged mutations and actions atomically.
    async fn commit(&self, options: CommitOptions) -> Result<(), SequoiaError>;
}

/// Handle to the Sequoia store held by the embedding process.
#[async_trait]
pub trait SequoiaClient: Send + Sync {
    async fn start_transaction(&self) -> Result<Arc<dyn SequoiaTransaction>, SequoiaError>;
}
