//! Participant actions dispatched to master cells.
//!
//! Every mutation the coordinator makes to live master state travels as one
//! of these actions, staged on a Sequoia transaction and delivered atomically
//! with the table mutations when that transaction commits. Actions are
//! encoded with serde so participants (and tests) can decode them without
//! sharing in-process types.

use serde::{Deserialize, Serialize};

use sequoia_client::record::{
    ATTRIBUTE_OPERATION_ID, ATTRIBUTE_OPERATION_TITLE, ATTRIBUTE_OPERATION_TYPE, ATTRIBUTE_TITLE,
};
use sequoia_client::{
    CellTag, SequoiaError, Timestamp, TransactionActionData, TransactionId, TransactionRecord,
};

use crate::messages::AuthenticationIdentity;

/// Mirror of a start request, replayed on the coordinator cell's master
/// state machine. `hint_id` pins the id minted by the Sequoia transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCypressTransactionAction {
    pub hint_id: TransactionId,
    pub timeout: std::time::Duration,
    pub deadline: Option<Timestamp>,
    pub title: Option<String>,
    pub parent_id: Option<TransactionId>,
    pub attributes: std::collections::BTreeMap<String, String>,
    pub prerequisite_transaction_ids: Vec<TransactionId>,
    pub replicate_to_cell_tags: Vec<CellTag>,
    pub identity: AuthenticationIdentity,
}

/// One transaction in a materialize-replicas payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMaterialization {
    pub transaction_id: TransactionId,
    /// Immediate parent, or nil for a top-level transaction.
    pub parent_id: TransactionId,
    pub title: Option<String>,
    pub operation_type: Option<String>,
    pub operation_id: Option<String>,
    pub operation_title: Option<String>,
    pub upload: bool,
}

impl TransactionMaterialization {
    pub fn from_record(record: &TransactionRecord) -> Self {
        Self {
            transaction_id: record.transaction_id,
            parent_id: record.parent_id(),
            title: record.attribute(ATTRIBUTE_TITLE).map(str::to_owned),
            operation_type: record.attribute(ATTRIBUTE_OPERATION_TYPE).map(str::to_owned),
            operation_id: record.attribute(ATTRIBUTE_OPERATION_ID).map(str::to_owned),
            operation_title: record
                .attribute(ATTRIBUTE_OPERATION_TITLE)
                .map(str::to_owned),
            upload: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionAction {
    /// Start the transaction on its coordinator cell.
    StartCypressTransaction(StartCypressTransactionAction),
    /// Commit the target transaction on its coordinator cell.
    CommitCypressTransaction {
        transaction_id: TransactionId,
        commit_timestamp: Timestamp,
        prerequisite_transaction_ids: Vec<TransactionId>,
        identity: AuthenticationIdentity,
    },
    /// Abort the target transaction on its coordinator cell. Replication to
    /// participants is handled by explicit actions, never via Hive.
    AbortCypressTransaction {
        transaction_id: TransactionId,
        force: bool,
        replicate_via_hive: bool,
        identity: AuthenticationIdentity,
    },
    /// Instantiate replicas of the listed transactions on the target cell.
    MaterializeCypressTransactionReplicas {
        transactions: Vec<TransactionMaterialization>,
    },
    /// Commit a replica on a participant cell.
    CommitTransaction { transaction_id: TransactionId },
    /// Abort a replica on a participant cell.
    AbortTransaction {
        transaction_id: TransactionId,
        force: bool,
    },
    /// Tell a coordinator cell that its transactions now have replicas on
    /// `destination_cell_tag`.
    MarkCypressTransactionsReplicatedToCell {
        destination_cell_tag: CellTag,
        transaction_ids: Vec<TransactionId>,
    },
}

impl TransactionAction {
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionAction::StartCypressTransaction(_) => "start_cypress_transaction",
            TransactionAction::CommitCypressTransaction { .. } => "commit_cypress_transaction",
            TransactionAction::AbortCypressTransaction { .. } => "abort_cypress_transaction",
            TransactionAction::MaterializeCypressTransactionReplicas { .. } => {
                "materialize_cypress_transaction_replicas"
            }
            TransactionAction::CommitTransaction { .. } => "commit_transaction",
            TransactionAction::AbortTransaction { .. } => "abort_transaction",
            TransactionAction::MarkCypressTransactionsReplicatedToCell { .. } => {
                "mark_cypress_transactions_replicated_to_cell"
            }
        }
    }

    pub fn encode(&self) -> Result<TransactionActionData, SequoiaError> {
        let payload = serde_json::to_vec(self)
            .map_err(|err| anyhow::anyhow!("encode {} action: {err}", self.kind()))?;
        Ok(TransactionActionData {
            kind: self.kind().to_string(),
            payload,
        })
    }

    pub fn decode(data: &TransactionActionData) -> Result<Self, SequoiaError> {
        let action: TransactionAction = serde_json::from_slice(&data.payload)
            .map_err(|err| anyhow::anyhow!("decode {} action: {err}", data.kind))?;
        Ok(action)
    }
}
