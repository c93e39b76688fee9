//! Record types for the four transaction metadata tables.
//!
//! The tables mirror live master state:
//! - `transactions` is the primary record, keyed by id;
//! - `transaction_descendants` materializes the transitive ancestor relation;
//! - `dependent_transactions` stores direct prerequisite edges only;
//! - `transaction_replicas` marks the cells a transaction is materialized on.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SequoiaError;
use crate::id::{CellTag, ObjectKind, TransactionId};

/// Attribute names persisted on a `transactions` record.
pub const ATTRIBUTE_TITLE: &str = "title";
pub const ATTRIBUTE_OPERATION_TYPE: &str = "operation_type";
pub const ATTRIBUTE_OPERATION_ID: &str = "operation_id";
pub const ATTRIBUTE_OPERATION_TITLE: &str = "operation_title";

/// The metadata tables this crate models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequoiaTable {
    Transactions,
    TransactionDescendants,
    DependentTransactions,
    TransactionReplicas,
}

impl SequoiaTable {
    pub fn name(self) -> &'static str {
        match self {
            SequoiaTable::Transactions => "transactions",
            SequoiaTable::TransactionDescendants => "transaction_descendants",
            SequoiaTable::DependentTransactions => "dependent_transactions",
            SequoiaTable::TransactionReplicas => "transaction_replicas",
        }
    }
}

impl fmt::Display for SequoiaTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primary record of the `transactions` table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: TransactionId,
    /// Ancestors ordered root first; empty iff the transaction is top-level.
    pub ancestor_ids: Vec<TransactionId>,
    pub attributes: BTreeMap<String, String>,
    /// Sorted and deduplicated.
    pub prerequisite_transaction_ids: Vec<TransactionId>,
}

impl TransactionRecord {
    /// Immediate parent, or the nil id for a top-level transaction.
    pub fn parent_id(&self) -> TransactionId {
        self.ancestor_ids.last().copied().unwrap_or(TransactionId::NIL)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// One row of the `transaction_descendants` table. Rows exist for every
/// (ancestor, descendant) pair, not just direct parents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionDescendantRecord {
    pub ancestor_id: TransactionId,
    pub descendant_id: TransactionId,
}

/// One row of the `dependent_transactions` table. Direct edges only; the
/// transitive closure is computed on demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependentTransactionRecord {
    pub prerequisite_id: TransactionId,
    pub dependent_id: TransactionId,
}

/// Key of the `transaction_replicas` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionReplicaKey {
    pub transaction_id: TransactionId,
    pub cell_tag: CellTag,
}

/// One row of the `transaction_replicas` table. Existence of the row means
/// the transaction has been materialized on the cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionReplicaRecord {
    pub transaction_id: TransactionId,
    pub cell_tag: CellTag,
}

impl TransactionReplicaRecord {
    pub fn key(&self) -> TransactionReplicaKey {
        TransactionReplicaKey {
            transaction_id: self.transaction_id,
            cell_tag: self.cell_tag,
        }
    }
}

/// Check the nesting invariant of a `transactions` record: the ancestor list
/// is non-empty exactly for nested-transaction ids.
pub fn validate_transaction_ancestors(record: &TransactionRecord) -> Result<(), SequoiaError> {
    let is_nested = record.transaction_id.object_kind() == Some(ObjectKind::NestedTransaction);
    if is_nested != !record.ancestor_ids.is_empty() {
        return Err(SequoiaError::TableCorrupted {
            table: SequoiaTable::Transactions,
        });
    }
    Ok(())
}

/// Batch form of [`validate_transaction_ancestors`].
pub fn validate_transaction_ancestors_all<'a>(
    records: impl IntoIterator<Item = &'a TransactionRecord>,
) -> Result<(), SequoiaError> {
    for record in records {
        validate_transaction_ancestors(record)?;
    }
    Ok(())
}

/// Unwrap a lookup result where every key was produced by another metadata
/// table. A gap means the tables disagree, which is corruption, not a user
/// error.
pub fn require_all_present(
    records: Vec<Option<TransactionRecord>>,
) -> Result<Vec<TransactionRecord>, SequoiaError> {
    records
        .into_iter()
        .map(|record| {
            record.ok_or(SequoiaError::TableCorrupted {
                table: SequoiaTable::Transactions,
            })
        })
        .collect()
}
