//! Error taxonomy surfaced by Sequoia-backed operations.

use thiserror::Error;

use crate::id::TransactionId;
use crate::record::SequoiaTable;

/// Errors produced by the Sequoia store and by coordinator plans running
/// against it.
///
/// `Transient` marks failures the store considers safe to retry (lock
/// conflicts, leadership changes); the mutation layer wraps them in
/// `Retriable` so the RPC layer can schedule the retry. `TableCorrupted`
/// means a cross-table invariant was violated on read and is never retried.
#[derive(Debug, Error)]
pub enum SequoiaError {
    #[error("sequoia table {table} is corrupted")]
    TableCorrupted { table: SequoiaTable },

    #[error("no such transaction {0}")]
    NoSuchTransaction(TransactionId),

    #[error("prerequisite check failed: no such transaction {0}")]
    PrerequisiteCheckFailed(TransactionId),

    #[error("sequoia transient failure: {reason}")]
    Transient { reason: String },

    #[error("sequoia retriable error")]
    Retriable(#[source] Box<SequoiaError>),

    #[error("{0}")]
    Unsupported(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SequoiaError {
    /// Whether the error chain contains a failure the store classifies as
    /// retriable.
    pub fn is_retriable(&self) -> bool {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(SequoiaError::Transient { .. }) = err.downcast_ref::<SequoiaError>() {
                return true;
            }
            current = err.source();
        }
        false
    }

    /// First table-corruption error in the chain, if any.
    pub fn find_corruption(&self) -> Option<SequoiaTable> {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(SequoiaError::TableCorrupted { table }) = err.downcast_ref::<SequoiaError>()
            {
                return Some(*table);
            }
            current = err.source();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retriable_through_the_chain() {
        let inner = SequoiaError::Transient {
            reason: "row lock conflict".into(),
        };
        let wrapped = SequoiaError::Retriable(Box::new(inner));
        assert!(wrapped.is_retriable());
        assert!(!SequoiaError::Unsupported("nope".into()).is_retriable());
    }

    #[test]
    fn corruption_is_found_under_wrappers() {
        let err = SequoiaError::Retriable(Box::new(SequoiaError::TableCorrupted {
            table: SequoiaTable::TransactionDescendants,
        }));
        assert_eq!(err.find_corruption(), Some(SequoiaTable::TransactionDescendants));
        assert_eq!(
            SequoiaError::NoSuchTransaction(TransactionId::NIL).find_corruption(),
            None
        );
    }
}
