//! Typed `transaction_id IN (...)` predicate for select operations.
//!
//! Select queries against the metadata tables only ever filter on the first
//! key column, so the predicate is carried as a plain id set instead of query
//! text. The textual form is kept for log lines.

use std::collections::BTreeSet;
use std::fmt;

use crate::id::TransactionId;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    ids: BTreeSet<TransactionId>,
}

impl TransactionFilter {
    pub fn from_ids(ids: impl IntoIterator<Item = TransactionId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = TransactionId> + '_ {
        self.ids.iter().copied()
    }
}

impl fmt::Display for TransactionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("transaction_id in (")?;
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}")?;
        }
        f.write_str(")")
    }
}
