//! Client-side model of the Sequoia metadata store.
//!
//! This crate defines the identifier scheme and the record types for the four
//! transaction metadata tables, plus the `SequoiaTransaction` staging contract
//! every coordinator operation runs against. The store itself lives elsewhere;
//! implementations of the traits here are expected to buffer row mutations and
//! participant actions until `commit` applies them atomically.

pub mod error;
pub mod filter;
pub mod id;
pub mod record;
pub mod testing;
pub mod transaction;

pub use error::SequoiaError;
pub use filter::TransactionFilter;
pub use id::{CellId, CellTag, ObjectKind, Timestamp, TransactionId};
pub use record::{
    DependentTransactionRecord, SequoiaTable, TransactionDescendantRecord, TransactionRecord,
    TransactionReplicaKey, TransactionReplicaRecord,
};
pub use transaction::{
    CommitOptions, LockMode, PrepareMode, SequoiaClient, SequoiaTransaction, TransactionActionData,
};
