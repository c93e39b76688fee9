//! In-memory realization of the store contract for tests.
//!
//! `InMemorySequoiaStore` keeps the four tables in plain maps and records
//! every participant action a commit dispatches, per cell and in dispatch
//! order, so tests can assert the exact action stream a cell receives.
//! Transactions stage mutations exactly like the real client: reads observe
//! the committed tables and nothing becomes visible before `commit`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::SequoiaError;
use crate::filter::TransactionFilter;
use crate::id::{CellId, CellTag, ObjectKind, TransactionId};
use crate::record::{
    DependentTransactionRecord, TransactionDescendantRecord, TransactionRecord,
    TransactionReplicaKey, TransactionReplicaRecord,
};
use crate::transaction::{
    CommitOptions, LockMode, SequoiaClient, SequoiaTransaction, TransactionActionData,
};

#[derive(Default)]
struct Tables {
    transactions: BTreeMap<TransactionId, TransactionRecord>,
    descendants: BTreeSet<(TransactionId, TransactionId)>,
    dependents: BTreeSet<(TransactionId, TransactionId)>,
    replicas: BTreeSet<(TransactionId, CellTag)>,
    actions_by_cell: BTreeMap<CellTag, Vec<TransactionActionData>>,
    lock_log: Vec<(TransactionId, LockMode)>,
    committed_coordinators: Vec<CellId>,
}

#[derive(Default)]
struct StoreInner {
    tables: Mutex<Tables>,
    next_counter: AtomicU64,
    fail_next_commit: Mutex<Option<SequoiaError>>,
}

/// Cheaply cloneable handle to one in-memory store.
#[derive(Clone, Default)]
pub struct InMemorySequoiaStore {
    inner: Arc<StoreInner>,
}

impl InMemorySequoiaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint an id the same way an open transaction would.
    pub fn mint_id(&self, kind: ObjectKind, cell_tag: CellTag) -> TransactionId {
        let counter = self.inner.next_counter.fetch_add(1, Ordering::SeqCst) + 1;
        TransactionId::sequoia(kind, cell_tag, counter)
    }

    /// Seed a `transactions` row together with the derived rows a real start
    /// would have written: one descendant row per ancestor and one dependent
    /// row per Sequoia prerequisite.
    pub fn insert_transaction(&self, record: TransactionRecord) {
        let mut tables = self.inner.tables.lock().unwrap();
        for ancestor_id in &record.ancestor_ids {
            tables
                .descendants
                .insert((*ancestor_id, record.transaction_id));
        }
        for prerequisite_id in &record.prerequisite_transaction_ids {
            if prerequisite_id.is_sequoia() {
                tables
                    .dependents
                    .insert((*prerequisite_id, record.transaction_id));
            }
        }
        tables.transactions.insert(record.transaction_id, record);
    }

    pub fn insert_replica(&self, transaction_id: TransactionId, cell_tag: CellTag) {
        let mut tables = self.inner.tables.lock().unwrap();
        tables.replicas.insert((transaction_id, cell_tag));
    }

    /// Make the next `commit` fail with `err` instead of applying.
    pub fn fail_next_commit(&self, err: SequoiaError) {
        *self.inner.fail_next_commit.lock().unwrap() = Some(err);
    }

    pub fn transaction(&self, id: TransactionId) -> Option<TransactionRecord> {
        self.inner.tables.lock().unwrap().transactions.get(&id).cloned()
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.tables.lock().unwrap().transactions.len()
    }

    pub fn descendant_rows(&self) -> Vec<TransactionDescendantRecord> {
        self.inner
            .tables
            .lock()
            .unwrap()
            .descendants
            .iter()
            .map(|&(ancestor_id, descendant_id)| TransactionDescendantRecord {
                ancestor_id,
                descendant_id,
            })
            .collect()
    }

    pub fn dependent_rows(&self) -> Vec<DependentTransactionRecord> {
        self.inner
            .tables
            .lock()
            .unwrap()
            .dependents
            .iter()
            .map(|&(prerequisite_id, dependent_id)| DependentTransactionRecord {
                prerequisite_id,
                dependent_id,
            })
            .collect()
    }

    pub fn replica_rows(&self) -> Vec<TransactionReplicaRecord> {
        self.inner
            .tables
            .lock()
            .unwrap()
            .replicas
            .iter()
            .map(|&(transaction_id, cell_tag)| TransactionReplicaRecord {
                transaction_id,
                cell_tag,
            })
            .collect()
    }

    /// Actions committed for one cell, in dispatch order.
    pub fn actions(&self, cell_tag: CellTag) -> Vec<TransactionActionData> {
        self.inner
            .tables
            .lock()
            .unwrap()
            .actions_by_cell
            .get(&cell_tag)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear_actions(&self) {
        self.inner.tables.lock().unwrap().actions_by_cell.clear();
    }

    /// Ids of rows locked by committed transactions, in lock order.
    pub fn locked_transactions(&self) -> Vec<TransactionId> {
        self.inner
            .tables
            .lock()
            .unwrap()
            .lock_log
            .iter()
            .map(|&(id, _)| id)
            .collect()
    }

    /// Coordinator cells named by committed transactions, in commit order.
    pub fn committed_coordinators(&self) -> Vec<CellId> {
        self.inner.tables.lock().unwrap().committed_coordinators.clone()
    }

    /// True when all four metadata tables hold no rows.
    pub fn tables_are_empty(&self) -> bool {
        let tables = self.inner.tables.lock().unwrap();
        tables.transactions.is_empty()
            && tables.descendants.is_empty()
            && tables.dependents.is_empty()
            && tables.replicas.is_empty()
    }
}

#[async_trait]
impl SequoiaClient for InMemorySequoiaStore {
    async fn start_transaction(&self) -> Result<Arc<dyn SequoiaTransaction>, SequoiaError> {
        Ok(Arc::new(InMemoryTransaction {
            store: self.clone(),
            staged: Mutex::default(),
        }))
    }
}

#[derive(Default)]
struct Staged {
    locks: Vec<(TransactionId, LockMode)>,
    transaction_writes: Vec<TransactionRecord>,
    descendant_writes: Vec<TransactionDescendantRecord>,
    dependent_writes: Vec<DependentTransactionRecord>,
    replica_writes: Vec<TransactionReplicaRecord>,
    transaction_deletes: Vec<TransactionId>,
    descendant_deletes: Vec<TransactionDescendantRecord>,
    dependent_deletes: Vec<DependentTransactionRecord>,
    replica_deletes: Vec<TransactionReplicaKey>,
    actions: Vec<(CellTag, TransactionActionData)>,
}

/// One open in-memory transaction: a staging buffer over the store snapshot.
pub struct InMemoryTransaction {
    store: InMemorySequoiaStore,
    staged: Mutex<Staged>,
}

#[async_trait]
impl SequoiaTransaction for InMemoryTransaction {
    fn generate_transaction_id(&self, kind: ObjectKind, cell_tag: CellTag) -> TransactionId {
        self.store.mint_id(kind, cell_tag)
    }

    async fn lookup_transactions(
        &self,
        keys: &[TransactionId],
    ) -> Result<Vec<Option<TransactionRecord>>, SequoiaError> {
        let tables = self.store.inner.tables.lock().unwrap();
        Ok(keys
            .iter()
            .map(|key| tables.transactions.get(key).cloned())
            .collect())
    }

    async fn lookup_replicas(
        &self,
        keys: &[TransactionReplicaKey],
    ) -> Result<Vec<Option<TransactionReplicaRecord>>, SequoiaError> {
        let tables = self.store.inner.tables.lock().unwrap();
        Ok(keys
            .iter()
            .map(|key| {
                tables
                    .replicas
                    .contains(&(key.transaction_id, key.cell_tag))
                    .then_some(TransactionReplicaRecord {
                        transaction_id: key.transaction_id,
                        cell_tag: key.cell_tag,
                    })
            })
            .collect())
    }

    async fn select_descendants(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<TransactionDescendantRecord>, SequoiaError> {
        let tables = self.store.inner.tables.lock().unwrap();
        Ok(tables
            .descendants
            .iter()
            .filter(|(ancestor_id, _)| filter.contains(*ancestor_id))
            .map(|&(ancestor_id, descendant_id)| TransactionDescendantRecord {
                ancestor_id,
                descendant_id,
            })
            .collect())
    }

    async fn select_dependents(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<DependentTransactionRecord>, SequoiaError> {
        let tables = self.store.inner.tables.lock().unwrap();
        Ok(tables
            .dependents
            .iter()
            .filter(|(prerequisite_id, _)| filter.contains(*prerequisite_id))
            .map(|&(prerequisite_id, dependent_id)| DependentTransactionRecord {
                prerequisite_id,
                dependent_id,
            })
            .collect())
    }

    async fn select_replicas(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<TransactionReplicaRecord>, SequoiaError> {
        let tables = self.store.inner.tables.lock().unwrap();
        Ok(tables
            .replicas
            .iter()
            .filter(|(transaction_id, _)| filter.contains(*transaction_id))
            .map(|&(transaction_id, cell_tag)| TransactionReplicaRecord {
                transaction_id,
                cell_tag,
            })
            .collect())
    }

    fn lock_transaction(&self, id: TransactionId, mode: LockMode) {
        self.staged.lock().unwrap().locks.push((id, mode));
    }

    fn write_transaction(&self, record: TransactionRecord) {
        self.staged.lock().unwrap().transaction_writes.push(record);
    }

    fn write_descendant(&self, record: TransactionDescendantRecord) {
        self.staged.lock().unwrap().descendant_writes.push(record);
    }

    fn write_dependent(&self, record: DependentTransactionRecord) {
        self.staged.lock().unwrap().dependent_writes.push(record);
    }

    fn write_replica(&self, record: TransactionReplicaRecord) {
        self.staged.lock().unwrap().replica_writes.push(record);
    }

    fn delete_transaction(&self, key: TransactionId) {
        self.staged.lock().unwrap().transaction_deletes.push(key);
    }

    fn delete_descendant(&self, key: TransactionDescendantRecord) {
        self.staged.lock().unwrap().descendant_deletes.push(key);
    }

    fn delete_dependent(&self, key: DependentTransactionRecord) {
        self.staged.lock().unwrap().dependent_deletes.push(key);
    }

    fn delete_replica(&self, key: TransactionReplicaKey) {
        self.staged.lock().unwrap().replica_deletes.push(key);
    }

    fn add_transaction_action(&self, cell_tag: CellTag, data: TransactionActionData) {
        self.staged.lock().unwrap().actions.push((cell_tag, data));
    }

    async fn commit(&self, options: CommitOptions) -> Result<(), SequoiaError> {
        if let Some(err) = self.store.inner.fail_next_commit.lock().unwrap().take() {
            return Err(err);
        }

        let staged = std::mem::take(&mut *self.staged.lock().unwrap());
        let mut tables = self.store.inner.tables.lock().unwrap();

        for record in staged.transaction_writes {
            tables.transactions.insert(record.transaction_id, record);
        }
        for row in staged.descendant_writes {
            tables.descendants.insert((row.ancestor_id, row.descendant_id));
        }
        for row in staged.dependent_writes {
            tables.dependents.insert((row.prerequisite_id, row.dependent_id));
        }
        for row in staged.replica_writes {
            tables.replicas.insert((row.transaction_id, row.cell_tag));
        }

        for key in staged.transaction_deletes {
            tables.transactions.remove(&key);
        }
        for key in staged.descendant_deletes {
            tables.descendants.remove(&(key.ancestor_id, key.descendant_id));
        }
        for key in staged.dependent_deletes {
            tables.dependents.remove(&(key.prerequisite_id, key.dependent_id));
        }
        for key in staged.replica_deletes {
            tables.replicas.remove(&(key.transaction_id, key.cell_tag));
        }

        for (cell_tag, data) in staged.actions {
            tables.actions_by_cell.entry(cell_tag).or_default().push(data);
        }
        tables.lock_log.extend(staged.locks);
        tables.committed_coordinators.push(options.coordinator_cell_id);

        Ok(())
    }
}
