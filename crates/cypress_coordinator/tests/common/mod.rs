//! Shared helpers for coordinator integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cypress_coordinator::action::TransactionAction;
use cypress_coordinator::{
    AuthenticationIdentity, Bootstrap, LeaderSync, StartTransactionRequest,
};
use sequoia_client::testing::InMemorySequoiaStore;
use sequoia_client::{CellTag, ObjectKind, SequoiaError, TransactionId, TransactionRecord};

/// Cell most tests coordinate from; doubles as the primary cell.
pub const LOCAL_CELL: CellTag = CellTag(10);

/// Route coordinator logs (corruption alerts included) through a subscriber,
/// once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

pub struct TestCell {
    pub store: InMemorySequoiaStore,
    pub bootstrap: Arc<Bootstrap>,
}

/// Build a coordinator cell over a fresh in-memory store.
pub fn test_cell() -> TestCell {
    test_cell_with_tag(LOCAL_CELL)
}

/// Same, with an explicit local cell tag (the primary stays `LOCAL_CELL`).
pub fn test_cell_with_tag(cell_tag: CellTag) -> TestCell {
    init_tracing();
    let store = InMemorySequoiaStore::new();
    let bootstrap = Bootstrap::testing(cell_tag, LOCAL_CELL, &store);
    TestCell { store, bootstrap }
}

pub fn top_level(store: &InMemorySequoiaStore, cell: u16) -> TransactionRecord {
    TransactionRecord {
        transaction_id: store.mint_id(ObjectKind::Transaction, CellTag(cell)),
        ..Default::default()
    }
}

pub fn nested(
    store: &InMemorySequoiaStore,
    cell: u16,
    ancestors: &[TransactionId],
) -> TransactionRecord {
    TransactionRecord {
        transaction_id: store.mint_id(ObjectKind::NestedTransaction, CellTag(cell)),
        ancestor_ids: ancestors.to_vec(),
        ..Default::default()
    }
}

/// Decode the action stream a cell received, in dispatch order.
pub fn actions_for(store: &InMemorySequoiaStore, cell: CellTag) -> Vec<TransactionAction> {
    store
        .actions(cell)
        .iter()
        .map(|data| TransactionAction::decode(data).expect("committed action must decode"))
        .collect()
}

pub fn identity() -> AuthenticationIdentity {
    AuthenticationIdentity::new("tester")
}

pub fn start_request() -> StartTransactionRequest {
    StartTransactionRequest::new(Duration::from_secs(30))
}

/// Leader sync that counts invocations.
#[derive(Default)]
pub struct RecordingLeaderSync {
    pub syncs: AtomicUsize,
}

#[async_trait]
impl LeaderSync for RecordingLeaderSync {
    async fn sync_with_leader(&self) -> Result<(), SequoiaError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
