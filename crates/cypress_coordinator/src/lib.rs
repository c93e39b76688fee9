//! Coordinator for Cypress transactions mirrored to the Sequoia store.
//!
//! Each entry point stages one Sequoia transaction's worth of table mutations
//! and participant actions and commits them atomically with the local cell as
//! coordinator. The master state machines consume the actions; this crate
//! owns the metadata tables and the topology reasoning (ancestor closure,
//! dependent-cascade collection, replica placement) around them.

use std::sync::Arc;

use sequoia_client::{SequoiaError, Timestamp, TransactionId};

pub mod action;
pub mod bootstrap;
mod collector;
mod finish;
pub mod messages;
mod mutation;
mod replicate;
mod replicator;
mod start;

pub use bootstrap::{Bootstrap, LeaderSync, NoopLeaderSync};
pub use messages::{
    AbortTransactionRequest, AbortTransactionResponse, AuthenticationIdentity,
    CommitTransactionResponse, StartTransactionRequest, StartTransactionResponse,
};

use finish::{FinishMode, FinishPlan};
use replicate::ReplicatePlan;
use start::StartPlan;

/// Start a transaction, optionally nested and optionally replicated.
pub async fn start_cypress_transaction(
    bootstrap: &Arc<Bootstrap>,
    request: StartTransactionRequest,
    identity: AuthenticationIdentity,
) -> Result<StartTransactionResponse, SequoiaError> {
    let plan = StartPlan::new(bootstrap.clone(), request, identity);
    mutation::run(bootstrap, "start", move |sequoia_transaction| {
        plan.apply_and_commit(sequoia_transaction)
    })
    .await
}

/// Commit a transaction, aborting its dependent-and-descendant closure.
pub async fn commit_cypress_transaction(
    bootstrap: &Arc<Bootstrap>,
    transaction_id: TransactionId,
    prerequisite_transaction_ids: Vec<TransactionId>,
    commit_timestamp: Timestamp,
    identity: AuthenticationIdentity,
) -> Result<CommitTransactionResponse, SequoiaError> {
    if !prerequisite_transaction_ids.is_empty() {
        // TODO(coordinator): support prerequisites once the coordinator's
        // commit action can carry them.
        return Err(SequoiaError::Unsupported(
            "prerequisite transactions are not supported by mirrored commit".to_string(),
        ));
    }

    let plan = FinishPlan::new(
        bootstrap.clone(),
        transaction_id,
        identity,
        FinishMode::Commit { commit_timestamp },
    );
    mutation::run(bootstrap, "commit", move |sequoia_transaction| {
        plan.apply_and_commit(sequoia_transaction)
    })
    .await?;

    Ok(CommitTransactionResponse {
        commit_timestamps: vec![(bootstrap.primary_cell_tag(), commit_timestamp)],
    })
}

/// Abort a transaction and its dependent-and-descendant closure.
///
/// With `force` set, aborting a transaction that no longer exists succeeds
/// silently.
pub async fn abort_cypress_transaction(
    bootstrap: &Arc<Bootstrap>,
    request: AbortTransactionRequest,
    identity: AuthenticationIdentity,
) -> Result<AbortTransactionResponse, SequoiaError> {
    let plan = FinishPlan::new(
        bootstrap.clone(),
        request.transaction_id,
        identity,
        FinishMode::Abort {
            force: request.force,
        },
    );
    mutation::run(bootstrap, "abort", move |sequoia_transaction| {
        plan.apply_and_commit(sequoia_transaction)
    })
    .await?;

    Ok(AbortTransactionResponse)
}

/// Abort a transaction whose lease expired; initiated by the cluster itself.
pub async fn abort_expired_cypress_transaction(
    bootstrap: &Arc<Bootstrap>,
    transaction_id: TransactionId,
) -> Result<AbortTransactionResponse, SequoiaError> {
    let plan = FinishPlan::new(
        bootstrap.clone(),
        transaction_id,
        AuthenticationIdentity::root(),
        FinishMode::Abort { force: false },
    );
    mutation::run(bootstrap, "abort expired", move |sequoia_transaction| {
        plan.apply_and_commit(sequoia_transaction)
    })
    .await?;

    Ok(AbortTransactionResponse)
}

/// Make sure the listed transactions have replicas on the local cell.
pub async fn replicate_cypress_transactions(
    bootstrap: &Arc<Bootstrap>,
    transaction_ids: &[TransactionId],
) -> Result<(), SequoiaError> {
    let plan = ReplicatePlan::new(bootstrap.clone(), transaction_ids);
    mutation::run(bootstrap, "replicate", move |sequoia_transaction| {
        plan.apply_and_commit(sequoia_transaction)
    })
    .await
}

/// Replicate, then wait until this peer has observed the commit.
///
/// A Sequoia commit is acknowledged by the leader and a quorum; syncing with
/// the leader afterwards guarantees the replicated state is visible to reads
/// served by this peer.
pub async fn replicate_cypress_transactions_and_sync_with_leader(
    bootstrap: &Arc<Bootstrap>,
    transaction_ids: &[TransactionId],
) -> Result<(), SequoiaError> {
    replicate_cypress_transactions(bootstrap, transaction_ids).await?;
    bootstrap.leader_sync().sync_with_leader().await
}
