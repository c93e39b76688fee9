//! Lifecycle shared by every coordinator operation.
//!
//! A plan is a future that stages one Sequoia transaction's worth of work and
//! commits it. This module owns the parts common to all of them: starting the
//! Sequoia transaction, pinning the plan to the heavy invoker, and mapping the
//! outcome into the uniform failure taxonomy.

use std::future::Future;
use std::sync::Arc;

use sequoia_client::{CommitOptions, PrepareMode, SequoiaError, SequoiaTransaction};

use crate::bootstrap::Bootstrap;

/// Run `plan` against a fresh Sequoia transaction on the heavy invoker.
///
/// Error mapping, uniform across operations:
/// - table corruption anywhere in the chain raises an operator alert and is
///   re-raised as-is;
/// - errors the store classifies as retriable are wrapped in
///   [`SequoiaError::Retriable`] so the RPC layer can schedule a retry;
/// - everything else propagates unchanged.
pub(crate) async fn run<R, F, Fut>(
    bootstrap: &Arc<Bootstrap>,
    description: &'static str,
    plan: F,
) -> Result<R, SequoiaError>
where
    F: FnOnce(Arc<dyn SequoiaTransaction>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, SequoiaError>> + Send + 'static,
    R: Send + 'static,
{
    let client = bootstrap.sequoia_client();
    let task = bootstrap.heavy_invoker().spawn(async move {
        let sequoia_transaction = client.start_transaction().await?;
        plan(sequoia_transaction).await
    });

    match task.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(classify(description, err)),
        Err(join_err) => Err(SequoiaError::Internal(anyhow::anyhow!(
            "{description} plan task failed: {join_err}"
        ))),
    }
}

/// Commit the staged work with the local cell as coordinator.
pub(crate) async fn commit_sequoia_transaction(
    bootstrap: &Bootstrap,
    sequoia_transaction: &dyn SequoiaTransaction,
) -> Result<(), SequoiaError> {
    sequoia_transaction
        .commit(CommitOptions {
            coordinator_cell_id: bootstrap.cell_id(),
            prepare_mode: PrepareMode::Late,
        })
        .await
}

fn classify(description: &'static str, err: SequoiaError) -> SequoiaError {
    if let Some(table) = err.find_corruption() {
        tracing::error!(
            operation = description,
            table = %table,
            error = %err,
            "sequoia table is corrupted; consider disabling cypress transaction mirroring \
             via the sequoia_manager.enable_cypress_transactions_in_sequoia config flag"
        );
        return err;
    }

    if err.is_retriable() {
        return SequoiaError::Retriable(Box::new(err));
    }

    err
}
