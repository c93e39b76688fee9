//! Ambient context shared by every coordinator operation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;

use sequoia_client::testing::InMemorySequoiaStore;
use sequoia_client::{CellId, CellTag, SequoiaClient, SequoiaError};

/// Handle used to wait until the local peer has caught up with the leader.
///
/// A Sequoia commit is acknowledged once the leader and a quorum have it; a
/// caller that must observe the result on this peer syncs afterwards.
#[async_trait]
pub trait LeaderSync: Send + Sync {
    async fn sync_with_leader(&self) -> Result<(), SequoiaError>;
}

/// Leader sync for single-peer deployments and tests.
pub struct NoopLeaderSync;

#[async_trait]
impl LeaderSync for NoopLeaderSync {
    async fn sync_with_leader(&self) -> Result<(), SequoiaError> {
        Ok(())
    }
}

/// Per-cell dependencies handed to the coordinator by the embedding process.
pub struct Bootstrap {
    cell_tag: CellTag,
    cell_id: CellId,
    primary_cell_tag: CellTag,
    sequoia_client: Arc<dyn SequoiaClient>,
    leader_sync: Arc<dyn LeaderSync>,
    /// Worker pool every plan runs on. Plan state is only touched from the
    /// single task spawned here, so plans need no internal locking.
    heavy_invoker: Handle,
}

impl Bootstrap {
    pub fn new(
        cell_tag: CellTag,
        cell_id: CellId,
        primary_cell_tag: CellTag,
        sequoia_client: Arc<dyn SequoiaClient>,
        leader_sync: Arc<dyn LeaderSync>,
        heavy_invoker: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            cell_tag,
            cell_id,
            primary_cell_tag,
            sequoia_client,
            leader_sync,
            heavy_invoker,
        })
    }

    /// Bootstrap over an in-memory store with a no-op leader sync; the
    /// current runtime doubles as the heavy invoker. The cell id is derived
    /// from the cell tag.
    pub fn testing(
        cell_tag: CellTag,
        primary_cell_tag: CellTag,
        store: &InMemorySequoiaStore,
    ) -> Arc<Self> {
        Self::new(
            cell_tag,
            CellId(u128::from(cell_tag.0)),
            primary_cell_tag,
            Arc::new(store.clone()),
            Arc::new(NoopLeaderSync),
            Handle::current(),
        )
    }

    pub fn cell_tag(&self) -> CellTag {
        self.cell_tag
    }

    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    pub fn primary_cell_tag(&self) -> CellTag {
        self.primary_cell_tag
    }

    pub fn sequoia_client(&self) -> Arc<dyn SequoiaClient> {
        self.sequoia_client.clone()
    }

    pub fn leader_sync(&self) -> Arc<dyn LeaderSync> {
        self.leader_sync.clone()
    }

    pub fn heavy_invoker(&self) -> &Handle {
        &self.heavy_invoker
    }
}
