//! Request and response envelopes for the coordinator entry points.
//!
//! The RPC plumbing itself (framing, authentication, retry) lives in the
//! embedding server; these are the payloads it hands to and receives from the
//! coordinator.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sequoia_client::{CellTag, Timestamp, TransactionId};

/// Identity of the principal issuing an operation, carried into every
/// participant action dispatched on its behalf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationIdentity {
    pub user: String,
    pub user_tag: Option<String>,
}

impl AuthenticationIdentity {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            user_tag: None,
        }
    }

    /// Identity used for operations the cluster initiates itself, such as
    /// aborting an expired transaction.
    pub fn root() -> Self {
        Self::new("root")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartTransactionRequest {
    pub timeout: Duration,
    pub deadline: Option<Timestamp>,
    pub attributes: BTreeMap<String, String>,
    pub title: Option<String>,
    pub parent_id: Option<TransactionId>,
    pub prerequisite_transaction_ids: Vec<TransactionId>,
    pub replicate_to_cell_tags: Vec<CellTag>,
}

impl StartTransactionRequest {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
            attributes: BTreeMap::new(),
            title: None,
            parent_id: None,
            prerequisite_transaction_ids: Vec::new(),
            replicate_to_cell_tags: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTransactionResponse {
    pub transaction_id: TransactionId,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AbortTransactionRequest {
    pub transaction_id: TransactionId,
    pub force: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortTransactionResponse;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTransactionResponse {
    /// Commit time per cell; the primary cell's entry is authoritative.
    pub commit_timestamps: Vec<(CellTag, Timestamp)>,
}
