//! Newtype wrappers for cluster identifiers.
//!
//! A `TransactionId` is an opaque 128-bit value that carries its own metadata:
//! the object kind, the tag of the master cell that minted it, and a flag
//! marking ids allocated through the Sequoia store. All of it is recoverable
//! with pure bit extraction, so routing decisions never need a table read.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag of a master cell. Small, dense, and stable across restarts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellTag(pub u16);

impl fmt::Display for CellTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full identity of a master cell, used when naming a commit coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub u128);

/// Monotonically generated commit time.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object kind encoded into a transaction id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Top-level transaction.
    Transaction,
    /// Transaction started under a parent.
    NestedTransaction,
    /// Transaction owned by another subsystem; never mirrored to Sequoia.
    SystemTransaction,
}

impl ObjectKind {
    fn to_raw(self) -> u16 {
        match self {
            ObjectKind::Transaction => 1,
            ObjectKind::NestedTransaction => 2,
            ObjectKind::SystemTransaction => 3,
        }
    }

    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(ObjectKind::Transaction),
            2 => Some(ObjectKind::NestedTransaction),
            3 => Some(ObjectKind::SystemTransaction),
            _ => None,
        }
    }
}

const CELL_TAG_SHIFT: u32 = 64;
const OBJECT_KIND_SHIFT: u32 = 80;
const SEQUOIA_FLAG: u128 = 1 << 96;

/// Opaque 128-bit transaction identifier.
///
/// Layout, low to high: 64 bits of allocator counter, 16 bits of native cell
/// tag, 16 bits of object kind, then flag bits. The layout is an internal
/// convention shared with the id allocator; everything outside this module
/// goes through the accessors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u128);

impl TransactionId {
    /// The null id. Used as the parent of top-level transactions in
    /// materialization payloads.
    pub const NIL: TransactionId = TransactionId(0);

    /// Build an id minted by the Sequoia allocator.
    pub fn sequoia(kind: ObjectKind, cell_tag: CellTag, counter: u64) -> Self {
        TransactionId(
            u128::from(counter)
                | (u128::from(cell_tag.0) << CELL_TAG_SHIFT)
                | (u128::from(kind.to_raw()) << OBJECT_KIND_SHIFT)
                | SEQUOIA_FLAG,
        )
    }

    /// Build a non-Sequoia ("system") id attributed to a cell.
    pub fn system(cell_tag: CellTag, counter: u64) -> Self {
        TransactionId(
            u128::from(counter)
                | (u128::from(cell_tag.0) << CELL_TAG_SHIFT)
                | (u128::from(ObjectKind::SystemTransaction.to_raw()) << OBJECT_KIND_SHIFT),
        )
    }

    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Kind encoded into the id, if the kind field holds a known value.
    pub fn object_kind(self) -> Option<ObjectKind> {
        ObjectKind::from_raw(((self.0 >> OBJECT_KIND_SHIFT) & 0xffff) as u16)
    }

    /// Tag of the cell that minted this id.
    pub fn cell_tag(self) -> CellTag {
        CellTag(((self.0 >> CELL_TAG_SHIFT) & 0xffff) as u16)
    }

    /// Whether the id was allocated through the Sequoia store. System
    /// transactions fail this predicate and are never mirrored.
    pub fn is_sequoia(self) -> bool {
        self.0 & SEQUOIA_FLAG != 0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        TransactionId::NIL
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Canonical four-part form, highest 32 bits first.
        let parts = [
            (self.0 >> 96) as u32,
            (self.0 >> 64) as u32,
            (self.0 >> 32) as u32,
            self.0 as u32,
        ];
        write!(f, "{:x}-{:x}-{:x}-{:x}", parts[0], parts[1], parts[2], parts[3])
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}
