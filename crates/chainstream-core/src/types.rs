//! Shared block types for the streaming pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── BlockRef ─────────────────────────────────────────────────────────────────

/// Minimal block identity — number plus hash. Immutable value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.number, self.hash)
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A normalized block as seen by the streaming core.
///
/// The `payload` is opaque here — raw bytes or a decoded record, owned by the
/// chain adapter that produced it. The core only reads the header fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block number.
    pub parent_number: u64,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch), if known.
    pub timestamp: Option<i64>,
    /// Opaque per-chain payload; `Value::Null` when the caller only streams headers.
    #[serde(default)]
    pub payload: Value,
}

impl Block {
    /// Returns this block's identity.
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            number: self.number,
            hash: self.hash.clone(),
        }
    }

    /// Returns the identity of this block's parent.
    pub fn parent_ref(&self) -> BlockRef {
        BlockRef {
            number: self.parent_number,
            hash: self.parent_hash.clone(),
        }
    }

    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &Block) -> bool {
        self.parent_number == parent.number
            && self.number == parent.number + 1
            && self.parent_hash == parent.hash
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, hash: &str, parent: &str) -> Block {
        Block {
            number,
            hash: hash.into(),
            parent_number: number.saturating_sub(1),
            parent_hash: parent.into(),
            timestamp: Some((number * 12) as i64),
            payload: Value::Null,
        }
    }

    #[test]
    fn block_extends_parent() {
        let parent = block(100, "0xaaa", "0x000");
        let child = block(101, "0xbbb", "0xaaa");
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
    }

    #[test]
    fn block_extends_false_on_gap() {
        let a = block(100, "0xaaa", "0x000");
        let mut b = block(102, "0xccc", "0xaaa");
        b.parent_number = 100; // claims 100 as parent but skips 101
        assert!(!b.extends(&a));
    }

    #[test]
    fn block_ref_roundtrip() {
        let b = block(7, "0xfeed", "0xdead");
        assert_eq!(b.block_ref(), BlockRef { number: 7, hash: "0xfeed".into() });
        assert_eq!(b.parent_ref().number, 6);
    }
}
