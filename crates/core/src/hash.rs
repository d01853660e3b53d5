//! Incremental piece hashing.
//!
//! Payload bytes are Fr32-padded block by block and folded into a binary
//! SHA-256 Merkle tree whose node hashes are truncated to 254 bits. The
//! hasher keeps at most one partial block and one pending node per tree
//! level, so memory stays logarithmic in the payload size no matter how the
//! input is split into chunks.

use crate::fr32::{self, PADDED_BLOCK, UNPADDED_BLOCK};
use crate::piece::PieceCid;
use crate::{Error, Result};
use sha2::{Digest, Sha256};

/// A 32-byte tree node.
pub type Node = [u8; 32];

/// Hash two children into their parent node.
pub fn hash_nodes(left: &Node, right: &Node) -> Node {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out: Node = hasher.finalize().into();
    out[31] &= 0x3f;
    out
}

/// Root of an all-zero subtree with `2^level` leaves.
pub fn zero_subtree(level: u8) -> Node {
    let mut node = [0u8; 32];
    for _ in 0..level {
        node = hash_nodes(&node, &node);
    }
    node
}

/// Incremental hasher producing a [`PieceCid`].
///
/// `finalize` consumes the hasher, so a context cannot be finalized twice or
/// updated after finalization.
pub struct PieceHasher {
    block: [u8; UNPADDED_BLOCK],
    filled: usize,
    total: u64,
    // stack[level] holds a completed left subtree waiting for its sibling.
    stack: Vec<Option<Node>>,
}

impl PieceHasher {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self {
            block: [0u8; UNPADDED_BLOCK],
            filled: 0,
            total: 0,
            stack: Vec::new(),
        }
    }

    /// Number of payload bytes consumed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.total
    }

    /// Feed the next chunk of payload.
    pub fn update(&mut self, mut data: &[u8]) {
        self.total += data.len() as u64;

        if self.filled > 0 {
            let take = data.len().min(UNPADDED_BLOCK - self.filled);
            self.block[self.filled..self.filled + take].copy_from_slice(&data[..take]);
            self.filled += take;
            data = &data[take..];
            if self.filled < UNPADDED_BLOCK {
                return;
            }
            let block = self.block;
            self.absorb_block(&block);
            self.filled = 0;
        }

        let mut blocks = data.chunks_exact(UNPADDED_BLOCK);
        for block in &mut blocks {
            // chunks_exact guarantees the length
            if let Ok(block) = <&[u8; UNPADDED_BLOCK]>::try_from(block) {
                self.absorb_block(block);
            }
        }
        let rest = blocks.remainder();
        self.block[..rest.len()].copy_from_slice(rest);
        self.filled = rest.len();
    }

    /// Finish hashing and return the identifier.
    pub fn finalize(mut self) -> Result<PieceCid> {
        if self.total == 0 {
            return Err(Error::InvalidSize {
                size: 0,
                min: 1,
                max: u64::MAX,
            });
        }

        if self.filled > 0 {
            self.block[self.filled..].fill(0);
            let block = self.block;
            self.absorb_block(&block);
        }

        let padded = fr32::padded_piece_size(self.total);
        let height = (padded / 32).trailing_zeros() as usize;

        let mut carry: Option<Node> = None;
        let mut zero = [0u8; 32];
        for level in 0..height {
            let left = self.stack.get(level).copied().flatten();
            carry = match (left, carry) {
                (Some(left), Some(right)) => Some(hash_nodes(&left, &right)),
                (Some(left), None) => Some(hash_nodes(&left, &zero)),
                (None, Some(right)) => Some(hash_nodes(&right, &zero)),
                (None, None) => None,
            };
            zero = hash_nodes(&zero, &zero);
        }

        let root = match carry {
            Some(root) => root,
            None => self
                .stack
                .get(height)
                .copied()
                .flatten()
                .unwrap_or(zero),
        };

        Ok(PieceCid::from_parts(self.total, height as u8, root))
    }

    fn absorb_block(&mut self, block: &[u8; UNPADDED_BLOCK]) {
        let mut padded = [0u8; PADDED_BLOCK];
        fr32::pad_block(block, &mut padded);
        for leaf in padded.chunks_exact(32) {
            let mut node = [0u8; 32];
            node.copy_from_slice(leaf);
            self.push_leaf(node);
        }
    }

    fn push_leaf(&mut self, mut node: Node) {
        let mut level = 0;
        loop {
            if level == self.stack.len() {
                self.stack.push(None);
            }
            match self.stack[level].take() {
                Some(left) => {
                    node = hash_nodes(&left, &node);
                    level += 1;
                }
                None => {
                    self.stack[level] = Some(node);
                    return;
                }
            }
        }
    }
}

impl Default for PieceHasher {
    fn default() -> Self {
        Self::new()
    }
}
