//! Address-ordered block list over the simulated HBM window.
//!
//! Nodes live in an arena and link to their neighbours by index. Two sentinels always exist:
//! `HEAD` (size 0, never allocatable) and `TAIL` (always the last node, the remainder at the
//! top of the window). Between them blocks are sorted by offset with no gaps or overlaps, and
//! two adjacent free blocks never survive a `free`.

use crate::error::{DrvError, DrvResult};

type NodeId = usize;

const HEAD: NodeId = 0;
const TAIL: NodeId = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Free,
    Busy,
}

/// One contiguous range of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub offset: u64,
    pub size: u64,
    pub status: BlockStatus,
}

#[derive(Debug, Clone)]
struct Node {
    block: Block,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct BlockList {
    nodes: Vec<Node>,
    vacant: Vec<NodeId>,
    window: u64,
}

impl BlockList {
    #[must_use]
    pub fn new(window: u64) -> Self {
        let mut list = Self {
            nodes: Vec::new(),
            vacant: Vec::new(),
            window,
        };
        list.reset();
        list
    }

    /// Drops every allocation; the window becomes a single free tail block.
    pub fn reset(&mut self) {
        self.vacant.clear();
        self.nodes.clear();
        self.nodes.push(Node {
            block: Block {
                offset: 0,
                size: 0,
                status: BlockStatus::Busy,
            },
            prev: None,
            next: Some(TAIL),
        });
        self.nodes.push(Node {
            block: Block {
                offset: 0,
                size: self.window,
                status: BlockStatus::Free,
            },
            prev: Some(HEAD),
            next: None,
        });
    }

    #[must_use]
    pub const fn window(&self) -> u64 {
        self.window
    }

    /// First-fit allocation of exactly `size` bytes. Returns the block offset.
    pub fn alloc(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        let mut cursor = self.nodes[HEAD].next;
        while let Some(id) = cursor {
            let block = self.nodes[id].block;
            if block.status == BlockStatus::Free {
                if block.size == size {
                    self.nodes[id].block.status = BlockStatus::Busy;
                    return Some(block.offset);
                }
                if block.size > size {
                    self.insert_before(id, Block {
                        offset: block.offset,
                        size,
                        status: BlockStatus::Busy,
                    });
                    let free = &mut self.nodes[id].block;
                    free.offset += size;
                    free.size -= size;
                    return Some(block.offset);
                }
            }
            cursor = self.nodes[id].next;
        }
        None
    }

    /// Frees the busy block starting at `offset` and merges it with free neighbours.
    ///
    /// # Errors
    /// `NotFound` if no busy block starts at `offset`.
    ///
    /// # Panics
    /// Panics if the list is found inconsistent while merging; continuing would corrupt the
    /// address space.
    pub fn free(&mut self, offset: u64) -> DrvResult<()> {
        let id = self
            .find(offset)
            .ok_or_else(|| DrvError::NotFound(format!("no block at offset 0x{offset:x}")))?;
        if self.nodes[id].block.status != BlockStatus::Busy {
            return Err(DrvError::NotFound(format!(
                "block at offset 0x{offset:x} is not allocated"
            )));
        }
        self.nodes[id].block.status = BlockStatus::Free;

        let mut id = id;
        if let Some(prev) = self.nodes[id].prev {
            if prev != HEAD && self.nodes[prev].block.status == BlockStatus::Free {
                id = self.merge(prev, id);
            }
        }
        if let Some(next) = self.nodes[id].next {
            if self.nodes[next].block.status == BlockStatus::Free {
                self.merge(id, next);
            }
        }
        Ok(())
    }

    /// Snapshot of every block between the sentinels, tail included, in address order.
    #[must_use]
    pub fn blocks(&self) -> Vec<Block> {
        let mut out = Vec::new();
        let mut cursor = self.nodes[HEAD].next;
        while let Some(id) = cursor {
            out.push(self.nodes[id].block);
            cursor = self.nodes[id].next;
        }
        out
    }

    #[must_use]
    pub fn busy_bytes(&self) -> u64 {
        self.sum(BlockStatus::Busy)
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.sum(BlockStatus::Free)
    }

    /// Verifies ordering, coverage and eager coalescing.
    ///
    /// # Errors
    /// Describes the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        let blocks = self.blocks();
        let mut expected = 0;
        for (i, b) in blocks.iter().enumerate() {
            if b.offset != expected {
                return Err(format!("block {i} at 0x{:x}, expected 0x{expected:x}", b.offset));
            }
            if b.size == 0 {
                return Err(format!("block {i} at 0x{:x} is empty", b.offset));
            }
            if i > 0 && b.status == BlockStatus::Free && blocks[i - 1].status == BlockStatus::Free {
                return Err(format!("adjacent free blocks at 0x{:x}", b.offset));
            }
            expected += b.size;
        }
        if expected != self.window {
            return Err(format!("blocks cover 0x{expected:x} of 0x{:x}", self.window));
        }
        if self.nodes[TAIL].next.is_some() {
            return Err("tail is not the last block".into());
        }
        Ok(())
    }

    fn sum(&self, status: BlockStatus) -> u64 {
        self.blocks()
            .iter()
            .filter(|b| b.status == status)
            .map(|b| b.size)
            .sum()
    }

    fn find(&self, offset: u64) -> Option<NodeId> {
        let mut cursor = self.nodes[HEAD].next;
        while let Some(id) = cursor {
            let block = self.nodes[id].block;
            if block.offset == offset {
                return Some(id);
            }
            if block.offset > offset {
                return None;
            }
            cursor = self.nodes[id].next;
        }
        None
    }

    fn insert_before(&mut self, at: NodeId, block: Block) -> NodeId {
        let prev = self.nodes[at].prev;
        let node = Node {
            block,
            prev,
            next: Some(at),
        };
        let id = if let Some(id) = self.vacant.pop() {
            self.nodes[id] = node;
            id
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        };
        if let Some(p) = prev {
            self.nodes[p].next = Some(id);
        }
        self.nodes[at].prev = Some(id);
        id
    }

    fn unlink(&mut self, id: NodeId) {
        let Node { prev, next, .. } = self.nodes[id];
        if let Some(p) = prev {
            self.nodes[p].next = next;
        }
        if let Some(n) = next {
            self.nodes[n].prev = prev;
        }
        self.vacant.push(id);
    }

    /// Merges two adjacent free nodes and returns the survivor. The tail always survives.
    fn merge(&mut self, lo: NodeId, hi: NodeId) -> NodeId {
        let a = self.nodes[lo].block;
        let b = self.nodes[hi].block;
        assert!(
            lo != HEAD
                && lo != TAIL
                && self.nodes[lo].next == Some(hi)
                && a.status == BlockStatus::Free
                && b.status == BlockStatus::Free
                && a.offset + a.size == b.offset,
            "hbm block list corrupted merging {a:?} with {b:?}"
        );
        if hi == TAIL {
            let tail = &mut self.nodes[TAIL].block;
            tail.offset = a.offset;
            tail.size += a.size;
            self.unlink(lo);
            TAIL
        } else {
            self.nodes[lo].block.size += b.size;
            self.unlink(hi);
            lo
        }
    }
}
