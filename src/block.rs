//! Translation block descriptors and the block linker.
//!
//! A `TranslationBlock` describes one translated unit: guest boundaries,
//! a borrowed offset+length view of its host code in the arena, chain
//! links, and an execution counter. Descriptors live in a `BlockTable`
//! and are referred to by generation-checked [`BlockId`] handles, so a
//! handle to a freed (and possibly reused) slot can never reach the wrong
//! descriptor.
//!
//! Lifecycle: allocated PENDING (not valid) → VALID once emission
//! succeeded and the mapping is committed → STALE after invalidation or a
//! cache flush. A stale descriptor may still be freed but must never be
//! executed.

use crate::cache::hash_pc;
use crate::error::JitError;

/// Block flag bits.
pub mod flags {
    /// Code is fully emitted and the mapping is committed.
    pub const VALID: u32 = 1 << 0;
    /// Block is executed frequently.
    pub const HOT: u32 = 1 << 1;
    /// Block has a direct successor edge.
    pub const LINKED: u32 = 1 << 2;
    /// Block ends in (or contains) a system call.
    pub const SYSCALL: u32 = 1 << 3;
}

/// Generation-checked handle to a descriptor in a [`BlockTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

/// Descriptor for one translated basic block.
///
/// `host_offset`/`host_size` borrow into the code cache arena; the block
/// never owns those bytes and freeing the descriptor never frees them.
#[derive(Debug, Clone)]
pub struct TranslationBlock {
    pub guest_pc: u64,
    pub guest_size: u32,
    pub host_offset: usize,
    pub host_size: u32,
    pub num_instructions: u32,
    pub hash: u64,
    pub flags: u32,
    pub execute_count: u64,
    pub successor: Option<BlockId>,
    pub predecessor: Option<BlockId>,
}

impl TranslationBlock {
    fn new(guest_pc: u64) -> Self {
        Self {
            guest_pc,
            guest_size: 0,
            host_offset: 0,
            host_size: 0,
            num_instructions: 0,
            hash: hash_pc(guest_pc),
            flags: 0,
            execute_count: 0,
            successor: None,
            predecessor: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags & flags::VALID != 0
    }

    pub fn is_linked(&self) -> bool {
        self.flags & flags::LINKED != 0
    }
}

struct Slot {
    generation: u32,
    block: Option<TranslationBlock>,
}

/// Owner of all block descriptors, plus the linker operations that build
/// and remove direct successor/predecessor edges between them.
///
/// Each block has at most one successor and one predecessor: chains, not
/// a general graph. The successor edge exists so a hot block's exit could
/// one day jump straight to the next block's host code without a cache
/// lookup; the translate loop does not consult it.
#[derive(Default)]
pub struct BlockTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh PENDING descriptor for `pc`. Statistics are
    /// zeroed and the pc hash precomputed; the block is not valid until
    /// [`set_valid`](Self::set_valid).
    pub fn alloc(&mut self, pc: u64) -> BlockId {
        let block = TranslationBlock::new(pc);
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.block = Some(block);
            BlockId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                block: Some(block),
            });
            BlockId {
                index,
                generation: 0,
            }
        }
    }

    pub fn get(&self, id: BlockId) -> Option<&TranslationBlock> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.block.as_ref()
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut TranslationBlock> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.block.as_mut()
    }

    /// Free the descriptor only; never touches the host code bytes (the
    /// arena owns those). Bumps the slot generation so the handle goes
    /// dead. Returns false for an already-stale handle.
    pub fn free(&mut self, id: BlockId) -> bool {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.block.is_some() => {
                slot.block = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                true
            }
            _ => false,
        }
    }

    /// Mark a block valid. Only called after its code is fully emitted
    /// and its mapping committed to the translation cache.
    pub fn set_valid(&mut self, id: BlockId) {
        if let Some(block) = self.get_mut(id) {
            block.flags |= flags::VALID;
        }
    }

    /// Mark a block stale: it may still be freed but must never be
    /// executed again.
    pub fn set_stale(&mut self, id: BlockId) {
        if let Some(block) = self.get_mut(id) {
            block.flags &= !flags::VALID;
        }
    }

    pub fn is_valid(&self, id: BlockId) -> bool {
        self.get(id).is_some_and(|b| b.is_valid())
    }

    /// Build a direct edge `from → to` and mark `from` LINKED.
    ///
    /// Re-chaining a block that already has an edge overwrites the
    /// pointer without unlinking the old partner, leaving that partner's
    /// opposite pointer pointing at a block that no longer points back.
    /// Callers that re-link must [`unchain`](Self::unchain) first.
    /// Self-chaining is rejected.
    pub fn chain(&mut self, from: BlockId, to: BlockId) -> Result<(), JitError> {
        if from == to {
            return Err(JitError::InvalidArgument("cannot chain a block to itself"));
        }
        if self.get(from).is_none() || self.get(to).is_none() {
            return Err(JitError::InvalidArgument("chain on a stale block handle"));
        }
        if let Some(block) = self.get_mut(from) {
            block.successor = Some(to);
            block.flags |= flags::LINKED;
        }
        if let Some(block) = self.get_mut(to) {
            block.predecessor = Some(from);
        }
        Ok(())
    }

    /// Remove both directions of whichever edges `id` participates in.
    pub fn unchain(&mut self, id: BlockId) {
        let (succ, pred) = match self.get(id) {
            Some(block) => (block.successor, block.predecessor),
            None => return,
        };
        if let Some(succ) = succ {
            if let Some(block) = self.get_mut(succ) {
                if block.predecessor == Some(id) {
                    block.predecessor = None;
                }
            }
        }
        if let Some(pred) = pred {
            if let Some(block) = self.get_mut(pred) {
                if block.successor == Some(id) {
                    block.successor = None;
                    block.flags &= !flags::LINKED;
                }
            }
        }
        if let Some(block) = self.get_mut(id) {
            block.successor = None;
            block.predecessor = None;
            block.flags &= !flags::LINKED;
        }
    }

    pub fn successor(&self, id: BlockId) -> Option<BlockId> {
        self.get(id).and_then(|b| b.successor)
    }

    pub fn predecessor(&self, id: BlockId) -> Option<BlockId> {
        self.get(id).and_then(|b| b.predecessor)
    }

    /// Number of live descriptors.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retire every descriptor. Every outstanding handle goes dead.
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.block.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(index as u32);
        }
    }
}
