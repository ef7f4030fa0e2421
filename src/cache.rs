//! Translation cache: guest PC → host code lookup.
//!
//! A fixed-size direct-mapped hash table. Each guest pc maps to exactly
//! one slot; a colliding insert silently overwrites the previous mapping
//! (last writer wins). That keeps memory bounded and lookup branch-free
//! at the cost of conflict misses; `insert` hands the displaced block
//! handle back so the caller can retire its descriptor.
//!
//! No concurrency control anywhere in here: the table is plain mutable
//! state under the context's single-writer discipline.

use crate::block::BlockId;

/// Odd multiplier for the pc hash (golden-ratio constant).
pub const HASH_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

/// Multiplicative hash over a guest pc, taking the high bits so that
/// adjacent 4-byte-aligned addresses land in different slots.
pub fn hash_pc(pc: u64) -> u64 {
    pc.wrapping_mul(HASH_MULTIPLIER) >> 32
}

/// One cached guest→host mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheEntry {
    pub guest_addr: u64,
    /// Absolute host code address; zero means the slot is empty.
    pub host_addr: usize,
    pub size: u32,
    pub hash: u64,
    /// Number of lookup hits served by this entry.
    pub refcount: u32,
    pub flags: u32,
    /// Descriptor backing this mapping, handed back on displacement.
    pub block: Option<BlockId>,
}

/// Entry flag bits.
pub mod entry_flags {
    pub const VALID: u32 = 1 << 0;
}

/// Cache statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub invalidations: u64,
    pub flushes: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Direct-mapped translation cache with a power-of-two slot count.
pub struct TranslationCache {
    slots: Box<[CacheEntry]>,
    mask: u64,
    stats: CacheStats,
}

impl TranslationCache {
    /// Create a zeroed table of `2^table_bits` slots.
    pub fn new(table_bits: u32) -> Self {
        let size = 1usize << table_bits;
        Self {
            slots: vec![CacheEntry::default(); size].into_boxed_slice(),
            mask: (size - 1) as u64,
            stats: CacheStats::default(),
        }
    }

    fn slot_index(&self, pc: u64) -> usize {
        (hash_pc(pc) & self.mask) as usize
    }

    /// Look up `pc`. A hit bumps the entry refcount and returns the host
    /// address and code size; a miss returns `None`.
    pub fn lookup(&mut self, pc: u64) -> Option<(usize, u32)> {
        let index = self.slot_index(pc);
        let entry = &mut self.slots[index];
        if entry.guest_addr == pc && entry.host_addr != 0 {
            entry.refcount += 1;
            self.stats.hits += 1;
            Some((entry.host_addr, entry.size))
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Look up `pc` without touching refcount or statistics.
    pub fn peek(&self, pc: u64) -> Option<&CacheEntry> {
        let entry = &self.slots[self.slot_index(pc)];
        (entry.guest_addr == pc && entry.host_addr != 0).then_some(entry)
    }

    /// Insert the mapping `pc → host_addr`, unconditionally overwriting
    /// whatever occupied the slot. Returns the displaced mapping's block
    /// handle, if any, so its descriptor can be retired.
    pub fn insert(
        &mut self,
        pc: u64,
        host_addr: usize,
        size: u32,
        block: BlockId,
    ) -> Option<BlockId> {
        let index = self.slot_index(pc);
        let displaced = if self.slots[index].host_addr != 0 {
            self.slots[index].block
        } else {
            None
        };
        self.slots[index] = CacheEntry {
            guest_addr: pc,
            host_addr,
            size,
            hash: hash_pc(pc),
            refcount: 0,
            flags: entry_flags::VALID,
            block: Some(block),
        };
        self.stats.insertions += 1;
        displaced
    }

    /// Clear the slot only if it currently maps `pc`, returning the
    /// retired block handle. An absent pc is a no-op: a colliding entry
    /// that evicted `pc` earlier is left untouched.
    pub fn invalidate(&mut self, pc: u64) -> Option<BlockId> {
        let index = self.slot_index(pc);
        let entry = &mut self.slots[index];
        if entry.guest_addr == pc && entry.host_addr != 0 {
            let block = entry.block;
            *entry = CacheEntry::default();
            self.stats.invalidations += 1;
            block
        } else {
            None
        }
    }

    /// Zero every slot. Arena memory is not touched.
    pub fn flush(&mut self) {
        for entry in self.slots.iter_mut() {
            *entry = CacheEntry::default();
        }
        self.stats.flushes += 1;
        log::debug!("[CACHE] flushed {} slots", self.slots.len());
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|e| e.host_addr != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count.
    pub fn table_size(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockTable;

    const BITS: u32 = 8;

    fn block_id() -> BlockId {
        BlockTable::new().alloc(0)
    }

    /// Find a pc that collides with `pc` in a `2^BITS` table.
    fn colliding_pc(cache: &TranslationCache, pc: u64) -> u64 {
        let target = cache.slot_index(pc);
        (1u64..)
            .map(|i| pc + i * 4)
            .find(|&other| cache.slot_index(other) == target)
            .unwrap()
    }

    #[test]
    fn test_read_your_write() {
        let mut cache = TranslationCache::new(BITS);
        cache.insert(0x1000, 0xAB00, 64, block_id());
        assert_eq!(cache.lookup(0x1000), Some((0xAB00, 64)));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_miss_on_empty_slot() {
        let mut cache = TranslationCache::new(BITS);
        assert_eq!(cache.lookup(0x1000), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_adjacent_instructions_hash_apart() {
        let cache = TranslationCache::new(BITS);
        assert_ne!(cache.slot_index(0x1000), cache.slot_index(0x1004));
        assert_ne!(cache.slot_index(0x1004), cache.slot_index(0x1008));
    }

    #[test]
    fn test_colliding_insert_overwrites() {
        let mut cache = TranslationCache::new(BITS);
        let pc1 = 0x1000;
        let pc2 = colliding_pc(&cache, pc1);

        let mut table = BlockTable::new();
        let b1 = table.alloc(pc1);
        let b2 = table.alloc(pc2);
        cache.insert(pc1, 0x100, 4, b1);
        let displaced = cache.insert(pc2, 0x200, 4, b2);

        assert_eq!(displaced, Some(b1));
        assert_eq!(cache.lookup(pc1), None);
        assert_eq!(cache.lookup(pc2), Some((0x200, 4)));
    }

    #[test]
    fn test_reinsert_same_pc_hands_back_old_block() {
        let mut cache = TranslationCache::new(BITS);
        let mut table = BlockTable::new();
        let b1 = table.alloc(0x1000);
        let b2 = table.alloc(0x1000);
        cache.insert(0x1000, 0x100, 4, b1);
        let displaced = cache.insert(0x1000, 0x200, 8, b2);
        assert_eq!(displaced, Some(b1));
        assert_eq!(cache.lookup(0x1000), Some((0x200, 8)));
    }

    #[test]
    fn test_invalidate() {
        let mut cache = TranslationCache::new(BITS);
        let b = block_id();
        cache.insert(0x1000, 0x100, 4, b);
        assert_eq!(cache.invalidate(0x1000), Some(b));
        assert_eq!(cache.lookup(0x1000), None);
    }

    #[test]
    fn test_invalidate_absent_pc_is_noop() {
        let mut cache = TranslationCache::new(BITS);
        cache.insert(0x1000, 0x100, 4, block_id());
        assert_eq!(cache.invalidate(0x9999_0000), None);
        // Nothing else was disturbed.
        assert_eq!(cache.lookup(0x1000), Some((0x100, 4)));
        assert_eq!(cache.stats().invalidations, 0);
    }

    #[test]
    fn test_invalidate_does_not_clobber_collided_survivor() {
        let mut cache = TranslationCache::new(BITS);
        let pc1 = 0x1000;
        let pc2 = colliding_pc(&cache, pc1);

        cache.insert(pc1, 0x100, 4, block_id());
        cache.insert(pc2, 0x200, 4, block_id()); // evicts pc1

        // pc1 is gone already; invalidating it must not touch pc2's entry.
        assert_eq!(cache.invalidate(pc1), None);
        assert_eq!(cache.lookup(pc2), Some((0x200, 4)));
    }

    #[test]
    fn test_flush_empties_every_slot() {
        let mut cache = TranslationCache::new(BITS);
        for pc in (0x1000..0x1100u64).step_by(4) {
            cache.insert(pc, pc as usize, 4, block_id());
        }
        cache.flush();
        assert!(cache.is_empty());
        for pc in (0x1000..0x1100u64).step_by(4) {
            assert_eq!(cache.lookup(pc), None);
        }
    }

    #[test]
    fn test_hit_bumps_refcount() {
        let mut cache = TranslationCache::new(BITS);
        cache.insert(0x1000, 0x100, 4, block_id());
        cache.lookup(0x1000);
        cache.lookup(0x1000);
        assert_eq!(cache.peek(0x1000).unwrap().refcount, 2);
    }

    #[test]
    fn test_hit_ratio() {
        let mut cache = TranslationCache::new(BITS);
        cache.insert(0x1000, 0x100, 4, block_id());
        cache.lookup(0x1000);
        cache.lookup(0x2000);
        assert!((cache.stats().hit_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
