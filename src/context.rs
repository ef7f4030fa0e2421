//! JIT context and the translate/dispatch loop.
//!
//! `JitContext` owns the code cache arena, the translation cache table,
//! and the block descriptor table. `translate_block` ties them together:
//! cache lookup → (on miss) decode-classify-emit per instruction →
//! atomic commit. A block is either fully cached or not cached at all;
//! no failure path leaves a half-committed entry behind.
//!
//! Single-threaded by construction: the cache table, the arena's bump
//! offset, and chain pointers are plain mutable state with no locks.
//! Sharing one context across guest threads requires external
//! serialization of every mutation.

use crate::arena::CodeCacheArena;
use crate::block::{flags, BlockId, BlockTable};
use crate::buffer::CodeBuffer;
use crate::cache::TranslationCache;
use crate::error::JitError;
use crate::isa::{InstructionClass, InstructionDecoder, InstructionEncoder, RegisterMap};

/// Tuning knobs for a [`JitContext`].
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Code cache arena size in bytes (rounded up to whole pages).
    pub arena_size: usize,

    /// Translation cache table size as a power of two (`2^table_bits`
    /// slots).
    pub table_bits: u32,

    /// Hard cap on instructions translated into one block.
    pub max_block_instructions: u32,

    /// Host registers available to the renaming table; guest registers
    /// above this alias modulo.
    pub host_register_count: u8,

    /// Execution count at which a block is flagged HOT.
    pub hot_threshold: u64,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            arena_size: 1024 * 1024, // 1 MiB code cache
            table_bits: 12,          // 4096 slots
            max_block_instructions: 128,
            host_register_count: 16,
            hot_threshold: 50,
        }
    }
}

/// Translation statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JitStats {
    pub blocks_translated: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub bytes_emitted: u64,
}

/// Owner of the arena, the translation cache, and the block table.
///
/// Lifecycle: [`new`](Self::new) maps the arena and zeroes the table →
/// operate → [`reset`](Self::reset) discards all translations but keeps
/// the mapping → drop unmaps.
pub struct JitContext {
    config: JitConfig,
    arena: CodeCacheArena,
    cache: TranslationCache,
    blocks: BlockTable,
    stats: JitStats,
}

impl JitContext {
    pub fn new(config: JitConfig) -> Result<Self, JitError> {
        let arena = CodeCacheArena::new(config.arena_size)?;
        let cache = TranslationCache::new(config.table_bits);
        Ok(Self {
            config,
            arena,
            cache,
            blocks: BlockTable::new(),
            stats: JitStats::default(),
        })
    }

    /// Return host code for the block starting at `pc`, translating it
    /// on a cache miss.
    ///
    /// The returned pointer stays valid until the mapping is
    /// invalidated, flushed, or the context is reset. Any mid-emission
    /// failure means "could not translate this block": the error comes
    /// back, nothing is inserted, and the arena offset is not advanced.
    pub fn translate_block<D, E>(
        &mut self,
        pc: u64,
        decoder: &mut D,
        encoder: &E,
    ) -> Result<*const u8, JitError>
    where
        D: InstructionDecoder + ?Sized,
        E: InstructionEncoder + ?Sized,
    {
        if let Some((host, _)) = self.cache.lookup(pc) {
            self.stats.cache_hits += 1;
            self.note_execution(pc);
            return Ok(host as *const u8);
        }
        self.stats.cache_misses += 1;

        // PENDING descriptor; becomes valid only after the commit below.
        let block_id = self.blocks.alloc(pc);
        let start = self.arena.offset();
        let window_len = self.arena.free_space();
        let max_instructions = self.config.max_block_instructions;
        let regs = RegisterMap::new(self.config.host_register_count);

        // The window's first page may still be read-execute from an
        // earlier block sharing it; it has to be writable for this
        // emission session. Nothing executes while we translate.
        if window_len > 0 {
            if let Err(err) = self.arena.mark_writable(start, 1) {
                self.blocks.free(block_id);
                return Err(err);
            }
        }

        let mut cursor = pc;
        let mut num_instructions = 0u32;
        let mut saw_terminator = false;
        let mut saw_syscall = false;
        let emitted;
        let overflowed;
        {
            let window = self.arena.slice_mut(start, window_len);
            let mut buf = CodeBuffer::with_storage(window);
            encoder.emit_prologue(&mut buf);

            while num_instructions < max_instructions {
                let inst = decoder.decode(cursor);
                if inst.length == 0 {
                    break;
                }
                match inst.class {
                    InstructionClass::Alu => encoder.emit_alu(&mut buf, &inst, &regs),
                    InstructionClass::Memory => encoder.emit_memory(&mut buf, &inst, &regs),
                    InstructionClass::Branch => encoder.emit_branch(&mut buf, &inst, &regs),
                    InstructionClass::Bit => encoder.emit_bit(&mut buf, &inst, &regs),
                    InstructionClass::StringOp => encoder.emit_string(&mut buf, &inst, &regs),
                    InstructionClass::Special => {
                        saw_syscall = true;
                        encoder.emit_special(&mut buf, &inst, &regs);
                    }
                    InstructionClass::Unknown => break,
                }
                cursor += inst.length as u64;
                num_instructions += 1;
                if inst.terminator {
                    saw_terminator = true;
                    break;
                }
            }

            if !saw_terminator {
                encoder.emit_epilogue(&mut buf);
            }

            // Intra-block relocations are complete here, while the
            // window is still writable.
            overflowed = buf.has_error();
            emitted = buf.len();
        }

        if overflowed {
            self.blocks.free(block_id);
            self.reprotect_shared_page(start);
            log::warn!(
                "[JIT] code cache full translating pc={:#x} ({} bytes free)",
                pc,
                window_len
            );
            return Err(JitError::CapacityExceeded {
                needed: emitted + 1,
                available: window_len,
            });
        }

        if emitted == 0 {
            // Degenerate empty block: leave nothing allocated.
            self.blocks.free(block_id);
            self.reprotect_shared_page(start);
            return Err(JitError::InvalidArgument("encoder emitted no code"));
        }

        if let Err(err) = self.arena.mark_executable(start, emitted) {
            self.blocks.free(block_id);
            return Err(err);
        }
        let committed = match self.arena.alloc(emitted) {
            Some(offset) => offset,
            None => {
                self.blocks.free(block_id);
                return Err(JitError::CapacityExceeded {
                    needed: emitted,
                    available: window_len,
                });
            }
        };
        debug_assert_eq!(committed, start);

        let host = self.arena.ptr_at(start) as usize;
        if let Some(block) = self.blocks.get_mut(block_id) {
            block.guest_size = (cursor - pc) as u32;
            block.host_offset = start;
            block.host_size = emitted as u32;
            block.num_instructions = num_instructions;
            if saw_syscall {
                block.flags |= flags::SYSCALL;
            }
        }
        if let Some(displaced) = self.cache.insert(pc, host, emitted as u32, block_id) {
            self.retire(displaced);
        }
        self.blocks.set_valid(block_id);

        self.stats.blocks_translated += 1;
        self.stats.bytes_emitted += emitted as u64;
        log::debug!(
            "[JIT] translated pc={:#x}: {} guest insns -> {} host bytes at {:#x}",
            pc,
            num_instructions,
            emitted,
            start
        );
        Ok(host as *const u8)
    }

    /// Cache lookup only; never translates on a miss. The caller falls
    /// back to [`translate_block`](Self::translate_block).
    pub fn translate_block_fast(&mut self, pc: u64) -> Option<*const u8> {
        match self.cache.lookup(pc) {
            Some((host, _)) => {
                self.stats.cache_hits += 1;
                self.note_execution(pc);
                Some(host as *const u8)
            }
            None => {
                self.stats.cache_misses += 1;
                None
            }
        }
    }

    /// Drop the mapping for `pc` and retire its descriptor. Absent pc is
    /// a no-op.
    pub fn invalidate(&mut self, pc: u64) {
        if let Some(block_id) = self.cache.invalidate(pc) {
            self.retire(block_id);
        }
    }

    /// Drop every mapping and descriptor. Arena bytes stay allocated
    /// (dead) until [`reset`](Self::reset).
    pub fn flush(&mut self) {
        self.cache.flush();
        self.blocks.clear();
    }

    /// Flush plus arena rewind: all code cache space becomes reusable,
    /// the mapping itself is kept.
    pub fn reset(&mut self) -> Result<(), JitError> {
        self.flush();
        self.arena.reset()
    }

    /// Bump execution bookkeeping on a cache hit.
    fn note_execution(&mut self, pc: u64) {
        let hot_threshold = self.config.hot_threshold;
        if let Some(block_id) = self.cache.peek(pc).and_then(|e| e.block) {
            if let Some(block) = self.blocks.get_mut(block_id) {
                block.execute_count += 1;
                if block.execute_count >= hot_threshold {
                    block.flags |= flags::HOT;
                }
            }
        }
    }

    /// Re-protect a page that was flipped writable for an emission
    /// session that did not commit. If `start` is mid-page, the page
    /// holds earlier committed code that must stay executable.
    fn reprotect_shared_page(&mut self, start: usize) {
        if start > 0 && start % self.arena.page_size() != 0 {
            if let Err(err) = self.arena.mark_executable(start - 1, 1) {
                log::warn!("[JIT] failed to re-protect shared code page: {err}");
            }
        }
    }

    /// Unlink, mark stale, and free a displaced or invalidated
    /// descriptor. Host code bytes stay in the arena.
    fn retire(&mut self, block_id: BlockId) {
        self.blocks.unchain(block_id);
        self.blocks.set_stale(block_id);
        self.blocks.free(block_id);
    }

    pub fn stats(&self) -> &JitStats {
        &self.stats
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn arena(&self) -> &CodeCacheArena {
        &self.arena
    }

    pub fn blocks(&self) -> &BlockTable {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut BlockTable {
        &mut self.blocks
    }
}
