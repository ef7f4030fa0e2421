//! Basic-block dynamic binary translator core.
//!
//! Decodes guest-ISA machine code, emits equivalent host-ISA machine
//! code into an executable memory arena, and caches the guest→host
//! mapping for reuse.
//!
//! ## Architecture
//!
//! - [`buffer::CodeBuffer`] — bounded byte sink with offset tracking,
//!   sticky overflow flag, and relocation patching
//! - [`arena::CodeCacheArena`] — one large mmap'd region; bump-pointer
//!   allocation; page-granular W^X transitions
//! - [`cache::TranslationCache`] — fixed-size direct-mapped table,
//!   guest pc → host code
//! - [`block::BlockTable`] — translation block descriptors and the
//!   successor/predecessor linker
//! - [`context::JitContext`] — the decode-classify-emit translate loop
//!   with atomic commit
//! - [`exec`] — the shim that invokes a produced host pointer
//!
//! Per-opcode decode predicates and per-instruction host encoders are
//! external collaborators behind the [`isa`] traits.
//!
//! ## Concurrency
//!
//! Single-threaded, synchronous, lock-free by omission: one writer at a
//! time per [`JitContext`]. Sharing a context across guest threads
//! requires external serialization of every cache, arena, and chain
//! mutation.

pub mod arena;
pub mod block;
pub mod buffer;
pub mod cache;
pub mod context;
pub mod error;
pub mod exec;
pub mod isa;

pub use arena::CodeCacheArena;
pub use block::{BlockId, BlockTable, TranslationBlock};
pub use buffer::CodeBuffer;
pub use cache::{CacheStats, TranslationCache};
pub use context::{JitConfig, JitContext, JitStats};
pub use error::JitError;
pub use exec::{execute, ExecutionContext, HostBlockFn};
pub use isa::{
    DecodedInstruction, InstructionClass, InstructionDecoder, InstructionEncoder, RegisterMap,
};
