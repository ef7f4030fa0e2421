//! Collaborator interfaces: instruction decoder, instruction encoder,
//! and the guest→host register mapping.
//!
//! The translate loop is ISA-agnostic. The hundreds of per-opcode decode
//! predicates and per-instruction host encoders live behind these two
//! traits; this crate only depends on the classification and the byte
//! stream they produce.

use crate::buffer::CodeBuffer;

/// Coarse classification a decoded instruction is dispatched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionClass {
    Alu,
    Memory,
    Branch,
    Bit,
    StringOp,
    Special,
    /// Unrecognized encoding. Still well-formed (`length >= 1`); the
    /// translate loop ends the block at it without emitting anything.
    Unknown,
}

/// One decoded guest instruction.
#[derive(Debug, Clone, Copy)]
pub struct DecodedInstruction {
    pub class: InstructionClass,
    /// Raw opcode value, meaningful only to the encoder.
    pub opcode: u32,
    pub dst: u8,
    pub src1: u8,
    pub src2: u8,
    pub immediate: i64,
    /// Encoded guest length in bytes. Zero means "stop here" (malformed
    /// input); the loop ends the block cleanly.
    pub length: u8,
    /// True for control-flow instructions that end the basic block.
    pub terminator: bool,
}

impl DecodedInstruction {
    /// A well-formed "unknown" instruction of the given length.
    pub fn unknown(length: u8) -> Self {
        Self {
            class: InstructionClass::Unknown,
            opcode: 0,
            dst: 0,
            src1: 0,
            src2: 0,
            immediate: 0,
            length,
            terminator: false,
        }
    }
}

/// Decodes one guest instruction at a pc. The decoder owns access to
/// guest memory.
///
/// Contract: an unrecognized encoding must still come back as a
/// well-formed [`InstructionClass::Unknown`] with `length >= 1`, so the
/// dispatch loop always makes forward progress or cleanly ends the
/// block — never undefined behavior.
pub trait InstructionDecoder {
    fn decode(&mut self, pc: u64) -> DecodedInstruction;
}

/// Emits host-ISA bytes for decoded instructions, grouped by class.
///
/// Encoders append to the buffer only; they never read or write outside
/// it (the buffer's own bound check enforces this, not the encoder).
/// All multi-byte emission is little-endian two's-complement.
pub trait InstructionEncoder {
    /// Target-specific block entry sequence.
    fn emit_prologue(&self, buf: &mut CodeBuffer<'_>);

    fn emit_alu(&self, buf: &mut CodeBuffer<'_>, inst: &DecodedInstruction, regs: &RegisterMap);
    fn emit_memory(&self, buf: &mut CodeBuffer<'_>, inst: &DecodedInstruction, regs: &RegisterMap);
    fn emit_branch(&self, buf: &mut CodeBuffer<'_>, inst: &DecodedInstruction, regs: &RegisterMap);
    fn emit_bit(&self, buf: &mut CodeBuffer<'_>, inst: &DecodedInstruction, regs: &RegisterMap);
    fn emit_string(&self, buf: &mut CodeBuffer<'_>, inst: &DecodedInstruction, regs: &RegisterMap);
    fn emit_special(&self, buf: &mut CodeBuffer<'_>, inst: &DecodedInstruction, regs: &RegisterMap);

    /// Return-to-dispatcher sequence, appended when a block ends without
    /// a control-flow terminator.
    fn emit_epilogue(&self, buf: &mut CodeBuffer<'_>);
}

/// Guest register index → host register index.
///
/// The mapping is `guest % host_count`: guest registers above the host
/// register count alias lower host registers many-to-one. That aliasing
/// is documented behavior, not a defect; encoders that need exact
/// register state spill through memory instead.
#[derive(Debug, Clone, Copy)]
pub struct RegisterMap {
    host_count: u8,
}

impl RegisterMap {
    pub fn new(host_count: u8) -> Self {
        Self {
            host_count: host_count.max(1),
        }
    }

    pub fn host_reg(&self, guest: u8) -> u8 {
        guest % self.host_count
    }

    pub fn host_count(&self) -> u8 {
        self.host_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_map_identity_below_host_count() {
        let map = RegisterMap::new(16);
        for r in 0..16 {
            assert_eq!(map.host_reg(r), r);
        }
    }

    #[test]
    fn test_register_map_aliases_above_host_count() {
        let map = RegisterMap::new(16);
        assert_eq!(map.host_reg(16), 0);
        assert_eq!(map.host_reg(31), 15);
    }

    #[test]
    fn test_register_map_never_zero_hosts() {
        let map = RegisterMap::new(0);
        assert_eq!(map.host_reg(200), 0);
    }

    #[test]
    fn test_unknown_is_well_formed() {
        let inst = DecodedInstruction::unknown(2);
        assert_eq!(inst.class, InstructionClass::Unknown);
        assert_eq!(inst.length, 2);
        assert!(!inst.terminator);
    }
}
