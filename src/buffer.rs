//! Bounded code buffer for host instruction emission.
//!
//! A `CodeBuffer` is the byte sink the instruction encoders append to. It
//! either owns its backing storage or borrows a window handed out by the
//! code cache arena. Overflow is reported through a sticky error flag:
//! encoders emit an entire logical sequence without checking, and the
//! caller inspects `has_error()` once at the end.

/// Backing storage for a [`CodeBuffer`].
enum Storage<'a> {
    Owned(Box<[u8]>),
    Borrowed(&'a mut [u8]),
}

impl Storage<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Owned(b) => b,
            Storage::Borrowed(b) => b,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Owned(b) => b,
            Storage::Borrowed(b) => b,
        }
    }
}

/// Append-only byte sink with offset tracking and a sticky overflow flag.
///
/// Every multi-byte emit decomposes into single-byte emits, so the bound
/// check runs before each byte and a mid-word overflow can never write
/// past the end of the storage. All multi-byte values are encoded
/// little-endian.
pub struct CodeBuffer<'a> {
    storage: Storage<'a>,
    offset: usize,
    error: bool,
}

impl<'a> CodeBuffer<'a> {
    /// Create a buffer that owns a zeroed heap allocation of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: Storage::Owned(vec![0u8; capacity].into_boxed_slice()),
            offset: 0,
            error: false,
        }
    }

    /// Create a buffer over caller-provided storage. The storage is not
    /// freed when the buffer is dropped.
    pub fn with_storage(storage: &'a mut [u8]) -> Self {
        Self {
            storage: Storage::Borrowed(storage),
            offset: 0,
            error: false,
        }
    }

    /// Append one byte. On overflow the sticky error flag is set and this
    /// call and every later emit become no-ops.
    pub fn emit_byte(&mut self, byte: u8) {
        if self.error {
            return;
        }
        if self.offset >= self.storage.bytes().len() {
            self.error = true;
            return;
        }
        self.storage.bytes_mut()[self.offset] = byte;
        self.offset += 1;
    }

    /// Append a 32-bit word, little-endian.
    pub fn emit_word32(&mut self, value: u32) {
        for byte in value.to_le_bytes() {
            self.emit_byte(byte);
        }
    }

    /// Append a 64-bit word, little-endian.
    pub fn emit_word64(&mut self, value: u64) {
        for byte in value.to_le_bytes() {
            self.emit_byte(byte);
        }
    }

    /// Append a raw byte sequence.
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.emit_byte(byte);
        }
    }

    /// Overwrite 4 bytes at `offset` with the little-endian `i32` value
    /// `target - (offset + 4)`, the relative displacement a rel32 branch
    /// at `offset` needs to reach `target`. Both arguments are offsets
    /// into this buffer.
    ///
    /// The precondition (`offset + 4` within the emitted region, `target`
    /// previously recorded) is caller-enforced and only debug-asserted.
    pub fn patch_rel32(&mut self, offset: usize, target: usize) {
        if self.error {
            return;
        }
        debug_assert!(offset + 4 <= self.offset, "patch offset out of range");
        let rel = (target as i64 - (offset as i64 + 4)) as i32;
        if let Some(dst) = self.storage.bytes_mut().get_mut(offset..offset + 4) {
            dst.copy_from_slice(&rel.to_le_bytes());
        }
    }

    /// True once any emit has overflowed the storage.
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Number of bytes emitted so far.
    pub fn len(&self) -> usize {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    /// Total storage capacity.
    pub fn capacity(&self) -> usize {
        self.storage.bytes().len()
    }

    /// Bytes still available before overflow.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.offset
    }

    /// The emitted bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage.bytes()[..self.offset]
    }

    /// Pointer to the start of the emitted bytes.
    pub fn as_ptr(&self) -> *const u8 {
        self.storage.bytes().as_ptr()
    }

    /// Rewind to empty and clear the error flag. Storage is retained.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.error = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_within_capacity() {
        let mut buf = CodeBuffer::new(16);
        for i in 0..16u8 {
            buf.emit_byte(i);
        }
        assert!(!buf.has_error());
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.as_slice()[15], 15);
    }

    #[test]
    fn test_overflow_sets_sticky_error() {
        let mut buf = CodeBuffer::new(2);
        buf.emit_byte(0xAA);
        buf.emit_byte(0xBB);
        assert!(!buf.has_error());

        buf.emit_byte(0xCC);
        assert!(buf.has_error());
        assert_eq!(buf.len(), 2);

        // Further emits are no-ops; earlier bytes are untouched.
        buf.emit_byte(0xDD);
        assert_eq!(buf.as_slice(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_word_emission_is_little_endian() {
        let mut buf = CodeBuffer::new(16);
        buf.emit_word32(0x1122_3344);
        buf.emit_word64(0x0102_0304_0506_0708);
        assert_eq!(&buf.as_slice()[..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(
            &buf.as_slice()[4..12],
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_mid_word_overflow_writes_no_partial_garbage() {
        let mut buf = CodeBuffer::new(2);
        buf.emit_word32(0xAABB_CCDD);
        assert!(buf.has_error());
        // The two in-bounds bytes were written, nothing else.
        assert_eq!(buf.as_slice(), &[0xDD, 0xCC]);
    }

    #[test]
    fn test_patch_rel32() {
        let mut buf = CodeBuffer::new(32);
        buf.emit_byte(0xE9); // opcode placeholder
        let patch_at = buf.len();
        buf.emit_word32(0); // displacement placeholder
        for _ in 0..11 {
            buf.emit_byte(0x90);
        }
        let target = buf.len();
        buf.patch_rel32(patch_at, target);

        let disp = i32::from_le_bytes(buf.as_slice()[patch_at..patch_at + 4].try_into().unwrap());
        assert_eq!(disp, (target - (patch_at + 4)) as i32);
    }

    #[test]
    fn test_patch_rel32_backward_target() {
        let mut buf = CodeBuffer::new(32);
        for _ in 0..8 {
            buf.emit_byte(0x90);
        }
        let patch_at = buf.len();
        buf.emit_word32(0);
        buf.patch_rel32(patch_at, 0);

        let disp = i32::from_le_bytes(buf.as_slice()[patch_at..patch_at + 4].try_into().unwrap());
        assert_eq!(disp, -((patch_at + 4) as i32));
    }

    #[test]
    fn test_borrowed_storage() {
        let mut backing = [0u8; 8];
        {
            let mut buf = CodeBuffer::with_storage(&mut backing);
            buf.emit_word32(0xDEAD_BEEF);
            assert_eq!(buf.len(), 4);
            assert!(!buf.has_error());
        }
        assert_eq!(&backing[..4], &[0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn test_reset_clears_error_and_offset() {
        let mut buf = CodeBuffer::new(1);
        buf.emit_word32(1);
        assert!(buf.has_error());
        buf.reset();
        assert!(!buf.has_error());
        assert_eq!(buf.len(), 0);
        buf.emit_byte(7);
        assert_eq!(buf.as_slice(), &[7]);
    }
}
