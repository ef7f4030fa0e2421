//! Execution shim: invoking a translated block.
//!
//! Translated blocks are no-argument routines; marshalling guest
//! register state into and out of host registers around the call is an
//! external capability expressed by [`ExecutionContext`]. This module
//! only performs the call itself.

/// Signature of a translated block's entry point.
pub type HostBlockFn = unsafe extern "C" fn();

/// Guest state marshalling hooks around a block call.
pub trait ExecutionContext {
    /// Load guest register state into host registers / memory the
    /// translated code expects.
    fn setup_execution_context(&mut self);

    /// Store host state back into guest registers after the call.
    fn teardown_execution_context(&mut self);
}

/// Invoke translated host code at `host_ptr`.
///
/// # Safety
///
/// `host_ptr` must have come from a successful
/// [`translate_block`](crate::JitContext::translate_block) on a context
/// that has not invalidated, flushed, or reset that mapping since, and
/// the emitted code must honor the no-argument `extern "C"` calling
/// convention on this host.
pub unsafe fn execute<S: ExecutionContext>(state: &mut S, host_ptr: *const u8) {
    debug_assert!(!host_ptr.is_null());
    state.setup_execution_context();
    let entry: HostBlockFn = std::mem::transmute(host_ptr);
    entry();
    state.teardown_execution_context();
}
