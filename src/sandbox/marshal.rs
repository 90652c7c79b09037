//! Byte marshaling across the host/guest memory boundary.
//!
//! The guest opts in by exporting an allocator pair: `alloc(len) -> ptr`
//! and `dealloc(ptr, len)`. The host allocates a guest buffer, writes the
//! input payload there, invokes the entry point with `(ptr, len)`, and
//! reads back whatever region the guest returns. Guest addresses are
//! 32-bit; any arithmetic that would not fit is a hard failure, never
//! silently wrapped.

use tracing::warn;
use wasmtime::{AsContextMut, Func, Memory, Trap, Val};

use crate::error::SandboxError;

pub(crate) const ALLOC_EXPORT: &str = "alloc";
pub(crate) const DEALLOC_EXPORT: &str = "dealloc";
pub(crate) const MEMORY_EXPORT: &str = "memory";

/// A region of guest linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GuestBuffer {
    pub ptr: u32,
    pub len: u32,
}

impl GuestBuffer {
    /// Reject regions whose end does not fit in the 32-bit address space.
    pub(crate) fn checked(ptr: u32, len: u32) -> Result<Self, SandboxError> {
        if u64::from(ptr) + u64::from(len) > u64::from(u32::MAX) {
            return Err(SandboxError::AddressOverflow(format!(
                "region {ptr:#x}+{len} exceeds 32-bit address space"
            )));
        }
        Ok(Self { ptr, len })
    }
}

/// Unpack the packed-i64 return convention: pointer in the high 32 bits,
/// length in the low 32.
pub(crate) fn unpack_region(packed: u64) -> Result<GuestBuffer, SandboxError> {
    GuestBuffer::checked((packed >> 32) as u32, packed as u32)
}

/// Map a failed guest call to the error taxonomy. An epoch-deadline trap
/// is a timeout; everything else falls to the supplied classifier.
pub(crate) fn classify_call_error(
    err: wasmtime::Error,
    fallback: impl FnOnce(String) -> SandboxError,
) -> SandboxError {
    if matches!(err.downcast_ref::<Trap>(), Some(Trap::Interrupt)) {
        return SandboxError::Timeout;
    }
    fallback(err.to_string())
}

/// Ask the guest allocator for a buffer large enough to hold the input.
///
/// The buffer is not yet written; callers must pair this with
/// [`release_input`] on every exit path so the allocation is freed
/// exactly once per call.
pub(crate) fn alloc_input(
    mut store: impl AsContextMut,
    alloc: &Func,
    input_len: usize,
) -> Result<GuestBuffer, SandboxError> {
    let len = u32::try_from(input_len).map_err(|_| {
        SandboxError::AddressOverflow(format!(
            "input of {input_len} bytes exceeds 32-bit address space"
        ))
    })?;

    let mut results = [Val::I32(0)];
    alloc
        .call(&mut store, &[Val::I32(len as i32)], &mut results)
        .map_err(|e| classify_call_error(e, SandboxError::MemoryLimitExceeded))?;

    let ptr = match results[0] {
        Val::I32(p) => p as u32,
        _ => {
            return Err(SandboxError::GuestFault(
                "allocator returned a non-i32 pointer".to_string(),
            ))
        }
    };
    if ptr == 0 && len > 0 {
        return Err(SandboxError::MemoryLimitExceeded(
            "guest allocator returned null".to_string(),
        ));
    }

    GuestBuffer::checked(ptr, len)
}

/// Copy the input payload into an already-allocated guest buffer.
pub(crate) fn copy_input(
    mut store: impl AsContextMut,
    memory: &Memory,
    buf: GuestBuffer,
    input: &[u8],
) -> Result<(), SandboxError> {
    memory
        .write(&mut store, buf.ptr as usize, input)
        .map_err(|e| SandboxError::MemoryLimitExceeded(e.to_string()))
}

/// Invoke the entry point with `(ptr, len)` and decode its return
/// convention: a packed i64, an `(i32, i32)` pair, or no results (the
/// guest wrote to the captured output channel instead). A `(0, 0)`
/// region also means "no result" and defers to the output channel.
pub(crate) fn invoke_entry(
    mut store: impl AsContextMut,
    entry: &Func,
    input: GuestBuffer,
) -> Result<Option<GuestBuffer>, SandboxError> {
    let result_count = entry.ty(&store).results().len();
    let mut results = vec![Val::I64(0); result_count];
    if let Err(e) = entry.call(
        &mut store,
        &[Val::I32(input.ptr as i32), Val::I32(input.len as i32)],
        &mut results,
    ) {
        // proc_exit(0) is a normal completion with no return values
        if let Some(exit) = e.downcast_ref::<wasmtime_wasi::I32Exit>() {
            if exit.0 == 0 {
                return Ok(None);
            }
            return Err(SandboxError::GuestFault(format!(
                "guest exited with status {}",
                exit.0
            )));
        }
        return Err(classify_call_error(e, SandboxError::GuestFault));
    }

    let region = match results[..] {
        [] => None,
        [Val::I64(packed)] => Some(unpack_region(packed as u64)?),
        [Val::I32(ptr), Val::I32(len)] => {
            Some(GuestBuffer::checked(ptr as u32, len as u32)?)
        }
        _ => {
            return Err(SandboxError::GuestFault(
                "entry point returned an unrecognized result shape".to_string(),
            ))
        }
    };
    Ok(region.filter(|r| !(r.ptr == 0 && r.len == 0)))
}

/// Read a guest-owned result region back into host memory.
pub(crate) fn read_output(
    mut store: impl AsContextMut,
    memory: &Memory,
    region: GuestBuffer,
) -> Result<Vec<u8>, SandboxError> {
    let mut out = vec![0u8; region.len as usize];
    memory
        .read(&mut store, region.ptr as usize, &mut out)
        .map_err(|_| {
            SandboxError::GuestFault(format!(
                "result region {:#x}+{} is out of guest bounds",
                region.ptr, region.len
            ))
        })?;
    Ok(out)
}

/// Release the guest input buffer. Best effort: runs on every exit path
/// and never masks the primary execution outcome.
///
/// Accepts both deallocator arities: `dealloc(ptr, len)` and
/// `dealloc(ptr)`.
pub(crate) fn release_input(mut store: impl AsContextMut, dealloc: &Func, buf: GuestBuffer) {
    let params: Vec<Val> = if dealloc.ty(&store).params().len() == 1 {
        vec![Val::I32(buf.ptr as i32)]
    } else {
        vec![Val::I32(buf.ptr as i32), Val::I32(buf.len as i32)]
    };
    if let Err(e) = dealloc.call(&mut store, &params, &mut []) {
        warn!(error = %e, "failed to release guest input buffer");
    }
}
