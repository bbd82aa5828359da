//! # Gateway Contract
//!
//! Every kernel round trip the stack performs, as one trait.
//!
//! Each method is one independent request. None of them retry on failure and
//! none of them keep state that another method depends on, except the kernel
//! objects named by the handles they exchange.

use core::fmt;
use core::ptr::NonNull;
use std::os::fd::{BorrowedFd, OwnedFd};

use etna_core::{
    AddrTransform, BoFlags, ConnectionId, Deadline, Fence, FlinkName, GemHandle, KernelResult,
    PipeId, PrepOp, SubmitBoFlags,
};

// =============================================================================
// REQUEST / RESPONSE TYPES
// =============================================================================

/// Answer to a buffer info query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemInfo {
    /// Offset to pass to mmap
    pub mmap_offset: u64,
    /// Buffer size, when the backend knows it
    pub size: Option<u64>,
}

/// Answer to opening a global name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemOpen {
    /// Handle for the opened buffer
    pub handle: GemHandle,
    /// Buffer size
    pub size: u64,
}

/// Answer to importing a dma-buf descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimeImport {
    /// Handle the descriptor maps to on this connection
    pub handle: GemHandle,
    /// Buffer size, when it can be determined from the descriptor
    pub size: Option<u64>,
}

/// One entry of a submission's buffer table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitBo {
    /// Buffer handle
    pub handle: GemHandle,
    /// Union of the access flags of every relocation against this buffer
    pub flags: SubmitBoFlags,
}

/// One entry of a submission's relocation table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReloc {
    /// Byte offset in the command stream of the word to patch
    pub submit_offset: u32,
    /// Index into the buffer table
    pub reloc_idx: u32,
    /// Byte offset inside the target buffer
    pub reloc_offset: u64,
    /// Transform applied to the patched address
    pub transform: AddrTransform,
}

/// A complete command stream submission
#[derive(Debug, Clone, Copy)]
pub struct SubmitRequest<'a> {
    /// GPU core index
    pub core: u32,
    /// Execution state the stream runs in
    pub pipe: PipeId,
    /// Referenced buffers
    pub bos: &'a [SubmitBo],
    /// Relocations against `bos`
    pub relocs: &'a [SubmitReloc],
    /// Command words
    pub stream: &'a [u32],
}

impl SubmitRequest<'_> {
    /// Stream extent in bytes
    pub fn stream_size(&self) -> u32 {
        (self.stream.len() * 4) as u32
    }
}

// =============================================================================
// GATEWAY TRAIT
// =============================================================================

/// One open connection to the kernel driver
///
/// Implementations must be safe to call from several threads at once; the
/// kernel serializes requests on its side.
pub trait KernelGateway: Send + Sync + fmt::Debug {
    /// Identifier of this connection, unique among live connections
    fn connection_id(&self) -> ConnectionId;

    /// Query one capability of one core
    fn get_param(&self, core: u32, param: u32) -> KernelResult<u64>;

    /// Allocate a buffer
    fn gem_new(&self, size: u64, flags: BoFlags) -> KernelResult<GemHandle>;

    /// Query mmap offset (and size when known) of a buffer
    fn gem_info(&self, handle: GemHandle) -> KernelResult<GemInfo>;

    /// Close a handle
    fn gem_close(&self, handle: GemHandle) -> KernelResult<()>;

    /// Create (or fetch) the global name of a buffer
    fn gem_flink(&self, handle: GemHandle) -> KernelResult<FlinkName>;

    /// Open a buffer by global name
    fn gem_open(&self, name: FlinkName) -> KernelResult<GemOpen>;

    /// Export a buffer as a dma-buf descriptor
    fn prime_handle_to_fd(&self, handle: GemHandle) -> KernelResult<OwnedFd>;

    /// Map a dma-buf descriptor to a handle; the descriptor is not consumed
    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> KernelResult<PrimeImport>;

    /// Map `len` bytes at `offset` into this process
    fn mmap(&self, offset: u64, len: usize) -> KernelResult<NonNull<u8>>;

    /// Undo a mapping made by [`KernelGateway::mmap`]
    ///
    /// # Safety
    /// `ptr`/`len` must come from a successful `mmap` on this gateway and
    /// no reference into the mapping may outlive this call.
    unsafe fn munmap(&self, ptr: NonNull<u8>, len: usize);

    /// Wait until the CPU may access a buffer as described by `op`
    fn cpu_prep(&self, handle: GemHandle, op: PrepOp, deadline: Deadline) -> KernelResult<()>;

    /// End CPU access started by [`KernelGateway::cpu_prep`]
    fn cpu_fini(&self, handle: GemHandle) -> KernelResult<()>;

    /// Queue a command stream, returning its fence
    fn submit(&self, req: &SubmitRequest<'_>) -> KernelResult<Fence>;

    /// Block until `fence` has signalled on `core` or `deadline` passes
    fn wait_fence(&self, core: u32, fence: Fence, deadline: Deadline) -> KernelResult<()>;
}
