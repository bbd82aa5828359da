//! # Command Stream
//!
//! Authoring context for one [`Pipe`]: command words, the buffers they
//! reference and the relocations the kernel patches in at submit time.
//!
//! ## Layout
//!
//! ```text
//!   ┌──────────────────────────────────────────┬──────────────┐
//!   │ authored words           ▲ cursor        │ end clearance│
//!   └──────────────────────────┴───────────────┴──────────────┘
//!   0                                      usable        capacity
//! ```
//!
//! The end clearance is left for the sequence the kernel appends to every
//! stream; authoring never writes into it.
//!
//! ## Cycle
//!
//! A flush submits the buffer table, relocation table and words, then starts
//! a new authoring cycle: tables are emptied, retained buffers released and
//! the cursor rewound. Double-buffered streams move on to the other buffer,
//! single-buffered streams run their reset callback.

use core::fmt;

use etna_core::{
    AddrTransform, Error, Fence, GemHandle, RelocFlags, Result, SubmitBoFlags, DEFAULT_TIMEOUT_MS,
};
use etna_drm::{SubmitBo, SubmitReloc, SubmitRequest};
use etna_mem::BufferObject;
use hashbrown::HashMap;

use crate::pipe::Pipe;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// How many word buffers a stream authors into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffering {
    /// One buffer, reused after every flush
    Single,
    /// Two buffers, alternated on every flush
    Double,
}

impl Buffering {
    fn count(self) -> usize {
        match self {
            Self::Single => 1,
            Self::Double => 2,
        }
    }
}

/// Command stream configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Buffer size in bytes
    pub size: u32,
    /// Bytes left free at the end for the kernel's closing sequence
    pub end_clearance: u32,
    /// Buffering mode
    pub buffering: Buffering,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            size: 0x8000,
            end_clearance: 24,
            buffering: Buffering::Single,
        }
    }
}

impl StreamConfig {
    /// Capacity in words
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.size / 4
    }

    /// Words usable for authoring
    #[inline]
    pub fn usable(&self) -> u32 {
        self.capacity().saturating_sub(self.end_clearance.div_ceil(4))
    }

    fn validate(&self) -> Result<()> {
        if self.size % 8 != 0 || self.end_clearance.div_ceil(4) >= self.capacity() {
            log::error!("unusable stream configuration {:?}", self);
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }
}

// =============================================================================
// RELOCATION
// =============================================================================

/// A GPU address to be patched into the stream at submit time
#[derive(Debug, Clone, Copy)]
pub struct Reloc<'b> {
    /// Target buffer
    pub bo: &'b BufferObject,
    /// Byte offset inside the buffer
    pub offset: u64,
    /// Transform applied to the address
    pub transform: AddrTransform,
    /// How the GPU accesses the buffer
    pub flags: RelocFlags,
}

impl<'b> Reloc<'b> {
    /// Untransformed relocation
    pub fn new(bo: &'b BufferObject, offset: u64, flags: RelocFlags) -> Self {
        Self {
            bo,
            offset,
            transform: AddrTransform::NONE,
            flags,
        }
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Stream statistics
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Successful submissions
    pub flushes: u64,
    /// Rejected submissions
    pub failed_flushes: u64,
    /// Buffer rotations
    pub rotations: u64,
    /// Words submitted
    pub words_submitted: u64,
    /// Relocations submitted
    pub relocs_submitted: u64,
}

// =============================================================================
// COMMAND STREAM
// =============================================================================

/// Called after a single-buffered stream starts a new cycle
pub type ResetCallback<'a> = Box<dyn FnMut(&mut CmdStream<'a>) + 'a>;

/// Command stream bound to one pipe
pub struct CmdStream<'a> {
    pipe: &'a Pipe<'a>,
    config: StreamConfig,
    buffers: Vec<Vec<u32>>,
    current: usize,
    /// Cursor, in words
    offset: u32,
    bos: Vec<SubmitBo>,
    /// References held until the next cycle
    bo_refs: Vec<BufferObject>,
    bo_index: HashMap<GemHandle, u32>,
    relocs: Vec<SubmitReloc>,
    fence: Fence,
    reset_notify: Option<ResetCallback<'a>>,
    stats: StreamStats,
}

impl<'a> CmdStream<'a> {
    /// Create a stream with the default configuration
    pub fn new(pipe: &'a Pipe<'a>) -> Result<Self> {
        Self::with_config(pipe, StreamConfig::default())
    }

    /// Create a stream
    pub fn with_config(pipe: &'a Pipe<'a>, config: StreamConfig) -> Result<Self> {
        config.validate()?;
        let capacity = config.capacity() as usize;
        let buffers = (0..config.buffering.count())
            .map(|_| vec![0u32; capacity])
            .collect();

        Ok(Self {
            pipe,
            config,
            buffers,
            current: 0,
            offset: 0,
            bos: Vec::new(),
            bo_refs: Vec::new(),
            bo_index: HashMap::new(),
            relocs: Vec::new(),
            fence: Fence::NONE,
            reset_notify: None,
            stats: StreamStats::default(),
        })
    }

    /// Install the callback run at the start of every single-buffered cycle
    pub fn set_reset_notify(&mut self, notify: impl FnMut(&mut CmdStream<'a>) + 'a) {
        self.reset_notify = Some(Box::new(notify));
    }

    /// Remove the reset callback
    pub fn clear_reset_notify(&mut self) {
        self.reset_notify = None;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The pipe this stream submits to
    #[inline]
    pub fn pipe(&self) -> &'a Pipe<'a> {
        self.pipe
    }

    /// Configuration
    #[inline]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Cursor, in words
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Words that can still be authored in this cycle
    #[inline]
    pub fn avail(&self) -> u32 {
        self.config.usable().saturating_sub(self.offset)
    }

    /// Index of the buffer being authored
    #[inline]
    pub fn active_buffer(&self) -> usize {
        self.current
    }

    /// Distinct buffers referenced in this cycle
    #[inline]
    pub fn bo_count(&self) -> usize {
        self.bos.len()
    }

    /// Relocations recorded in this cycle
    #[inline]
    pub fn reloc_count(&self) -> usize {
        self.relocs.len()
    }

    /// Fence of the last successful submission
    #[inline]
    pub fn timestamp(&self) -> Fence {
        self.fence
    }

    /// Statistics
    #[inline]
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Authored words of this cycle
    pub fn words(&self) -> &[u32] {
        &self.buffers[self.current][..self.offset as usize]
    }

    // =========================================================================
    // Authoring
    // =========================================================================

    /// Make room for `n` words, flushing first when they don't fit
    ///
    /// The cursor is aligned to an even word. A request larger than an empty
    /// buffer fails without flushing.
    pub fn reserve(&mut self, n: u32) -> Result<()> {
        let usable = self.config.usable();
        if n > usable {
            log::error!("reservation of {} words exceeds {} usable", n, usable);
            return Err(Error::CapacityExceeded {
                requested: n,
                available: usable,
            });
        }

        if self.offset + self.offset % 2 + n > usable {
            log::trace!("stream full at {} words, flushing", self.offset);
            self.flush()?;
            // The reset callback may have emitted state already.
            if self.offset + self.offset % 2 + n > usable {
                log::error!(
                    "reservation of {} words does not fit after flush at {}",
                    n,
                    self.offset
                );
                return Err(Error::CapacityExceeded {
                    requested: n,
                    available: self.avail(),
                });
            }
        }
        self.align();
        Ok(())
    }

    /// Pad the cursor to an even word
    fn align(&mut self) {
        if self.offset % 2 != 0 {
            self.buffers[self.current][self.offset as usize] = 0;
            self.offset += 1;
        }
    }

    fn check_room(&self, n: u32) -> Result<()> {
        if self.offset + n > self.config.usable() {
            return Err(Error::CapacityExceeded {
                requested: n,
                available: self.avail(),
            });
        }
        Ok(())
    }

    /// Append one word
    pub fn emit(&mut self, data: u32) -> Result<()> {
        self.check_room(1)?;
        self.buffers[self.current][self.offset as usize] = data;
        self.offset += 1;
        Ok(())
    }

    /// Append a relocated address
    ///
    /// The buffer is recorded once per cycle with the union of the access
    /// flags of all its relocations. The word written now is the transform
    /// applied to address 0; the kernel patches in the real address.
    pub fn emit_reloc(&mut self, reloc: &Reloc<'_>) -> Result<()> {
        if !reloc.bo.device().ptr_eq(self.pipe.device()) {
            log::error!("relocation to {:?} from another device", reloc.bo.handle());
            return Err(Error::InvalidParameter);
        }
        self.check_room(1)?;
        let reloc_idx = self.bo_index(reloc.bo, reloc.flags.into());
        self.relocs.push(SubmitReloc {
            submit_offset: self.offset * 4,
            reloc_idx,
            reloc_offset: reloc.offset,
            transform: reloc.transform,
        });
        self.emit(reloc.transform.apply(0))
    }

    /// Index of `bo` in this cycle's buffer table, adding it if needed
    fn bo_index(&mut self, bo: &BufferObject, flags: SubmitBoFlags) -> u32 {
        let handle = bo.handle();
        if let Some(&idx) = self.bo_index.get(&handle) {
            self.bos[idx as usize].flags |= flags;
            return idx;
        }

        let idx = self.bos.len() as u32;
        self.bos.push(SubmitBo { handle, flags });
        self.bo_refs.push(bo.clone());
        self.bo_index.insert(handle, idx);
        idx
    }

    /// Word at `offset`, if authored in this cycle
    pub fn get(&self, offset: u32) -> Option<u32> {
        self.words().get(offset as usize).copied()
    }

    /// Overwrite an authored word
    pub fn set(&mut self, offset: u32, data: u32) -> Result<()> {
        if offset >= self.offset {
            return Err(Error::OutOfBounds);
        }
        self.buffers[self.current][offset as usize] = data;
        Ok(())
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Submit this cycle and start the next one
    ///
    /// An empty cycle is not submitted; the last fence is returned instead.
    /// A rejected submission still discards the cycle.
    pub fn flush(&mut self) -> Result<Fence> {
        if self.offset == 0 {
            return Ok(self.fence);
        }
        let res = self.submit_and_clear();
        self.restart();
        res
    }

    /// Flush and wait for the GPU to finish, bounded by the default timeout
    pub fn finish(&mut self) -> Result<()> {
        self.finish_timeout(DEFAULT_TIMEOUT_MS)
    }

    /// Flush and wait for the GPU to finish, bounded by `timeout_ms`
    ///
    /// The next cycle starts only after the wait, so a reset callback sees an
    /// idle GPU. A rejected submission still waits for the last fence; a
    /// failed wait takes precedence over a failed submission.
    pub fn finish_timeout(&mut self, timeout_ms: u32) -> Result<()> {
        if self.offset == 0 {
            return self.pipe.wait(self.fence, timeout_ms);
        }
        let submitted = self.submit_and_clear();
        let waited = self.pipe.wait(self.fence, timeout_ms);
        self.restart();
        waited.and(submitted.map(|_| ()))
    }

    fn submit_and_clear(&mut self) -> Result<Fence> {
        let res = self.submit();
        self.bos.clear();
        self.bo_refs.clear();
        self.bo_index.clear();
        self.relocs.clear();
        self.offset = 0;
        res
    }

    fn submit(&mut self) -> Result<Fence> {
        let req = SubmitRequest {
            core: self.pipe.core(),
            pipe: self.pipe.id(),
            bos: &self.bos,
            relocs: &self.relocs,
            stream: &self.buffers[self.current][..self.offset as usize],
        };

        match self.pipe.device().gateway().submit(&req) {
            Ok(fence) => {
                log::debug!(
                    "submitted {} words, {} bos, {} relocs: fence {}",
                    self.offset,
                    self.bos.len(),
                    self.relocs.len(),
                    fence
                );
                self.fence = fence;
                self.stats.flushes += 1;
                self.stats.words_submitted += self.offset as u64;
                self.stats.relocs_submitted += self.relocs.len() as u64;
                Ok(fence)
            }
            Err(e) => {
                log::error!("submit of {} words failed: {}", self.offset, e);
                self.stats.failed_flushes += 1;
                Err(Error::SubmitFailed(e))
            }
        }
    }

    /// Start a new authoring cycle
    fn restart(&mut self) {
        match self.config.buffering {
            Buffering::Double => {
                self.current = (self.current + 1) % self.buffers.len();
                self.stats.rotations += 1;
            }
            Buffering::Single => {
                if let Some(mut notify) = self.reset_notify.take() {
                    notify(self);
                    // The callback may have installed a replacement.
                    if self.reset_notify.is_none() {
                        self.reset_notify = Some(notify);
                    }
                }
            }
        }
    }
}

impl fmt::Debug for CmdStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmdStream")
            .field("core", &self.pipe.core())
            .field("pipe", &self.pipe.id())
            .field("buffer", &self.current)
            .field("offset", &self.offset)
            .field("bos", &self.bos.len())
            .field("relocs", &self.relocs.len())
            .field("fence", &self.fence)
            .finish()
    }
}
