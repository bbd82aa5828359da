//! # Simulated Kernel
//!
//! An in-process stand-in for the etnaviv kernel driver.
//!
//! Buffers are backed by memfds, so mapping and dma-buf export/import behave
//! like the real thing: two mappings of one buffer see the same bytes and an
//! exported descriptor can be imported again by inode. Submissions are
//! validated the way the kernel validates them and retire immediately unless
//! completion is held back, which is how tests exercise bounded waits.
//!
//! ```text
//!   SimGpu (objects, names, fences per core)
//!     ├── SimFile #1 (handle table, call counters, fault plan)
//!     └── SimFile #2
//! ```

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::sync::Arc;

use etna_core::{
    BoFlags, ConnectionId, Deadline, Errno, Fence, FlinkName, GemHandle, KernelResult, PipeId,
    PrepOp,
};
use hashbrown::HashMap;
use spin::Mutex;

use crate::gateway::{GemInfo, GemOpen, KernelGateway, PrimeImport, SubmitBo, SubmitReloc, SubmitRequest};
use crate::param::Param;

const PAGE_SIZE: u64 = 4096;
/// Fake mmap offsets are the object id shifted by this much
const MMAP_OFFSET_SHIFT: u32 = 16;
/// Connection ids of simulated files start here, clear of real descriptors
const CONNECTION_ID_BASE: u64 = 1 << 32;
/// Poll interval of the wait loops
const POLL_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// CORE SPEC
// =============================================================================

/// Capability values reported for one simulated core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSpec {
    /// Chip model, 0 means "no GPU"
    pub model: u32,
    /// Chip revision
    pub revision: u32,
    /// Feature words 0..=4
    pub features: [u32; 5],
    /// Vertex stream count
    pub stream_count: u32,
    /// Highest register index
    pub register_max: u32,
    /// Thread count
    pub thread_count: u32,
    /// Vertex cache size
    pub vertex_cache_size: u32,
    /// Shader core count
    pub shader_core_count: u32,
    /// Pixel pipe count
    pub pixel_pipes: u32,
    /// Vertex output buffer size
    pub vertex_output_buffer_size: u32,
    /// Buffer size
    pub buffer_size: u32,
    /// Shader instruction count
    pub instruction_count: u32,
    /// Shader constant count
    pub num_constants: u32,
}

impl CoreSpec {
    /// A GC2000 rev 5108, as found on i.MX6Q
    pub fn gc2000() -> Self {
        Self {
            model: 0x2000,
            revision: 0x5108,
            features: [0xe0287cad, 0xc1489eff, 0xfefbfad9, 0xeb9d4fbf, 0x0000_0000],
            stream_count: 4,
            register_max: 64,
            thread_count: 1024,
            vertex_cache_size: 8,
            shader_core_count: 4,
            pixel_pipes: 2,
            vertex_output_buffer_size: 512,
            buffer_size: 0,
            instruction_count: 512,
            num_constants: 168,
        }
    }

    /// A core slot with nothing behind it
    pub fn absent() -> Self {
        Self {
            model: 0,
            revision: 0,
            features: [0; 5],
            ..Self::gc2000()
        }
    }

    fn value(&self, param: Param) -> u64 {
        let v = match param {
            Param::Model => self.model,
            Param::Revision => self.revision,
            Param::Features0 => self.features[0],
            Param::Features1 => self.features[1],
            Param::Features2 => self.features[2],
            Param::Features3 => self.features[3],
            Param::Features4 => self.features[4],
            Param::StreamCount => self.stream_count,
            Param::RegisterMax => self.register_max,
            Param::ThreadCount => self.thread_count,
            Param::VertexCacheSize => self.vertex_cache_size,
            Param::ShaderCoreCount => self.shader_core_count,
            Param::PixelPipes => self.pixel_pipes,
            Param::VertexOutputBufferSize => self.vertex_output_buffer_size,
            Param::BufferSize => self.buffer_size,
            Param::InstructionCount => self.instruction_count,
            Param::NumConstants => self.num_constants,
        };
        v as u64
    }
}

impl Default for CoreSpec {
    fn default() -> Self {
        Self::gc2000()
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Kernel request kinds, for call counting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    /// GET_PARAM
    GetParam,
    /// GEM_NEW
    GemNew,
    /// GEM_INFO
    GemInfo,
    /// GEM_CLOSE
    GemClose,
    /// GEM_FLINK
    GemFlink,
    /// GEM_OPEN
    GemOpen,
    /// PRIME_HANDLE_TO_FD
    PrimeExport,
    /// PRIME_FD_TO_HANDLE
    PrimeImport,
    /// mmap
    Mmap,
    /// GEM_CPU_PREP
    CpuPrep,
    /// GEM_CPU_FINI
    CpuFini,
    /// GEM_SUBMIT
    Submit,
    /// WAIT_FENCE
    WaitFence,
}

/// A submission as the simulated kernel received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRecord {
    /// Core index
    pub core: u32,
    /// Execution state
    pub pipe: PipeId,
    /// Buffer table
    pub bos: Vec<SubmitBo>,
    /// Relocation table
    pub relocs: Vec<SubmitReloc>,
    /// Command words
    pub stream: Vec<u32>,
    /// Fence handed back
    pub fence: Fence,
}

// =============================================================================
// GPU STATE
// =============================================================================

#[derive(Debug)]
struct SimObject {
    memfd: OwnedFd,
    ino: u64,
    size: u64,
    name: Option<FlinkName>,
    /// Open handles across all files
    handles: u32,
    /// Last fence per core that references this object
    busy: HashMap<u32, Fence>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CoreState {
    submitted: Fence,
    completed: Fence,
}

#[derive(Debug)]
struct GpuState {
    objects: HashMap<u64, SimObject>,
    names: HashMap<FlinkName, u64>,
    next_object: u64,
    next_name: u32,
    cores: Vec<CoreState>,
    hold_completion: bool,
}

impl GpuState {
    fn object(&self, id: u64) -> KernelResult<&SimObject> {
        self.objects.get(&id).ok_or(Errno::ENOENT)
    }

    fn insert_object(&mut self, memfd: OwnedFd, size: u64) -> KernelResult<u64> {
        let ino = inode_of(&memfd)?;
        let id = self.next_object;
        self.next_object += 1;
        self.objects.insert(
            id,
            SimObject {
                memfd,
                ino,
                size,
                name: None,
                handles: 0,
                busy: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn is_idle(&self, id: u64) -> bool {
        match self.objects.get(&id) {
            Some(obj) => obj
                .busy
                .iter()
                .all(|(core, fence)| fence.is_signaled_by(self.cores[*core as usize].completed)),
            None => true,
        }
    }
}

fn inode_of(fd: &impl AsRawFd) -> KernelResult<u64> {
    // SAFETY: `stat` is plain old data, fully written by fstat on success.
    let mut st: libc::stat = unsafe { core::mem::zeroed() };
    // SAFETY: valid descriptor and out-pointer.
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut st) } != 0 {
        return Err(Errno::last());
    }
    Ok(st.st_ino as u64)
}

fn file_size(fd: &impl AsRawFd) -> KernelResult<u64> {
    // SAFETY: as in `inode_of`.
    let mut st: libc::stat = unsafe { core::mem::zeroed() };
    // SAFETY: valid descriptor and out-pointer.
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut st) } != 0 {
        return Err(Errno::last());
    }
    Ok(st.st_size as u64)
}

fn create_memfd(size: u64) -> KernelResult<OwnedFd> {
    // SAFETY: NUL-terminated name, valid flags.
    let raw = unsafe { libc::memfd_create(b"etna-sim-bo\0".as_ptr().cast(), libc::MFD_CLOEXEC) };
    if raw < 0 {
        return Err(Errno::last());
    }
    // SAFETY: memfd_create returned a fresh descriptor we now own.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    // SAFETY: valid descriptor.
    if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } != 0 {
        return Err(Errno::last());
    }
    Ok(fd)
}

// =============================================================================
// SIM GPU
// =============================================================================

/// A simulated GPU shared by any number of [`SimFile`] connections
#[derive(Debug)]
pub struct SimGpu {
    specs: Vec<CoreSpec>,
    state: Mutex<GpuState>,
    next_connection: AtomicU64,
}

impl SimGpu {
    /// Create a GPU with one core per spec
    pub fn new(specs: Vec<CoreSpec>) -> Arc<Self> {
        let cores = vec![CoreState::default(); specs.len()];
        Arc::new(Self {
            specs,
            state: Mutex::new(GpuState {
                objects: HashMap::new(),
                names: HashMap::new(),
                next_object: 1,
                next_name: 1,
                cores,
                hold_completion: false,
            }),
            next_connection: AtomicU64::new(CONNECTION_ID_BASE),
        })
    }

    /// A GPU with a single GC2000 core
    pub fn single_core() -> Arc<Self> {
        Self::new(vec![CoreSpec::gc2000()])
    }

    /// Open a new connection
    pub fn open(self: &Arc<Self>) -> SimFile {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        SimFile {
            gpu: Arc::clone(self),
            id: ConnectionId(id),
            state: Mutex::new(FileState::default()),
        }
    }

    /// Stop (or resume) retiring submissions
    ///
    /// Resuming retires everything submitted so far.
    pub fn hold_completion(&self, hold: bool) {
        let mut state = self.state.lock();
        state.hold_completion = hold;
        if !hold {
            for core in state.cores.iter_mut() {
                core.completed = core.submitted;
            }
        }
    }

    /// Retire submissions on `core` up to and including `fence`
    pub fn complete_up_to(&self, core: u32, fence: Fence) {
        let mut state = self.state.lock();
        if let Some(c) = state.cores.get_mut(core as usize) {
            if fence.is_after(c.completed) && !fence.is_after(c.submitted) {
                c.completed = fence;
            }
        }
    }

    /// Last fence retired on `core`
    pub fn completed(&self, core: u32) -> Fence {
        self.state
            .lock()
            .cores
            .get(core as usize)
            .map(|c| c.completed)
            .unwrap_or(Fence::NONE)
    }

    /// Number of buffer objects alive in the simulated kernel
    pub fn live_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    fn core(&self, core: u32) -> KernelResult<&CoreSpec> {
        self.specs.get(core as usize).ok_or(Errno::ENODEV)
    }

    /// Poll until `done` holds or the deadline passes
    fn wait_until(&self, deadline: Deadline, mut done: impl FnMut(&GpuState) -> bool) -> KernelResult<()> {
        loop {
            if done(&*self.state.lock()) {
                return Ok(());
            }
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return Err(Errno::ETIMEDOUT);
            }
            std::thread::sleep(remaining.min(POLL_INTERVAL));
        }
    }
}

// =============================================================================
// SIM FILE
// =============================================================================

#[derive(Debug, Default)]
struct FileState {
    handles: HashMap<u32, u64>,
    opened: Vec<GemHandle>,
    closed: Vec<GemHandle>,
    calls: HashMap<SimOp, u32>,
    faults: HashMap<SimOp, Errno>,
    submits: Vec<SubmitRecord>,
}

impl FileState {
    fn object_id(&self, handle: GemHandle) -> KernelResult<u64> {
        self.handles.get(&handle.raw()).copied().ok_or(Errno::ENOENT)
    }

    /// Install `object` under the lowest free handle, as the kernel's idr does
    fn new_handle(&mut self, gpu: &mut GpuState, object: u64) -> GemHandle {
        let mut handle = 1;
        while self.handles.contains_key(&handle) {
            handle += 1;
        }
        self.handles.insert(handle, object);
        self.opened.push(GemHandle::new(handle));
        if let Some(obj) = gpu.objects.get_mut(&object) {
            obj.handles += 1;
        }
        GemHandle::new(handle)
    }
}

/// One connection to a [`SimGpu`]
#[derive(Debug)]
pub struct SimFile {
    gpu: Arc<SimGpu>,
    id: ConnectionId,
    state: Mutex<FileState>,
}

impl SimFile {
    /// The GPU behind this connection
    pub fn gpu(&self) -> &Arc<SimGpu> {
        &self.gpu
    }

    /// Make the next `op` request fail with `err`
    pub fn fail_next(&self, op: SimOp, err: Errno) {
        self.state.lock().faults.insert(op, err);
    }

    /// Number of `op` requests received so far (including failed ones)
    pub fn calls(&self, op: SimOp) -> u32 {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Handles created so far, in order
    pub fn opened_handles(&self) -> Vec<GemHandle> {
        self.state.lock().opened.clone()
    }

    /// Handles closed so far, in order
    pub fn closed_handles(&self) -> Vec<GemHandle> {
        self.state.lock().closed.clone()
    }

    /// Handles currently open on this connection
    pub fn open_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Submissions received so far
    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state.lock().submits.clone()
    }

    /// Count the request and consume an injected fault
    fn enter(&self, op: SimOp) -> KernelResult<()> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        match state.faults.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl KernelGateway for SimFile {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn get_param(&self, core: u32, param: u32) -> KernelResult<u64> {
        self.enter(SimOp::GetParam)?;
        let spec = self.gpu.core(core)?;
        let param = Param::from_raw(param).ok_or(Errno::EINVAL)?;
        Ok(spec.value(param))
    }

    fn gem_new(&self, size: u64, _flags: BoFlags) -> KernelResult<GemHandle> {
        self.enter(SimOp::GemNew)?;
        if size == 0 {
            return Err(Errno::EINVAL);
        }
        let size = size.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let memfd = create_memfd(size)?;

        let mut file = self.state.lock();
        let mut gpu = self.gpu.state.lock();
        let object = gpu.insert_object(memfd, size)?;
        Ok(file.new_handle(&mut gpu, object))
    }

    fn gem_info(&self, handle: GemHandle) -> KernelResult<GemInfo> {
        self.enter(SimOp::GemInfo)?;
        let file = self.state.lock();
        let object = file.object_id(handle)?;
        let gpu = self.gpu.state.lock();
        let obj = gpu.object(object)?;
        Ok(GemInfo {
            mmap_offset: object << MMAP_OFFSET_SHIFT,
            size: Some(obj.size),
        })
    }

    fn gem_close(&self, handle: GemHandle) -> KernelResult<()> {
        self.enter(SimOp::GemClose)?;
        let mut file = self.state.lock();
        let object = file.handles.remove(&handle.raw()).ok_or(Errno::EINVAL)?;
        file.closed.push(handle);

        let mut gpu = self.gpu.state.lock();
        let gone = match gpu.objects.get_mut(&object) {
            Some(obj) => {
                obj.handles -= 1;
                obj.handles == 0
            }
            None => false,
        };
        if gone {
            if let Some(obj) = gpu.objects.remove(&object) {
                if let Some(name) = obj.name {
                    gpu.names.remove(&name);
                }
            }
        }
        Ok(())
    }

    fn gem_flink(&self, handle: GemHandle) -> KernelResult<FlinkName> {
        self.enter(SimOp::GemFlink)?;
        let file = self.state.lock();
        let object = file.object_id(handle)?;
        let mut gpu = self.gpu.state.lock();
        let next = FlinkName::new(gpu.next_name);
        let obj = gpu.objects.get_mut(&object).ok_or(Errno::ENOENT)?;
        if let Some(name) = obj.name {
            return Ok(name);
        }
        obj.name = Some(next);
        gpu.next_name += 1;
        gpu.names.insert(next, object);
        Ok(next)
    }

    fn gem_open(&self, name: FlinkName) -> KernelResult<GemOpen> {
        self.enter(SimOp::GemOpen)?;
        let mut file = self.state.lock();
        let mut gpu = self.gpu.state.lock();
        let object = *gpu.names.get(&name).ok_or(Errno::ENOENT)?;
        let size = gpu.object(object)?.size;
        // Like the kernel, every open creates a fresh handle.
        let handle = file.new_handle(&mut gpu, object);
        Ok(GemOpen { handle, size })
    }

    fn prime_handle_to_fd(&self, handle: GemHandle) -> KernelResult<OwnedFd> {
        self.enter(SimOp::PrimeExport)?;
        let file = self.state.lock();
        let object = file.object_id(handle)?;
        let gpu = self.gpu.state.lock();
        let obj = gpu.object(object)?;
        Ok(obj.memfd.try_clone()?)
    }

    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> KernelResult<PrimeImport> {
        self.enter(SimOp::PrimeImport)?;
        let ino = inode_of(&fd)?;

        let mut file = self.state.lock();
        let mut gpu = self.gpu.state.lock();
        let found = gpu
            .objects
            .iter()
            .find(|(_, obj)| obj.ino == ino)
            .map(|(id, obj)| (*id, obj.size));
        let (object, size) = match found {
            Some(hit) => hit,
            None => {
                // Foreign dma-buf: wrap it in a new object.
                let size = file_size(&fd)?;
                let object = gpu.insert_object(fd.try_clone_to_owned()?, size)?;
                (object, size)
            }
        };

        // The kernel hands back the existing handle for an object this file
        // already has open.
        let existing = file
            .handles
            .iter()
            .find(|(_, obj)| **obj == object)
            .map(|(handle, _)| GemHandle::new(*handle));
        let handle = match existing {
            Some(handle) => handle,
            None => file.new_handle(&mut gpu, object),
        };
        Ok(PrimeImport {
            handle,
            size: Some(size),
        })
    }

    fn mmap(&self, offset: u64, len: usize) -> KernelResult<NonNull<u8>> {
        self.enter(SimOp::Mmap)?;
        let object = offset >> MMAP_OFFSET_SHIFT;
        let gpu = self.gpu.state.lock();
        let obj = gpu.object(object).map_err(|_| Errno::EINVAL)?;
        if len == 0 || len as u64 > obj.size {
            return Err(Errno::EINVAL);
        }
        // SAFETY: shared mapping of a memfd at least `len` bytes long.
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                obj.memfd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Errno::last());
        }
        NonNull::new(ptr.cast::<u8>()).ok_or(Errno::EINVAL)
    }

    unsafe fn munmap(&self, ptr: NonNull<u8>, len: usize) {
        // SAFETY: caller guarantees the mapping came from `mmap` above.
        unsafe { libc::munmap(ptr.as_ptr().cast(), len) };
    }

    fn cpu_prep(&self, handle: GemHandle, op: PrepOp, deadline: Deadline) -> KernelResult<()> {
        self.enter(SimOp::CpuPrep)?;
        let object = self.state.lock().object_id(handle)?;
        if op.contains(PrepOp::NOSYNC) {
            return if self.gpu.state.lock().is_idle(object) {
                Ok(())
            } else {
                Err(Errno::EBUSY)
            };
        }
        self.gpu.wait_until(deadline, |gpu| gpu.is_idle(object))
    }

    fn cpu_fini(&self, handle: GemHandle) -> KernelResult<()> {
        self.enter(SimOp::CpuFini)?;
        self.state.lock().object_id(handle).map(|_| ())
    }

    fn submit(&self, req: &SubmitRequest<'_>) -> KernelResult<Fence> {
        self.enter(SimOp::Submit)?;
        self.gpu.core(req.core)?;
        let stream_size = req.stream_size();

        let mut file = self.state.lock();
        let mut gpu = self.gpu.state.lock();

        let mut objects = Vec::with_capacity(req.bos.len());
        for bo in req.bos {
            objects.push(file.object_id(bo.handle)?);
        }
        for reloc in req.relocs {
            let Some(&object) = objects.get(reloc.reloc_idx as usize) else {
                return Err(Errno::EINVAL);
            };
            if reloc.submit_offset % 4 != 0 || reloc.submit_offset + 4 > stream_size {
                return Err(Errno::EINVAL);
            }
            if reloc.reloc_offset >= gpu.object(object)?.size {
                return Err(Errno::EINVAL);
            }
        }

        let hold = gpu.hold_completion;
        let core = &mut gpu.cores[req.core as usize];
        core.submitted = core.submitted.next();
        let fence = core.submitted;
        if !hold {
            core.completed = fence;
        }
        for object in &objects {
            if let Some(obj) = gpu.objects.get_mut(object) {
                obj.busy.insert(req.core, fence);
            }
        }

        file.submits.push(SubmitRecord {
            core: req.core,
            pipe: req.pipe,
            bos: req.bos.to_vec(),
            relocs: req.relocs.to_vec(),
            stream: req.stream.to_vec(),
            fence,
        });
        Ok(fence)
    }

    fn wait_fence(&self, core: u32, fence: Fence, deadline: Deadline) -> KernelResult<()> {
        self.enter(SimOp::WaitFence)?;
        self.gpu.core(core)?;
        let submitted = self.gpu.state.lock().cores[core as usize].submitted;
        if fence.is_after(submitted) {
            return Err(Errno::EINVAL);
        }
        let core = core as usize;
        self.gpu
            .wait_until(deadline, |gpu| fence.is_signaled_by(gpu.cores[core].completed))
    }
}

impl Drop for SimFile {
    fn drop(&mut self) {
        // Closing the file drops every handle it still holds.
        let handles: Vec<u32> = self.state.lock().handles.keys().copied().collect();
        for handle in handles {
            let _ = self.gem_close(GemHandle::new(handle));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etna_core::SubmitBoFlags;

    fn request<'a>(bos: &'a [SubmitBo], relocs: &'a [SubmitReloc], stream: &'a [u32]) -> SubmitRequest<'a> {
        SubmitRequest {
            core: 0,
            pipe: PipeId::ThreeD,
            bos,
            relocs,
            stream,
        }
    }

    #[test]
    fn test_fences_increase() {
        let gpu = SimGpu::single_core();
        let file = gpu.open();
        let a = file.submit(&request(&[], &[], &[0; 2])).unwrap();
        let b = file.submit(&request(&[], &[], &[0; 2])).unwrap();
        assert!(b.is_after(a));
        assert_eq!(gpu.completed(0), b);
    }

    #[test]
    fn test_flink_open_gives_new_handle() {
        let gpu = SimGpu::single_core();
        let file = gpu.open();
        let h = file.gem_new(100, BoFlags::WC).unwrap();
        let name = file.gem_flink(h).unwrap();
        assert_eq!(file.gem_flink(h).unwrap(), name);
        let opened = file.gem_open(name).unwrap();
        assert_ne!(opened.handle, h);
        assert_eq!(opened.size, PAGE_SIZE);
    }

    #[test]
    fn test_prime_import_reuses_handle() {
        let gpu = SimGpu::single_core();
        let file = gpu.open();
        let h = file.gem_new(PAGE_SIZE, BoFlags::WC).unwrap();
        let fd = file.prime_handle_to_fd(h).unwrap();
        let import = file.prime_fd_to_handle(std::os::fd::AsFd::as_fd(&fd)).unwrap();
        assert_eq!(import.handle, h);

        let other = gpu.open();
        let import = other.prime_fd_to_handle(std::os::fd::AsFd::as_fd(&fd)).unwrap();
        assert_eq!(import.size, Some(PAGE_SIZE));
        assert_eq!(gpu.live_objects(), 1);
    }

    #[test]
    fn test_object_freed_with_last_handle() {
        let gpu = SimGpu::single_core();
        let file = gpu.open();
        let h = file.gem_new(10, BoFlags::WC).unwrap();
        assert_eq!(gpu.live_objects(), 1);
        file.gem_close(h).unwrap();
        assert_eq!(gpu.live_objects(), 0);
        assert_eq!(file.gem_close(h), Err(Errno::EINVAL));
        assert_eq!(file.closed_handles(), vec![h]);
    }

    #[test]
    fn test_lowest_free_handle_reused() {
        let gpu = SimGpu::single_core();
        let file = gpu.open();
        let a = file.gem_new(10, BoFlags::WC).unwrap();
        let b = file.gem_new(10, BoFlags::WC).unwrap();
        let c = file.gem_new(10, BoFlags::WC).unwrap();
        assert_eq!([a.raw(), b.raw(), c.raw()], [1, 2, 3]);

        file.gem_close(b).unwrap();
        file.gem_close(a).unwrap();
        assert_eq!(file.gem_new(10, BoFlags::WC), Ok(a));
        assert_eq!(file.gem_new(10, BoFlags::WC), Ok(b));
        assert_eq!(file.gem_new(10, BoFlags::WC).unwrap().raw(), 4);
        assert_eq!(file.opened_handles().len(), 6);
    }

    #[test]
    fn test_submit_validates_relocs() {
        let gpu = SimGpu::single_core();
        let file = gpu.open();
        let h = file.gem_new(PAGE_SIZE, BoFlags::WC).unwrap();
        let bos = [SubmitBo {
            handle: h,
            flags: SubmitBoFlags::READ,
        }];
        let bad = [SubmitReloc {
            submit_offset: 8,
            reloc_idx: 0,
            reloc_offset: 0,
            transform: Default::default(),
        }];
        assert_eq!(file.submit(&request(&bos, &bad, &[0; 2])), Err(Errno::EINVAL));

        let unknown = [SubmitBo {
            handle: GemHandle::new(99),
            flags: SubmitBoFlags::READ,
        }];
        assert_eq!(file.submit(&request(&unknown, &[], &[0; 2])), Err(Errno::ENOENT));
    }

    #[test]
    fn test_wait_times_out_while_held() {
        let gpu = SimGpu::single_core();
        let file = gpu.open();
        gpu.hold_completion(true);
        let fence = file.submit(&request(&[], &[], &[0; 2])).unwrap();
        let res = file.wait_fence(0, fence, Deadline::after_ms(5));
        assert_eq!(res, Err(Errno::ETIMEDOUT));

        gpu.hold_completion(false);
        file.wait_fence(0, fence, Deadline::after_ms(5)).unwrap();
    }

    #[test]
    fn test_wait_on_unsubmitted_fence() {
        let gpu = SimGpu::single_core();
        let file = gpu.open();
        let res = file.wait_fence(0, Fence::new(3), Deadline::after_ms(5));
        assert_eq!(res, Err(Errno::EINVAL));
    }

    #[test]
    fn test_fault_injection_is_one_shot() {
        let gpu = SimGpu::single_core();
        let file = gpu.open();
        file.fail_next(SimOp::GemNew, Errno::ENOMEM);
        assert_eq!(file.gem_new(10, BoFlags::WC), Err(Errno::ENOMEM));
        assert!(file.gem_new(10, BoFlags::WC).is_ok());
        assert_eq!(file.calls(SimOp::GemNew), 2);
    }

    #[test]
    fn test_unknown_param() {
        let gpu = SimGpu::single_core();
        let file = gpu.open();
        assert_eq!(file.get_param(0, Param::Model.raw()), Ok(0x2000));
        assert_eq!(file.get_param(0, 0x42), Err(Errno::EINVAL));
        assert_eq!(file.get_param(3, Param::Model.raw()), Err(Errno::ENODEV));
    }
}
