//! # Buffer Objects
//!
//! Kernel-resident GPU memory, shared between the CPU and any number of
//! command streams.
//!
//! ## Uniqueness
//!
//! The kernel hands out one handle per buffer per connection. Every import
//! path checks the device tables before (and after) asking the kernel, so a
//! process never holds two instances for one handle:
//!
//! ```text
//!   import ──► lock tables ──► lookup ──► hit? ──► clone existing
//!                                 │
//!                                 └─► kernel open ──► lookup again ──► insert
//! ```
//!
//! The last reference removes the table entries and closes the handle under
//! the same lock, so a concurrent import never sees a half-closed handle.

use core::fmt;
use core::ptr::NonNull;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::Arc;

use etna_core::{
    BoFlags, Deadline, Errno, Error, FlinkName, GemHandle, KernelResult, PrepOp, Result,
    DEFAULT_TIMEOUT_MS,
};
use spin::Mutex;

use crate::device::{BoTables, Device};

// =============================================================================
// STATE
// =============================================================================

/// A live CPU mapping
#[derive(Debug)]
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

/// Lazily populated state
#[derive(Debug, Default)]
struct BoState {
    size: Option<u64>,
    mmap_offset: Option<u64>,
    map: Option<Mapping>,
    name: Option<FlinkName>,
    dmabuf: Option<OwnedFd>,
}

pub(crate) struct BoInner {
    device: Device,
    handle: GemHandle,
    flags: BoFlags,
    state: Mutex<BoState>,
}

// SAFETY: the mapping pointer is only dereferenced through bounds-checked
// copies, and the mapping itself lives until the last reference is dropped.
unsafe impl Send for BoInner {}
// SAFETY: all mutable state sits behind `state`.
unsafe impl Sync for BoInner {}

impl BoInner {
    fn new(device: &Device, handle: GemHandle, flags: BoFlags, size: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            device: device.clone(),
            handle,
            flags,
            state: Mutex::new(BoState {
                size,
                ..BoState::default()
            }),
        })
    }
}

impl Drop for BoInner {
    fn drop(&mut self) {
        let me: *const BoInner = self;
        let gateway = self.device.gateway();
        let state = self.state.get_mut();

        if let Some(map) = state.map.take() {
            // SAFETY: the mapping came from this gateway and no reference
            // into it can outlive the last buffer reference.
            unsafe { gateway.munmap(map.ptr, map.len) };
        }
        state.dmabuf = None;

        let mut tables = self.device.inner.tables.lock();
        if let Some(name) = state.name {
            if tables.names.get(&name).is_some_and(|w| w.as_ptr() == me) {
                tables.names.remove(&name);
            }
        }

        // An import may have found our dead entry and adopted the handle.
        let adopted = tables
            .handles
            .get(&self.handle)
            .is_some_and(|w| w.as_ptr() != me);
        if adopted {
            log::debug!("handle {:?} adopted by a new instance", self.handle);
            return;
        }
        tables.handles.remove(&self.handle);
        if let Err(e) = gateway.gem_close(self.handle) {
            log::warn!("closing {:?} failed: {}", self.handle, e);
        }
    }
}

// =============================================================================
// BUFFER OBJECT
// =============================================================================

/// One GPU buffer
///
/// Cloning retains, dropping releases. The buffer keeps its [`Device`]
/// alive.
#[derive(Clone)]
pub struct BufferObject {
    inner: Arc<BoInner>,
}

/// Live instance registered for `handle`, if any
fn lookup(tables: &BoTables, handle: GemHandle) -> Option<BufferObject> {
    tables
        .handles
        .get(&handle)
        .and_then(|w| w.upgrade())
        .map(|inner| BufferObject { inner })
}

impl BufferObject {
    /// Allocate a new buffer
    pub fn new(device: &Device, size: u64, flags: BoFlags) -> Result<Self> {
        let handle = device
            .gateway()
            .gem_new(size, flags)
            .map_err(Error::AllocationFailed)?;

        let inner = BoInner::new(device, handle, flags, Some(size));
        device
            .inner
            .tables
            .lock()
            .handles
            .insert(handle, Arc::downgrade(&inner));
        log::trace!("allocated {:?}, {} bytes", handle, size);
        Ok(Self { inner })
    }

    /// Open a buffer by global name
    ///
    /// Returns the existing instance when the name (or the handle the kernel
    /// maps it to) is already live on this device.
    pub fn from_name(device: &Device, name: FlinkName) -> Result<Self> {
        let mut tables = device.inner.tables.lock();

        if let Some(inner) = tables.names.get(&name).and_then(|w| w.upgrade()) {
            return Ok(Self { inner });
        }

        let open = device
            .gateway()
            .gem_open(name)
            .map_err(Error::ImportFailed)?;

        let bo = match lookup(&tables, open.handle) {
            Some(bo) => bo,
            None => {
                let inner = BoInner::new(device, open.handle, BoFlags::empty(), Some(open.size));
                tables
                    .handles
                    .insert(open.handle, Arc::downgrade(&inner));
                Self { inner }
            }
        };
        bo.inner.state.lock().name = Some(name);
        tables.names.insert(name, Arc::downgrade(&bo.inner));
        Ok(bo)
    }

    /// Import a dma-buf descriptor
    ///
    /// The descriptor stays owned by the caller.
    pub fn from_dmabuf(device: &Device, fd: BorrowedFd<'_>) -> Result<Self> {
        let mut tables = device.inner.tables.lock();
        Self::import_dmabuf(device, &mut tables, fd)
    }

    fn import_dmabuf(device: &Device, tables: &mut BoTables, fd: BorrowedFd<'_>) -> Result<Self> {
        let import = device
            .gateway()
            .prime_fd_to_handle(fd)
            .map_err(Error::ImportFailed)?;

        if let Some(bo) = lookup(tables, import.handle) {
            let mut state = bo.inner.state.lock();
            if state.size.is_none() {
                state.size = import.size;
            }
            drop(state);
            return Ok(bo);
        }

        let inner = BoInner::new(device, import.handle, BoFlags::empty(), import.size);
        tables
            .handles
            .insert(import.handle, Arc::downgrade(&inner));
        Ok(Self { inner })
    }

    /// Kernel handle
    #[inline]
    pub fn handle(&self) -> GemHandle {
        self.inner.handle
    }

    /// Allocation flags (empty for imported buffers)
    #[inline]
    pub fn flags(&self) -> BoFlags {
        self.inner.flags
    }

    /// Owning device
    #[inline]
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Whether two values refer to the same buffer
    pub fn ptr_eq(&self, other: &BufferObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live references
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Size in bytes, queried from the kernel when not yet known
    pub fn size(&self) -> Result<u64> {
        let mut state = self.inner.state.lock();
        if let Some(size) = state.size {
            return Ok(size);
        }
        self.resolve(&mut state).map_err(Error::QueryFailed)?;
        state.size.ok_or(Error::QueryFailed(Errno::EINVAL))
    }

    /// Size in bytes, if known without a kernel round trip
    pub fn known_size(&self) -> Option<u64> {
        self.inner.state.lock().size
    }

    /// Fetch mmap offset (and size, when reported) once
    fn resolve(&self, state: &mut BoState) -> KernelResult<()> {
        if state.mmap_offset.is_some() {
            return Ok(());
        }
        let info = self.inner.device.gateway().gem_info(self.inner.handle)?;
        state.mmap_offset = Some(info.mmap_offset);
        if state.size.is_none() {
            state.size = info.size;
        }
        Ok(())
    }

    /// Global name, created on first use
    pub fn name(&self) -> Result<FlinkName> {
        let mut state = self.inner.state.lock();
        if let Some(name) = state.name {
            return Ok(name);
        }
        let name = self
            .inner
            .device
            .gateway()
            .gem_flink(self.inner.handle)
            .map_err(Error::ExportFailed)?;
        state.name = Some(name);
        drop(state);

        self.inner
            .device
            .inner
            .tables
            .lock()
            .names
            .insert(name, Arc::downgrade(&self.inner));
        Ok(name)
    }

    /// Export as a dma-buf
    ///
    /// The first call creates the descriptor and keeps it; every call returns
    /// a fresh duplicate owned by the caller.
    pub fn dmabuf(&self) -> Result<OwnedFd> {
        let mut state = self.inner.state.lock();
        if state.dmabuf.is_none() {
            let fd = self
                .inner
                .device
                .gateway()
                .prime_handle_to_fd(self.inner.handle)
                .map_err(Error::ExportFailed)?;
            state.dmabuf = Some(fd);
        }
        match &state.dmabuf {
            Some(fd) => fd
                .try_clone()
                .map_err(|e| Error::ExportFailed(Errno::from(e))),
            None => Err(Error::ExportFailed(Errno::EBADF)),
        }
    }

    /// Map into this process
    ///
    /// Maps once; later calls return the same pointer.
    pub fn map(&self) -> Result<NonNull<u8>> {
        let mut state = self.inner.state.lock();
        if let Some(map) = &state.map {
            return Ok(map.ptr);
        }
        self.resolve(&mut state).map_err(Error::MapFailed)?;

        let (Some(offset), Some(size)) = (state.mmap_offset, state.size) else {
            return Err(Error::MapFailed(Errno::EINVAL));
        };
        let len = size as usize;
        let ptr = self
            .inner
            .device
            .gateway()
            .mmap(offset, len)
            .map_err(Error::MapFailed)?;
        state.map = Some(Mapping { ptr, len });
        Ok(ptr)
    }

    /// Check that `len` bytes at `offset` lie inside the mapping
    fn mapped_range(&self, offset: usize, len: usize) -> Result<NonNull<u8>> {
        let ptr = self.map()?;
        let state = self.inner.state.lock();
        let map_len = state.map.as_ref().map_or(0, |m| m.len);
        match offset.checked_add(len) {
            Some(end) if end <= map_len => Ok(ptr),
            _ => Err(Error::OutOfBounds),
        }
    }

    /// Copy `data` into the buffer at byte `offset`
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let ptr = self.mapped_range(offset, data.len())?;
        // SAFETY: the range was checked against the live mapping.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Copy bytes at `offset` out of the buffer
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let ptr = self.mapped_range(offset, out.len())?;
        // SAFETY: the range was checked against the live mapping.
        unsafe {
            core::ptr::copy_nonoverlapping(ptr.as_ptr().add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    /// Write one 32-bit word at byte `offset`
    pub fn write_u32(&self, offset: usize, value: u32) -> Result<()> {
        self.write(offset, &value.to_ne_bytes())
    }

    /// Read one 32-bit word at byte `offset`
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(offset, &mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }

    // =========================================================================
    // CPU access
    // =========================================================================

    /// Wait until the CPU may access the buffer, bounded by the default timeout
    pub fn cpu_prep(&self, op: PrepOp) -> Result<()> {
        self.cpu_prep_timeout(op, DEFAULT_TIMEOUT_MS)
    }

    /// Wait until the CPU may access the buffer, bounded by `timeout_ms`
    pub fn cpu_prep_timeout(&self, op: PrepOp, timeout_ms: u32) -> Result<()> {
        let deadline = Deadline::after_ms(timeout_ms);
        self.inner
            .device
            .gateway()
            .cpu_prep(self.inner.handle, op, deadline)
            .map_err(|e| {
                if e.is_timeout() {
                    Error::WaitTimeout
                } else {
                    Error::CpuAccessFailed(e)
                }
            })
    }

    /// End CPU access
    pub fn cpu_fini(&self) -> Result<()> {
        self.inner
            .device
            .gateway()
            .cpu_fini(self.inner.handle)
            .map_err(Error::CpuAccessFailed)
    }

    /// Prepare for CPU access, finishing automatically when the guard drops
    pub fn cpu_access(&self, op: PrepOp) -> Result<CpuAccess<'_>> {
        self.cpu_prep(op)?;
        Ok(CpuAccess { bo: self })
    }
}

impl fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("BufferObject")
            .field("handle", &self.inner.handle)
            .field("size", &state.size)
            .field("name", &state.name)
            .field("mapped", &state.map.is_some())
            .finish()
    }
}

// =============================================================================
// CPU ACCESS GUARD
// =============================================================================

/// Scope of CPU access to a buffer; finishes access on drop
#[derive(Debug)]
pub struct CpuAccess<'a> {
    bo: &'a BufferObject,
}

impl CpuAccess<'_> {
    /// The buffer being accessed
    pub fn bo(&self) -> &BufferObject {
        self.bo
    }
}

impl Drop for CpuAccess<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.bo.cpu_fini() {
            log::error!("CPU access to {:?} not finished: {}", self.bo.handle(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etna_drm::{KernelGateway, SimFile, SimGpu, SimOp};
    use std::os::fd::AsFd;

    use crate::device::DeviceRegistry;

    fn setup() -> (Arc<SimGpu>, Arc<SimFile>, Device, DeviceRegistry) {
        let gpu = SimGpu::single_core();
        let file = Arc::new(gpu.open());
        let registry = DeviceRegistry::new();
        let dev = registry.open(Arc::clone(&file) as Arc<dyn KernelGateway>);
        (gpu, file, dev, registry)
    }

    #[test]
    fn test_pattern_visible_through_named_import() {
        let (gpu, _file, dev, registry) = setup();
        let bo = BufferObject::new(&dev, 4096, BoFlags::WC).unwrap();
        bo.map().unwrap();
        bo.write_u32(0, 0xdead_beef).unwrap();
        bo.cpu_prep(PrepOp::WRITE).unwrap();
        bo.cpu_fini().unwrap();

        let name = bo.name().unwrap();
        let other_dev = registry.open(Arc::new(gpu.open()));
        let twin = BufferObject::from_name(&other_dev, name).unwrap();
        assert!(!twin.ptr_eq(&bo));
        assert_eq!(twin.read_u32(0).unwrap(), 0xdead_beef);
    }

    #[test]
    fn test_handle_closed_once_after_last_release() {
        let (_gpu, file, dev, _registry) = setup();
        let bo = BufferObject::new(&dev, 4096, BoFlags::WC).unwrap();
        let handle = bo.handle();
        let clone = bo.clone();
        assert_eq!(bo.ref_count(), 2);

        drop(bo);
        assert!(file.closed_handles().is_empty());
        drop(clone);
        assert_eq!(file.closed_handles(), vec![handle]);
        assert_eq!(dev.live_bos(), 0);
    }

    #[test]
    fn test_import_by_name_dedups() {
        let (_gpu, file, dev, _registry) = setup();
        let bo = BufferObject::new(&dev, 4096, BoFlags::WC).unwrap();
        let name = bo.name().unwrap();

        let again = BufferObject::from_name(&dev, name).unwrap();
        assert!(again.ptr_eq(&bo));
        assert_eq!(file.calls(SimOp::GemOpen), 0);
        assert_eq!(bo.ref_count(), 2);
    }

    #[test]
    fn test_import_unknown_name() {
        let (_gpu, _file, dev, _registry) = setup();
        let res = BufferObject::from_name(&dev, FlinkName::new(77));
        assert_eq!(res.unwrap_err(), Error::ImportFailed(Errno::ENOENT));
    }

    #[test]
    fn test_dmabuf_export_and_import() {
        let (_gpu, file, dev, _registry) = setup();
        let bo = BufferObject::new(&dev, 8192, BoFlags::WC).unwrap();
        let a = bo.dmabuf().unwrap();
        let b = bo.dmabuf().unwrap();
        assert_eq!(file.calls(SimOp::PrimeExport), 1);

        let imported = BufferObject::from_dmabuf(&dev, a.as_fd()).unwrap();
        assert!(imported.ptr_eq(&bo));
        drop(a);
        drop(b);
        drop(imported);
        drop(bo);
        assert_eq!(file.open_handles(), 0);
    }

    #[test]
    fn test_dmabuf_import_on_other_device() {
        let (gpu, _file, dev, registry) = setup();
        let bo = BufferObject::new(&dev, 4096, BoFlags::WC).unwrap();
        bo.write_u32(16, 42).unwrap();
        let fd = bo.dmabuf().unwrap();

        let other = registry.open(Arc::new(gpu.open()));
        let imported = BufferObject::from_dmabuf(&other, fd.as_fd()).unwrap();
        assert_eq!(imported.size().unwrap(), 4096);
        assert_eq!(imported.read_u32(16).unwrap(), 42);
    }

    #[test]
    fn test_map_is_cached() {
        let (_gpu, file, dev, _registry) = setup();
        let bo = BufferObject::new(&dev, 4096, BoFlags::WC).unwrap();
        let p1 = bo.map().unwrap();
        let p2 = bo.map().unwrap();
        assert_eq!(p1, p2);
        assert_eq!(file.calls(SimOp::GemInfo), 1);
        assert_eq!(file.calls(SimOp::Mmap), 1);
    }

    #[test]
    fn test_map_failure() {
        let (_gpu, file, dev, _registry) = setup();
        let bo = BufferObject::new(&dev, 4096, BoFlags::WC).unwrap();
        file.fail_next(SimOp::GemInfo, Errno::EINVAL);
        assert_eq!(bo.map(), Err(Error::MapFailed(Errno::EINVAL)));
        assert!(bo.map().is_ok());
    }

    #[test]
    fn test_out_of_bounds_access() {
        let (_gpu, _file, dev, _registry) = setup();
        let bo = BufferObject::new(&dev, 4096, BoFlags::WC).unwrap();
        assert_eq!(bo.write_u32(4094, 1), Err(Error::OutOfBounds));
        assert_eq!(bo.read_u32(usize::MAX), Err(Error::OutOfBounds));
    }

    #[test]
    fn test_allocation_failure() {
        let (_gpu, file, dev, _registry) = setup();
        file.fail_next(SimOp::GemNew, Errno::ENOMEM);
        let res = BufferObject::new(&dev, 4096, BoFlags::WC);
        assert_eq!(res.unwrap_err(), Error::AllocationFailed(Errno::ENOMEM));
        assert_eq!(dev.live_bos(), 0);
    }

    #[test]
    fn test_cpu_access_guard_finishes() {
        let (_gpu, file, dev, _registry) = setup();
        let bo = BufferObject::new(&dev, 4096, BoFlags::WC).unwrap();
        {
            let access = bo.cpu_access(PrepOp::READ | PrepOp::WRITE).unwrap();
            access.bo().write_u32(0, 7).unwrap();
            assert_eq!(file.calls(SimOp::CpuFini), 0);
        }
        assert_eq!(file.calls(SimOp::CpuFini), 1);
    }

    #[test]
    fn test_cpu_prep_nosync_busy() {
        let (gpu, file, dev, _registry) = setup();
        let bo = BufferObject::new(&dev, 4096, BoFlags::WC).unwrap();
        gpu.hold_completion(true);
        let bos = [etna_drm::SubmitBo {
            handle: bo.handle(),
            flags: etna_core::SubmitBoFlags::WRITE,
        }];
        let req = etna_drm::SubmitRequest {
            core: 0,
            pipe: etna_core::PipeId::ThreeD,
            bos: &bos,
            relocs: &[],
            stream: &[0, 0],
        };
        file.submit(&req).unwrap();

        assert_eq!(
            bo.cpu_prep(PrepOp::WRITE | PrepOp::NOSYNC),
            Err(Error::CpuAccessFailed(Errno::EBUSY))
        );
        assert_eq!(bo.cpu_prep_timeout(PrepOp::WRITE, 5), Err(Error::WaitTimeout));
        gpu.hold_completion(false);
        assert!(bo.cpu_prep(PrepOp::WRITE).is_ok());
    }

    #[test]
    fn test_bo_keeps_device_alive() {
        let (_gpu, _file, dev, registry) = setup();
        let id = dev.connection_id();
        let bo = BufferObject::new(&dev, 4096, BoFlags::WC).unwrap();
        drop(dev);
        assert!(registry.get(id).is_some());
        drop(bo);
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn test_concurrent_import_yields_one_instance() {
        let (gpu, file, dev, _registry) = setup();
        let foreign_dev = DeviceRegistry::new().open(Arc::new(gpu.open()));
        let src = BufferObject::new(&foreign_dev, 4096, BoFlags::WC).unwrap();
        let name = src.name().unwrap();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let dev = dev.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| BufferObject::from_name(&dev, name).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let imports: Vec<BufferObject> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();

        assert!(imports.iter().all(|bo| bo.ptr_eq(&imports[0])));
        assert_eq!(imports[0].ref_count(), imports.len());
        assert_eq!(file.calls(SimOp::GemOpen), 1);

        let handle = imports[0].handle();
        drop(imports);
        let closed: Vec<_> = file
            .closed_handles()
            .into_iter()
            .filter(|h| *h == handle)
            .collect();
        assert_eq!(closed.len(), 1);
    }

    #[test]
    fn test_concurrent_dmabuf_import() {
        let (gpu, _file, dev, _registry) = setup();
        let foreign_dev = DeviceRegistry::new().open(Arc::new(gpu.open()));
        let src = BufferObject::new(&foreign_dev, 4096, BoFlags::WC).unwrap();
        let fd = Arc::new(src.dmabuf().unwrap());

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let dev = dev.clone();
                let fd = Arc::clone(&fd);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| BufferObject::from_dmabuf(&dev, fd.as_fd()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let imports: Vec<BufferObject> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        assert!(imports.iter().all(|bo| bo.ptr_eq(&imports[0])));
        assert_eq!(dev.live_bos(), 1);
    }

    #[test]
    fn test_dying_handle_adopted_by_import() {
        let (gpu, file, dev, _registry) = setup();
        let foreign_dev = DeviceRegistry::new().open(Arc::new(gpu.open()));
        let src = BufferObject::new(&foreign_dev, 4096, BoFlags::WC).unwrap();
        let fd = src.dmabuf().unwrap();

        let dying = BufferObject::from_dmabuf(&dev, fd.as_fd()).unwrap();
        let handle = dying.handle();

        // Hold the tables so the release stalls after the last reference.
        let mut tables = dev.inner.tables.lock();
        let weak = tables.handles.get(&handle).cloned().unwrap();
        let release = std::thread::spawn(move || drop(dying));
        while weak.strong_count() != 0 {
            std::thread::yield_now();
        }

        let adopted = BufferObject::import_dmabuf(&dev, &mut tables, fd.as_fd()).unwrap();
        drop(tables);
        release.join().unwrap();

        assert_eq!(adopted.handle(), handle);
        assert!(file.closed_handles().is_empty());
        assert_eq!(file.open_handles(), 1);

        drop(adopted);
        assert_eq!(file.closed_handles(), vec![handle]);
        assert_eq!(file.open_handles(), 0);
    }

    #[test]
    fn test_release_races_import() {
        let (gpu, file, dev, _registry) = setup();
        let foreign_dev = DeviceRegistry::new().open(Arc::new(gpu.open()));
        let src = BufferObject::new(&foreign_dev, 4096, BoFlags::WC).unwrap();
        let name = src.name().unwrap();
        let fd = Arc::new(src.dmabuf().unwrap());

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let dev = dev.clone();
                let fd = Arc::clone(&fd);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let bo = if i % 2 == 0 {
                            BufferObject::from_dmabuf(&dev, fd.as_fd()).unwrap()
                        } else {
                            BufferObject::from_name(&dev, name).unwrap()
                        };
                        drop(bo);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(dev.live_bos(), 0);
        assert_eq!(file.open_handles(), 0);
        // Every close succeeded and matched exactly one open.
        let mut opened = file.opened_handles();
        let mut closed = file.closed_handles();
        assert_eq!(file.calls(SimOp::GemClose) as usize, closed.len());
        opened.sort();
        closed.sort();
        assert_eq!(opened, closed);
    }
}
