//! # DRM Backend
//!
//! [`KernelGateway`] over an etnaviv render node, one ioctl per request.

use core::ptr::NonNull;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use bytemuck::Pod;
use etna_core::{
    BoFlags, ConnectionId, Deadline, Errno, Fence, FlinkName, GemHandle, KernelResult, PrepOp,
};

use crate::abi::*;
use crate::gateway::{GemInfo, GemOpen, KernelGateway, PrimeImport, SubmitRequest};
use crate::param::Param;

/// First render node minor
const RENDER_MINOR_FIRST: u32 = 128;
/// Number of render node minors
const RENDER_MINOR_COUNT: u32 = 64;

// =============================================================================
// DRM FILE
// =============================================================================

/// An open DRM file descriptor driven by the etnaviv kernel driver
#[derive(Debug)]
pub struct DrmFile {
    fd: OwnedFd,
}

impl DrmFile {
    /// Open a DRM node by path
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)?;
        Ok(Self { fd: file.into() })
    }

    /// Open the first render node answering etnaviv parameter queries
    pub fn open_render_node() -> io::Result<Self> {
        for minor in RENDER_MINOR_FIRST..RENDER_MINOR_FIRST + RENDER_MINOR_COUNT {
            let path = format!("/dev/dri/renderD{}", minor);
            let Ok(file) = Self::open(&path) else {
                continue;
            };
            if file.get_param(0, Param::Model.raw()).is_ok() {
                log::info!("using etnaviv render node {}", path);
                return Ok(file);
            }
        }
        Err(io::Error::from_raw_os_error(libc::ENODEV))
    }

    /// Wrap an already open descriptor
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Issue one ioctl, restarting it when interrupted
    fn ioctl<T: Pod>(&self, request: u64, arg: &mut T) -> KernelResult<()> {
        loop {
            // SAFETY: `arg` is a live, correctly sized UAPI struct for
            // `request`, and the descriptor is open for the lifetime of self.
            let ret = unsafe {
                libc::ioctl(self.fd.as_raw_fd(), request as _, arg as *mut T)
            };
            if ret != -1 {
                return Ok(());
            }
            let err = Errno::last();
            if err != Errno::EINTR && err != Errno::EAGAIN {
                return Err(err);
            }
        }
    }
}

impl AsFd for DrmFile {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

fn timespec(deadline: Deadline) -> EtnavivTimespec {
    EtnavivTimespec {
        tv_sec: deadline.sec,
        tv_nsec: deadline.nsec,
    }
}

/// Size of a dma-buf, found by seeking to its end
fn dmabuf_size(fd: BorrowedFd<'_>) -> Option<u64> {
    // SAFETY: plain syscalls on a borrowed, open descriptor.
    let end = unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_END) };
    if end < 0 {
        return None;
    }
    // SAFETY: as above.
    unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_SET) };
    Some(end as u64)
}

impl KernelGateway for DrmFile {
    fn connection_id(&self) -> ConnectionId {
        ConnectionId(self.fd.as_raw_fd() as u64)
    }

    fn get_param(&self, core: u32, param: u32) -> KernelResult<u64> {
        let mut req = EtnavivParam {
            pipe: core,
            param,
            value: 0,
        };
        self.ioctl(DRM_IOCTL_ETNAVIV_GET_PARAM, &mut req)?;
        Ok(req.value)
    }

    fn gem_new(&self, size: u64, flags: BoFlags) -> KernelResult<GemHandle> {
        let mut req = EtnavivGemNew {
            size,
            flags: flags.bits(),
            handle: 0,
        };
        self.ioctl(DRM_IOCTL_ETNAVIV_GEM_NEW, &mut req)?;
        Ok(GemHandle::new(req.handle))
    }

    fn gem_info(&self, handle: GemHandle) -> KernelResult<GemInfo> {
        let mut req = EtnavivGemInfo {
            handle: handle.raw(),
            ..Default::default()
        };
        self.ioctl(DRM_IOCTL_ETNAVIV_GEM_INFO, &mut req)?;
        Ok(GemInfo {
            mmap_offset: req.offset,
            size: None,
        })
    }

    fn gem_close(&self, handle: GemHandle) -> KernelResult<()> {
        let mut req = DrmGemClose {
            handle: handle.raw(),
            pad: 0,
        };
        self.ioctl(DRM_IOCTL_GEM_CLOSE, &mut req)
    }

    fn gem_flink(&self, handle: GemHandle) -> KernelResult<FlinkName> {
        let mut req = DrmGemFlink {
            handle: handle.raw(),
            name: 0,
        };
        self.ioctl(DRM_IOCTL_GEM_FLINK, &mut req)?;
        Ok(FlinkName::new(req.name))
    }

    fn gem_open(&self, name: FlinkName) -> KernelResult<GemOpen> {
        let mut req = DrmGemOpen {
            name: name.raw(),
            ..Default::default()
        };
        self.ioctl(DRM_IOCTL_GEM_OPEN, &mut req)?;
        Ok(GemOpen {
            handle: GemHandle::new(req.handle),
            size: req.size,
        })
    }

    fn prime_handle_to_fd(&self, handle: GemHandle) -> KernelResult<OwnedFd> {
        let mut req = DrmPrimeHandle {
            handle: handle.raw(),
            flags: DRM_CLOEXEC | DRM_RDWR,
            fd: -1,
        };
        self.ioctl(DRM_IOCTL_PRIME_HANDLE_TO_FD, &mut req)?;
        // SAFETY: the kernel just installed this descriptor for us.
        Ok(unsafe { OwnedFd::from_raw_fd(req.fd) })
    }

    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> KernelResult<PrimeImport> {
        let mut req = DrmPrimeHandle {
            handle: 0,
            flags: 0,
            fd: fd.as_raw_fd(),
        };
        self.ioctl(DRM_IOCTL_PRIME_FD_TO_HANDLE, &mut req)?;
        Ok(PrimeImport {
            handle: GemHandle::new(req.handle),
            size: dmabuf_size(fd),
        })
    }

    fn mmap(&self, offset: u64, len: usize) -> KernelResult<NonNull<u8>> {
        // SAFETY: a fresh shared mapping; the kernel validates offset/len.
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd.as_raw_fd(),
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Errno::last());
        }
        NonNull::new(ptr.cast::<u8>()).ok_or(Errno::EINVAL)
    }

    unsafe fn munmap(&self, ptr: NonNull<u8>, len: usize) {
        // SAFETY: caller guarantees the mapping came from `mmap` above.
        if unsafe { libc::munmap(ptr.as_ptr().cast(), len) } != 0 {
            log::warn!("munmap of {} bytes failed: {}", len, Errno::last());
        }
    }

    fn cpu_prep(&self, handle: GemHandle, op: PrepOp, deadline: Deadline) -> KernelResult<()> {
        let mut req = EtnavivGemCpuPrep {
            handle: handle.raw(),
            op: op.bits(),
            timeout: timespec(deadline),
        };
        self.ioctl(DRM_IOCTL_ETNAVIV_GEM_CPU_PREP, &mut req)
    }

    fn cpu_fini(&self, handle: GemHandle) -> KernelResult<()> {
        let mut req = EtnavivGemCpuFini {
            handle: handle.raw(),
            flags: 0,
        };
        self.ioctl(DRM_IOCTL_ETNAVIV_GEM_CPU_FINI, &mut req)
    }

    fn submit(&self, req: &SubmitRequest<'_>) -> KernelResult<Fence> {
        let bos: Vec<EtnavivGemSubmitBo> = req
            .bos
            .iter()
            .map(|bo| EtnavivGemSubmitBo {
                flags: bo.flags.bits(),
                handle: bo.handle.raw(),
                presumed: 0,
            })
            .collect();

        let mut relocs = Vec::with_capacity(req.relocs.len());
        for reloc in req.relocs {
            // The etnaviv UAPI overwrites the whole word with the address.
            if !reloc.transform.is_identity() {
                log::error!(
                    "relocation at {:#x} carries a transform the kernel cannot apply",
                    reloc.submit_offset
                );
                return Err(Errno::EINVAL);
            }
            relocs.push(EtnavivGemSubmitReloc {
                submit_offset: reloc.submit_offset,
                reloc_idx: reloc.reloc_idx,
                reloc_offset: reloc.reloc_offset,
                flags: 0,
                pad: 0,
            });
        }

        let mut submit = EtnavivGemSubmit {
            fence: 0,
            pipe: req.core,
            exec_state: req.pipe.exec_state(),
            nr_bos: bos.len() as u32,
            nr_relocs: relocs.len() as u32,
            stream_size: req.stream_size(),
            bos: bos.as_ptr() as u64,
            relocs: relocs.as_ptr() as u64,
            stream: req.stream.as_ptr() as u64,
        };
        self.ioctl(DRM_IOCTL_ETNAVIV_GEM_SUBMIT, &mut submit)?;
        Ok(Fence::new(submit.fence))
    }

    fn wait_fence(&self, core: u32, fence: Fence, deadline: Deadline) -> KernelResult<()> {
        let mut req = EtnavivWaitFence {
            pipe: core,
            fence: fence.raw(),
            flags: 0,
            pad: 0,
            timeout: timespec(deadline),
        };
        self.ioctl(DRM_IOCTL_ETNAVIV_WAIT_FENCE, &mut req)
    }
}
