//! # Kernel ABI
//!
//! Request layouts of the etnaviv UAPI and of the generic DRM GEM/PRIME
//! requests, plus their ioctl numbers. Layouts are fixed by the kernel and
//! checked here at compile time.

#![allow(missing_docs)]

use bytemuck::{Pod, Zeroable};
use static_assertions::assert_eq_size;

// =============================================================================
// IOCTL NUMBERS
// =============================================================================

const IOC_WRITE: u64 = 1;
const IOC_READ: u64 = 2;

const DRM_IOCTL_BASE: u64 = b'd' as u64;
const DRM_COMMAND_BASE: u64 = 0x40;

const fn ioc(dir: u64, nr: u64, size: usize) -> u64 {
    (dir << 30) | ((size as u64) << 16) | (DRM_IOCTL_BASE << 8) | nr
}

const fn iow<T>(nr: u64) -> u64 {
    ioc(IOC_WRITE, nr, core::mem::size_of::<T>())
}

const fn iowr<T>(nr: u64) -> u64 {
    ioc(IOC_READ | IOC_WRITE, nr, core::mem::size_of::<T>())
}

/// Request numbers (etnaviv numbers are relative to the driver command base)
pub mod nr {
    pub const GEM_CLOSE: u64 = 0x09;
    pub const GEM_FLINK: u64 = 0x0a;
    pub const GEM_OPEN: u64 = 0x0b;
    pub const PRIME_HANDLE_TO_FD: u64 = 0x2d;
    pub const PRIME_FD_TO_HANDLE: u64 = 0x2e;

    pub const ETNAVIV_GET_PARAM: u64 = 0x00;
    pub const ETNAVIV_GEM_NEW: u64 = 0x02;
    pub const ETNAVIV_GEM_INFO: u64 = 0x03;
    pub const ETNAVIV_GEM_CPU_PREP: u64 = 0x04;
    pub const ETNAVIV_GEM_CPU_FINI: u64 = 0x05;
    pub const ETNAVIV_GEM_SUBMIT: u64 = 0x06;
    pub const ETNAVIV_WAIT_FENCE: u64 = 0x07;
}

/// `DRM_IOCTL_GEM_CLOSE`
pub const DRM_IOCTL_GEM_CLOSE: u64 = iow::<DrmGemClose>(nr::GEM_CLOSE);
/// `DRM_IOCTL_GEM_FLINK`
pub const DRM_IOCTL_GEM_FLINK: u64 = iowr::<DrmGemFlink>(nr::GEM_FLINK);
/// `DRM_IOCTL_GEM_OPEN`
pub const DRM_IOCTL_GEM_OPEN: u64 = iowr::<DrmGemOpen>(nr::GEM_OPEN);
/// `DRM_IOCTL_PRIME_HANDLE_TO_FD`
pub const DRM_IOCTL_PRIME_HANDLE_TO_FD: u64 = iowr::<DrmPrimeHandle>(nr::PRIME_HANDLE_TO_FD);
/// `DRM_IOCTL_PRIME_FD_TO_HANDLE`
pub const DRM_IOCTL_PRIME_FD_TO_HANDLE: u64 = iowr::<DrmPrimeHandle>(nr::PRIME_FD_TO_HANDLE);

/// `DRM_IOCTL_ETNAVIV_GET_PARAM`
pub const DRM_IOCTL_ETNAVIV_GET_PARAM: u64 =
    iowr::<EtnavivParam>(DRM_COMMAND_BASE + nr::ETNAVIV_GET_PARAM);
/// `DRM_IOCTL_ETNAVIV_GEM_NEW`
pub const DRM_IOCTL_ETNAVIV_GEM_NEW: u64 =
    iowr::<EtnavivGemNew>(DRM_COMMAND_BASE + nr::ETNAVIV_GEM_NEW);
/// `DRM_IOCTL_ETNAVIV_GEM_INFO`
pub const DRM_IOCTL_ETNAVIV_GEM_INFO: u64 =
    iowr::<EtnavivGemInfo>(DRM_COMMAND_BASE + nr::ETNAVIV_GEM_INFO);
/// `DRM_IOCTL_ETNAVIV_GEM_CPU_PREP`
pub const DRM_IOCTL_ETNAVIV_GEM_CPU_PREP: u64 =
    iow::<EtnavivGemCpuPrep>(DRM_COMMAND_BASE + nr::ETNAVIV_GEM_CPU_PREP);
/// `DRM_IOCTL_ETNAVIV_GEM_CPU_FINI`
pub const DRM_IOCTL_ETNAVIV_GEM_CPU_FINI: u64 =
    iow::<EtnavivGemCpuFini>(DRM_COMMAND_BASE + nr::ETNAVIV_GEM_CPU_FINI);
/// `DRM_IOCTL_ETNAVIV_GEM_SUBMIT`
pub const DRM_IOCTL_ETNAVIV_GEM_SUBMIT: u64 =
    iowr::<EtnavivGemSubmit>(DRM_COMMAND_BASE + nr::ETNAVIV_GEM_SUBMIT);
/// `DRM_IOCTL_ETNAVIV_WAIT_FENCE`
pub const DRM_IOCTL_ETNAVIV_WAIT_FENCE: u64 =
    iow::<EtnavivWaitFence>(DRM_COMMAND_BASE + nr::ETNAVIV_WAIT_FENCE);

/// `O_CLOEXEC` request for exported descriptors
pub const DRM_CLOEXEC: u32 = libc::O_CLOEXEC as u32;
/// `O_RDWR` request for exported descriptors
pub const DRM_RDWR: u32 = libc::O_RDWR as u32;

// =============================================================================
// GENERIC DRM REQUESTS
// =============================================================================

/// `struct drm_gem_close`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DrmGemClose {
    pub handle: u32,
    pub pad: u32,
}

/// `struct drm_gem_flink`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DrmGemFlink {
    pub handle: u32,
    pub name: u32,
}

/// `struct drm_gem_open`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DrmGemOpen {
    pub name: u32,
    pub handle: u32,
    pub size: u64,
}

/// `struct drm_prime_handle`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DrmPrimeHandle {
    pub handle: u32,
    pub flags: u32,
    pub fd: i32,
}

// =============================================================================
// ETNAVIV REQUESTS
// =============================================================================

/// `struct drm_etnaviv_timespec`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct EtnavivTimespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

/// `struct drm_etnaviv_param`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct EtnavivParam {
    pub pipe: u32,
    pub param: u32,
    pub value: u64,
}

/// `struct drm_etnaviv_gem_new`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct EtnavivGemNew {
    pub size: u64,
    pub flags: u32,
    pub handle: u32,
}

/// `struct drm_etnaviv_gem_info`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct EtnavivGemInfo {
    pub handle: u32,
    pub pad: u32,
    pub offset: u64,
}

/// `struct drm_etnaviv_gem_cpu_prep`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct EtnavivGemCpuPrep {
    pub handle: u32,
    pub op: u32,
    pub timeout: EtnavivTimespec,
}

/// `struct drm_etnaviv_gem_cpu_fini`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct EtnavivGemCpuFini {
    pub handle: u32,
    pub flags: u32,
}

/// `struct drm_etnaviv_gem_submit_reloc`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct EtnavivGemSubmitReloc {
    pub submit_offset: u32,
    pub reloc_idx: u32,
    pub reloc_offset: u64,
    pub flags: u32,
    pub pad: u32,
}

/// `struct drm_etnaviv_gem_submit_bo`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct EtnavivGemSubmitBo {
    pub flags: u32,
    pub handle: u32,
    pub presumed: u64,
}

/// `struct drm_etnaviv_gem_submit`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct EtnavivGemSubmit {
    pub fence: u32,
    pub pipe: u32,
    pub exec_state: u32,
    pub nr_bos: u32,
    pub nr_relocs: u32,
    pub stream_size: u32,
    pub bos: u64,
    pub relocs: u64,
    pub stream: u64,
}

/// `struct drm_etnaviv_wait_fence`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct EtnavivWaitFence {
    pub pipe: u32,
    pub fence: u32,
    pub flags: u32,
    pub pad: u32,
    pub timeout: EtnavivTimespec,
}

assert_eq_size!(DrmGemClose, [u8; 8]);
assert_eq_size!(DrmGemFlink, [u8; 8]);
assert_eq_size!(DrmGemOpen, [u8; 16]);
assert_eq_size!(DrmPrimeHandle, [u8; 12]);
assert_eq_size!(EtnavivTimespec, [u8; 16]);
assert_eq_size!(EtnavivParam, [u8; 16]);
assert_eq_size!(EtnavivGemNew, [u8; 16]);
assert_eq_size!(EtnavivGemInfo, [u8; 16]);
assert_eq_size!(EtnavivGemCpuPrep, [u8; 24]);
assert_eq_size!(EtnavivGemCpuFini, [u8; 8]);
assert_eq_size!(EtnavivGemSubmitReloc, [u8; 24]);
assert_eq_size!(EtnavivGemSubmitBo, [u8; 16]);
assert_eq_size!(EtnavivGemSubmit, [u8; 48]);
assert_eq_size!(EtnavivWaitFence, [u8; 32]);
