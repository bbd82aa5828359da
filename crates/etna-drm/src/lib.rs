//! # ETNA Kernel Gateway
//!
//! The opaque request/response boundary between the userspace stack and the
//! etnaviv kernel driver.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Gateway Boundary                         │
//! │                                                              │
//! │  ┌────────────────┐   KernelGateway    ┌─────────────────┐   │
//! │  │  etna-mem /    │ ←────────────────→ │    Backend      │   │
//! │  │  etna-cmd      │                    │                 │   │
//! │  └────────────────┘                    └────────┬────────┘   │
//! │                                                 │            │
//! │                        ┌────────────────────────┼─────────┐  │
//! │                        │                        │         │  │
//! │               ┌────────▼────────┐     ┌─────────▼───────┐ │  │
//! │               │   DrmFile       │     │    SimFile      │ │  │
//! │               │ (ioctl, UAPI)   │     │ (in-process)    │ │  │
//! │               └─────────────────┘     └─────────────────┘ │  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request Flow
//!
//! 1. Caller builds a request from typed values
//! 2. Backend encodes it (UAPI struct or simulated state change)
//! 3. Kernel answers with a value or an errno
//! 4. Caller wraps the errno in the error naming its operation

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abi;
pub mod gateway;
pub mod param;

#[cfg(feature = "drm")]
pub mod drm;
#[cfg(feature = "sim")]
pub mod sim;

// Re-exports
pub use gateway::{GemInfo, GemOpen, KernelGateway, PrimeImport, SubmitBo, SubmitReloc, SubmitRequest};
pub use param::Param;

#[cfg(feature = "drm")]
pub use drm::DrmFile;
#[cfg(feature = "sim")]
pub use sim::{CoreSpec, SimFile, SimGpu, SimOp, SubmitRecord};
